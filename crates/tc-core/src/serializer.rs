use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::account::AccountRecord;
use crate::app_metadata::AppMetadataRecord;
use crate::credential::CredentialRecord;
use crate::errors::{CacheError, RecordKind, Result};

/// Record types that can live in a cache store
pub trait CacheRecord {
    const KIND: RecordKind;
}

impl CacheRecord for CredentialRecord {
    const KIND: RecordKind = RecordKind::Credential;
}

impl CacheRecord for AccountRecord {
    const KIND: RecordKind = RecordKind::Account;
}

impl CacheRecord for AppMetadataRecord {
    const KIND: RecordKind = RecordKind::AppMetadata;
}

/// Turns records into bytes and back.
///
/// Stores receive a serializer per call rather than per instance, so one
/// physical store can hold bytes written in several formats.
pub trait ItemSerializer<T>: Send + Sync {
    fn serialize(&self, item: &T) -> Result<Vec<u8>>;

    /// Must fail with [`CacheError::Deserialization`] on malformed input
    fn deserialize(&self, data: &[u8]) -> Result<T>;
}

pub trait CredentialSerializer: ItemSerializer<CredentialRecord> {}
impl<S: ItemSerializer<CredentialRecord>> CredentialSerializer for S {}

pub trait AccountSerializer: ItemSerializer<AccountRecord> {}
impl<S: ItemSerializer<AccountRecord>> AccountSerializer for S {}

pub trait AppMetadataSerializer: ItemSerializer<AppMetadataRecord> {}
impl<S: ItemSerializer<AppMetadataRecord>> AppMetadataSerializer for S {}

/// Current cache format: the record's serde representation as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<T> ItemSerializer<T> for JsonSerializer
where
    T: CacheRecord + Serialize + DeserializeOwned,
{
    fn serialize(&self, item: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(item).map_err(|e| CacheError::serialization(T::KIND, e))
    }

    fn deserialize(&self, data: &[u8]) -> Result<T> {
        serde_json::from_slice(data).map_err(|e| CacheError::deserialization(T::KIND, e))
    }
}
