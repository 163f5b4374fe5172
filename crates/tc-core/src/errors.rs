use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// The three kinds of keyed records a cache store holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Credential,
    Account,
    AppMetadata,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [
        RecordKind::Credential,
        RecordKind::Account,
        RecordKind::AppMetadata,
    ];

    /// Stable lowercase name, used for directory names and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Credential => "credentials",
            RecordKind::Account => "accounts",
            RecordKind::AppMetadata => "app_metadata",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record kind that could not be cleared
#[derive(Debug)]
pub struct ClearFailure {
    pub kind: RecordKind,
    pub error: CacheError,
}

impl fmt::Display for ClearFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.error)
    }
}

/// Token cache error types
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Storage failure during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to deserialize {kind} record: {reason}")]
    Deserialization { kind: RecordKind, reason: String },

    #[error("Failed to serialize {kind} record: {reason}")]
    Serialization { kind: RecordKind, reason: String },

    #[error("Wipe marker is unreadable: {0}")]
    InvalidWipeInfo(String),

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Key does not unlock this cache directory")]
    KeyMismatch,

    #[error("Timed out waiting for the cache lock")]
    LockTimeout,

    #[error("Secret provider declined to supply a passphrase")]
    Cancelled,

    #[error("Clear failed for {} record kind(s): {}", failures.len(), join_failures(failures))]
    PartialClear { failures: Vec<ClearFailure> },

    #[error("Invalid configuration '{path}': {reason}")]
    Config { path: PathBuf, reason: String },
}

fn join_failures(failures: &[ClearFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CacheError {
    /// Wrap an I/O error raised while performing `operation`
    pub fn storage(operation: &'static str, source: std::io::Error) -> Self {
        Self::Storage { operation, source }
    }

    pub fn deserialization(kind: RecordKind, reason: impl fmt::Display) -> Self {
        Self::Deserialization {
            kind,
            reason: reason.to_string(),
        }
    }

    pub fn serialization(kind: RecordKind, reason: impl fmt::Display) -> Self {
        Self::Serialization {
            kind,
            reason: reason.to_string(),
        }
    }

    /// True when the medium itself misbehaved or cannot be unlocked
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. }
                | Self::KeyMismatch
                | Self::LockTimeout
                | Self::Keyring(_)
                | Self::PartialClear { .. }
                | Self::Config { .. }
                | Self::Cancelled
        )
    }

    /// True when stored bytes could not be turned back into a record.
    ///
    /// Callers may treat these records as missing.
    pub fn is_deserialization_failure(&self) -> bool {
        matches!(
            self,
            Self::Deserialization { .. } | Self::InvalidWipeInfo(_) | Self::Crypto(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
