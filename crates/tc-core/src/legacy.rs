//! Older single-resource token layout.
//!
//! Caches written before the split into per-type credentials hold one JSON
//! object per token with camelCase fields and an authority URL instead of
//! separate environment and realm. [`LegacyCredentialSerializer`] reads and
//! writes that layout so a store can serve both formats.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::credential::{CredentialRecord, CredentialType};
use crate::errors::{CacheError, RecordKind, Result};
use crate::serializer::ItemSerializer;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyTokenItem {
    authority: String,
    client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    family_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    /// Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_on: Option<i64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    single_resource: bool,
    /// Written by this serializer; older items leave it out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credential_type: Option<CredentialType>,
}

/// Serializer for the legacy token layout
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyCredentialSerializer;

impl ItemSerializer<CredentialRecord> for LegacyCredentialSerializer {
    fn serialize(&self, item: &CredentialRecord) -> Result<Vec<u8>> {
        let (access_token, refresh_token, single_resource) = match item.credential_type {
            CredentialType::AccessToken => (Some(item.secret.clone()), None, false),
            CredentialType::RefreshToken | CredentialType::FamilyRefreshToken => {
                (None, Some(item.secret.clone()), false)
            }
            CredentialType::LegacySingleResourceToken => (None, Some(item.secret.clone()), true),
            other => {
                return Err(CacheError::serialization(
                    RecordKind::Credential,
                    format!("{} has no legacy representation", other),
                ));
            }
        };

        let authority = match &item.realm {
            Some(realm) => format!("https://{}/{}", item.environment, realm),
            None => format!("https://{}/common", item.environment),
        };

        let legacy = LegacyTokenItem {
            authority,
            client_id: item.client_id.clone(),
            resource: item.target.clone(),
            user_id: (!item.home_account_id.is_empty()).then(|| item.home_account_id.clone()),
            family_id: item.family_id.clone(),
            access_token,
            refresh_token,
            expires_on: item.expires_on.map(|at| at.timestamp()),
            single_resource,
            credential_type: Some(item.credential_type),
        };

        serde_json::to_vec(&legacy).map_err(|e| CacheError::serialization(RecordKind::Credential, e))
    }

    fn deserialize(&self, data: &[u8]) -> Result<CredentialRecord> {
        let legacy: LegacyTokenItem = serde_json::from_slice(data)
            .map_err(|e| CacheError::deserialization(RecordKind::Credential, e))?;

        let (environment, realm) = split_authority(&legacy.authority)?;

        let (credential_type, secret) = match legacy.credential_type {
            Some(credential_type) => {
                let secret = match credential_type {
                    CredentialType::AccessToken => legacy.access_token,
                    _ => legacy.refresh_token,
                };
                let secret = secret.ok_or_else(|| {
                    CacheError::deserialization(
                        RecordKind::Credential,
                        format!("legacy {} item carries no token", credential_type),
                    )
                })?;
                (credential_type, secret)
            }
            None => infer_type(&legacy)?,
        };

        let expires_on = legacy.expires_on.map(unix_to_datetime).transpose()?;

        Ok(CredentialRecord {
            credential_type,
            secret,
            home_account_id: legacy.user_id.unwrap_or_default(),
            environment,
            realm,
            client_id: legacy.client_id,
            family_id: legacy.family_id,
            target: legacy.resource,
            cached_at: None,
            expires_on,
            extended_expires_on: None,
        })
    }
}

/// Type of an item written without a `credentialType` marker
fn infer_type(legacy: &LegacyTokenItem) -> Result<(CredentialType, String)> {
    let typed = match (&legacy.access_token, &legacy.refresh_token) {
        (_, Some(refresh)) if legacy.single_resource => {
            (CredentialType::LegacySingleResourceToken, refresh)
        }
        (None, Some(refresh)) if legacy.family_id.is_some() => {
            (CredentialType::FamilyRefreshToken, refresh)
        }
        (None, Some(refresh)) => (CredentialType::RefreshToken, refresh),
        (Some(access), None) => (CredentialType::AccessToken, access),
        (Some(_), Some(refresh)) => (CredentialType::LegacySingleResourceToken, refresh),
        (None, None) => {
            return Err(CacheError::deserialization(
                RecordKind::Credential,
                "legacy item carries no token",
            ));
        }
    };

    Ok((typed.0, typed.1.clone()))
}

/// `https://host/tenant` -> (`host`, Some(`tenant`)); `common` maps to no realm
fn split_authority(authority: &str) -> Result<(String, Option<String>)> {
    let rest = authority
        .strip_prefix("https://")
        .ok_or_else(|| {
            CacheError::deserialization(
                RecordKind::Credential,
                format!("authority is not an https URL: {}", authority),
            )
        })?
        .trim_end_matches('/');

    let (host, tenant) = match rest.split_once('/') {
        Some((host, path)) => (host, path.split('/').next().filter(|t| !t.is_empty())),
        None => (rest, None),
    };

    if host.is_empty() {
        return Err(CacheError::deserialization(
            RecordKind::Credential,
            "authority has no host",
        ));
    }

    let realm = tenant
        .filter(|t| !t.eq_ignore_ascii_case("common"))
        .map(str::to_string);

    Ok((host.to_ascii_lowercase(), realm))
}

fn unix_to_datetime(seconds: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single().ok_or_else(|| {
        CacheError::deserialization(
            RecordKind::Credential,
            format!("expiresOn out of range: {}", seconds),
        )
    })
}
