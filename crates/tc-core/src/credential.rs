use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::key::CacheKey;

/// Skew applied when deciding whether a token is expired (refresh 5 minutes early)
pub const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(300);

/// Kind of credential held by a [`CredentialRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    AccessToken,
    RefreshToken,
    IdToken,
    FamilyRefreshToken,
    LegacySingleResourceToken,
    PrimaryRefreshToken,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::IdToken => "id_token",
            Self::FamilyRefreshToken => "family_refresh_token",
            Self::LegacySingleResourceToken => "legacy_single_resource_token",
            Self::PrimaryRefreshToken => "primary_refresh_token",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached token. The store never looks inside; it only moves bytes
/// produced by a credential serializer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub credential_type: CredentialType,
    pub secret: String,
    pub home_account_id: String,
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_expires_on: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    pub fn new(
        credential_type: CredentialType,
        secret: impl Into<String>,
        home_account_id: impl Into<String>,
        environment: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            credential_type,
            secret: secret.into(),
            home_account_id: home_account_id.into(),
            environment: environment.into(),
            realm: None,
            client_id: client_id.into(),
            family_id: None,
            target: None,
            cached_at: Some(Utc::now()),
            expires_on: None,
            extended_expires_on: None,
        }
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn with_family_id(mut self, family_id: impl Into<String>) -> Self {
        self.family_id = Some(family_id.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Set expiry relative to now
    /// Expiry `seconds` from now; lifetimes past chrono's range saturate
    pub fn expires_in(mut self, seconds: u64) -> Self {
        let expires_on = i64::try_from(seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.expires_on = Some(expires_on);
        self
    }

    /// Fully populated key this record is naturally stored under
    pub fn cache_key(&self) -> CacheKey {
        let mut key = CacheKey::any()
            .with_home_account_id(&self.home_account_id)
            .with_environment(&self.environment)
            .with_client_id(&self.client_id)
            .with_credential_type(self.credential_type);

        if let Some(realm) = &self.realm {
            key = key.with_realm(realm);
        }
        if let Some(family_id) = &self.family_id {
            key = key.with_family_id(family_id);
        }
        if let Some(target) = &self.target {
            key = key.with_target(target);
        }

        key
    }

    /// Records without an expiry (refresh tokens, id tokens) never expire here
    pub fn is_expired(&self) -> bool {
        let skew = chrono::Duration::from_std(TOKEN_EXPIRY_SKEW)
            .unwrap_or(chrono::Duration::seconds(300));
        self.expires_on
            .is_some_and(|expires_on| Utc::now() + skew >= expires_on)
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("credential_type", &self.credential_type)
            .field("secret", &"[REDACTED]")
            .field("home_account_id", &self.home_account_id)
            .field("environment", &self.environment)
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .field("family_id", &self.family_id)
            .field("target", &self.target)
            .field("expires_on", &self.expires_on)
            .finish()
    }
}
