use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::credential::CredentialType;

/// Lookup key shared by every record kind.
///
/// Every field is optional. A key saved alongside a record is normally fully
/// populated (see the `cache_key()` methods on the records); a key used for a
/// multi-result lookup or a removal may leave fields empty, in which case it
/// acts as a filter over stored keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    home_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    realm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    family_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credential_type: Option<CredentialType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
}

impl CacheKey {
    /// A key with no populated fields; as a query it matches everything
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_home_account_id(mut self, value: impl Into<String>) -> Self {
        self.home_account_id = Some(value.into());
        self
    }

    /// Environments (authority hosts) are case-insensitive
    pub fn with_environment(mut self, value: impl AsRef<str>) -> Self {
        self.environment = Some(value.as_ref().to_ascii_lowercase());
        self
    }

    /// Realms (tenant ids) are case-insensitive
    pub fn with_realm(mut self, value: impl AsRef<str>) -> Self {
        self.realm = Some(value.as_ref().to_ascii_lowercase());
        self
    }

    pub fn with_client_id(mut self, value: impl Into<String>) -> Self {
        self.client_id = Some(value.into());
        self
    }

    pub fn with_family_id(mut self, value: impl Into<String>) -> Self {
        self.family_id = Some(value.into());
        self
    }

    pub fn with_credential_type(mut self, value: CredentialType) -> Self {
        self.credential_type = Some(value);
        self
    }

    /// Scopes are stored as a lowercase, sorted, space-separated set so that
    /// `"User.Read openid"` and `"openid user.read"` produce the same key.
    pub fn with_target(mut self, value: impl AsRef<str>) -> Self {
        self.target = Some(normalize_target(value.as_ref()));
        self
    }

    pub fn home_account_id(&self) -> Option<&str> {
        self.home_account_id.as_deref()
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn family_id(&self) -> Option<&str> {
        self.family_id.as_deref()
    }

    pub fn credential_type(&self) -> Option<CredentialType> {
        self.credential_type
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Whether no field is populated
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Partial-match predicate used by every backend.
    ///
    /// `self` is the query. Each populated field must equal the same field of
    /// `stored`; empty fields are wildcards.
    pub fn matches(&self, stored: &CacheKey) -> bool {
        field_matches(&self.home_account_id, &stored.home_account_id)
            && field_matches(&self.environment, &stored.environment)
            && field_matches(&self.realm, &stored.realm)
            && field_matches(&self.client_id, &stored.client_id)
            && field_matches(&self.family_id, &stored.family_id)
            && field_matches(&self.credential_type, &stored.credential_type)
            && field_matches(&self.target, &stored.target)
    }

    /// Stable hex SHA-256 of the canonical key, usable as a file or entry name
    pub fn digest(&self) -> String {
        // Field order is fixed by the struct, so the JSON form is canonical
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

fn field_matches<T: PartialEq>(query: &Option<T>, stored: &Option<T>) -> bool {
    match query {
        None => true,
        Some(q) => stored.as_ref() == Some(q),
    }
}

fn normalize_target(target: &str) -> String {
    let mut scopes: Vec<String> = target
        .split_whitespace()
        .map(str::to_ascii_lowercase)
        .collect();
    scopes.sort();
    scopes.dedup();
    scopes.join(" ")
}

/// Renders only which fields are populated; values may contain PII
impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let populated: Vec<&str> = [
            ("home_account_id", self.home_account_id.is_some()),
            ("environment", self.environment.is_some()),
            ("realm", self.realm.is_some()),
            ("client_id", self.client_id.is_some()),
            ("family_id", self.family_id.is_some()),
            ("credential_type", self.credential_type.is_some()),
            ("target", self.target.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect();

        write!(f, "CacheKey{{{}}}", populated.join(","))
    }
}
