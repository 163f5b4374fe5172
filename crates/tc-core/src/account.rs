use serde::{Deserialize, Serialize};

use crate::key::CacheKey;

/// Authority type the account was issued by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// Azure AD / Microsoft identity platform
    Mssts,
    /// Microsoft personal account
    Msa,
    /// Pre-v2 single-resource authority
    Legacy,
    Other,
}

/// Identity metadata for a signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_type: AccountType,
    pub home_account_id: String,
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_account_id: Option<String>,
}

impl AccountRecord {
    pub fn new(
        account_type: AccountType,
        home_account_id: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            account_type,
            home_account_id: home_account_id.into(),
            environment: environment.into(),
            realm: None,
            local_account_id: None,
            username: None,
            given_name: None,
            family_name: None,
            name: None,
            alternative_account_id: None,
        }
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Accounts are keyed by home account, environment and realm
    pub fn cache_key(&self) -> CacheKey {
        let key = CacheKey::any()
            .with_home_account_id(&self.home_account_id)
            .with_environment(&self.environment);

        match &self.realm {
            Some(realm) => key.with_realm(realm),
            None => key,
        }
    }
}
