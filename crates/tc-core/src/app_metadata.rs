use serde::{Deserialize, Serialize};

use crate::key::CacheKey;

/// Per-application metadata, mainly the family-of-client-ids linkage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadataRecord {
    pub client_id: String,
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
}

impl AppMetadataRecord {
    pub fn new(client_id: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            environment: environment.into(),
            family_id: None,
        }
    }

    pub fn with_family_id(mut self, family_id: impl Into<String>) -> Self {
        self.family_id = Some(family_id.into());
        self
    }

    /// Family id is deliberately not part of the key: an app leaving a
    /// family must overwrite its previous entry.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::any()
            .with_client_id(&self.client_id)
            .with_environment(&self.environment)
    }
}
