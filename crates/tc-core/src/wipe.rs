use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::RequestContext;

/// Marker left behind after a full cache wipe, so other processes sharing the
/// medium can tell the cache was cleared, by whom and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WipeInfo {
    pub wiped_at: DateTime<Utc>,
    pub app_id: String,
    pub process_id: u32,
    pub correlation_id: Uuid,
}

impl WipeInfo {
    /// Describe a wipe performed now by this process
    pub fn now(app_id: impl Into<String>, context: &RequestContext) -> Self {
        Self {
            wiped_at: Utc::now(),
            app_id: app_id.into(),
            process_id: std::process::id(),
            correlation_id: context.correlation_id(),
        }
    }

    /// Flat string mapping, for callers that surface the marker as a dictionary
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("wiped_at".to_string(), self.wiped_at.to_rfc3339()),
            ("app_id".to_string(), self.app_id.clone()),
            ("process_id".to_string(), self.process_id.to_string()),
            ("correlation_id".to_string(), self.correlation_id.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_view_has_all_fields() {
        let context = RequestContext::new();
        let info = WipeInfo::now("com.example.app", &context);
        let map = info.to_map();

        assert_eq!(map.len(), 4);
        assert_eq!(map["app_id"], "com.example.app");
        assert_eq!(map["correlation_id"], context.correlation_id().to_string());
    }
}
