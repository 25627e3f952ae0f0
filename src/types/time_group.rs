//! The time group payload delivered by the remote source.

use serde::{Deserialize, Serialize};

use super::TimeGroupId;

/// A tag attached to a time group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeGroupTag {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A batch of posted time, the unit of work the runtime delivers exactly once.
///
/// Only the fields the runtime itself reads are typed. Everything else the
/// remote source sends is kept in `extra` and handed to the integration as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeGroup {
    pub group_id: TimeGroupId,

    #[serde(default)]
    pub group_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub total_duration_secs: u64,

    /// Key the remote source was configured with for this connector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_key: Option<String>,

    #[serde(default)]
    pub tags: Vec<TimeGroupTag>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TimeGroup {
    /// Creates a group with only an id set.
    pub fn new(group_id: impl Into<TimeGroupId>) -> Self {
        TimeGroup {
            group_id: group_id.into(),
            group_name: String::new(),
            description: String::new(),
            total_duration_secs: 0,
            caller_key: None,
            tags: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_caller_key(mut self, key: impl Into<String>) -> Self {
        self.caller_key = Some(key.into());
        self
    }
}
