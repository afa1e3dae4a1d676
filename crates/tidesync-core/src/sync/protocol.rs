//! JSON envelopes exchanged with the sync service.
//!
//! Outbound keys are snake_case (`secondsAgo` excepted); inbound keys are
//! PascalCase. Inbound group and change entries are parsed one at a time so a
//! malformed entry is skipped without discarding the rest of the response.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{ChangePath, GroupHash};

/// One request per sync cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRequest {
    pub app_id: String,
    pub device_id: String,
    pub app_api_access_key: String,
    pub changes: Vec<OutboundChange>,
    pub groups: Vec<GroupPoll>,
}

/// A queued change as sent on the wire
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundChange {
    pub path: String,
    pub value: Option<String>,
    /// Elapsed time since capture, so client and server clocks need not agree
    #[serde(rename = "secondsAgo")]
    pub seconds_ago: f64,
    pub group: String,
    pub operation: i64,
}

/// Pull request for one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupPoll {
    pub group: String,
    pub tidemark: Option<String>,
}

/// Top-level response from the sync service
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SyncResponse {
    #[serde(rename = "Success", default)]
    pub success: bool,
    #[serde(rename = "Groups", default)]
    pub groups: serde_json::Value,
}

/// A group entry that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundGroup {
    pub group: GroupHash,
    pub tidemark: String,
    pub changes: Vec<InboundChange>,
}

/// A change entry that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundChange {
    pub path: ChangePath,
    /// Encoded value; `None` when null, absent or empty
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    #[serde(rename = "Group")]
    group: Option<String>,
    #[serde(rename = "Tidemark")]
    tidemark: Option<String>,
    #[serde(rename = "Changes", default)]
    changes: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct RawChange {
    #[serde(rename = "Path")]
    path: Option<String>,
    #[serde(rename = "Value")]
    value: Option<String>,
}

impl SyncResponse {
    /// Group entries in received order, skipping malformed ones
    pub fn inbound_groups(&self) -> Vec<InboundGroup> {
        let Some(entries) = self.groups.as_array() else {
            if !self.groups.is_null() {
                warn!("Ignoring non-array Groups in sync response");
            }
            return Vec::new();
        };

        entries.iter().filter_map(parse_group).collect()
    }
}

fn parse_group(entry: &serde_json::Value) -> Option<InboundGroup> {
    let raw: RawGroup = match serde_json::from_value(entry.clone()) {
        Ok(raw) => raw,
        Err(error) => {
            warn!("Skipping malformed group entry: {error}");
            return None;
        }
    };

    let Some(group) = raw.group.filter(|group| !group.is_empty()) else {
        warn!("Skipping group entry without Group");
        return None;
    };
    let Some(tidemark) = raw.tidemark else {
        warn!("Skipping group {group} without Tidemark");
        return None;
    };

    let changes = raw
        .changes
        .unwrap_or_default()
        .iter()
        .filter_map(parse_change)
        .collect();

    Some(InboundGroup {
        group: GroupHash::from_hashed(group),
        tidemark,
        changes,
    })
}

fn parse_change(entry: &serde_json::Value) -> Option<InboundChange> {
    let raw: RawChange = match serde_json::from_value(entry.clone()) {
        Ok(raw) => raw,
        Err(error) => {
            warn!("Skipping malformed change entry: {error}");
            return None;
        }
    };

    let Some(path) = raw.path.as_deref().and_then(ChangePath::parse) else {
        warn!("Skipping change with invalid Path {:?}", raw.path);
        return None;
    };

    Some(InboundChange {
        path,
        value: raw.value.filter(|value| !value.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn request_serializes_wire_keys() {
        let request = SyncRequest {
            app_id: "app".into(),
            device_id: "device".into(),
            app_api_access_key: "key".into(),
            changes: vec![OutboundChange {
                path: "r1/Person/name".into(),
                value: None,
                seconds_ago: 1.5,
                group: "g1".into(),
                operation: 2,
            }],
            groups: vec![GroupPoll {
                group: "g1".into(),
                tidemark: None,
            }],
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "app_id": "app",
                "device_id": "device",
                "app_api_access_key": "key",
                "changes": [{
                    "path": "r1/Person/name",
                    "value": null,
                    "secondsAgo": 1.5,
                    "group": "g1",
                    "operation": 2
                }],
                "groups": [{"group": "g1", "tidemark": null}]
            })
        );
    }

    #[test]
    fn parses_well_formed_response() {
        let response: SyncResponse = serde_json::from_value(json!({
            "Success": true,
            "Groups": [{
                "Group": "g1",
                "Tidemark": "t2",
                "Changes": [{"Path": "r9/Person/name", "Value": "text/abc"}]
            }]
        }))
        .unwrap();

        assert!(response.success);
        assert_eq!(
            response.inbound_groups(),
            vec![InboundGroup {
                group: GroupHash::from_hashed("g1"),
                tidemark: "t2".into(),
                changes: vec![InboundChange {
                    path: ChangePath::new("r9", "Person", "name"),
                    value: Some("text/abc".into()),
                }],
            }]
        );
    }

    #[test]
    fn missing_keys_default_to_failure_and_no_groups() {
        let response: SyncResponse = serde_json::from_value(json!({})).unwrap();
        assert!(!response.success);
        assert!(response.inbound_groups().is_empty());
    }

    #[test]
    fn skips_malformed_entries_and_keeps_the_rest() {
        let response: SyncResponse = serde_json::from_value(json!({
            "Success": true,
            "Groups": [
                {"Tidemark": "t1", "Changes": []},
                {"Group": "g2", "Changes": []},
                "not an object",
                {
                    "Group": "g3",
                    "Tidemark": "t3",
                    "Changes": [
                        {"Value": "text/abc"},
                        {"Path": "bad-path", "Value": "text/abc"},
                        {"Path": "r1/Person/name", "Value": 42},
                        {"Path": "r2/Person/name", "Value": null},
                        {"Path": "r3/Person/name"}
                    ]
                }
            ]
        }))
        .unwrap();

        let groups = response.inbound_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group, GroupHash::from_hashed("g3"));
        assert_eq!(
            groups[0].changes,
            vec![
                InboundChange {
                    path: ChangePath::new("r2", "Person", "name"),
                    value: None,
                },
                InboundChange {
                    path: ChangePath::new("r3", "Person", "name"),
                    value: None,
                },
            ]
        );
    }
}
