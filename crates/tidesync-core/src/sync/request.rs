//! Builds the outbound request for one sync cycle

use crate::db::SyncRepository;
use crate::error::Result;
use crate::sync::protocol::{GroupPoll, OutboundChange, SyncRequest};

/// Static fields sent with every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub app_id: String,
    pub device_id: String,
    pub app_api_access_key: String,
}

/// Per-request caps on changes and groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub changes: usize,
    pub groups: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            changes: 100,
            groups: 100,
        }
    }
}

/// A request together with the queue ids it carries.
///
/// Only these ids may be removed once the request succeeds; changes captured
/// while it is in flight stay queued for the next cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundBatch {
    pub request: SyncRequest,
    pub change_ids: Vec<i64>,
}

/// Select the oldest pending changes and least recently polled groups
pub fn build_request(
    queue: &impl SyncRepository,
    identity: &ClientIdentity,
    limits: BatchLimits,
    now_ms: i64,
) -> Result<OutboundBatch> {
    let batch = queue.next_batch(limits.changes)?;
    let groups = queue.next_groups(limits.groups)?;

    let change_ids = batch.iter().map(|queued| queued.id).collect();
    let changes = batch
        .into_iter()
        .map(|queued| {
            let change = queued.change;
            OutboundChange {
                path: change.path().to_string(),
                seconds_ago: seconds_between(change.captured_at, now_ms),
                group: change.group.as_str().to_string(),
                operation: change.operation.code(),
                value: change.value,
            }
        })
        .collect();

    let groups = groups
        .into_iter()
        .map(|group| GroupPoll {
            group: group.hash.as_str().to_string(),
            tidemark: group.tidemark,
        })
        .collect();

    Ok(OutboundBatch {
        request: SyncRequest {
            app_id: identity.app_id.clone(),
            device_id: identity.device_id.clone(),
            app_api_access_key: identity.app_api_access_key.clone(),
            changes,
            groups,
        },
        change_ids,
    })
}

#[allow(clippy::cast_precision_loss)]
fn seconds_between(captured_at_ms: i64, now_ms: i64) -> f64 {
    now_ms.saturating_sub(captured_at_ms).max(0) as f64 / 1000.0
}
