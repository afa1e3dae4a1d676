//! Applies a sync response to the local store.
//!
//! Inbound changes are applied in the order received and overwrite local values
//! unconditionally. Nothing here re-enters change capture.

use serde::Serialize;
use tracing::{debug, warn};

use crate::db::{RecordRepository, SyncRepository};
use crate::error::{Error, Result};
use crate::models::{ChangePath, DeferredChange, FieldValue, GroupHash, Record};
use crate::sync::codec::ValueCodec;
use crate::sync::protocol::SyncResponse;

/// What one response did to the local store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// The service reported success and the response was applied
    pub accepted: bool,
    /// Outbound changes acknowledged and removed from the queue
    pub removed_changes: usize,
    pub applied: usize,
    pub deleted: usize,
    pub deferred: usize,
    /// Updates for tombstoned records
    pub discarded: usize,
    /// Undecodable or ill-typed values
    pub skipped: usize,
    pub groups_updated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Applied,
    Deleted,
    Deferred,
    Discarded,
    Skipped,
}

impl ApplyReport {
    fn count(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Applied => self.applied += 1,
            Outcome::Deleted => self.deleted += 1,
            Outcome::Deferred => self.deferred += 1,
            Outcome::Discarded => self.discarded += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }
}

pub struct ResponseApplier<'a, R, Q> {
    records: R,
    queue: Q,
    codec: &'a ValueCodec,
}

impl<'a, R, Q> ResponseApplier<'a, R, Q>
where
    R: RecordRepository,
    Q: SyncRepository,
{
    pub const fn new(records: R, queue: Q, codec: &'a ValueCodec) -> Self {
        Self {
            records,
            queue,
            codec,
        }
    }

    /// Apply a response to the request that carried `sent` queue ids.
    ///
    /// A response without `Success` changes nothing, so the same batch is retried.
    pub fn apply(&self, response: &SyncResponse, sent: &[i64], now_ms: i64) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();
        if !response.success {
            return Ok(report);
        }

        report.accepted = true;
        report.removed_changes = self.queue.remove_all(sent)?;

        for group in response.inbound_groups() {
            for change in &group.changes {
                let outcome = if change.path.is_delete() {
                    self.apply_delete(&change.path)?
                } else {
                    self.apply_update(&change.path, change.value.as_deref(), &group.group)?
                };
                report.count(outcome);
            }

            if self
                .queue
                .record_poll(&group.group, &group.tidemark, now_ms)?
            {
                report.groups_updated += 1;
            } else {
                debug!("Ignoring tidemark for unregistered group {}", group.group);
            }
        }

        Ok(report)
    }

    /// Apply deferred changes whose field the schema now declares.
    ///
    /// Returns how many were applied; the rest stay deferred.
    pub fn replay_deferred(&self) -> Result<usize> {
        let mut replayed = 0;

        for deferred in self.queue.deferred_changes()? {
            if !self
                .records
                .field_exists(&deferred.class_name, &deferred.property)
            {
                continue;
            }

            let path = ChangePath::new(
                &deferred.record_id,
                &deferred.class_name,
                &deferred.property,
            );
            let outcome =
                self.apply_update(&path, deferred.raw_value.as_deref(), &deferred.group)?;
            self.queue.remove_deferred(&deferred)?;
            if outcome == Outcome::Applied {
                replayed += 1;
            }
        }

        Ok(replayed)
    }

    fn apply_delete(&self, path: &ChangePath) -> Result<Outcome> {
        let removed = self.records.delete(&path.class_name, &path.record_id)?;
        self.queue.mark_defunct(&path.record_id)?;
        self.queue.discard_deferred_for(&path.record_id)?;
        debug!(
            "Applied remote delete of {}/{} (present locally: {removed})",
            path.class_name, path.record_id
        );
        Ok(Outcome::Deleted)
    }

    fn apply_update(
        &self,
        path: &ChangePath,
        raw_value: Option<&str>,
        group: &GroupHash,
    ) -> Result<Outcome> {
        let value = match raw_value {
            None => FieldValue::Null,
            Some(raw) => match self.codec.decode(raw) {
                Ok(value) => value,
                Err(error) => {
                    warn!("Skipping {path}: {error}");
                    return Ok(Outcome::Skipped);
                }
            },
        };

        let (mut record, is_new) = match self.records.fetch(&path.class_name, &path.record_id)? {
            Some(record) => (record, false),
            None if self.queue.is_defunct(&path.record_id)? => {
                debug!("Discarding {path} for deleted record");
                return Ok(Outcome::Discarded);
            }
            None => (Record::with_id(&path.class_name, &path.record_id), true),
        };
        if record.group().is_none() {
            record.set_group(group.clone());
        }

        let schema = self.records.schema();
        let Some(descriptor) = schema.field(&path.class_name, &path.property) else {
            if is_new && schema.entity(&path.class_name).is_some() {
                self.write_inbound(path, &record)?;
            }
            self.queue.defer(&DeferredChange {
                record_id: path.record_id.clone(),
                class_name: path.class_name.clone(),
                property: path.property.clone(),
                raw_value: raw_value.map(str::to_string),
                group: group.clone(),
            })?;
            debug!("Deferred {path} until the schema declares it");
            return Ok(Outcome::Deferred);
        };

        let Some(value) = value.coerce_to(descriptor.kind) else {
            warn!("Skipping {path}: value does not fit {:?}", descriptor.kind);
            return Ok(Outcome::Skipped);
        };
        record.apply_field(&path.property, value);
        self.write_inbound(path, &record)
    }

    fn write_inbound(&self, path: &ChangePath, record: &Record) -> Result<Outcome> {
        match self.records.write(record) {
            Ok(()) => Ok(Outcome::Applied),
            Err(Error::Schema(reason)) => {
                warn!("Skipping {path}: {reason}");
                Ok(Outcome::Skipped)
            }
            Err(error) => Err(error),
        }
    }
}
