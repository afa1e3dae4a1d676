//! Change capture for local commits and removes.
//!
//! Every commit runs against an explicit [`CommitContext`] naming the group the
//! record is committed under. When a stored record moves to a different group it
//! is re-keyed: a delete is queued under the old group and the record is re-sent
//! as a brand-new record under the new one, so the wire protocol never needs a
//! "move" operation.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::db::{RecordRepository, SyncRepository};
use crate::error::{Error, Result};
use crate::models::{
    is_reserved_field, Change, EntityDescriptor, FieldValue, GroupHash, Operation, Record,
    VisibilityGroup, DELETE_SENTINEL,
};
use crate::sync::codec::ValueCodec;
use crate::util::{new_identifier, unix_timestamp_millis};

/// Group a commit (and every embedded commit under it) is made in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitContext {
    group: GroupHash,
}

impl CommitContext {
    /// Commit under the group with this plaintext name
    pub fn in_group(name: &str) -> Self {
        Self {
            group: GroupHash::from_name(name),
        }
    }

    /// Commit under an already-hashed group
    pub const fn with_hash(group: GroupHash) -> Self {
        Self { group }
    }

    pub fn default_group() -> Self {
        Self::with_hash(GroupHash::default_group())
    }

    pub const fn group(&self) -> &GroupHash {
        &self.group
    }
}

impl Default for CommitContext {
    fn default() -> Self {
        Self::default_group()
    }
}

/// Identity of a record as it entered the current commit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    class_name: String,
    id: String,
}

impl RecordKey {
    fn of(record: &Record) -> Self {
        Self {
            class_name: record.class_name().to_string(),
            id: record.id().to_string(),
        }
    }
}

/// Writes records and queues their changes in the same transaction
pub struct ChangeCapture<'a, R, Q> {
    records: R,
    queue: Q,
    codec: &'a ValueCodec,
    auto_subscribe: bool,
}

impl<'a, R, Q> ChangeCapture<'a, R, Q>
where
    R: RecordRepository,
    Q: SyncRepository,
{
    pub const fn new(records: R, queue: Q, codec: &'a ValueCodec, auto_subscribe: bool) -> Self {
        Self {
            records,
            queue,
            codec,
            auto_subscribe,
        }
    }

    /// Commit a record and its embedded children, queueing one change per dirty field
    pub fn commit(&self, record: &mut Record, context: &CommitContext) -> Result<()> {
        if self.auto_subscribe && self.queue.group(context.group())?.is_none() {
            self.queue
                .upsert_group(&VisibilityGroup::new(context.group().clone()))?;
            info!("Subscribed to group {}", context.group());
        }

        let mut visited = HashMap::new();
        self.commit_record(record, context, &mut visited)
    }

    /// Remove a stored record and queue its delete
    pub fn remove(&self, class_name: &str, id: &str) -> Result<()> {
        let stored = self
            .records
            .fetch(class_name, id)?
            .ok_or_else(|| Error::NotFound(format!("{class_name}/{id}")))?;
        let group = stored
            .group()
            .cloned()
            .unwrap_or_else(GroupHash::default_group);

        self.records.delete(class_name, id)?;
        self.queue_delete(class_name, id, &group)
    }

    fn commit_record(
        &self,
        record: &mut Record,
        context: &CommitContext,
        visited: &mut HashMap<RecordKey, String>,
    ) -> Result<()> {
        let key = RecordKey::of(record);
        if let Some(id) = visited.get(&key) {
            // Same identity reached twice in one graph; the first visit did the work
            record.set_id(id.clone());
            record.set_group(context.group().clone());
            record.clear_dirty();
            return Ok(());
        }
        visited.insert(key.clone(), record.id().to_string());
        check_path_segments(record)?;

        let schema = self.records.schema();
        let descriptor = schema.entity(record.class_name()).ok_or_else(|| {
            Error::Schema(format!("unknown record type '{}'", record.class_name()))
        })?;

        let stored = self.records.fetch(record.class_name(), record.id())?;
        let mut exists = stored.is_some();
        if let Some(stored) = &stored {
            record.fill_missing_from(stored);
        }

        let previous_group = stored.and_then(|stored| stored.group().cloned());
        if let Some(previous) = previous_group.filter(|group| group != context.group()) {
            self.reassign(record, &previous, descriptor)?;
            visited.insert(key, record.id().to_string());
            exists = false;
        }

        let mut child_ids = Vec::new();
        for (field, child) in record.embedded_mut() {
            self.commit_record(child, context, visited)?;
            child_ids.push((field.clone(), child.id().to_string()));
        }
        for (field, child_id) in child_ids {
            let reference = FieldValue::Entity(child_id);
            if record.get(&field) != Some(&reference) {
                record.set(field, reference);
            }
        }

        record.set_group(context.group().clone());
        self.records.write(record)?;

        let operation = if exists {
            Operation::Set
        } else {
            Operation::Create
        };
        let queued = self.queue_fields(record, operation, context.group())?;
        if queued > 0 {
            self.queue.register_class(record.class_name())?;
        }
        debug!(
            "Committed {}/{} with {queued} queued changes",
            record.class_name(),
            record.id()
        );

        record.clear_dirty();
        Ok(())
    }

    fn reassign(
        &self,
        record: &mut Record,
        previous: &GroupHash,
        descriptor: &EntityDescriptor,
    ) -> Result<()> {
        self.queue_delete(record.class_name(), record.id(), previous)?;
        self.records.delete(record.class_name(), record.id())?;

        let new_id = new_identifier();
        debug!(
            "Re-keyed {}/{} as {new_id} after group change",
            record.class_name(),
            record.id()
        );
        record.set_id(new_id);
        record.mark_all_dirty(descriptor);
        Ok(())
    }

    fn queue_fields(&self, record: &Record, operation: Operation, group: &GroupHash) -> Result<usize> {
        let captured_at = unix_timestamp_millis();
        let mut queued = 0;

        for field in record.dirty_fields() {
            if is_reserved_field(field) {
                continue;
            }
            let value = match record.get(field) {
                None | Some(FieldValue::Null) => None,
                Some(value) => Some(self.codec.encode(value)?),
            };
            self.queue.enqueue(&Change {
                record_id: record.id().to_string(),
                class_name: record.class_name().to_string(),
                property: field.clone(),
                operation,
                value,
                group: group.clone(),
                captured_at,
            })?;
            queued += 1;
        }

        Ok(queued)
    }

    /// Queue a delete as the only surviving change for the record
    fn queue_delete(&self, class_name: &str, id: &str, group: &GroupHash) -> Result<()> {
        self.queue.purge_record(class_name, id)?;
        self.queue.enqueue(&Change {
            record_id: id.to_string(),
            class_name: class_name.to_string(),
            property: DELETE_SENTINEL.to_string(),
            operation: Operation::Delete,
            value: None,
            group: group.clone(),
            captured_at: unix_timestamp_millis(),
        })?;
        self.queue.register_class(class_name)
    }
}

/// Ids and class names become `id/class/property` path segments
fn check_path_segments(record: &Record) -> Result<()> {
    for (label, value) in [("record id", record.id()), ("class name", record.class_name())] {
        if value.is_empty() || value.contains('/') {
            return Err(Error::InvalidInput(format!(
                "{label} '{value}' must be non-empty and must not contain '/'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::crypto::AesGcmCipher;
    use crate::db::{Database, SqliteRecordRepository, SqliteSyncRepository};
    use crate::models::{FieldDescriptor, FieldKind, QueuedChange, Schema};
    use pretty_assertions::assert_eq;

    struct Fixture {
        db: Database,
        schema: Schema,
        codec: ValueCodec,
    }

    impl Fixture {
        fn new() -> Self {
            let schema = Schema::new([
                EntityDescriptor::new(
                    "Person",
                    vec![
                        FieldDescriptor::new("name", FieldKind::Text),
                        FieldDescriptor::new("age", FieldKind::Integer),
                        FieldDescriptor::new("pet", FieldKind::Entity),
                        FieldDescriptor::new("backup_pet", FieldKind::Entity),
                    ],
                ),
                EntityDescriptor::new("Pet", vec![FieldDescriptor::new("name", FieldKind::Text)]),
            ])
            .unwrap();

            Self {
                db: Database::open_in_memory().unwrap(),
                schema,
                codec: ValueCodec::new(Arc::new(AesGcmCipher::from_passphrase("test-app"))),
            }
        }

        fn capture(
            &self,
        ) -> ChangeCapture<'_, SqliteRecordRepository<'_>, SqliteSyncRepository<'_>> {
            ChangeCapture::new(
                SqliteRecordRepository::new(self.db.connection(), &self.schema),
                SqliteSyncRepository::new(self.db.connection()),
                &self.codec,
                true,
            )
        }

        fn queue(&self) -> SqliteSyncRepository<'_> {
            SqliteSyncRepository::new(self.db.connection())
        }

        fn records(&self) -> SqliteRecordRepository<'_> {
            SqliteRecordRepository::new(self.db.connection(), &self.schema)
        }

        fn drain(&self) -> Vec<QueuedChange> {
            let queue = self.queue();
            let batch = queue.next_batch(1000).unwrap();
            let ids: Vec<i64> = batch.iter().map(|queued| queued.id).collect();
            queue.remove_all(&ids).unwrap();
            batch
        }
    }

    fn summary(batch: &[QueuedChange]) -> Vec<(&str, &str, Operation)> {
        batch
            .iter()
            .map(|queued| {
                (
                    queued.change.record_id.as_str(),
                    queued.change.property.as_str(),
                    queued.change.operation,
                )
            })
            .collect()
    }

    #[test]
    fn first_commit_creates_then_set_for_changed_fields() {
        let fixture = Fixture::new();
        let capture = fixture.capture();
        let context = CommitContext::in_group("team");

        let mut person = Record::with_id("Person", "r1");
        person.set("name", "Adrian");
        person.set("age", 40);
        capture.commit(&mut person, &context).unwrap();
        assert!(!person.is_dirty());

        let batch = fixture.drain();
        assert_eq!(
            summary(&batch),
            vec![
                ("r1", "age", Operation::Create),
                ("r1", "name", Operation::Create),
            ]
        );
        assert_eq!(batch[0].change.group, GroupHash::from_name("team"));
        assert_eq!(
            fixture.codec.decode(batch[1].change.value.as_deref().unwrap()).unwrap(),
            FieldValue::Text("Adrian".into())
        );

        person.set("age", 41);
        capture.commit(&mut person, &context).unwrap();
        assert_eq!(
            summary(&fixture.drain()),
            vec![("r1", "age", Operation::Set)]
        );
        assert_eq!(
            fixture.queue().registered_classes().unwrap(),
            vec!["Person"]
        );
    }

    #[test]
    fn ids_and_class_names_must_be_path_safe() {
        let fixture = Fixture::new();
        let context = CommitContext::in_group("team");

        for mut record in [
            Record::with_id("Person", "r1/evil"),
            Record::with_id("Person", ""),
            Record::with_id("Per/son", "r1"),
        ] {
            record.set("name", "Adrian");
            assert!(matches!(
                fixture.capture().commit(&mut record, &context),
                Err(Error::InvalidInput(_))
            ));
        }

        assert!(fixture.drain().is_empty());
        assert_eq!(fixture.records().fetch("Person", "r1/evil").unwrap(), None);
    }

    #[test]
    fn null_fields_queue_without_value() {
        let fixture = Fixture::new();
        let mut person = Record::with_id("Person", "r1");
        person.set("name", FieldValue::Null);
        fixture
            .capture()
            .commit(&mut person, &CommitContext::default())
            .unwrap();

        let batch = fixture.drain();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].change.value, None);
        assert_eq!(batch[0].change.group, GroupHash::default_group());
    }

    #[test]
    fn commit_subscribes_to_unregistered_group() {
        let fixture = Fixture::new();
        let mut person = Record::new("Person");
        person.set("name", "Adrian");
        fixture
            .capture()
            .commit(&mut person, &CommitContext::in_group("team"))
            .unwrap();

        let groups = fixture.queue().groups().unwrap();
        assert_eq!(groups, vec![VisibilityGroup::from_name("team")]);
    }

    #[test]
    fn remove_leaves_a_single_delete() {
        let fixture = Fixture::new();
        let capture = fixture.capture();
        let mut person = Record::with_id("Person", "r1");
        person.set("name", "Adrian");
        capture
            .commit(&mut person, &CommitContext::in_group("team"))
            .unwrap();

        capture.remove("Person", "r1").unwrap();

        let batch = fixture.drain();
        assert_eq!(batch.len(), 1);
        let change = &batch[0].change;
        assert_eq!(change.operation, Operation::Delete);
        assert_eq!(change.path().to_string(), "r1/Person/__delete__");
        assert_eq!(change.value, None);
        assert_eq!(change.group, GroupHash::from_name("team"));
        assert!(!fixture.records().exists("Person", "r1").unwrap());
    }

    #[test]
    fn remove_unknown_record_is_not_found() {
        let fixture = Fixture::new();
        let result = fixture.capture().remove("Person", "missing");
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(fixture.queue().pending_count().unwrap(), 0);
    }

    #[test]
    fn moving_groups_rekeys_the_record() {
        let fixture = Fixture::new();
        let capture = fixture.capture();

        let mut person = Record::with_id("Person", "r1");
        person.set("name", "Adrian");
        person.set("age", 40);
        capture
            .commit(&mut person, &CommitContext::in_group("a"))
            .unwrap();
        fixture.drain();

        let mut person = fixture.records().fetch("Person", "r1").unwrap().unwrap();
        capture
            .commit(&mut person, &CommitContext::in_group("b"))
            .unwrap();

        let new_id = person.id().to_string();
        assert_ne!(new_id, "r1");
        assert!(!fixture.records().exists("Person", "r1").unwrap());
        assert!(fixture.records().exists("Person", &new_id).unwrap());

        let batch = fixture.drain();
        let delete = &batch[0].change;
        assert_eq!(delete.record_id, "r1");
        assert_eq!(delete.operation, Operation::Delete);
        assert_eq!(delete.group, GroupHash::from_name("a"));

        let creates: Vec<_> = batch[1..].iter().map(|queued| &queued.change).collect();
        assert_eq!(creates.len(), 4);
        assert!(creates.iter().all(|change| change.record_id == new_id
            && change.operation == Operation::Create
            && change.group == GroupHash::from_name("b")));
        assert!(batch[1..]
            .iter()
            .all(|queued| queued.change.record_id != "r1"));
    }

    #[test]
    fn embedded_children_commit_first_and_are_referenced_by_id() {
        let fixture = Fixture::new();
        let mut pet = Record::with_id("Pet", "p1");
        pet.set("name", "Rex");
        let mut person = Record::with_id("Person", "r1");
        person.embed("pet", pet);

        fixture
            .capture()
            .commit(&mut person, &CommitContext::in_group("team"))
            .unwrap();

        let batch = fixture.drain();
        assert_eq!(
            summary(&batch),
            vec![
                ("p1", "name", Operation::Create),
                ("r1", "pet", Operation::Create),
            ]
        );
        let stored = fixture.records().fetch("Person", "r1").unwrap().unwrap();
        assert_eq!(stored.get("pet"), Some(&FieldValue::Entity("p1".into())));
        assert!(fixture.records().exists("Pet", "p1").unwrap());
    }

    #[test]
    fn shared_child_is_committed_once() {
        let fixture = Fixture::new();
        let mut pet = Record::with_id("Pet", "p1");
        pet.set("name", "Rex");
        let mut person = Record::with_id("Person", "r1");
        person.embed("pet", pet.clone());
        person.embed("backup_pet", pet);

        fixture
            .capture()
            .commit(&mut person, &CommitContext::in_group("team"))
            .unwrap();

        let pet_changes = fixture
            .drain()
            .into_iter()
            .filter(|queued| queued.change.class_name == "Pet")
            .count();
        assert_eq!(pet_changes, 1);
    }

    #[test]
    fn moving_parent_rekeys_embedded_children() {
        let fixture = Fixture::new();
        let capture = fixture.capture();
        let mut pet = Record::with_id("Pet", "p1");
        pet.set("name", "Rex");
        let mut person = Record::with_id("Person", "r1");
        person.embed("pet", pet);
        capture
            .commit(&mut person, &CommitContext::in_group("a"))
            .unwrap();
        fixture.drain();

        capture
            .commit(&mut person, &CommitContext::in_group("b"))
            .unwrap();

        let new_pet_id = person.embedded("pet").unwrap().id().to_string();
        assert_ne!(new_pet_id, "p1");
        assert_eq!(
            person.get("pet"),
            Some(&FieldValue::Entity(new_pet_id.clone()))
        );

        let deletes: Vec<_> = fixture
            .drain()
            .into_iter()
            .filter(|queued| queued.change.operation == Operation::Delete)
            .map(|queued| (queued.change.record_id, queued.change.group))
            .collect();
        assert_eq!(
            deletes,
            vec![
                ("r1".to_string(), GroupHash::from_name("a")),
                ("p1".to_string(), GroupHash::from_name("a")),
            ]
        );
        assert!(fixture.records().exists("Pet", &new_pet_id).unwrap());
    }

    #[test]
    fn partial_record_keeps_stored_fields() {
        let fixture = Fixture::new();
        let capture = fixture.capture();
        let mut person = Record::with_id("Person", "r1");
        person.set("name", "Adrian");
        person.set("age", 40);
        capture.commit(&mut person, &CommitContext::default()).unwrap();

        let mut partial = Record::with_id("Person", "r1");
        partial.set("age", 41);
        capture.commit(&mut partial, &CommitContext::default()).unwrap();

        let stored = fixture.records().fetch("Person", "r1").unwrap().unwrap();
        assert_eq!(stored.get("name"), Some(&FieldValue::Text("Adrian".into())));
        assert_eq!(stored.get("age"), Some(&FieldValue::Integer(41)));
    }
}
