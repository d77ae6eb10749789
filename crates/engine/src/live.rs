use planvault_core::clock::MonotonicClock;
use planvault_core::record::{CREATED_AT, UPDATED_AT};
use planvault_core::{Collection, FieldValue, NewRecord, Patch, Record, RecordId, Snapshot};

use crate::error::EngineError;

/// The authoritative dataset when no scenario is targeted. The router only
/// calls these operations and never looks at how the context persists.
pub trait LiveDataContext {
    fn add(&mut self, collection: Collection, draft: NewRecord) -> Result<Record, EngineError>;

    fn update(
        &mut self,
        collection: Collection,
        id: &RecordId,
        patch: &Patch,
    ) -> Result<(), EngineError>;

    fn delete(&mut self, collection: Collection, id: &RecordId) -> Result<(), EngineError>;

    fn current_snapshot(&self) -> Snapshot;
}

/// Live context held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryLiveContext {
    snapshot: Snapshot,
    clock: MonotonicClock,
}

impl MemoryLiveContext {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            clock: MonotonicClock::new(),
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

impl LiveDataContext for MemoryLiveContext {
    fn add(&mut self, collection: Collection, draft: NewRecord) -> Result<Record, EngineError> {
        collection.check_fields(draft.fields.keys())?;
        let id = match draft.id {
            Some(id) => id,
            None => loop {
                let candidate = RecordId::generate();
                if !self.snapshot.contains(collection, &candidate) {
                    break candidate;
                }
            },
        };
        let mut record = Record {
            id,
            fields: draft.fields,
        };
        let now = FieldValue::Timestamp(self.clock.tick());
        for field in [CREATED_AT, UPDATED_AT] {
            if record.get(field).is_none() {
                record.set(field, now.clone());
            }
        }
        self.snapshot.push(collection, record.clone())?;
        Ok(record)
    }

    fn update(
        &mut self,
        collection: Collection,
        id: &RecordId,
        patch: &Patch,
    ) -> Result<(), EngineError> {
        collection.check_fields(patch.keys())?;
        let record = self
            .snapshot
            .find_mut(collection, id)
            .ok_or_else(|| EngineError::EntityNotFound {
                collection,
                id: id.clone(),
            })?;
        for (field, value) in patch.iter() {
            record.set(field, value.clone());
        }
        Ok(())
    }

    fn delete(&mut self, collection: Collection, id: &RecordId) -> Result<(), EngineError> {
        if self.snapshot.remove_with_dependents(collection, id).is_empty() {
            return Err(EngineError::EntityNotFound {
                collection,
                id: id.clone(),
            });
        }
        Ok(())
    }

    fn current_snapshot(&self) -> Snapshot {
        self.snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_fills_id_and_timestamps() -> Result<(), EngineError> {
        let mut live = MemoryLiveContext::default();
        let record = live.add(Collection::Teams, NewRecord::new().set("name", "Core"))?;
        assert_eq!(record.id.as_str().len(), 36);
        assert!(matches!(record.get(CREATED_AT), Some(FieldValue::Timestamp(_))));
        assert_eq!(live.snapshot().records(Collection::Teams).len(), 1);
        Ok(())
    }

    #[test]
    fn missing_targets_are_reported() {
        let mut live = MemoryLiveContext::default();
        let id = RecordId::new("ghost");
        assert!(matches!(
            live.update(Collection::People, &id, &Patch::new().set("name", "x")),
            Err(EngineError::EntityNotFound { .. })
        ));
        assert!(matches!(
            live.delete(Collection::People, &id),
            Err(EngineError::EntityNotFound { .. })
        ));
    }
}
