use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field_value::FieldValue;
use crate::ids::{ModificationId, RecordId};
use crate::record::{Collection, Patch, Record, Snapshot, TouchedRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationKind {
    Create,
    Update,
    Delete,
}

impl ModificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    /// `None` when the field was absent before the update.
    pub old_value: Option<FieldValue>,
    pub new_value: FieldValue,
}

/// One create/update/delete applied to a scenario snapshot.
///
/// `create` carries the full record in `records`; `delete` carries the
/// primary record followed by every cascaded join row, each with the list
/// position it was removed from; `update` carries only `changes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modification {
    pub id: ModificationId,
    #[serde(rename = "type")]
    pub kind: ModificationKind,
    pub entity_type: Collection,
    pub entity_id: RecordId,
    pub description: String,
    #[serde(default)]
    pub changes: Vec<FieldChange>,
    #[serde(default)]
    pub records: Vec<TouchedRecord>,
    pub timestamp: i64,
}

impl Modification {
    pub fn create(touched: TouchedRecord, timestamp: i64) -> Self {
        let description = format!(
            "Created {} {}",
            touched.collection.entity_label(),
            touched.record.display_name()
        );
        Self {
            id: ModificationId::new(),
            kind: ModificationKind::Create,
            entity_type: touched.collection,
            entity_id: touched.record.id.clone(),
            description,
            changes: Vec::new(),
            records: vec![touched],
            timestamp,
        }
    }

    pub fn update(
        collection: Collection,
        record: &Record,
        changes: Vec<FieldChange>,
        timestamp: i64,
    ) -> Self {
        let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        let description = format!(
            "Updated {} {}: {}",
            collection.entity_label(),
            record.display_name(),
            fields.join(", ")
        );
        Self {
            id: ModificationId::new(),
            kind: ModificationKind::Update,
            entity_type: collection,
            entity_id: record.id.clone(),
            description,
            changes,
            records: Vec::new(),
            timestamp,
        }
    }

    /// `removed[0]` must be the primary record.
    pub fn delete(
        collection: Collection,
        removed: Vec<TouchedRecord>,
        timestamp: i64,
    ) -> Result<Self, CoreError> {
        let primary = removed
            .first()
            .ok_or_else(|| CoreError::InvalidData("delete without a removed record".into()))?;
        let mut description = format!(
            "Deleted {} {}",
            collection.entity_label(),
            primary.record.display_name()
        );
        let dependents = removed.len() - 1;
        if dependents > 0 {
            description.push_str(&format!(" and {dependents} dependent record(s)"));
        }
        Ok(Self {
            id: ModificationId::new(),
            kind: ModificationKind::Delete,
            entity_type: collection,
            entity_id: primary.record.id.clone(),
            description,
            changes: Vec::new(),
            records: removed,
            timestamp,
        })
    }

    /// Re-execute this modification against `snapshot`.
    pub fn apply(&self, snapshot: &mut Snapshot) -> Result<(), CoreError> {
        match self.kind {
            ModificationKind::Create => {
                for touched in &self.records {
                    snapshot.insert_at(touched.collection, touched.position, touched.record.clone())?;
                }
            }
            ModificationKind::Update => {
                let record = self.target_mut(snapshot)?;
                for change in &self.changes {
                    record.set(&change.field, change.new_value.clone());
                }
            }
            ModificationKind::Delete => {
                for touched in &self.records {
                    if snapshot.remove(touched.collection, &touched.record.id).is_none() {
                        return Err(missing(touched.collection, &touched.record.id));
                    }
                }
            }
        }
        Ok(())
    }

    /// Undo this modification on a snapshot it was the last change to.
    pub fn revert(&self, snapshot: &mut Snapshot) -> Result<(), CoreError> {
        match self.kind {
            ModificationKind::Create => {
                for touched in self.records.iter().rev() {
                    if snapshot.remove(touched.collection, &touched.record.id).is_none() {
                        return Err(missing(touched.collection, &touched.record.id));
                    }
                }
            }
            ModificationKind::Update => {
                let record = self.target_mut(snapshot)?;
                for change in &self.changes {
                    match &change.old_value {
                        Some(old) => record.set(&change.field, old.clone()),
                        None => {
                            record.remove_field(&change.field);
                        }
                    }
                }
            }
            ModificationKind::Delete => {
                for touched in self.records.iter().rev() {
                    snapshot.insert_at(touched.collection, touched.position, touched.record.clone())?;
                }
            }
        }
        Ok(())
    }

    /// The patch that reproduces an update elsewhere.
    pub fn to_patch(&self) -> Patch {
        let mut patch = Patch::new();
        for change in &self.changes {
            patch.insert(change.field.clone(), change.new_value.clone());
        }
        patch
    }

    fn target_mut<'a>(&self, snapshot: &'a mut Snapshot) -> Result<&'a mut Record, CoreError> {
        snapshot
            .find_mut(self.entity_type, &self.entity_id)
            .ok_or_else(|| missing(self.entity_type, &self.entity_id))
    }
}

fn missing(collection: Collection, id: &RecordId) -> CoreError {
    CoreError::InvalidData(format!("{collection} record {id} not present"))
}

/// Shallow per-key diff of `patch` against `current`, limited to the
/// collection's known fields. Nested values are compared whole.
pub fn diff_fields(
    collection: Collection,
    current: &Record,
    patch: &Patch,
) -> Result<Vec<FieldChange>, CoreError> {
    collection.check_fields(patch.keys())?;
    let changes = patch
        .iter()
        .filter(|(field, new)| current.get(field) != Some(*new))
        .map(|(field, new)| FieldChange {
            field: field.clone(),
            old_value: current.get(field).cloned(),
            new_value: new.clone(),
        })
        .collect();
    Ok(changes)
}

/// Rebuild a snapshot by applying `log` in order to `origin`.
pub fn replay(origin: &Snapshot, log: &[Modification]) -> Result<Snapshot, CoreError> {
    let mut snapshot = origin.clone();
    for modification in log {
        modification.apply(&mut snapshot)?;
    }
    Ok(snapshot)
}
