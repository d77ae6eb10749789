use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::CoreError;
use crate::field_value::FieldValue;
use crate::ids::RecordId;

/// Every collection carries these bookkeeping fields.
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    People,
    Teams,
    TeamMembers,
    Projects,
    Allocations,
    Goals,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Self::People,
        Self::Teams,
        Self::TeamMembers,
        Self::Projects,
        Self::Allocations,
        Self::Goals,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::People => "people",
            Self::Teams => "teams",
            Self::TeamMembers => "team_members",
            Self::Projects => "projects",
            Self::Allocations => "allocations",
            Self::Goals => "goals",
        }
    }

    /// Singular noun used in human-readable descriptions.
    pub fn entity_label(&self) -> &'static str {
        match self {
            Self::People => "person",
            Self::Teams => "team",
            Self::TeamMembers => "team membership",
            Self::Projects => "project",
            Self::Allocations => "allocation",
            Self::Goals => "goal",
        }
    }

    /// Known attribute names, excluding `id`.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            Self::People => &[
                "name", "email", "role", "title", "department", "capacity", "cost_rate",
                "start_date", "status", CREATED_AT, UPDATED_AT,
            ],
            Self::Teams => &[
                "name", "description", "capacity", "lead_id", "color", CREATED_AT, UPDATED_AT,
            ],
            Self::TeamMembers => &[
                "team_id", "person_id", "role", "allocation", CREATED_AT, UPDATED_AT,
            ],
            Self::Projects => &[
                "name", "description", "status", "priority", "start_date", "end_date", "budget",
                "owner_id", CREATED_AT, UPDATED_AT,
            ],
            Self::Allocations => &[
                "person_id", "project_id", "percentage", "start_date", "end_date", "notes",
                CREATED_AT, UPDATED_AT,
            ],
            Self::Goals => &[
                "name", "description", "status", "target_date", "metric", "target_value",
                "current_value", "project_id", CREATED_AT, UPDATED_AT,
            ],
        }
    }

    pub fn is_known_field(&self, field: &str) -> bool {
        self.fields().contains(&field)
    }

    /// Join collections whose rows must disappear together with a record of
    /// this collection, paired with the field holding the reference.
    pub fn dependents(&self) -> &'static [(Collection, &'static str)] {
        match self {
            Self::People => &[
                (Self::TeamMembers, "person_id"),
                (Self::Allocations, "person_id"),
            ],
            Self::Teams => &[(Self::TeamMembers, "team_id")],
            Self::Projects => &[(Self::Allocations, "project_id")],
            Self::TeamMembers | Self::Allocations | Self::Goals => &[],
        }
    }

    pub fn check_fields<'a>(
        &self,
        fields: impl IntoIterator<Item = &'a String>,
    ) -> Result<(), CoreError> {
        for field in fields {
            if !self.is_known_field(field) {
                return Err(CoreError::UnknownField {
                    collection: self.as_str().to_string(),
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: &str, value: FieldValue) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn remove_field(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    /// `name` when present, otherwise the id.
    pub fn display_name(&self) -> String {
        self.get("name")
            .and_then(FieldValue::as_text)
            .map(str::to_string)
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn references(&self, field: &str, id: &RecordId) -> bool {
        self.get(field)
            .and_then(FieldValue::as_record_ref)
            .is_some_and(|r| r == id.as_str())
    }
}

/// Input to an `add`: the id is optional and minted when missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub id: Option<RecordId>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl NewRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn set(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }
}

impl From<Record> for NewRecord {
    fn from(record: Record) -> Self {
        Self {
            id: Some(record.id),
            fields: record.fields,
        }
    }
}

/// Partial update: only the listed fields are compared and replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    fields: BTreeMap<String, FieldValue>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, field: String, value: FieldValue) {
        self.fields.insert(field, value);
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A record together with the collection and list position it occupied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchedRecord {
    pub collection: Collection,
    pub position: usize,
    pub record: Record,
}

/// Full dataset state: every collection with its records in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    collections: BTreeMap<Collection, Vec<Record>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(mut self, collection: Collection, records: Vec<Record>) -> Self {
        if records.is_empty() {
            self.collections.remove(&collection);
        } else {
            self.collections.insert(collection, records);
        }
        self
    }

    pub fn records(&self, collection: Collection) -> &[Record] {
        self.collections
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn find(&self, collection: Collection, id: &RecordId) -> Option<&Record> {
        self.records(collection).iter().find(|r| &r.id == id)
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.collections.values_mut().flatten()
    }

    pub fn find_mut(&mut self, collection: Collection, id: &RecordId) -> Option<&mut Record> {
        self.collections
            .get_mut(&collection)?
            .iter_mut()
            .find(|r| &r.id == id)
    }

    pub fn position(&self, collection: Collection, id: &RecordId) -> Option<usize> {
        self.records(collection).iter().position(|r| &r.id == id)
    }

    pub fn contains(&self, collection: Collection, id: &RecordId) -> bool {
        self.position(collection, id).is_some()
    }

    pub fn total_records(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// Append a record; returns its position.
    pub fn push(&mut self, collection: Collection, record: Record) -> Result<usize, CoreError> {
        let len = self.records(collection).len();
        self.insert_at(collection, len, record)?;
        Ok(len)
    }

    pub fn insert_at(
        &mut self,
        collection: Collection,
        position: usize,
        record: Record,
    ) -> Result<(), CoreError> {
        if self.contains(collection, &record.id) {
            return Err(CoreError::DuplicateId {
                collection: collection.as_str().to_string(),
                id: record.id.to_string(),
            });
        }
        let records = self.collections.entry(collection).or_default();
        let position = position.min(records.len());
        records.insert(position, record);
        Ok(())
    }

    pub fn remove(&mut self, collection: Collection, id: &RecordId) -> Option<TouchedRecord> {
        let records = self.collections.get_mut(&collection)?;
        let position = records.iter().position(|r| &r.id == id)?;
        let record = records.remove(position);
        if records.is_empty() {
            self.collections.remove(&collection);
        }
        Some(TouchedRecord {
            collection,
            position,
            record,
        })
    }

    /// Remove a record and every join row referencing it, primary first.
    /// Returns an empty list when the record is absent.
    pub fn remove_with_dependents(
        &mut self,
        collection: Collection,
        id: &RecordId,
    ) -> Vec<TouchedRecord> {
        let Some(primary) = self.remove(collection, id) else {
            return Vec::new();
        };
        let mut removed = vec![primary];
        for (dependent, field) in collection.dependents() {
            let doomed: Vec<RecordId> = self
                .records(*dependent)
                .iter()
                .filter(|r| r.references(field, id))
                .map(|r| r.id.clone())
                .collect();
            for dep_id in doomed {
                if let Some(touched) = self.remove(*dependent, &dep_id) {
                    removed.push(touched);
                }
            }
        }
        removed
    }
}
