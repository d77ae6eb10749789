//! Scenario-aware routing of record mutations.
//!
//! Every call names its [`Target`]. Live mutations go straight to the
//! [`LiveDataContext`]; scenario mutations are applied to a copy of the
//! scenario, logged as a [`Modification`], persisted, and only then become
//! the cached state.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use planvault_core::clock::MonotonicClock;
use planvault_core::guard::{self, GuardLimits};
use planvault_core::modification::diff_fields;
use planvault_core::record::{CREATED_AT, UPDATED_AT};
use planvault_core::{
    Collection, CoreError, FieldValue, Modification, ModificationKind, NewRecord, Patch, Record,
    RecordId, ScenarioId, Snapshot, TouchedRecord,
};
use planvault_storage::{ChunkedStore, Cipher, KvStore, StorageStats};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::live::LiveDataContext;
use crate::notify::{AuditEvent, AuditSink, Notification, Notifier, Severity};
use crate::scenario::{Scenario, ScenarioStore, ScenarioSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Live,
    Scenario(ScenarioId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Record,
    Undo,
}

type Outcome<T> = (T, Option<Modification>);

pub struct ScenarioRouter<L: LiveDataContext, K: KvStore> {
    live: L,
    store: ScenarioStore<K>,
    cache: HashMap<ScenarioId, Scenario>,
    notifier: Box<dyn Notifier>,
    audit: Option<Box<dyn AuditSink>>,
    guard: GuardLimits,
    clock: MonotonicClock,
}

impl<L: LiveDataContext, K: KvStore> ScenarioRouter<L, K> {
    pub fn new(live: L, store: ScenarioStore<K>, notifier: Box<dyn Notifier>) -> Self {
        Self {
            live,
            store,
            cache: HashMap::new(),
            notifier,
            audit: None,
            guard: GuardLimits::default(),
            clock: MonotonicClock::new(),
        }
    }

    /// Build the whole stack over `kv` from configuration.
    pub fn from_config(
        live: L,
        kv: K,
        config: &EngineConfig,
        notifier: Box<dyn Notifier>,
    ) -> Result<Self, EngineError> {
        let cipher = Cipher::derive(&config.cipher)?;
        let chunked = ChunkedStore::new(kv, cipher, config.chunks)?;
        Ok(Self::new(live, ScenarioStore::new(chunked), notifier).with_guard_limits(config.guard))
    }

    pub fn with_audit(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn with_guard_limits(mut self, limits: GuardLimits) -> Self {
        self.guard = limits;
        self
    }

    pub fn live(&self) -> &L {
        &self.live
    }

    pub fn live_mut(&mut self) -> &mut L {
        &mut self.live
    }

    pub fn scenario_store(&self) -> &ScenarioStore<K> {
        &self.store
    }

    pub fn scenario_store_mut(&mut self) -> &mut ScenarioStore<K> {
        &mut self.store
    }

    // ------------------------------------------------------------------
    // Scenario lifecycle
    // ------------------------------------------------------------------

    /// Branch the current live state into a new scenario.
    pub fn create_scenario(&mut self, name: &str) -> Result<Scenario, EngineError> {
        let scenario = self
            .store
            .create(name, self.live.current_snapshot(), &self.guard)?;
        self.cache.insert(scenario.id, scenario.clone());
        Ok(scenario)
    }

    pub fn list_scenarios(&mut self) -> Vec<ScenarioSummary> {
        self.store.list()
    }

    pub fn scenario(&mut self, id: ScenarioId) -> Result<Option<&Scenario>, EngineError> {
        if !self.cache.contains_key(&id) {
            match self.store.load(id)? {
                Some(scenario) => {
                    self.cache.insert(id, scenario);
                }
                None => return Ok(None),
            }
        }
        Ok(self.cache.get(&id))
    }

    /// Load a scenario and mark it as accessed now.
    pub fn open_scenario(&mut self, id: ScenarioId) -> Result<&Scenario, EngineError> {
        let touched = self.store.touch(id)?;
        self.cache.insert(id, touched);
        self.cache.get(&id).ok_or(EngineError::ScenarioNotFound(id))
    }

    pub fn delete_scenario(&mut self, id: ScenarioId) -> Result<bool, EngineError> {
        self.cache.remove(&id);
        self.store.delete(id)
    }

    pub fn scenario_stats(&self, id: ScenarioId) -> Result<StorageStats, EngineError> {
        self.store.stats(id)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    pub fn collection(&mut self, target: Target, collection: Collection) -> CollectionRouter<'_, L, K> {
        CollectionRouter {
            router: self,
            target,
            collection,
        }
    }

    pub fn people(&mut self, target: Target) -> CollectionRouter<'_, L, K> {
        self.collection(target, Collection::People)
    }

    pub fn teams(&mut self, target: Target) -> CollectionRouter<'_, L, K> {
        self.collection(target, Collection::Teams)
    }

    pub fn team_members(&mut self, target: Target) -> CollectionRouter<'_, L, K> {
        self.collection(target, Collection::TeamMembers)
    }

    pub fn projects(&mut self, target: Target) -> CollectionRouter<'_, L, K> {
        self.collection(target, Collection::Projects)
    }

    pub fn allocations(&mut self, target: Target) -> CollectionRouter<'_, L, K> {
        self.collection(target, Collection::Allocations)
    }

    pub fn goals(&mut self, target: Target) -> CollectionRouter<'_, L, K> {
        self.collection(target, Collection::Goals)
    }

    pub fn add(
        &mut self,
        target: Target,
        collection: Collection,
        draft: NewRecord,
    ) -> Result<Record, EngineError> {
        let limits = self.guard;
        let scenario_id = match target {
            Target::Live => {
                let draft = NewRecord {
                    id: draft.id,
                    fields: sanitize_fields(draft.fields, &limits)?,
                };
                return self.live.add(collection, draft);
            }
            Target::Scenario(id) => id,
        };
        self.mutate(scenario_id, Action::Record, move |scenario, now| {
            collection.check_fields(draft.fields.keys())?;
            let snapshot = &mut scenario.snapshot;
            let id = match draft.id {
                Some(id) => id,
                None => fresh_id(snapshot, collection),
            };
            let mut record = Record {
                id,
                fields: sanitize_fields(draft.fields, &limits)?,
            };
            for field in [CREATED_AT, UPDATED_AT] {
                if record.get(field).is_none() {
                    record.set(field, FieldValue::Timestamp(now));
                }
            }
            let position = snapshot.push(collection, record.clone())?;
            let modification = Modification::create(
                TouchedRecord {
                    collection,
                    position,
                    record: record.clone(),
                },
                now,
            );
            scenario.record(modification.clone());
            Ok((record, Some(modification)))
        })
    }

    /// Returns the logged modification, or `None` when nothing changed.
    pub fn update(
        &mut self,
        target: Target,
        collection: Collection,
        id: &RecordId,
        patch: Patch,
    ) -> Result<Option<Modification>, EngineError> {
        let limits = self.guard;
        let scenario_id = match target {
            Target::Live => {
                let patch = sanitize_patch(&patch, &limits)?;
                self.live.update(collection, id, &patch)?;
                return Ok(None);
            }
            Target::Scenario(scenario_id) => scenario_id,
        };
        self.mutate(scenario_id, Action::Record, |scenario, now| {
            collection.check_fields(patch.keys())?;
            let patch = sanitize_patch(&patch, &limits)?;
            let Some(record) = scenario.snapshot.find_mut(collection, id) else {
                debug!(%collection, %id, "update target not in scenario, skipping");
                return Ok((None, None));
            };
            let changes = diff_fields(collection, record, &patch)?;
            if changes.is_empty() {
                debug!(%collection, %id, "update changes nothing, skipping");
                return Ok((None, None));
            }
            for change in &changes {
                record.set(&change.field, change.new_value.clone());
            }
            let modification = Modification::update(collection, record, changes, now);
            scenario.record(modification.clone());
            Ok((Some(modification.clone()), Some(modification)))
        })
    }

    /// Removes the record and every join row referencing it in one step.
    pub fn delete(
        &mut self,
        target: Target,
        collection: Collection,
        id: &RecordId,
    ) -> Result<Option<Modification>, EngineError> {
        let scenario_id = match target {
            Target::Live => {
                self.live.delete(collection, id)?;
                return Ok(None);
            }
            Target::Scenario(scenario_id) => scenario_id,
        };
        self.mutate(scenario_id, Action::Record, |scenario, now| {
            let removed = scenario.snapshot.remove_with_dependents(collection, id);
            if removed.is_empty() {
                debug!(%collection, %id, "delete target not in scenario, skipping");
                return Ok((None, None));
            }
            let modification = Modification::delete(collection, removed, now)?;
            scenario.record(modification.clone());
            Ok((Some(modification.clone()), Some(modification)))
        })
    }

    /// Revert and drop the newest modification of a scenario.
    pub fn undo_last(&mut self, id: ScenarioId) -> Result<Option<Modification>, EngineError> {
        self.mutate(id, Action::Undo, |scenario, _| {
            let Some(modification) = scenario.pop_modification() else {
                return Ok((None, None));
            };
            modification.revert(&mut scenario.snapshot)?;
            Ok((Some(modification.clone()), Some(modification)))
        })
    }

    /// Replay a scenario's log onto the live dataset. Changes whose target
    /// no longer exists live (or already exists, for creates) are skipped.
    /// Returns how many modifications took effect.
    pub fn apply_to_live(&mut self, id: ScenarioId) -> Result<usize, EngineError> {
        let log = match self.scenario(id)? {
            Some(scenario) => scenario.modifications.clone(),
            None => return Err(EngineError::ScenarioNotFound(id)),
        };
        let mut applied = 0;
        for modification in &log {
            let collection = modification.entity_type;
            let result = match modification.kind {
                ModificationKind::Create => modification
                    .records
                    .first()
                    .map(|touched| {
                        self.live
                            .add(touched.collection, NewRecord::from(touched.record.clone()))
                            .map(|_| ())
                    })
                    .unwrap_or(Ok(())),
                ModificationKind::Update => {
                    self.live
                        .update(collection, &modification.entity_id, &modification.to_patch())
                }
                ModificationKind::Delete => self.live.delete(collection, &modification.entity_id),
            };
            match result {
                Ok(()) => applied += 1,
                Err(
                    e @ (EngineError::EntityNotFound { .. }
                    | EngineError::Core(CoreError::DuplicateId { .. })),
                ) => {
                    warn!(scenario = %id, modification = %modification.id, error = %e, "skipping modification");
                }
                Err(e) => return Err(e),
            }
        }
        info!(scenario = %id, applied, total = log.len(), "applied scenario to live data");
        Ok(applied)
    }

    fn mutate<T>(
        &mut self,
        id: ScenarioId,
        action: Action,
        op: impl FnOnce(&mut Scenario, i64) -> Result<Outcome<T>, EngineError>,
    ) -> Result<T, EngineError> {
        match self.commit(id, op) {
            Ok((value, Some(modification))) => {
                let (title, description) = match action {
                    Action::Record => ("Scenario updated", modification.description.clone()),
                    Action::Undo => ("Change undone", format!("Undid: {}", modification.description)),
                };
                self.notifier.notify(Notification::success(title, description));
                self.emit_audit(id, action, &modification);
                Ok(value)
            }
            Ok((value, None)) => Ok(value),
            Err(e) => {
                warn!(scenario = %id, error = %e, "scenario change failed");
                self.notifier
                    .notify(Notification::failure("Scenario change failed", e.to_string()));
                Err(e)
            }
        }
    }

    /// Run `op` on a copy; persist and swap it in only if it logged something.
    fn commit<T>(
        &mut self,
        id: ScenarioId,
        op: impl FnOnce(&mut Scenario, i64) -> Result<Outcome<T>, EngineError>,
    ) -> Result<Outcome<T>, EngineError> {
        let mut scenario = match self.cache.get(&id) {
            Some(cached) => cached.clone(),
            None => self.store.load(id)?.ok_or(EngineError::ScenarioNotFound(id))?,
        };
        let now = self.clock.tick();
        let (value, modification) = op(&mut scenario, now)?;
        if modification.is_none() {
            return Ok((value, None));
        }
        scenario.metadata.last_access_date = now;
        self.store.save(&scenario)?;
        self.cache.insert(id, scenario);
        Ok((value, modification))
    }

    fn emit_audit(&mut self, scenario_id: ScenarioId, action: Action, modification: &Modification) {
        let Some(sink) = self.audit.as_mut() else {
            return;
        };
        let flat = |value: &FieldValue| match guard::flatten(value, &self.guard) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(error = %e, "audit value not serializable");
                None
            }
        };
        let primary = modification.records.first().map(|t| &t.record);
        let (old_value, new_value) = match modification.kind {
            ModificationKind::Create => (None, primary.map(record_value)),
            ModificationKind::Delete => (primary.map(record_value), None),
            ModificationKind::Update => {
                let mut old = BTreeMap::new();
                let mut new = BTreeMap::new();
                for change in &modification.changes {
                    old.insert(
                        change.field.clone(),
                        change.old_value.clone().unwrap_or(FieldValue::Null),
                    );
                    new.insert(change.field.clone(), change.new_value.clone());
                }
                (Some(FieldValue::Map(old)), Some(FieldValue::Map(new)))
            }
        };
        let (old_value, new_value) = match action {
            Action::Record => (old_value, new_value),
            Action::Undo => (new_value, old_value),
        };
        let resource_name = match primary {
            Some(record) => record.display_name(),
            None => self
                .cache
                .get(&scenario_id)
                .and_then(|s| s.snapshot.find(modification.entity_type, &modification.entity_id))
                .map(Record::display_name)
                .unwrap_or_else(|| modification.entity_id.to_string()),
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("scenario_id".to_string(), scenario_id.to_string());
        metadata.insert("modification_id".to_string(), modification.id.to_string());
        if let Some(scenario) = self.cache.get(&scenario_id) {
            metadata.insert("scenario_name".to_string(), scenario.name.clone());
        }
        if modification.kind == ModificationKind::Delete {
            metadata.insert(
                "cascaded".to_string(),
                modification.records.len().saturating_sub(1).to_string(),
            );
        }

        let prefix = match action {
            Action::Record => "scenario",
            Action::Undo => "scenario_undo",
        };
        let event = AuditEvent {
            action: format!("{prefix}_{}", modification.kind.as_str()),
            resource_type: modification.entity_type.as_str().to_string(),
            resource_id: modification.entity_id.to_string(),
            resource_name,
            old_value: old_value.as_ref().and_then(flat),
            new_value: new_value.as_ref().and_then(flat),
            metadata,
            severity: match modification.kind {
                ModificationKind::Delete => Severity::Warning,
                _ => Severity::Info,
            },
        };
        sink.log_event(event);
    }
}

/// Mutations against one collection under a fixed target.
pub struct CollectionRouter<'a, L: LiveDataContext, K: KvStore> {
    router: &'a mut ScenarioRouter<L, K>,
    target: Target,
    collection: Collection,
}

impl<L: LiveDataContext, K: KvStore> CollectionRouter<'_, L, K> {
    pub fn add(&mut self, draft: NewRecord) -> Result<Record, EngineError> {
        self.router.add(self.target, self.collection, draft)
    }

    pub fn update(&mut self, id: &RecordId, patch: Patch) -> Result<Option<Modification>, EngineError> {
        self.router.update(self.target, self.collection, id, patch)
    }

    pub fn delete(&mut self, id: &RecordId) -> Result<Option<Modification>, EngineError> {
        self.router.delete(self.target, self.collection, id)
    }
}

fn fresh_id(snapshot: &Snapshot, collection: Collection) -> RecordId {
    loop {
        let candidate = RecordId::generate();
        if !snapshot.contains(collection, &candidate) {
            return candidate;
        }
    }
}

fn sanitize_fields(
    fields: BTreeMap<String, FieldValue>,
    limits: &GuardLimits,
) -> Result<BTreeMap<String, FieldValue>, CoreError> {
    fields
        .into_iter()
        .map(|(field, value)| Ok((field, guard::sanitize(&value, limits)?)))
        .collect()
}

fn sanitize_patch(patch: &Patch, limits: &GuardLimits) -> Result<Patch, CoreError> {
    let mut sanitized = Patch::new();
    for (field, value) in patch.iter() {
        sanitized.insert(field.clone(), guard::sanitize(value, limits)?);
    }
    Ok(sanitized)
}

fn record_value(record: &Record) -> FieldValue {
    let mut map = record.fields.clone();
    map.insert("id".to_string(), FieldValue::Text(record.id.to_string()));
    FieldValue::Map(map)
}
