use planvault_core::guard::{self, GuardLimits};
use planvault_core::modification::replay;
use planvault_core::{
    Collection, FieldChange, FieldValue, ModificationKind, NewRecord, Patch, Placeholder, Record,
    RecordId,
};
use planvault_engine::{EngineConfig, EngineError, NotificationVariant, Severity, Target};
use planvault_harness::TestBench;
use planvault_harness::fixtures;
use planvault_storage::StorageError;

fn id(s: &str) -> RecordId {
    RecordId::new(s)
}

// ============================================================================
// End-to-end
// ============================================================================

#[test]
fn q3_draft_capacity_change() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let draft = bench.create_scenario("Q3 Draft")?;
    let target = Target::Scenario(draft);

    let modification = bench
        .router
        .teams(target)
        .update(&id("t1"), Patch::new().set("capacity", 45))?;
    let Some(modification) = modification else {
        panic!("capacity change was not logged");
    };
    assert_eq!(modification.kind, ModificationKind::Update);
    assert_eq!(modification.entity_type, Collection::Teams);
    assert_eq!(modification.description, "Updated team Core: capacity");
    assert_eq!(
        modification.changes,
        vec![FieldChange {
            field: "capacity".into(),
            old_value: Some(FieldValue::Integer(40)),
            new_value: FieldValue::Integer(45),
        }]
    );

    // Persisted scenario has the new value and one log entry.
    let persisted = bench.persisted(draft)?.ok_or("scenario missing")?;
    let team = persisted
        .snapshot
        .find(Collection::Teams, &id("t1"))
        .ok_or("team missing")?;
    assert_eq!(team.get("capacity"), Some(&FieldValue::Integer(45)));
    assert_eq!(persisted.modifications, vec![modification.clone()]);
    assert_eq!(persisted.metadata.total_modifications, 1);

    // Live still says 40.
    let live_team = bench
        .live()
        .find(Collection::Teams, &id("t1"))
        .ok_or("live team missing")?;
    assert_eq!(live_team.get("capacity"), Some(&FieldValue::Integer(40)));

    let notification = bench.notifications.last().ok_or("no notification")?;
    assert_eq!(notification.variant, NotificationVariant::Success);
    assert_eq!(notification.title, "Scenario updated");
    assert_eq!(notification.description, "Updated team Core: capacity");

    let events = bench.audit.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.action, "scenario_update");
    assert_eq!(event.resource_type, "teams");
    assert_eq!(event.resource_id, "t1");
    assert_eq!(event.resource_name, "Core");
    assert_eq!(event.severity, Severity::Info);
    assert_eq!(event.metadata.get("scenario_name").map(String::as_str), Some("Q3 Draft"));
    let old = guard::unflatten(event.old_value.as_deref().ok_or("no old value")?)?;
    let new = guard::unflatten(event.new_value.as_deref().ok_or("no new value")?)?;
    assert_eq!(old, FieldValue::Map([("capacity".to_string(), FieldValue::Integer(40))].into()));
    assert_eq!(new, FieldValue::Map([("capacity".to_string(), FieldValue::Integer(45))].into()));
    Ok(())
}

#[test]
fn update_diff_lists_only_changed_fields() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let target = Target::Scenario(bench.create_scenario("Draft")?);
    let patch = Patch::new()
        .set("name", "Core")
        .set("capacity", 40)
        .set("description", "Owns the data layer");
    let modification = bench
        .router
        .teams(target)
        .update(&id("t1"), patch)?
        .ok_or("nothing logged")?;
    assert_eq!(
        modification.changes,
        vec![FieldChange {
            field: "description".into(),
            old_value: None,
            new_value: FieldValue::from("Owns the data layer"),
        }]
    );
    Ok(())
}

// ============================================================================
// Cascades
// ============================================================================

#[test]
fn deleting_a_person_cascades_in_one_modification() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let scenario = bench.create_scenario("Reorg")?;
    let modification = bench
        .router
        .people(Target::Scenario(scenario))
        .delete(&id("p1"))?
        .ok_or("nothing logged")?;

    assert_eq!(modification.kind, ModificationKind::Delete);
    assert_eq!(modification.description, "Deleted person Ada and 3 dependent record(s)");
    let removed: Vec<&str> = modification
        .records
        .iter()
        .map(|t| t.record.id.as_str())
        .collect();
    assert_eq!(removed, vec!["p1", "m1", "m3", "a1"]);

    let persisted = bench.persisted(scenario)?.ok_or("scenario missing")?;
    assert_eq!(persisted.modifications.len(), 1);
    let snapshot = &persisted.snapshot;
    assert!(!snapshot.contains(Collection::People, &id("p1")));
    for record in snapshot.records(Collection::TeamMembers) {
        assert!(!record.references("person_id", &id("p1")));
    }
    for record in snapshot.records(Collection::Allocations) {
        assert!(!record.references("person_id", &id("p1")));
    }
    assert_eq!(snapshot.records(Collection::TeamMembers).len(), 2);

    // Live keeps everything.
    assert_eq!(bench.live().records(Collection::TeamMembers).len(), 4);

    let event = bench.audit.events().pop().ok_or("no audit event")?;
    assert_eq!(event.action, "scenario_delete");
    assert_eq!(event.severity, Severity::Warning);
    assert_eq!(event.metadata.get("cascaded").map(String::as_str), Some("3"));
    assert!(event.new_value.is_none());
    Ok(())
}

#[test]
fn deleting_a_project_leaves_goals_alone() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let scenario = bench.create_scenario("Cancel Atlas")?;
    let modification = bench
        .router
        .projects(Target::Scenario(scenario))
        .delete(&id("pr1"))?
        .ok_or("nothing logged")?;
    assert_eq!(modification.records.len(), 3);
    let snapshot = bench.persisted(scenario)?.ok_or("scenario missing")?.snapshot;
    assert!(snapshot.records(Collection::Allocations).is_empty());
    assert_eq!(snapshot.records(Collection::Goals).len(), 1);
    Ok(())
}

// ============================================================================
// Isolation
// ============================================================================

#[test]
fn live_and_scenario_do_not_leak() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let scenario = bench.create_scenario("Draft")?;

    let hire = bench
        .router
        .people(Target::Scenario(scenario))
        .add(NewRecord::new().set("name", "Barbara"))?;
    assert!(!bench.live().contains(Collection::People, &hire.id));

    let live_hire = bench
        .router
        .people(Target::Live)
        .add(NewRecord::new().set("name", "Edsger"))?;
    bench
        .router
        .teams(Target::Live)
        .update(&id("t2"), Patch::new().set("capacity", 10))?;

    let persisted = bench.persisted(scenario)?.ok_or("scenario missing")?;
    assert!(persisted.snapshot.contains(Collection::People, &hire.id));
    assert!(!persisted.snapshot.contains(Collection::People, &live_hire.id));
    let t2 = persisted
        .snapshot
        .find(Collection::Teams, &id("t2"))
        .ok_or("team missing")?;
    assert_eq!(t2.get("capacity"), Some(&FieldValue::Integer(30)));

    // Only the scenario mutation was notified and audited.
    assert_eq!(bench.notifications.notifications().len(), 1);
    assert_eq!(bench.audit.events().len(), 1);
    Ok(())
}

#[test]
fn scenario_starts_from_current_live_state() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    bench
        .router
        .goals(Target::Live)
        .delete(&id("g1"))?;
    let scenario = bench.create_scenario("After cleanup")?;
    let snapshot = bench.persisted(scenario)?.ok_or("scenario missing")?.snapshot;
    assert_eq!(&snapshot, bench.live());
    assert!(snapshot.records(Collection::Goals).is_empty());
    Ok(())
}

// ============================================================================
// Log replay and undo
// ============================================================================

#[test]
fn replaying_the_log_reproduces_the_snapshot() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let origin = bench.live().clone();
    let scenario = bench.create_scenario("Draft")?;
    let target = Target::Scenario(scenario);

    let team = bench
        .router
        .teams(target)
        .add(NewRecord::new().set("name", "Infra").set("capacity", 20))?;
    bench.router.team_members(target).add(
        NewRecord::new()
            .with_id("m9")
            .set("team_id", team.id.clone())
            .set("person_id", id("p3")),
    )?;
    bench
        .router
        .people(target)
        .update(&id("p2"), Patch::new().set("role", "Lead"))?;
    bench.router.teams(target).delete(&id("t1"))?;
    bench
        .router
        .allocations(target)
        .update(&id("a2"), Patch::new().set("percentage", 75))?;

    let persisted = bench.persisted(scenario)?.ok_or("scenario missing")?;
    assert_eq!(persisted.modifications.len(), 5);
    assert_eq!(replay(&origin, &persisted.modifications)?, persisted.snapshot);

    // Timestamps follow log order.
    let stamps: Vec<i64> = persisted.modifications.iter().map(|m| m.timestamp).collect();
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    Ok(())
}

#[test]
fn undo_restores_previous_states() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let scenario = bench.create_scenario("Draft")?;
    let target = Target::Scenario(scenario);
    let origin = bench.persisted(scenario)?.ok_or("scenario missing")?.snapshot;

    bench.router.teams(target).delete(&id("t1"))?;
    let after_delete = bench.persisted(scenario)?.ok_or("scenario missing")?.snapshot;
    bench
        .router
        .people(target)
        .update(&id("p1"), Patch::new().set("title", "Staff Engineer"))?;

    let undone = bench.router.undo_last(scenario)?.ok_or("nothing undone")?;
    assert_eq!(undone.kind, ModificationKind::Update);
    assert_eq!(
        bench.persisted(scenario)?.ok_or("scenario missing")?.snapshot,
        after_delete
    );

    bench.router.undo_last(scenario)?;
    let restored = bench.persisted(scenario)?.ok_or("scenario missing")?;
    assert_eq!(restored.snapshot, origin);
    assert!(restored.modifications.is_empty());
    assert_eq!(restored.metadata.total_modifications, 0);

    // Memberships come back at their original positions.
    let members: Vec<&str> = restored
        .snapshot
        .records(Collection::TeamMembers)
        .iter()
        .map(|r| r.id.as_str())
        .collect();
    assert_eq!(members, vec!["m1", "m2", "m3", "m4"]);

    assert_eq!(bench.router.undo_last(scenario)?, None);
    let last = bench.notifications.last().ok_or("no notification")?;
    assert_eq!(last.title, "Change undone");
    let actions: Vec<String> = bench.audit.events().into_iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            "scenario_delete",
            "scenario_update",
            "scenario_undo_update",
            "scenario_undo_delete"
        ]
    );
    Ok(())
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn failed_save_is_not_sticky() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let scenario = bench.create_scenario("Draft")?;
    let target = Target::Scenario(scenario);

    bench.kv_mut().fail_after(0);
    let err = bench
        .router
        .teams(target)
        .update(&id("t1"), Patch::new().set("capacity", 55));
    assert!(matches!(
        err,
        Err(EngineError::Storage(StorageError::Substrate(_)))
    ));
    let failure = bench.notifications.last().ok_or("no notification")?;
    assert_eq!(failure.variant, NotificationVariant::Destructive);
    assert_eq!(failure.title, "Scenario change failed");
    assert!(bench.audit.events().is_empty());

    // Neither the cache nor the substrate moved.
    let cached = bench.router.scenario(scenario)?.ok_or("scenario missing")?;
    assert!(cached.modifications.is_empty());
    bench.kv_mut().heal();
    let persisted = bench.persisted(scenario)?.ok_or("scenario missing")?;
    assert!(persisted.modifications.is_empty());

    // The same change goes through once storage recovers.
    let retried = bench
        .router
        .teams(target)
        .update(&id("t1"), Patch::new().set("capacity", 55))?;
    assert!(retried.is_some());
    let persisted = bench.persisted(scenario)?.ok_or("scenario missing")?;
    assert_eq!(persisted.modifications.len(), 1);
    Ok(())
}

#[test]
fn missing_targets_are_silent_in_scenarios_only() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let scenario = bench.create_scenario("Draft")?;
    let target = Target::Scenario(scenario);

    assert_eq!(
        bench
            .router
            .people(target)
            .update(&id("ghost"), Patch::new().set("name", "Nobody"))?,
        None
    );
    assert_eq!(bench.router.people(target).delete(&id("ghost"))?, None);
    assert!(bench.notifications.notifications().is_empty());
    assert!(bench
        .persisted(scenario)?
        .ok_or("scenario missing")?
        .modifications
        .is_empty());

    assert!(matches!(
        bench.router.people(Target::Live).delete(&id("ghost")),
        Err(EngineError::EntityNotFound { .. })
    ));
    Ok(())
}

#[test]
fn duplicate_ids_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let target = Target::Scenario(bench.create_scenario("Draft")?);
    let err = bench
        .router
        .teams(target)
        .add(NewRecord::new().with_id("t1").set("name", "Again"));
    assert!(matches!(err, Err(EngineError::Core(_))));
    let failure = bench.notifications.last().ok_or("no notification")?;
    assert_eq!(failure.variant, NotificationVariant::Destructive);
    Ok(())
}

// ============================================================================
// Guard at the router boundary
// ============================================================================

#[test]
fn deeply_nested_values_are_truncated_on_the_way_in() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = TestBench::config();
    config.guard = GuardLimits {
        max_depth: 2,
        ..GuardLimits::default()
    };
    let mut bench = TestBench::with_config(fixtures::live_snapshot(), config)?;
    let target = Target::Scenario(bench.create_scenario("Draft")?);

    let mut metric = FieldValue::Integer(1);
    for _ in 0..5_000 {
        metric = FieldValue::List(vec![metric]);
    }
    let goal = bench
        .router
        .goals(target)
        .add(NewRecord::new().set("name", "Deep").set("metric", metric))?;
    let expected = FieldValue::List(vec![FieldValue::List(vec![FieldValue::Placeholder(
        Placeholder::Truncated,
    )])]);
    assert_eq!(goal.get("metric"), Some(&expected));

    let event = bench.audit.events().pop().ok_or("no audit event")?;
    assert!(event.new_value.is_some_and(|text| text.contains("Truncated")));
    Ok(())
}

#[test]
fn deep_live_values_are_bounded_when_branching() -> Result<(), Box<dyn std::error::Error>> {
    let mut metric = FieldValue::Integer(1);
    for _ in 0..100 {
        metric = FieldValue::List(vec![metric]);
    }
    let live = fixtures::live_snapshot().with_records(
        Collection::Goals,
        vec![Record::new("g1").with("name", "Deep").with("metric", metric)],
    );
    let mut bench = TestBench::with_live(live)?;
    let scenario = bench.create_scenario("Draft")?;

    // What was written decodes, so a cold load finds the scenario.
    let persisted = bench.persisted(scenario)?.ok_or("scenario missing")?;
    let goal = persisted
        .snapshot
        .find(Collection::Goals, &id("g1"))
        .ok_or("goal missing")?;
    let stored = goal.get("metric").ok_or("metric missing")?;
    assert!(guard::flatten(stored, &GuardLimits::default())?.contains("Truncated"));

    bench
        .router
        .goals(Target::Scenario(scenario))
        .update(&id("g1"), Patch::new().set("name", "Shallower"))?
        .ok_or("nothing logged")?;
    let reloaded = bench.persisted(scenario)?.ok_or("scenario missing")?;
    assert_eq!(reloaded.modifications.len(), 1);

    // Live keeps the original value.
    let live_goal = bench.live().find(Collection::Goals, &id("g1")).ok_or("goal missing")?;
    assert_ne!(live_goal.get("metric"), Some(stored));
    Ok(())
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn router_built_from_toml() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::from_toml_str(
        r#"
        [chunks]
        chunk_size = 256

        [substrate]
        capacity_bytes = 4194304
        max_entry_bytes = 4096

        [cipher]
        installation_id = "toml-installation"
        "#,
    )?;
    let mut bench = TestBench::with_config(fixtures::live_snapshot(), config)?;
    let scenario = bench.create_scenario("Small chunks")?;
    let stats = bench.router.scenario_stats(scenario)?;
    assert!(stats.is_chunked);
    assert!(stats.chunk_count > 1);
    Ok(())
}

#[test]
fn missing_installation_id_is_a_config_error() {
    let result = TestBench::with_config(fixtures::live_snapshot(), EngineConfig::default());
    assert!(matches!(
        result,
        Err(EngineError::Storage(StorageError::InvalidConfig(_)))
    ));
}
