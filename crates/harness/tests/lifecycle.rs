use std::collections::HashSet;

use planvault_core::{Collection, FieldValue, NewRecord, Patch, RecordId};
use planvault_engine::scenario::scenario_key;
use planvault_engine::{
    EngineError, LiveDataContext, MemoryLiveContext, ScenarioRouter, Target, TracingNotifier,
};
use planvault_harness::{TempSqlite, TestBench, fixtures, init_tracing};
use planvault_storage::chunked::metadata_key;
use planvault_storage::{KvStore, StorageError, SubstrateLimits};

fn id(s: &str) -> RecordId {
    RecordId::new(s)
}

// ============================================================================
// Create / list / open / delete
// ============================================================================

#[test]
fn scenarios_are_listed_in_creation_order() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let a = bench.create_scenario("Q3 Draft")?;
    let b = bench.create_scenario("Q4 Stretch")?;

    let listed = bench.router.list_scenarios();
    let names: Vec<&str> = listed.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Q3 Draft", "Q4 Stretch"]);
    assert_eq!(listed[0].id, a);
    assert_eq!(listed[1].id, b);
    Ok(())
}

#[test]
fn many_creations_get_distinct_ids() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let mut ids = HashSet::new();
    for i in 0..25 {
        ids.insert(bench.create_scenario(&format!("Option {i}"))?);
    }
    assert_eq!(ids.len(), 25);
    let listed: HashSet<_> = bench.router.list_scenarios().into_iter().map(|s| s.id).collect();
    assert_eq!(listed, ids);
    Ok(())
}

#[test]
fn open_updates_last_access() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let scenario = bench.create_scenario("Draft")?;

    let mut stale = bench.persisted(scenario)?.ok_or("scenario missing")?;
    stale.metadata.last_access_date = 1;
    bench.router.scenario_store_mut().save(&stale)?;

    let opened = bench.router.open_scenario(scenario)?;
    assert!(opened.metadata.last_access_date > 1);
    let created_at = opened.metadata.created_at;
    let persisted = bench.persisted(scenario)?.ok_or("scenario missing")?;
    assert!(persisted.metadata.last_access_date > 1);
    assert_eq!(persisted.metadata.created_at, created_at);
    Ok(())
}

#[test]
fn deleting_a_scenario_reclaims_storage() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let keep = bench.create_scenario("Keep")?;
    let gone = bench.create_scenario("Drop")?;
    bench
        .router
        .teams(Target::Scenario(gone))
        .update(&id("t1"), Patch::new().set("capacity", 1))?;

    assert!(bench.router.delete_scenario(gone)?);
    assert!(bench.router.scenario(gone)?.is_none());
    assert!(
        bench
            .kv()
            .inner()
            .keys_with_prefix(&scenario_key(gone))
            .is_empty()
    );
    let remaining: Vec<_> = bench.router.list_scenarios().into_iter().map(|s| s.id).collect();
    assert_eq!(remaining, vec![keep]);

    // Deleting again reports nothing to delete.
    assert!(!bench.router.delete_scenario(gone)?);
    assert!(matches!(
        bench.router.teams(Target::Scenario(gone)).delete(&id("t1")),
        Err(EngineError::ScenarioNotFound(_))
    ));
    Ok(())
}

#[test]
fn failed_index_read_does_not_drop_scenarios() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let a = bench.create_scenario("A")?;

    bench.kv_mut().fail_next_gets(1);
    assert!(matches!(
        bench.router.create_scenario("B"),
        Err(EngineError::Storage(StorageError::Substrate(_)))
    ));
    let listed: Vec<_> = bench.router.list_scenarios().into_iter().map(|s| s.id).collect();
    assert_eq!(listed, vec![a]);

    bench.kv_mut().fail_next_gets(1);
    assert!(matches!(
        bench.router.delete_scenario(a),
        Err(EngineError::Storage(StorageError::Substrate(_)))
    ));
    assert!(bench.persisted(a)?.is_some());

    let b = bench.create_scenario("B")?;
    let listed: Vec<_> = bench.router.list_scenarios().into_iter().map(|s| s.id).collect();
    assert_eq!(listed, vec![a, b]);
    Ok(())
}

#[test]
fn corrupted_scenario_reads_as_missing() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let scenario = bench.create_scenario("Draft")?;
    let meta = metadata_key(&scenario_key(scenario));
    bench.kv_mut().set(&meta, "{not json")?;
    assert!(bench.persisted(scenario)?.is_none());

    // A corrupted index degrades to an empty list.
    bench.kv_mut().set(&metadata_key("scenario_index"), "{not json")?;
    assert!(bench.router.list_scenarios().is_empty());
    Ok(())
}

// ============================================================================
// Applying a scenario to live data
// ============================================================================

#[test]
fn apply_to_live_replays_the_log() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let scenario = bench.create_scenario("Plan")?;
    let target = Target::Scenario(scenario);

    let infra = bench
        .router
        .teams(target)
        .add(NewRecord::new().set("name", "Infra").set("capacity", 12))?;
    bench
        .router
        .teams(target)
        .update(&id("t1"), Patch::new().set("capacity", 55))?;
    bench.router.people(target).delete(&id("p3"))?;

    // Live drifts: p3 is already gone there.
    bench.router.people(Target::Live).delete(&id("p3"))?;

    let applied = bench.router.apply_to_live(scenario)?;
    assert_eq!(applied, 2);

    let live = bench.live();
    assert!(live.contains(Collection::Teams, &infra.id));
    let core = live.find(Collection::Teams, &id("t1")).ok_or("team missing")?;
    assert_eq!(core.get("capacity"), Some(&FieldValue::Integer(55)));
    assert!(!live.contains(Collection::People, &id("p3")));
    Ok(())
}

#[test]
fn apply_to_live_of_unknown_scenario_fails() -> Result<(), Box<dyn std::error::Error>> {
    let mut bench = TestBench::new()?;
    let ghost = planvault_core::ScenarioId::new();
    assert!(matches!(
        bench.router.apply_to_live(ghost),
        Err(EngineError::ScenarioNotFound(_))
    ));
    Ok(())
}

// ============================================================================
// Durable substrate
// ============================================================================

#[test]
fn scenarios_survive_a_restart_on_sqlite() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let db = TempSqlite::new()?;
    let config = TestBench::config();
    let limits = SubstrateLimits::default();

    let scenario = {
        let kv = db.open("planvault", limits)?;
        let live = MemoryLiveContext::new(fixtures::live_snapshot());
        let mut router = ScenarioRouter::from_config(live, kv, &config, Box::new(TracingNotifier))?;
        let scenario = router.create_scenario("Q3 Draft")?.id;
        router
            .teams(Target::Scenario(scenario))
            .update(&id("t1"), Patch::new().set("capacity", 55))?;
        scenario
    };

    let kv = db.open("planvault", limits)?;
    let live = MemoryLiveContext::new(fixtures::live_snapshot());
    let mut router = ScenarioRouter::from_config(live, kv, &config, Box::new(TracingNotifier))?;
    let names: Vec<String> = router.list_scenarios().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["Q3 Draft".to_string()]);

    let restored = router.scenario(scenario)?.ok_or("scenario missing")?;
    assert_eq!(restored.modifications.len(), 1);
    let team = restored
        .snapshot
        .find(Collection::Teams, &id("t1"))
        .ok_or("team missing")?;
    assert_eq!(team.get("capacity"), Some(&FieldValue::Integer(55)));

    // The live dataset the router was rebuilt with is unaffected.
    let live_team = router
        .live()
        .current_snapshot()
        .find(Collection::Teams, &id("t1"))
        .cloned()
        .ok_or("live team missing")?;
    assert_eq!(live_team.get("capacity"), Some(&FieldValue::Integer(40)));
    assert!(router.live().snapshot().total_records() > 0);
    Ok(())
}
