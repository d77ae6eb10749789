use planvault_core::{ScenarioId, Snapshot};
use planvault_engine::{EngineConfig, EngineError, MemoryLiveContext, Scenario, ScenarioRouter};
use planvault_storage::MemoryKv;

use crate::fixtures;
use crate::recording::{RecordingAudit, RecordingNotifier};
use crate::substrate::FlakyKv;

pub type BenchRouter = ScenarioRouter<MemoryLiveContext, FlakyKv<MemoryKv>>;

pub const INSTALLATION_ID: &str = "bench-installation";

/// A router over an in-memory live context and a failure-injectable
/// in-memory substrate, with notifications and audit events captured.
pub struct TestBench {
    pub router: BenchRouter,
    pub notifications: RecordingNotifier,
    pub audit: RecordingAudit,
}

impl TestBench {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_live(fixtures::live_snapshot())
    }

    pub fn with_live(snapshot: Snapshot) -> Result<Self, EngineError> {
        Self::with_config(snapshot, Self::config())
    }

    pub fn with_config(snapshot: Snapshot, config: EngineConfig) -> Result<Self, EngineError> {
        crate::init_tracing();
        let notifications = RecordingNotifier::new();
        let audit = RecordingAudit::new();
        let kv = FlakyKv::new(MemoryKv::new(config.substrate));
        let router = ScenarioRouter::from_config(
            MemoryLiveContext::new(snapshot),
            kv,
            &config,
            Box::new(notifications.clone()),
        )?
        .with_audit(Box::new(audit.clone()));
        Ok(Self {
            router,
            notifications,
            audit,
        })
    }

    pub fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.cipher.installation_id = INSTALLATION_ID.to_string();
        config
    }

    pub fn kv(&self) -> &FlakyKv<MemoryKv> {
        self.router.scenario_store().chunked().kv()
    }

    pub fn kv_mut(&mut self) -> &mut FlakyKv<MemoryKv> {
        self.router.scenario_store_mut().chunked_mut().kv_mut()
    }

    pub fn create_scenario(&mut self, name: &str) -> Result<ScenarioId, EngineError> {
        Ok(self.router.create_scenario(name)?.id)
    }

    pub fn live(&self) -> &Snapshot {
        self.router.live().snapshot()
    }

    /// The scenario as currently persisted, bypassing the router's cache.
    pub fn persisted(&mut self, id: ScenarioId) -> Result<Option<Scenario>, EngineError> {
        self.router.scenario_store_mut().load(id)
    }
}
