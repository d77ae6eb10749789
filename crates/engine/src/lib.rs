pub mod config;
pub mod error;
pub mod live;
pub mod notify;
pub mod router;
pub mod scenario;

pub use config::EngineConfig;
pub use error::EngineError;
pub use live::{LiveDataContext, MemoryLiveContext};
pub use notify::{
    AuditEvent, AuditSink, Notification, NotificationVariant, Notifier, Severity, TracingNotifier,
};
pub use router::{CollectionRouter, ScenarioRouter, Target};
pub use scenario::{Scenario, ScenarioMetadata, ScenarioStore, ScenarioSummary};
