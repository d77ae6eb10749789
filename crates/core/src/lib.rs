pub mod clock;
pub mod error;
pub mod field_value;
pub mod guard;
pub mod ids;
pub mod modification;
pub mod record;

pub use error::CoreError;
pub use field_value::{FieldValue, Placeholder};
pub use guard::GuardLimits;
pub use ids::*;
pub use modification::{FieldChange, Modification, ModificationKind};
pub use record::{Collection, NewRecord, Patch, Record, Snapshot, TouchedRecord};
