pub mod engine;
mod metrics;
pub mod settings;

pub use engine::{CheckOptions, Limiter};
pub use settings::Settings;

pub use sluice_core::{
    Algorithm, CheckResult, LimitError, MAX_COST, RatePolicy, RateUnit, SCALE, Usage,
};
pub use sluice_store::{ScriptKind, ScriptReply, ScriptStore, StoreError};
