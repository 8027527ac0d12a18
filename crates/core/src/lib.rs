pub mod algorithm;
pub mod error;
pub mod key;
pub mod policy;
pub mod result;
pub mod scale;

pub use algorithm::Algorithm;
pub use error::LimitError;
pub use key::{DEFAULT_TENANT, KeySet, MAX_KEY_BYTES, window_start};
pub use policy::{MAX_COST, RatePolicy, RateUnit};
pub use result::{CheckResult, Usage};
pub use scale::{SCALE, scaled, to_caller_units};
