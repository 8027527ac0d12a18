pub mod error;
pub mod script;
pub mod testing;

pub use error::StoreError;
pub use script::{ScriptKind, ScriptReply, ScriptStore};
