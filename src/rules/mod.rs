pub mod context;
pub mod error;
pub mod explain;
pub mod github;
pub mod outcome;
pub mod random;
pub mod registry;
pub mod resolve;
pub mod trigger;

pub use context::EvalContext;
pub use error::RuleError;
pub use registry::{parse_trigger, parse_value, to_json, AnyRule, Registry};
pub use resolve::ValueRule;
pub use trigger::TriggerRule;
