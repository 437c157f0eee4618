pub mod allocate;
pub mod types;

pub use allocate::plan_attempt;
pub use types::{AttemptPlan, ProviderAssignment};
