//! Deferred, versioned materialization of the flood layers

pub mod deferred;
pub mod events;
pub mod mapper;
pub mod plan;

pub use deferred::{Node, ResultSlot};
pub use events::{coalesce, run_parameter_loop, ParameterChange, Recomputes};
pub use mapper::{FloodMapper, RefreshOutcome};
pub use plan::FloodPlan;
