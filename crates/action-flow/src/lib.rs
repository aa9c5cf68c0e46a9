//! Flow replay layer
//!
//! Walks a recorded step tree against a live page: navigation, UI actions with
//! selector recovery, grid registration, plain, counted and data-driven loops.

pub mod errors;
pub mod executor;
pub mod strategies;
pub mod transform;
pub mod types;

pub use errors::FlowError;
pub use executor::{DefaultFlowExecutor, FlowExecutor};
pub use strategies::{DefaultFailureHandler, FailureHandler, FailureHandlerResult, FailureScope};
pub use transform::{apply_transform, substitute_placeholders, TransformError};
pub use types::{
    FailureStrategy, ReplayContext, ReplayReport, RowContext, Step, StepKind, StepResult,
    StepTree,
};
