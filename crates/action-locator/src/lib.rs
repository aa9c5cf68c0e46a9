//! Selector resilience
//!
//! - [`CandidateGenerator`]: element metadata to scored locator candidates
//! - [`SelectorValidator`]: live match counting, interactability and IoU disambiguation
//! - [`ActionPerformer`]: one recorded UI action with the ordered recovery chain
//! - [`HttpRecoveryService`]: client for the optional remote recovery oracle

pub mod errors;
pub mod generator;
pub mod healer;
pub mod performer;
pub mod remote;
pub mod types;
pub mod validator;

pub use errors::*;
pub use generator::*;
pub use healer::*;
pub use performer::*;
pub use remote::*;
pub use types::*;
pub use validator::*;
