//! DOM action primitives
//!
//! One action against one resolved locator: readiness wait (attached, or visible
//! and enabled, bounded by a ceiling), then the DOM operation. Recovery lives a
//! layer above, in `action-locator`.

pub mod errors;
mod frames;
mod primitives;
pub mod types;
mod waiting;

pub use errors::*;
pub use frames::*;
pub use primitives::*;
pub use types::*;
pub use waiting::*;
