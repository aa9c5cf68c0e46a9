//! Browser provider contract for the replay engine.
//!
//! The engine never talks to a browser directly; it drives a [`PageDriver`]. This crate
//! ships the Chromium implementation ([`ChromiumPage`]) and, behind the `fake-page`
//! feature, a deterministic in-memory page for tests.

pub mod chromium;
pub mod driver;
pub mod error;
#[cfg(feature = "fake-page")]
pub mod fake;
mod script;

pub use chromium::ChromiumPage;
pub use driver::*;
pub use error::{AdapterError, AdapterErrorKind};
