pub mod app;
pub mod candidates;
pub mod commands;
pub mod env;
pub mod inspect;
pub mod output;
pub mod replay;
pub mod runtime;
