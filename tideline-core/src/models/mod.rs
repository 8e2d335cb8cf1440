//! Data models for tideline

pub mod configuration;
pub mod execution;
pub mod history;
pub mod mutable_state;

pub use configuration::*;
pub use execution::*;
pub use history::*;
pub use mutable_state::*;
