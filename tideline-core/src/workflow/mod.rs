//! Workflow lifecycle: reuse resolution, actions, leases and storage

pub mod action;
pub mod lease;
pub mod orchestrator;
pub mod persistence;
pub mod resolver;
pub mod store;

pub use action::*;
pub use lease::*;
pub use orchestrator::*;
pub use persistence::*;
pub use resolver::*;
pub use store::*;
