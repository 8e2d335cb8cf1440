//! # Tideline Core Library
//!
//! Workflow execution lifecycle engine: execution state model, per-run
//! leases, deferred update actions and workflow-ID reuse resolution.

pub mod error;
pub mod models;
pub mod services;
pub mod workflow;

pub use error::{EngineError, EngineResult, ErrorKind};
pub use models::*;
