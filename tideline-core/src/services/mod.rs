//! Ambient services shared by the engine and the CLI

pub mod logging;
