//! vbase-rce: sandboxed remote code execution over Docker
//!
//! Piston v2 compatible. Each request runs in a fresh, locked-down container
//! and comes back as a normalized result.

pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod gate;
pub mod languages;
pub mod limits;
pub mod models;
pub mod runner;
pub mod server;
pub mod source;

pub use context::AppContext;
pub use error::{BackendError, ExecutionError};
pub use executor::Executor;
