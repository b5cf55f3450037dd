//! arsenal-core: security tool registry, update engine, and scan loop library

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod invoke;
pub mod process;
pub mod reason;
pub mod registry;
pub mod retry;
pub mod scan;
pub mod update;

pub use error::{Error, Result};
