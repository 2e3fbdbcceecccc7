//! Shared utilities for pactgate.

pub mod logging;

pub use logging::{filter_directive, init_logging, LogFormat};
