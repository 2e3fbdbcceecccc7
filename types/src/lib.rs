//! Fundamental types for pactgate.
//!
//! This crate defines the types shared across every other crate in the
//! workspace: provider-state descriptors, state actions, JSON maps and
//! consumer version selectors.

pub mod descriptor;
pub mod selector;

pub use descriptor::{StateAction, StateDescriptor};
pub use selector::{one_or_many, ConsumerVersionSelector};

/// A string-keyed map of JSON values, as carried in state parameters and
/// handler results.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
