//! Provider-state handling.
//!
//! Callers register one [`StateHandler`] per provider-state name in a
//! [`StateHandlerRegistry`]. For every state-setup request the
//! [`StateSetupDispatcher`] resolves the handlers a [`StateDescriptor`]
//! names, runs them concurrently and reports their joint outcome.
//!
//! [`StateDescriptor`]: pactgate_types::StateDescriptor

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod registry;

pub use dispatcher::StateSetupDispatcher;
pub use error::{DispatchError, HandlerError};
pub use handler::{Hook, HookResult, StateHandler, StateResult};
pub use registry::StateHandlerRegistry;
