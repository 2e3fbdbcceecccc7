//! Handler and hook callbacks.
//!
//! Plain async closures implement both traits:
//!
//! ```
//! use pactgate_state::{StateHandlerRegistry, StateResult};
//! use pactgate_types::JsonMap;
//!
//! let registry = StateHandlerRegistry::new().with_handler(
//!     "user exists",
//!     |setup: Option<bool>, _params: Option<JsonMap>| async move {
//!         if setup == Some(false) {
//!             // remove the user again
//!         }
//!         StateResult::Ok(None)
//!     },
//! );
//! assert!(registry.resolve("user exists").is_some());
//! ```

use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use pactgate_types::JsonMap;

use crate::error::HandlerError;

/// Outcome of one state handler invocation.
pub type StateResult = Result<Option<JsonMap>, HandlerError>;

/// Outcome of a hook invocation.
pub type HookResult = Result<(), HandlerError>;

/// Establishes or removes one provider state.
///
/// Versioned requests call the handler with `Some(is_setup)` and the request
/// parameters. Legacy requests call it with `(None, None)`.
pub trait StateHandler: Send + Sync {
    fn call(&self, setup: Option<bool>, params: Option<JsonMap>) -> BoxFuture<'static, StateResult>;
}

impl<F, Fut> StateHandler for F
where
    F: Fn(Option<bool>, Option<JsonMap>) -> Fut + Send + Sync,
    Fut: Future<Output = StateResult> + Send + 'static,
{
    fn call(&self, setup: Option<bool>, params: Option<JsonMap>) -> BoxFuture<'static, StateResult> {
        self(setup, params).boxed()
    }
}

/// Runs around state setup (`beforeEach`) or after teardown (`afterEach`).
pub trait Hook: Send + Sync {
    fn run(&self) -> BoxFuture<'static, HookResult>;
}

impl<F, Fut> Hook for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = HookResult> + Send + 'static,
{
    fn run(&self) -> BoxFuture<'static, HookResult> {
        self().boxed()
    }
}
