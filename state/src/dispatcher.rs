//! State-setup dispatch.
//!
//! One dispatch turns one [`StateDescriptor`] into zero or more handler
//! invocations:
//!
//! - versioned descriptors invoke the named state's handler once with
//!   `(Some(action == setup), Some(params))`;
//! - legacy descriptors invoke each named state's handler with `(None, None)`,
//!   launched in list order;
//! - states without a registered handler are logged and skipped.
//!
//! All invocations of one request run concurrently and the dispatch settles
//! only after every one of them has settled. If several fail, the failure of
//! the earliest-listed state is reported. Nothing is retried.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, warn};

use pactgate_types::{JsonMap, StateDescriptor};

use crate::error::DispatchError;
use crate::handler::{Hook, StateHandler};
use crate::registry::StateHandlerRegistry;

/// A resolved handler together with the arguments it will be called with.
pub struct Invocation {
    pub state: String,
    pub setup: Option<bool>,
    pub params: Option<JsonMap>,
    handler: Arc<dyn StateHandler>,
}

/// The handlers a descriptor resolves to, plus the names that resolved to
/// nothing.
pub struct DispatchPlan {
    pub invocations: Vec<Invocation>,
    pub missing: Vec<String>,
}

/// Runs the state handlers requested by state-setup calls.
///
/// Holds only read-only data, so one dispatcher serves any number of
/// concurrent requests without coordination.
#[derive(Clone)]
pub struct StateSetupDispatcher {
    registry: Arc<StateHandlerRegistry>,
    before_each: Option<Arc<dyn Hook>>,
    after_each: Option<Arc<dyn Hook>>,
}

impl StateSetupDispatcher {
    pub fn new(registry: Arc<StateHandlerRegistry>) -> Self {
        Self {
            registry,
            before_each: None,
            after_each: None,
        }
    }

    /// Run `hook` before the handlers of every setup request.
    pub fn with_before_each(mut self, hook: Option<Arc<dyn Hook>>) -> Self {
        self.before_each = hook;
        self
    }

    /// Run `hook` after the handlers of every teardown request.
    pub fn with_after_each(mut self, hook: Option<Arc<dyn Hook>>) -> Self {
        self.after_each = hook;
        self
    }

    pub fn registry(&self) -> &StateHandlerRegistry {
        &self.registry
    }

    /// Resolve the handlers `descriptor` names without invoking anything.
    pub fn plan(&self, descriptor: &StateDescriptor) -> DispatchPlan {
        let mut plan = DispatchPlan {
            invocations: Vec::new(),
            missing: Vec::new(),
        };

        let mut push = |state: &str, setup: Option<bool>, params: Option<JsonMap>| {
            match self.registry.resolve(state) {
                Some(handler) => plan.invocations.push(Invocation {
                    state: state.to_string(),
                    setup,
                    params,
                    handler,
                }),
                None => plan.missing.push(state.to_string()),
            }
        };

        match descriptor {
            StateDescriptor::Versioned {
                action,
                state,
                params,
            } => push(state, Some(action.is_setup()), Some(params.clone())),
            StateDescriptor::Legacy { states } => {
                for state in states {
                    push(state, None, None);
                }
            }
            StateDescriptor::Empty => {}
        }

        plan
    }

    /// Dispatch one state-setup request.
    ///
    /// Returns the values produced by the invoked handlers, in launch order.
    pub async fn dispatch(
        &self,
        descriptor: &StateDescriptor,
    ) -> Result<Vec<Option<JsonMap>>, DispatchError> {
        if descriptor.is_setup() {
            if let Some(hook) = &self.before_each {
                debug!("running beforeEach hook");
                hook.run().await.map_err(|source| DispatchError::Hook {
                    hook: "beforeEach",
                    source,
                })?;
            }
        }

        let plan = self.plan(descriptor);
        for state in &plan.missing {
            warn!(state = %state, "no state handler found, ignoring");
        }

        let (states, pending): (Vec<_>, Vec<_>) = plan
            .invocations
            .into_iter()
            .map(|invocation| {
                debug!(
                    state = %invocation.state,
                    setup = ?invocation.setup,
                    "invoking state handler"
                );
                let future = invocation.handler.call(invocation.setup, invocation.params);
                (invocation.state, future)
            })
            .unzip();

        let settled = join_all(pending).await;

        let mut values = Vec::with_capacity(settled.len());
        let mut first_failure = None;
        for (state, outcome) in states.into_iter().zip(settled) {
            match outcome {
                Ok(value) => values.push(value),
                Err(source) => {
                    warn!(state = %state, error = %source, "state handler failed");
                    if first_failure.is_none() {
                        first_failure = Some(DispatchError::Handler { state, source });
                    }
                }
            }
        }

        let mut after_failure = None;
        if descriptor.is_teardown() {
            if let Some(hook) = &self.after_each {
                debug!("running afterEach hook");
                if let Err(source) = hook.run().await {
                    after_failure = Some(DispatchError::Hook {
                        hook: "afterEach",
                        source,
                    });
                }
            }
        }

        match first_failure.or(after_failure) {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }
}
