//! Verification-run orchestration.
//!
//! One call to [`Verifier::verify_provider`] walks through:
//!
//! ```text
//! Unvalidated -> Configured -> ProxyStarting -> ProxyReady -> Delegating -> Completed
//!      \______________\______________\______________\______________\-> Failed
//! ```
//!
//! Defaults are applied when the verifier is built; validation happens at the
//! start of the run and fails before any socket is opened. Once the proxy has
//! been spawned it is closed exactly once, whichever way the run ends.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use pactgate_proxy::{InterceptingProxy, ProxyError, ProxyOptions};
use pactgate_state::StateSetupDispatcher;

use crate::config::VerifierConfig;
use crate::engine::{EngineOptions, VerificationEngine};
use crate::error::{EngineError, VerifierError};

/// Path on the proxy reserved for state-setup calls.
pub const STATE_SETUP_PATH: &str = "/_pactSetup";

/// How long to wait for the proxy listener to come up.
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Stages of a verification run, for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    Configured,
    ProxyStarting,
    ProxyReady,
    Delegating,
    Completed,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configured => "configured",
            Self::ProxyStarting => "proxy_starting",
            Self::ProxyReady => "proxy_ready",
            Self::Delegating => "delegating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Verifies one provider against its consumers' contracts.
pub struct Verifier<E> {
    config: VerifierConfig,
    engine: E,
}

impl<E: VerificationEngine> Verifier<E> {
    /// Build a verifier, filling in `validateSSL` and `changeOrigin` defaults.
    pub fn new(mut config: VerifierConfig, engine: E) -> Self {
        config.apply_defaults();
        Self {
            config,
            engine,
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Run the verification.
    ///
    /// Returns the engine's result, or the first error encountered. Errors
    /// are returned as raised; the proxy is closed before returning.
    pub async fn verify_provider(&self) -> Result<Value, VerifierError> {
        self.config.validate()?;
        debug!(phase = %RunPhase::Configured, provider = %self.config.provider);

        debug!(phase = %RunPhase::ProxyStarting);
        let proxy = InterceptingProxy::start(self.proxy_options())?;

        let outcome = self.run_with_proxy(&proxy).await;
        proxy.close().await;

        match &outcome {
            Ok(_) => info!(phase = %RunPhase::Completed, "provider verification succeeded"),
            Err(e) => warn!(phase = %RunPhase::Failed, error = %e, "provider verification failed"),
        }
        outcome
    }

    fn proxy_options(&self) -> ProxyOptions {
        let dispatcher = StateSetupDispatcher::new(Arc::new(self.config.state_handlers.clone()))
            .with_before_each(self.config.before_each.clone())
            .with_after_each(self.config.after_each.clone());

        let mut options = ProxyOptions::new(
            self.config.provider_base_url.clone(),
            STATE_SETUP_PATH,
            dispatcher,
        );
        options.request_filter = self.config.request_filter.clone();
        options.validate_ssl = self.config.validate_ssl.unwrap_or(true);
        options.change_origin = self.config.change_origin.unwrap_or(false);
        options
    }

    async fn run_with_proxy(&self, proxy: &InterceptingProxy) -> Result<Value, VerifierError> {
        let addr = proxy.ready(READY_TIMEOUT).await?;
        debug!(phase = %RunPhase::ProxyReady, %addr);

        let base_url = proxy.base_url().ok_or(ProxyError::NotStarted)?;
        let setup_url = proxy.state_setup_url().ok_or(ProxyError::NotStarted)?;
        let options = EngineOptions::derive(&self.config, &base_url, &setup_url);

        debug!(
            phase = %RunPhase::Delegating,
            provider_base_url = %options.provider_base_url,
            provider_states_setup_url = %options.provider_states_setup_url,
            "submitting verification to engine"
        );
        match self
            .engine
            .verify(options, self.config.callback_timeout())
            .await
        {
            Ok(Some(result)) => {
                debug!(?result, "engine succeeded");
                Ok(result)
            }
            Ok(None) => Err(EngineError::NoResult.into()),
            Err(e) => Err(e.into()),
        }
    }
}
