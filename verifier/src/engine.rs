//! The verification engine contract.
//!
//! The engine replays contracts against the provider. It is only consumed
//! here: it receives an [`EngineOptions`] bundle whose provider URL and
//! state-setup URL point at the intercepting proxy, and reports either a
//! result value or an error.

use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;

use crate::config::VerifierConfig;
use crate::error::EngineError;

/// Engine-facing configuration. Callbacks never cross this boundary.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOptions {
    pub provider: String,
    /// The proxy's base URL, not the real provider's.
    pub provider_base_url: String,
    pub provider_states_setup_url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pact_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pact_broker_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pact_broker_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pact_broker_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pact_broker_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_verification_result: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub consumer_version_tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub provider_version_tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub consumer_version_selectors_string: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_pending: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_wip_pacts_since: Option<String>,
    #[serde(rename = "disableSSLVerification", skip_serializing_if = "Option::is_none")]
    pub disable_ssl_verification: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl EngineOptions {
    /// Derive the engine's options from `config`, redirecting the provider
    /// and state-setup URLs to the proxy.
    pub fn derive(config: &VerifierConfig, proxy_base_url: &str, state_setup_url: &str) -> Self {
        Self {
            provider: config.provider.clone(),
            provider_base_url: proxy_base_url.to_string(),
            provider_states_setup_url: state_setup_url.to_string(),
            pact_urls: config.pact_urls.clone(),
            pact_broker_url: config.pact_broker_url.clone(),
            pact_broker_username: config.pact_broker_username.clone(),
            pact_broker_password: config.pact_broker_password.clone(),
            pact_broker_token: config.pact_broker_token.clone(),
            publish_verification_result: config.publish_verification_result,
            provider_version: config.provider_version.clone(),
            consumer_version_tags: config.consumer_version_tags.clone(),
            provider_version_tags: config.provider_version_tags.clone(),
            consumer_version_selectors_string: config.selector_strings(),
            enable_pending: config.enable_pending,
            include_wip_pacts_since: config.include_wip_pacts_since.clone(),
            disable_ssl_verification: config.disable_ssl_verification,
            callback_timeout: config.callback_timeout,
            log_level: config.log_level.clone(),
        }
    }

    /// The options as a JSON object, for engines that take untyped input.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// What an engine reports: a result value, no value, or an error.
pub type EngineResult = Result<Option<Value>, EngineError>;

/// Runs the contract replay.
///
/// `Ok(None)` means the engine finished without producing a result and is
/// treated as a failure by the verifier.
pub trait VerificationEngine: Send + Sync {
    fn verify(
        &self,
        options: EngineOptions,
        callback_timeout: Option<Duration>,
    ) -> BoxFuture<'_, EngineResult>;
}

impl<F, Fut> VerificationEngine for F
where
    F: Fn(EngineOptions, Option<Duration>) -> Fut + Send + Sync,
    Fut: Future<Output = EngineResult> + Send + 'static,
{
    fn verify(
        &self,
        options: EngineOptions,
        callback_timeout: Option<Duration>,
    ) -> BoxFuture<'_, EngineResult> {
        self(options, callback_timeout).boxed()
    }
}
