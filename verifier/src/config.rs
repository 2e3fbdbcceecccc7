//! Verification run configuration.
//!
//! Serialisable options use the same camel-case names the verification
//! engine understands, so a TOML file can be written as:
//!
//! ```toml
//! provider = "orders"
//! providerBaseUrl = "http://localhost:8080"
//! pactUrls = ["pacts/web-orders.json"]
//! consumerVersionTags = "main"
//! ```
//!
//! Callbacks (state handlers, request filter, hooks) are attached with the
//! builder methods.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use pactgate_proxy::RequestFilter;
use pactgate_state::{Hook, StateHandler, StateHandlerRegistry};
use pactgate_types::{one_or_many, ConsumerVersionSelector};

use crate::error::ConfigurationError;
use crate::net::is_local_url;

#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifierConfig {
    /// Name of the provider under test.
    #[serde(default)]
    pub provider: String,

    /// Where the real provider listens.
    #[serde(default)]
    pub provider_base_url: String,

    /// Local pact files or pact URLs to verify.
    #[serde(default)]
    pub pact_urls: Vec<String>,

    #[serde(default)]
    pub pact_broker_url: Option<String>,
    #[serde(default)]
    pub pact_broker_username: Option<String>,
    #[serde(default)]
    pub pact_broker_password: Option<String>,
    #[serde(default)]
    pub pact_broker_token: Option<String>,

    /// Time limit, in milliseconds, the engine gives state handlers and the
    /// request filter.
    #[serde(default)]
    pub callback_timeout: Option<u64>,

    #[serde(default)]
    pub publish_verification_result: Option<bool>,
    #[serde(default)]
    pub provider_version: Option<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub consumer_version_tags: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub provider_version_tags: Vec<String>,
    #[serde(default)]
    pub consumer_version_selectors: Vec<ConsumerVersionSelector>,

    #[serde(default)]
    pub enable_pending: Option<bool>,
    #[serde(default)]
    pub include_wip_pacts_since: Option<String>,
    #[serde(default, rename = "disableSSLVerification")]
    pub disable_ssl_verification: Option<bool>,

    /// Forwarded to the engine; the process-wide log filter is the caller's
    /// business.
    #[serde(default)]
    pub log_level: Option<String>,

    /// Reject invalid provider certificates when forwarding. Defaults to true.
    #[serde(default, rename = "validateSSL")]
    pub validate_ssl: Option<bool>,

    /// Rewrite `Host`/`Origin` to the provider's. Defaults to true only for
    /// non-local providers.
    #[serde(default)]
    pub change_origin: Option<bool>,

    #[serde(skip)]
    pub state_handlers: StateHandlerRegistry,
    #[serde(skip)]
    pub request_filter: Option<Arc<dyn RequestFilter>>,
    #[serde(skip)]
    pub before_each: Option<Arc<dyn Hook>>,
    #[serde(skip)]
    pub after_each: Option<Arc<dyn Hook>>,
}

impl VerifierConfig {
    pub fn new(provider: impl Into<String>, provider_base_url: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            provider_base_url: provider_base_url.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigurationError::Load(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(s).map_err(|e| ConfigurationError::Load(e.to_string()))
    }

    pub fn with_pact_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pact_urls.extend(urls.into_iter().map(Into::into));
        self
    }

    pub fn with_broker_url(mut self, url: impl Into<String>) -> Self {
        self.pact_broker_url = Some(url.into());
        self
    }

    pub fn with_state_handler(mut self, state: impl Into<String>, handler: impl StateHandler + 'static) -> Self {
        self.state_handlers.insert(state, handler);
        self
    }

    pub fn with_state_handlers(mut self, registry: StateHandlerRegistry) -> Self {
        self.state_handlers = registry;
        self
    }

    pub fn with_request_filter(mut self, filter: impl RequestFilter + 'static) -> Self {
        self.request_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_before_each(mut self, hook: impl Hook + 'static) -> Self {
        self.before_each = Some(Arc::new(hook));
        self
    }

    pub fn with_after_each(mut self, hook: impl Hook + 'static) -> Self {
        self.after_each = Some(Arc::new(hook));
        self
    }

    /// Fill in `validate_ssl` and `change_origin` where the caller left them
    /// unset.
    pub fn apply_defaults(&mut self) {
        if self.validate_ssl.is_none() {
            self.validate_ssl = Some(true);
        }
        if self.change_origin.is_none() {
            let remote = !is_local_url(&self.provider_base_url);
            if remote {
                tracing::debug!(
                    provider_base_url = %self.provider_base_url,
                    "non-local provider address detected, setting changeOrigin to true; this can be overridden"
                );
            }
            self.change_origin = Some(remote);
        }
    }

    /// Check that a run can start.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.is_empty() {
            return Err(ConfigurationError::Empty);
        }
        if self.provider.trim().is_empty() {
            return Err(ConfigurationError::MissingProvider);
        }
        let has_broker = self
            .pact_broker_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty());
        if self.pact_urls.is_empty() && !has_broker {
            return Err(ConfigurationError::MissingPactSource);
        }
        if self.provider_base_url.trim().is_empty() {
            return Err(ConfigurationError::MissingProviderBaseUrl);
        }
        match reqwest::Url::parse(&self.provider_base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => Ok(()),
            Ok(_) => Err(ConfigurationError::InvalidProviderBaseUrl {
                url: self.provider_base_url.clone(),
                reason: "expected an absolute http(s) URL".to_string(),
            }),
            Err(e) => Err(ConfigurationError::InvalidProviderBaseUrl {
                url: self.provider_base_url.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// True when nothing at all has been configured.
    pub fn is_empty(&self) -> bool {
        self.provider.is_empty()
            && self.provider_base_url.is_empty()
            && self.pact_urls.is_empty()
            && self.pact_broker_url.is_none()
            && self.state_handlers.is_empty()
    }

    /// Consumer version selectors encoded as JSON strings.
    pub fn selector_strings(&self) -> Vec<String> {
        self.consumer_version_selectors
            .iter()
            .map(ConsumerVersionSelector::to_json_string)
            .collect()
    }

    pub fn callback_timeout(&self) -> Option<Duration> {
        self.callback_timeout.map(Duration::from_millis)
    }
}

impl fmt::Debug for VerifierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifierConfig")
            .field("provider", &self.provider)
            .field("provider_base_url", &self.provider_base_url)
            .field("pact_urls", &self.pact_urls)
            .field("pact_broker_url", &self.pact_broker_url)
            .field("state_handlers", &self.state_handlers)
            .field("request_filter", &self.request_filter.is_some())
            .field("validate_ssl", &self.validate_ssl)
            .field("change_origin", &self.change_origin)
            .finish_non_exhaustive()
    }
}
