//! Verifier error types.

use pactgate_proxy::ProxyError;
use thiserror::Error;

/// The configuration cannot be used for a verification run. Raised before any
/// network activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("No configuration provided to verifier")]
    Empty,

    #[error("Provider name is required")]
    MissingProvider,

    #[error("Either a list of pactUrls or a pactBrokerUrl must be provided")]
    MissingPactSource,

    #[error("Provider base URL is required")]
    MissingProviderBaseUrl,

    #[error("invalid provider base URL {url}: {reason}")]
    InvalidProviderBaseUrl { url: String, reason: String },

    #[error("failed to load configuration: {0}")]
    Load(String),
}

/// Failure reported by the verification engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("verification failed: {0}")]
    Failed(String),

    #[error("verification engine returned no result")]
    NoResult,

    #[error("failed to launch verifier {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("verifier exited unsuccessfully (exit code {code:?})")]
    Exit { code: Option<i32> },

    #[error("invalid engine options: {0}")]
    InvalidOptions(String),
}

/// Anything that can end a verification run. Each variant carries the
/// original error unchanged.
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
