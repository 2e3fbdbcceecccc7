//! Proxy error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to bind proxy listener on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("proxy did not become ready within {0:?}")]
    ReadyTimeout(std::time::Duration),

    #[error("proxy server task ended before becoming ready")]
    NotStarted,

    #[error("invalid provider base URL {url}: {reason}")]
    InvalidUpstream { url: String, reason: String },

    #[error("failed to build upstream HTTP client: {0}")]
    Client(String),

    #[error("failed to read request body: {0}")]
    Body(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),
}
