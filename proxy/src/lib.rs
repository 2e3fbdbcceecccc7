//! Intercepting proxy for provider verification.
//!
//! The proxy listens on an ephemeral local port and serves two kinds of
//! traffic:
//! - the reserved state-setup path, handed to a
//!   [`StateSetupDispatcher`](pactgate_state::StateSetupDispatcher);
//! - everything else, forwarded to the real provider after the optional
//!   request filter has run.

pub mod error;
pub mod filter;
pub mod forward;
pub mod server;
pub mod shutdown;

pub use error::ProxyError;
pub use filter::{FilterOutcome, RequestFilter};
pub use forward::Upstream;
pub use server::{InterceptingProxy, ProxyOptions};
