//! Provider verification runs.
//!
//! A [`Verifier`] validates a [`VerifierConfig`], starts an
//! [`InterceptingProxy`](pactgate_proxy::InterceptingProxy) in front of the
//! provider, hands an [`EngineOptions`] bundle pointing at that proxy to a
//! [`VerificationEngine`], and tears the proxy down however the run ends.

pub mod config;
pub mod engine;
pub mod error;
pub mod net;
pub mod process;
pub mod verifier;

pub use config::VerifierConfig;
pub use engine::{EngineOptions, EngineResult, VerificationEngine};
pub use error::{ConfigurationError, EngineError, VerifierError};
pub use process::ProcessEngine;
pub use verifier::{Verifier, STATE_SETUP_PATH};
