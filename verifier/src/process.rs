//! An engine backed by the `pact_verifier_cli` executable.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::Url;
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, info};

use crate::engine::{EngineOptions, EngineResult, VerificationEngine};
use crate::error::EngineError;

/// Executable looked up on `PATH` when no explicit program is given.
pub const DEFAULT_VERIFIER_PROGRAM: &str = "pact_verifier_cli";

/// Runs the external verifier CLI as a child process.
///
/// The child inherits stdout and stderr so its report reaches the user
/// directly. It is killed if the verification future is dropped.
#[derive(Clone, Debug)]
pub struct ProcessEngine {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl ProcessEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    /// Append raw arguments after the generated ones.
    pub fn with_extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Translate engine options into command-line arguments.
    pub fn args(
        &self,
        options: &EngineOptions,
        callback_timeout: Option<Duration>,
    ) -> Result<Vec<String>, EngineError> {
        let base = Url::parse(&options.provider_base_url)
            .map_err(|e| EngineError::InvalidOptions(format!("providerBaseUrl: {e}")))?;
        let host = base
            .host_str()
            .ok_or_else(|| EngineError::InvalidOptions("providerBaseUrl has no host".into()))?;
        let port = base
            .port_or_known_default()
            .ok_or_else(|| EngineError::InvalidOptions("providerBaseUrl has no port".into()))?;

        let mut args = vec![
            "--hostname".to_string(),
            host.to_string(),
            "--port".to_string(),
            port.to_string(),
            "--provider-name".to_string(),
            options.provider.clone(),
            "--state-change-url".to_string(),
            options.provider_states_setup_url.clone(),
            // Without it the CLI never sends teardown calls.
            "--state-change-teardown".to_string(),
        ];
        if base.scheme() != "http" {
            args.extend(["--scheme".to_string(), base.scheme().to_string()]);
        }

        for source in &options.pact_urls {
            let flag = if source.starts_with("http://") || source.starts_with("https://") {
                "--url"
            } else {
                "--file"
            };
            args.extend([flag.to_string(), source.clone()]);
        }

        let mut push_opt = |flag: &str, value: &Option<String>| {
            if let Some(value) = value {
                args.extend([flag.to_string(), value.clone()]);
            }
        };
        push_opt("--broker-url", &options.pact_broker_url);
        push_opt("--user", &options.pact_broker_username);
        push_opt("--password", &options.pact_broker_password);
        push_opt("--token", &options.pact_broker_token);
        push_opt("--include-wip-pacts-since", &options.include_wip_pacts_since);
        push_opt("--loglevel", &options.log_level);

        if !options.consumer_version_tags.is_empty() {
            args.extend([
                "--consumer-version-tags".to_string(),
                options.consumer_version_tags.join(","),
            ]);
        }
        if !options.provider_version_tags.is_empty() {
            args.extend([
                "--provider-tags".to_string(),
                options.provider_version_tags.join(","),
            ]);
        }
        for selector in &options.consumer_version_selectors_string {
            args.extend(["--consumer-version-selectors".to_string(), selector.clone()]);
        }

        if options.enable_pending == Some(true) {
            args.push("--enable-pending".to_string());
        }
        if options.disable_ssl_verification == Some(true) {
            args.push("--disable-ssl-verification".to_string());
        }
        if options.publish_verification_result == Some(true) {
            args.push("--publish".to_string());
            if let Some(version) = &options.provider_version {
                args.extend(["--provider-version".to_string(), version.clone()]);
            }
        }
        if let Some(timeout) = callback_timeout {
            args.extend(["--request-timeout".to_string(), timeout.as_millis().to_string()]);
        }

        args.extend(self.extra_args.iter().cloned());
        Ok(args)
    }

    async fn run(&self, args: Vec<String>) -> EngineResult {
        let program = self.program.display().to_string();
        info!("running {} {}", program, redact(&args).join(" "));

        let status = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| EngineError::Spawn { program, source })?;

        debug!(?status, "verifier exited");
        if status.success() {
            Ok(Some(json!({ "exitCode": 0 })))
        } else {
            Err(EngineError::Exit {
                code: status.code(),
            })
        }
    }
}

impl Default for ProcessEngine {
    fn default() -> Self {
        Self::new(DEFAULT_VERIFIER_PROGRAM)
    }
}

impl VerificationEngine for ProcessEngine {
    fn verify(
        &self,
        options: EngineOptions,
        callback_timeout: Option<Duration>,
    ) -> BoxFuture<'_, EngineResult> {
        Box::pin(async move {
            let args = self.args(&options, callback_timeout)?;
            self.run(args).await
        })
    }
}

/// Hide credential values when logging a command line.
fn redact(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            out.push("****".to_string());
            hide_next = false;
        } else {
            hide_next = matches!(arg.as_str(), "--password" | "--token");
            out.push(arg.clone());
        }
    }
    out
}
