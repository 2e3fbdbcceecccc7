//! Layered run settings: TOML file, then environment, then flags.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use serde::Deserialize;

use pactgate_state::StateHandlerRegistry;
use pactgate_utils::LogFormat;
use pactgate_verifier::VerifierConfig;

use crate::command::CommandStateHandler;

/// Contents of a `--config` file.
///
/// Verifier options sit at the top level under their camel-case names.
/// Shell state handlers go in a `[state_handlers]` table:
///
/// ```toml
/// provider = "orders"
/// providerBaseUrl = "http://localhost:8080"
/// pactUrls = ["pacts/web-orders.json"]
///
/// [state_handlers]
/// "an order exists" = "./scripts/seed-order.sh"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(flatten)]
    pub verifier: VerifierConfig,

    #[serde(default)]
    pub state_handlers: BTreeMap<String, String>,

    #[serde(default, rename = "logFormat")]
    pub log_format: Option<String>,

    #[serde(default, rename = "verifierBin")]
    pub verifier_bin: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

/// Flags of `pactgate verify`. Each one can also come from a `PACTGATE_*`
/// environment variable.
#[derive(Args, Debug, Default)]
pub struct VerifyArgs {
    /// Path to a TOML configuration file. Its settings are the base that
    /// environment variables and flags override.
    #[arg(long, env = "PACTGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Name of the provider under test.
    #[arg(long, env = "PACTGATE_PROVIDER")]
    pub provider: Option<String>,

    /// Where the real provider listens.
    #[arg(long, env = "PACTGATE_PROVIDER_BASE_URL")]
    pub provider_base_url: Option<String>,

    /// Pact file or URL to verify (repeatable or comma-separated).
    #[arg(long = "pact-url", env = "PACTGATE_PACT_URLS", value_delimiter = ',')]
    pub pact_urls: Vec<String>,

    #[arg(long, env = "PACTGATE_BROKER_URL")]
    pub broker_url: Option<String>,

    #[arg(long, env = "PACTGATE_BROKER_USERNAME")]
    pub broker_username: Option<String>,

    #[arg(long, env = "PACTGATE_BROKER_PASSWORD", hide_env_values = true)]
    pub broker_password: Option<String>,

    #[arg(long, env = "PACTGATE_BROKER_TOKEN", hide_env_values = true)]
    pub broker_token: Option<String>,

    /// Consumer version tags (comma-separated).
    #[arg(long, env = "PACTGATE_CONSUMER_VERSION_TAGS", value_delimiter = ',')]
    pub consumer_version_tags: Vec<String>,

    /// Provider version tags (comma-separated).
    #[arg(long, env = "PACTGATE_PROVIDER_VERSION_TAGS", value_delimiter = ',')]
    pub provider_version_tags: Vec<String>,

    /// Publish verification results to the broker.
    #[arg(long, env = "PACTGATE_PUBLISH")]
    pub publish: bool,

    #[arg(long, env = "PACTGATE_PROVIDER_VERSION")]
    pub provider_version: Option<String>,

    #[arg(long, env = "PACTGATE_ENABLE_PENDING")]
    pub enable_pending: bool,

    #[arg(long, env = "PACTGATE_INCLUDE_WIP_PACTS_SINCE")]
    pub include_wip_pacts_since: Option<String>,

    /// Tell the engine to skip TLS verification against the broker.
    #[arg(long, env = "PACTGATE_DISABLE_SSL_VERIFICATION")]
    pub disable_ssl_verification: bool,

    /// Reject invalid provider certificates when forwarding ("true"/"false").
    #[arg(long, env = "PACTGATE_VALIDATE_SSL")]
    pub validate_ssl: Option<bool>,

    /// Rewrite Host/Origin to the provider's ("true"/"false").
    #[arg(long, env = "PACTGATE_CHANGE_ORIGIN")]
    pub change_origin: Option<bool>,

    /// Time limit in milliseconds for state setup and filtered requests.
    #[arg(long, env = "PACTGATE_CALLBACK_TIMEOUT")]
    pub callback_timeout: Option<u64>,

    /// Verifier executable (defaults to `pact_verifier_cli` on PATH).
    #[arg(long, env = "PACTGATE_VERIFIER_BIN")]
    pub verifier_bin: Option<PathBuf>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "PACTGATE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output: "human" or "json".
    #[arg(long, env = "PACTGATE_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

/// Everything a run needs once the layers are merged.
#[derive(Debug)]
pub struct Settings {
    pub verifier: VerifierConfig,
    pub verifier_bin: Option<PathBuf>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Settings {
    /// Merge `args` over `file`.
    pub fn merge(args: VerifyArgs, file: FileConfig) -> anyhow::Result<Self> {
        let FileConfig {
            verifier: base,
            state_handlers,
            log_format: file_log_format,
            verifier_bin: file_verifier_bin,
        } = file;

        let log_format = match args.log_format {
            Some(format) => format,
            None => match file_log_format {
                Some(format) => format
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid logFormat in config file: {e}"))?,
                None => LogFormat::default(),
            },
        };
        let log_level = args
            .log_level
            .clone()
            .or_else(|| base.log_level.clone())
            .unwrap_or_else(|| "info".to_string());

        let mut registry = StateHandlerRegistry::new();
        for (state, command) in state_handlers {
            registry.insert(state.clone(), CommandStateHandler::new(state, command));
        }

        let verifier = VerifierConfig {
            provider: args.provider.unwrap_or(base.provider),
            provider_base_url: args.provider_base_url.unwrap_or(base.provider_base_url),
            pact_urls: prefer_non_empty(args.pact_urls, base.pact_urls),
            pact_broker_url: args.broker_url.or(base.pact_broker_url),
            pact_broker_username: args.broker_username.or(base.pact_broker_username),
            pact_broker_password: args.broker_password.or(base.pact_broker_password),
            pact_broker_token: args.broker_token.or(base.pact_broker_token),
            callback_timeout: args.callback_timeout.or(base.callback_timeout),
            publish_verification_result: args
                .publish
                .then_some(true)
                .or(base.publish_verification_result),
            provider_version: args.provider_version.or(base.provider_version),
            consumer_version_tags: prefer_non_empty(
                args.consumer_version_tags,
                base.consumer_version_tags,
            ),
            provider_version_tags: prefer_non_empty(
                args.provider_version_tags,
                base.provider_version_tags,
            ),
            enable_pending: args.enable_pending.then_some(true).or(base.enable_pending),
            include_wip_pacts_since: args.include_wip_pacts_since.or(base.include_wip_pacts_since),
            disable_ssl_verification: args
                .disable_ssl_verification
                .then_some(true)
                .or(base.disable_ssl_verification),
            log_level: Some(log_level.clone()),
            validate_ssl: args.validate_ssl.or(base.validate_ssl),
            change_origin: args.change_origin.or(base.change_origin),
            ..base
        }
        .with_state_handlers(registry);

        Ok(Self {
            verifier,
            verifier_bin: args.verifier_bin.or(file_verifier_bin),
            log_level,
            log_format,
        })
    }
}

fn prefer_non_empty(flag: Vec<String>, file: Vec<String>) -> Vec<String> {
    if flag.is_empty() {
        file
    } else {
        flag
    }
}
