//! pactgate: verify a provider against its pacts through the intercepting
//! proxy.

mod command;
mod settings;

use std::process::ExitCode;

use clap::Parser;
use tokio::signal;

use pactgate_verifier::{ProcessEngine, Verifier};

use crate::settings::{FileConfig, Settings, VerifyArgs};

#[derive(Parser)]
#[command(name = "pactgate", version, about = "Pact provider verification with state setup interception")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run provider verification.
    Verify(VerifyArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Verify(args) => verify(args).await,
    }
}

async fn verify(args: VerifyArgs) -> anyhow::Result<ExitCode> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let config_path = args.config.clone();
    let settings = Settings::merge(args, file)?;

    pactgate_utils::init_logging(settings.log_format, &settings.log_level);
    if let Some(path) = config_path {
        tracing::info!("Loaded config from {}", path.display());
    }

    let engine = match settings.verifier_bin {
        Some(program) => ProcessEngine::new(program),
        None => ProcessEngine::default(),
    };
    tracing::info!(
        provider = %settings.verifier.provider,
        provider_base_url = %settings.verifier.provider_base_url,
        state_handlers = settings.verifier.state_handlers.len(),
        "starting verification"
    );
    let verifier = Verifier::new(settings.verifier, engine);

    tokio::select! {
        outcome = verifier.verify_provider() => match outcome {
            Ok(result) => {
                tracing::info!(%result, "verification passed");
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                tracing::error!("verification failed: {e}");
                Ok(ExitCode::FAILURE)
            }
        },
        _ = wait_for_signal() => {
            tracing::warn!("verification interrupted");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("failed to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { tracing::info!("received SIGINT, shutting down"); }
        _ = terminate => { tracing::info!("received SIGTERM, shutting down"); }
    }
}
