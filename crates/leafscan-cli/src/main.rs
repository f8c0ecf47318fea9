//! LeafScan CLI
//!
//! Identifies plant diseases from leaf photos with an on-device ONNX model,
//! falling back to the hosted classifier when the model is unavailable, and
//! talks to the plant-care assistant.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use leafscan_classifiers::{ChatSession, ClassifierRegistry, PredictionSource, RegistryBuilder};
use leafscan_core::RawImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod config;

#[derive(Parser, Debug)]
#[command(name = "leafscan")]
#[command(about = "Plant disease identification and plant-care chat", long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "leafscan.yaml", global = true)]
    config: PathBuf,

    /// Backend base URL for remote classification and chat
    #[arg(long, env = "LEAFSCAN_REMOTE_URL", global = true)]
    remote_url: Option<String>,

    /// Anonymous API key for the backend
    #[arg(long, env = "LEAFSCAN_ANON_KEY", global = true, hide_env_values = true)]
    anon_key: Option<String>,

    /// Model file to load instead of the configured one
    #[arg(short, long, global = true)]
    model: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify a leaf photo
    Classify {
        /// Image file (JPEG, PNG, WebP or BMP)
        image: PathBuf,

        /// Do not fall back to the remote classifier
        #[arg(long)]
        no_fallback: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load the runtime and model, then exit
    Warmup,

    /// Ask the plant-care assistant; interactive when no message is given
    Chat {
        /// Message to send
        message: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);
    describe_metrics();

    let config = config::load(&cli.config, &cli)?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    match &cli.command {
        Command::Classify {
            image,
            no_fallback,
            json,
        } => {
            let mut builder = RegistryBuilder::new(config);
            if *no_fallback {
                builder = builder.without_remote();
            }
            let registry = builder.build()?;
            classify(&registry, image, *json, &cancel).await
        }
        Command::Warmup => {
            let registry = ClassifierRegistry::from_config(config)?;
            let elapsed = registry.warmup(&cancel).await?;
            println!("Runtime and model ready in {} ms", elapsed.as_millis());
            Ok(())
        }
        Command::Chat { message } => {
            let registry = ClassifierRegistry::from_config(config)?;
            chat(&registry, message.as_deref()).await
        }
    }
}

async fn classify(
    registry: &ClassifierRegistry,
    path: &Path,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let image = RawImage::from_path(path)
        .with_context(|| format!("failed to read image {}", path.display()))?;
    info!(
        path = %path.display(),
        bytes = image.len(),
        mime = %image.mime_type,
        "Classifying image"
    );

    let outcome = registry.fallback().classify_with_source(&image, cancel).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if outcome.result.has_predictions() {
        println!("Source: {}", outcome.source);
        for (rank, prediction) in outcome.result.predictions.iter().enumerate() {
            println!(
                "  {}. {:<16} {:>5.1}%",
                rank + 1,
                prediction.class_name,
                prediction.confidence * 100.0
            );
        }
    }

    if outcome.source == PredictionSource::Unavailable {
        bail!(
            "no prediction available: {}",
            outcome.result.error.as_deref().unwrap_or("no predictions returned")
        );
    }
    Ok(())
}

async fn chat(registry: &ClassifierRegistry, message: Option<&str>) -> Result<()> {
    let Some(client) = registry.chat_client() else {
        bail!("chat needs a backend: set remote.base_url or pass --remote-url");
    };
    let mut session = ChatSession::new(client.clone());

    if let Some(message) = message {
        return match session.ask(message).await {
            Ok(reply) => {
                println!("{}", reply);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Chat request failed");
                bail!("{}", e.user_facing_message())
            }
        };
    }

    println!("Ask about your plants. Empty line or Ctrl-D to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            break;
        }

        match session.ask(&line).await {
            Ok(reply) => println!("{}\n", reply),
            Err(e) => {
                warn!(error = %e, "Chat request failed");
                eprintln!("{}\n", e.user_facing_message());
            }
        }
    }

    Ok(())
}

/// Cancel in-flight work on Ctrl+C
async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupt received, cancelling");
        cancel.cancel();
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("leafscan=debug,leafscan_core=debug,leafscan_classifiers=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("leafscan=info,leafscan_classifiers=info")
        })
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Register metric descriptions with whatever recorder the host installs
fn describe_metrics() {
    metrics::describe_counter!(
        "leafscan_predictions_total",
        "Predictions by source and outcome"
    );
    metrics::describe_counter!(
        "leafscan_fallbacks_total",
        "Times the remote classifier was used after a local failure"
    );
    metrics::describe_histogram!(
        "leafscan_inference_latency_us",
        metrics::Unit::Microseconds,
        "End-to-end prediction latency in microseconds by source"
    );
}
