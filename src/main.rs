//! `plate-inpaint` server - composite license plates into generated scenes over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plate_inpaint::model::DevicePreference;
use plate_inpaint::pipeline::TimestepType;
use plate_inpaint::server::{self, AppState};
use plate_inpaint::{Config, InpaintPipeline, Inpainter};

/// Serve license-plate scene generation over HTTP.
#[derive(Parser, Debug)]
#[command(name = "plate-inpaint")]
#[command(version, about, long_about = None)]
struct Args {
    /// Host to bind to.
    #[arg(long, default_value = "0.0.0.0", env = "PLATE_INPAINT_HOST")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, default_value = "8000", env = "PLATE_INPAINT_PORT")]
    port: u16,

    /// Base URL of the ONNX export of the inpainting model.
    #[arg(long, env = "PLATE_INPAINT_MODEL_URL", value_name = "URL")]
    model_url: Option<String>,

    /// URL of the CLIP tokenizer.json.
    #[arg(long, env = "PLATE_INPAINT_TOKENIZER_URL", value_name = "URL")]
    tokenizer_url: Option<String>,

    /// Directory holding a fine-tuned UNet that replaces the base one.
    #[arg(
        long,
        default_value = "Models/diffusion",
        env = "PLATE_INPAINT_CHECKPOINT_DIR",
        value_name = "DIR"
    )]
    checkpoint_dir: PathBuf,

    /// Model cache directory. Defaults to the platform cache directory.
    #[arg(long, env = "PLATE_INPAINT_CACHE_DIR", value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Execution device: auto, cpu or cuda.
    #[arg(long, default_value = "auto", env = "PLATE_INPAINT_DEVICE")]
    device: DevicePreference,

    /// Element type of the UNet timestep input: float32 or int64.
    #[arg(long, default_value = "float32")]
    timestep_type: TimestepType,

    /// Largest accepted request body, in megabytes.
    #[arg(long, default_value = "20", value_name = "MB")]
    max_upload_mb: usize,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("plate_inpaint={log_level},tower_http={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(err) = run(args).await {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn run(args: Args) -> Result<()> {
    let defaults = Config::default();
    let config = Config {
        model_url: args.model_url.unwrap_or(defaults.model_url),
        tokenizer_url: args.tokenizer_url.unwrap_or(defaults.tokenizer_url),
        cache_dir: args.cache_dir,
        checkpoint_dir: Some(args.checkpoint_dir),
        device: args.device,
        timestep_type: args.timestep_type,
    };
    config.validate().context("Invalid model configuration")?;

    let state = Arc::new(AppState::new());

    // The server answers health checks while the model loads
    server::spawn_model_load(state.clone(), move || {
        InpaintPipeline::new(config).map(|pipeline| Box::new(pipeline) as Box<dyn Inpainter>)
    });

    let app = server::router(state, args.max_upload_mb.saturating_mul(1024 * 1024));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("Invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!("plate-inpaint v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
