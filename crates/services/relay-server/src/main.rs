//! Relay server binary entry point
//!
//! Negotiates one audio session, relays it to the remote speech service and
//! tears it down on Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! # Defaults, credential from the environment
//! OPENAI_API_KEY=sk-... cargo run -p voicerelay-server
//!
//! # Config file plus overrides
//! cargo run -p voicerelay-server -- \
//!   --config ./relay.toml \
//!   --speech-endpoint http://localhost:9000/speech \
//!   --stun-servers stun:stun.l.google.com:19302
//!
//! # JSON logs
//! RUST_LOG=voicerelay_webrtc=debug cargo run -p voicerelay-server -- --log-json
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use voicerelay_core::{Credential, HttpSpeechClient, GREETING};
use voicerelay_webrtc::{RelayConfig, SessionController, SessionState, SignalingNegotiator};

/// VoiceRelay server
///
/// Relays a live WebRTC audio session to a conversational speech service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "VOICERELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Remote speech endpoint (overrides the config file)
    #[arg(long, env = "VOICERELAY_SPEECH_ENDPOINT")]
    speech_endpoint: Option<String>,

    /// STUN servers (comma-separated, overrides the config file)
    #[arg(long, value_delimiter = ',', env = "VOICERELAY_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// Shutdown grace period in milliseconds
    #[arg(long, env = "VOICERELAY_SHUTDOWN_GRACE_MS")]
    shutdown_grace_ms: Option<u64>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info", env = "VOICERELAY_LOG_LEVEL")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false, env = "VOICERELAY_LOG_JSON")]
    log_json: bool,
}

/// Load the config file, if any, and apply CLI overrides
fn build_config(args: &Args) -> anyhow::Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => RelayConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RelayConfig::default(),
    };

    if let Some(endpoint) = &args.speech_endpoint {
        config.speech.endpoint = endpoint.clone();
    }
    if !args.stun_servers.is_empty() {
        config = config.with_stun_servers(args.stun_servers.clone());
    }
    if let Some(grace_ms) = args.shutdown_grace_ms {
        config = config.with_shutdown_grace(Duration::from_millis(grace_ms));
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_json);

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(1);
        }
        eprintln!("Ctrl+C received, stopping session...");
    })
    .context("Failed to set Ctrl+C handler")?;

    let config = build_config(&args)?;
    let credential = Credential::from_env().context("Speech service credential missing")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("voicerelay-worker")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async_main(
        runtime.handle().clone(),
        config,
        credential,
        shutdown_flag,
    ))
}

async fn async_main(
    runtime: tokio::runtime::Handle,
    config: RelayConfig,
    credential: Credential,
    shutdown_flag: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        speech_endpoint = %config.speech.endpoint,
        stun_servers = config.stun_servers.len(),
        "VoiceRelay server starting"
    );

    let speech = HttpSpeechClient::new(config.speech.clone(), credential)?;
    let negotiator = SignalingNegotiator::loopback(config.clone());
    let controller = SessionController::new(
        runtime,
        Arc::new(negotiator),
        Arc::new(speech),
        config,
    );

    let session_id = controller.start().await?;
    info!(%session_id, greeting = GREETING, "Session started");

    while !shutdown_flag.load(Ordering::SeqCst) {
        if controller.state() == SessionState::Stopped {
            warn!(%session_id, "Session ended without a shutdown request");
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if let Err(e) = controller.stop().await {
        error!(%session_id, error = %e, "Failed to stop session");
        return Err(e.into());
    }

    info!(%session_id, "VoiceRelay server shut down gracefully");
    Ok(())
}

fn init_tracing(default_level: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (fmt_layer, json_layer) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(json_layer)
        .init();
}
