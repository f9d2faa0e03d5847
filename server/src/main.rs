use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tracing::{info, warn};

use server::config::{EngineKind, ServerConfig};
use server::{app, metrics, AppState};
use tts_core::{CommandConfig, CommandSynthesizer, Synthesizer, ToneSynthesizer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting voice-clone TTS server...");
    metrics::mark_start();

    let config = ServerConfig::from_env();
    let synthesizer = build_synthesizer(&config)?;
    info!("Synthesis engine '{}' ready", synthesizer.name());

    let state = AppState::new(config.clone(), synthesizer);
    let swept = state
        .scratch
        .prepare()
        .await
        .context("failed to prepare scratch directory")?;
    info!(
        "Server configuration loaded: port={}, slots={}, rate_limit={}/min, scratch={} ({} stale areas removed)",
        config.port,
        config.synth_slots,
        config.rate_limit_per_minute,
        config.scratch_dir.display(),
        swept
    );

    let mut router = app(state.clone());

    // one bucket shared by every client
    if config.rate_limit_per_minute > 0 {
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_millisecond((60_000 / config.rate_limit_per_minute as u64).max(1))
                .burst_size(config.rate_limit_per_minute)
                .key_extractor(GlobalKeyExtractor)
                .finish()
                .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
        );
        router = router.layer(GovernorLayer::new(governor_conf));
        info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);
    } else {
        warn!("RATE_LIMIT_PER_MINUTE=0, rate limiting disabled");
    }

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.gate.close();
    state.synthesizer.shutdown();
    info!("Server stopped");
    Ok(())
}

fn build_synthesizer(config: &ServerConfig) -> anyhow::Result<Arc<dyn Synthesizer>> {
    let kind = config.engine_kind().map_err(anyhow::Error::msg)?;
    let synthesizer: Arc<dyn Synthesizer> = match kind {
        EngineKind::Tone => {
            warn!("Using the tone engine: output is placeholder audio, not a cloned voice");
            Arc::new(ToneSynthesizer::default())
        }
        EngineKind::Command => {
            let program = config
                .synth_command
                .clone()
                .context("SYNTH_ENGINE=command requires SYNTH_COMMAND")?;
            if !config.model_dir.exists() {
                warn!("Model directory {} does not exist", config.model_dir.display());
            }
            Arc::new(CommandSynthesizer::new(CommandConfig {
                program: program.into(),
                args: config.synth_args.clone(),
                model_dir: config.model_dir.clone(),
            }))
        }
    };
    Ok(synthesizer)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
