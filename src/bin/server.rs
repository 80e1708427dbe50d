//! moodscan HTTP server binary.
//!
//! Loads [`AppConfig`] from the environment (and an optional YAML file),
//! wires the Gemini agent and the DeepFace classifier into the check-in flow,
//! and serves the session API. See `moodscan::config` for the variables.
//!
//! # Usage
//!
//! ```bash
//! GEMINI_API_KEY=... VISION_URL=http://localhost:5000/analyze cargo run --bin server
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use moodscan::llms::providers::GeminiCompletion;
use moodscan::server::{app_router, AppState};
use moodscan::session::SessionStore;
use moodscan::vision::deepface::DeepFaceClassifier;
use moodscan::{AppConfig, ConfigError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,moodscan=debug".into()),
        )
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let api_key = config
        .llm
        .api_key
        .clone()
        .ok_or(ConfigError::MissingCredential("GEMINI_API_KEY"))?;
    let llm = GeminiCompletion::new(config.llm.model.clone(), api_key, config.adapter_timeout())
        .map_err(|e| anyhow::anyhow!("failed to build Gemini client: {}", e))?
        .with_max_retries(config.llm.max_retries)
        .with_temperature(config.llm.temperature)
        .with_max_output_tokens(config.llm.max_output_tokens)
        .with_top_p(config.llm.top_p);

    let classifier = DeepFaceClassifier::new(
        config.vision.url.clone(),
        config.vision.api_key.clone(),
        config.adapter_timeout(),
    )
    .context("failed to build vision client")?;

    let flow = config.build_flow(Arc::new(classifier), Arc::new(llm))?;
    let state = AppState::new(flow, SessionStore::new(config.session_ttl()));

    // Probe the classifier in the background so startup is not blocked on it.
    {
        let flow = Arc::clone(&state.flow);
        let ready = Arc::clone(&state.vision_ready);
        tokio::spawn(async move {
            let ok = flow.classifier().warm_up().await;
            ready.store(ok, Ordering::Relaxed);
        });
    }

    let sweep_period = (config.session_ttl() / 4).clamp(Duration::from_secs(5), Duration::from_secs(300));
    let sweeper = state.sessions.spawn_sweeper(sweep_period);

    let app = app_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);

    tracing::info!(
        model = %config.llm.model,
        vision_url = %config.vision.url,
        questions = config.questions.len(),
        bands = %config.bands.name,
        "moodscan server starting on {}",
        bind_addr
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    sweeper.abort();
    tracing::info!("moodscan server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
