mod app_state;
mod camera;
mod config;
mod core;
mod stream;
mod web;

use std::{sync::Arc, time::Duration};

use anyhow::bail;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_appender::rolling;

use crate::{
    app_state::AppState, camera::ffmpeg_source::FfmpegSource, config::AppConfig,
    core::state::StreamPhase, stream::supervisor::StreamSupervisor,
};

const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(15);

fn build_supervisor(config: &AppConfig) -> anyhow::Result<StreamSupervisor> {
    let source = FfmpegSource::new(
        config.ffmpeg_bin.clone(),
        config.rtsp_transport.clone(),
        config.stream_fps,
    );
    Ok(StreamSupervisor::new(
        Arc::new(source),
        config.source.descriptor()?,
        config.stream_settings(),
    ))
}

/// Starts the stream once, prints its status and stops it again.
async fn probe_source(config: &AppConfig) -> anyhow::Result<()> {
    let stream = build_supervisor(config)?;
    let outcome = stream.start().await;
    let status = stream.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    stream.stop().await;

    if let Some(err) = outcome.error {
        bail!("source check failed: {err}");
    }
    Ok(())
}

fn spawn_idle_watchdog(state: Arc<AppState>) {
    let limit = state.config.auto_stop_seconds;
    if limit == 0 {
        return;
    }

    tokio::spawn(async move {
        loop {
            sleep(IDLE_CHECK_INTERVAL).await;
            let idle_seconds = state.idle_seconds().await;
            if idle_seconds <= limit || state.stream.phase().await != StreamPhase::Running {
                continue;
            }

            info!("auto stop triggered after {idle_seconds} seconds idle");
            state.stream.stop().await;
        }
    });
}

/// Resolves on Ctrl-C after stopping the stream, so open live responses end
/// and graceful shutdown can complete.
async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
    state.stream.stop().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = AppConfig::from_env()?;

    if std::env::args().any(|arg| arg == "--probe-source") {
        return probe_source(&config).await;
    }

    tokio::fs::create_dir_all(&config.log_dir).await?;
    let file_appender = rolling::daily(&config.log_dir, "rtsp-gateway.log");
    let (non_blocking, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::INFO)
        .init();

    let stream = build_supervisor(&config)?;
    info!(
        source = %config.source.descriptor()?.redacted(),
        "camera gateway configured"
    );

    let state = Arc::new(AppState::new(config.clone(), stream));
    spawn_idle_watchdog(state.clone());
    let app = web::routes::build_router(state.clone());

    info!("camera gateway listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    info!("camera gateway shut down");
    Ok(())
}
