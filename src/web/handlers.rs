use std::{convert::Infallible, sync::Arc};

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    app_state::{AppState, LIVE_PATH},
    camera::descriptor::ConnectionDescriptor,
    core::{errors::AppError, state::StreamPhase},
    stream::mjpeg,
};

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
pub struct StatusResponse {
    streaming: bool,
    phase: StreamPhase,
    source_url: String,
    live_url: &'static str,
    error: Option<String>,
    frame_available: bool,
    frames_received: u64,
}

#[derive(Serialize)]
pub struct StartResponse {
    started: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    live_url: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

#[derive(Serialize)]
pub struct StopResponse {
    stopped: bool,
}

#[derive(Deserialize)]
pub struct SourceRequest {
    url: String,
}

#[derive(Serialize)]
pub struct SourceResponse {
    source_url: String,
    message: &'static str,
}

fn no_store_headers(content_type: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let status = state.stream.status().await;
    Json(StatusResponse {
        streaming: status.is_streaming(),
        phase: status.phase,
        source_url: status.source_url,
        live_url: LIVE_PATH,
        error: status.error,
        frame_available: status.frame_available,
        frames_received: status.frames_received,
    })
}

pub async fn start(State(state): State<Arc<AppState>>) -> Response {
    state.update_activity().await;
    let outcome = state.stream.start().await;

    if outcome.started() {
        let status = state.stream.status().await;
        info!("stream start requested, running");
        return Json(StartResponse {
            started: true,
            source_url: Some(status.source_url),
            live_url: Some(LIVE_PATH),
            error: None,
            code: None,
        })
        .into_response();
    }

    let (error, code) = match &outcome.error {
        Some(err) => (err.to_string(), err.code()),
        None => (format!("stream is {:?}", outcome.phase).to_lowercase(), "not_started"),
    };
    warn!("stream start failed: {error}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(StartResponse {
            started: false,
            source_url: None,
            live_url: None,
            error: Some(error),
            code: Some(code),
        }),
    )
        .into_response()
}

pub async fn stop(State(state): State<Arc<AppState>>) -> Json<StopResponse> {
    state.stream.stop().await;
    state.update_activity().await;
    info!("stream stop requested");
    Json(StopResponse { stopped: true })
}

pub async fn live(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let chunks = state.stream.open_live().await?;
    state.update_activity().await;
    info!("live client attached");

    let activity = state.clone();
    let body = chunks.then(move |chunk| {
        let state = activity.clone();
        async move {
            state.update_activity().await;
            Ok::<_, Infallible>(chunk)
        }
    });

    Ok((
        StatusCode::OK,
        no_store_headers(mjpeg::CONTENT_TYPE),
        Body::from_stream(body),
    )
        .into_response())
}

pub async fn capture(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let captured = state.stream.capture().await?;
    state.update_activity().await;
    let (width, height) = captured.frame.dimensions();
    info!(width, height, bytes = captured.jpeg.len(), "capture served");

    Ok((
        StatusCode::OK,
        no_store_headers("image/jpeg"),
        captured.jpeg,
    )
        .into_response())
}

pub async fn update_source(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SourceRequest>,
) -> Result<Json<SourceResponse>, AppError> {
    let descriptor = ConnectionDescriptor::parse_source(&payload.url)?;
    let source_url = descriptor.redacted();
    state.stream.reconfigure(descriptor).await?;

    Ok(Json(SourceResponse {
        source_url,
        message: "stream source updated, start the stream to use it",
    }))
}
