//! HTTP handlers for the generation and monitoring endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::identity::CallerInfo;
use crate::metrics::GenerationMetrics;
use crate::usage::Tier;
use crate::{Gatekeeper, GenerationRequest, HeimdallError};

/// Shared handler state.
pub struct AppState {
    pub gatekeeper: Arc<Gatekeeper>,
    pub metrics_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    pub prompt: String,
    #[serde(default)]
    pub source_image_data_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub image_data_url: String,
    pub cached: bool,
    pub deduped: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub edited: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub ok: bool,
    pub timestamp: String,
    pub generation: GenerationMetrics,
}

/// POST /api/generate
pub async fn generate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<GenerateBody>,
) -> Response {
    let request = GenerationRequest {
        prompt: body.prompt,
        source_image_data_url: body.source_image_data_url,
        caller: caller_from_headers(&headers),
    };

    match state.gatekeeper.handle(request).await {
        Ok(reply) => (
            StatusCode::OK,
            Json(GenerateResponse {
                image_data_url: reply.image.to_data_url(),
                cached: reply.cached,
                deduped: reply.deduped,
                edited: reply.edited,
                latency_ms: reply.latency_ms,
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

/// GET /api/metrics
pub async fn metrics(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_secret {
        let presented = headers.get("x-metrics-secret").and_then(|v| v.to_str().ok());
        if presented != Some(secret.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "missing or invalid metrics secret".to_string(),
                }),
            )
                .into_response();
        }
    }

    (
        StatusCode::OK,
        Json(MetricsResponse {
            ok: true,
            timestamp: chrono::Utc::now().to_rfc3339(),
            generation: state.gatekeeper.metrics_snapshot(),
        }),
    )
        .into_response()
}

/// Build caller metadata from request headers.
pub fn caller_from_headers(headers: &HeaderMap) -> CallerInfo {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    CallerInfo {
        visitor_token: get("x-visitor-id"),
        forwarded_for: get("x-forwarded-for"),
        real_ip: get("x-real-ip"),
        tier_hint: Tier::from_header(headers.get("x-user-tier").and_then(|v| v.to_str().ok())),
    }
}

fn error_response(err: HeimdallError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse { error: user_message(&err) })).into_response()
}

/// Short, non-technical message for the response body. Server-side detail
/// (provider payloads, transport errors) never leaks to the caller.
fn user_message(err: &HeimdallError) -> String {
    match err {
        HeimdallError::Configuration(_) => {
            "The server is not configured for image generation.".to_string()
        }
        _ if err.status_code() == 500 => "Image generation failed. Please try again.".to_string(),
        _ => err.to_string(),
    }
}
