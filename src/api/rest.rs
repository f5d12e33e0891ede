//! Axum REST API handlers

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    routing::{get, post},
    extract::{State, Multipart, DefaultBodyLimit},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::engine::preprocess::decode_image;
use crate::error::Error;
use crate::service::{Pipeline, TransferMode, TransferRequest};
use crate::utils::encode_jpeg;

use super::dto::*;

const JPEG_QUALITY: u8 = 92;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Application state shared across handlers
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub request_timeout: Duration,
    pub start_time: Instant,
}

/// Create the REST API router
pub fn create_rest_router(state: Arc<AppState>, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/api/v1/transfer", post(transfer_handler))
        // System endpoints
        .route("/health", get(health_handler))
        .route("/api/v1/health", get(health_handler))
        // Middleware
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP status for a pipeline failure
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn pipeline_error(err: Error) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("Transfer failed: {}", err);
    } else {
        warn!("Transfer rejected: {}", err);
    }
    (status, Json(ErrorResponse::new(&err.to_string(), err.code())))
}

fn bad_request(message: &str, code: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message, code)))
}

/// Pick the transfer mode from the optional form fields. A region selects
/// region mode; an intensity without a region selects blended mode.
fn transfer_mode(form: &TransferForm) -> TransferMode {
    match (&form.region, form.intensity) {
        (Some(region), intensity) => TransferMode::Region {
            region: region.clone(),
            intensity: intensity.unwrap_or(1.0),
        },
        (None, Some(intensity)) => TransferMode::Blended { intensity },
        (None, None) => TransferMode::Full {
            postprocess: form.postprocess.unwrap_or(true),
        },
    }
}

/// Text of a form field, or a 400 when the body could not be read
fn field_text<E: std::fmt::Display>(read: Result<String, E>) -> Result<String, ApiError> {
    read.map_err(|e| bad_request(&e.to_string(), "READ_ERROR"))
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Apply the reference's makeup to the source face
async fn transfer_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let start = Instant::now();

    let mut source: Option<Vec<u8>> = None;
    let mut reference: Option<Vec<u8>> = None;
    let mut form = TransferForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(&e.to_string(), "MULTIPART_ERROR"))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "source" | "reference" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(&e.to_string(), "READ_ERROR"))?
                    .to_vec();
                if name == "source" {
                    source = Some(data);
                } else {
                    reference = Some(data);
                }
            }
            "region" => {
                let text = field_text(field.text().await)?;
                if !text.trim().is_empty() {
                    form.region = Some(text);
                }
            }
            "intensity" => {
                let text = field_text(field.text().await)?;
                let value = text
                    .trim()
                    .parse::<f32>()
                    .map_err(|_| bad_request(&format!("intensity '{}' is not a number", text.trim()), "INVALID_INTENSITY"))?;
                form.intensity = Some(value);
            }
            "postprocess" => {
                let text = field_text(field.text().await)?;
                form.postprocess = Some(
                    parse_bool(&text).ok_or_else(|| bad_request("postprocess must be true or false", "INVALID_FIELD"))?,
                );
            }
            _ => {}
        }
    }

    let source = source.ok_or_else(|| bad_request("Missing source field", "MISSING_IMAGE"))?;
    let reference = reference.ok_or_else(|| bad_request("Missing reference field", "MISSING_IMAGE"))?;

    let request = TransferRequest {
        source: decode_image(&source).map_err(pipeline_error)?,
        reference: decode_image(&reference).map_err(pipeline_error)?,
        mode: transfer_mode(&form),
    };

    let output = state
        .pipeline
        .clone()
        .run_with_timeout(request, state.request_timeout)
        .await
        .map_err(pipeline_error)?;

    let body = encode_jpeg(&output, JPEG_QUALITY).map_err(|e| {
        error!("Failed to encode result: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(&e.to_string(), "ENCODE_FAILED")),
        )
    })?;

    info!(
        "Transfer request served in {}ms ({} bytes)",
        start.elapsed().as_millis(),
        body.len()
    );
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], body).into_response())
}

/// Health check
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.pipeline.health();

    Json(HealthResponse {
        healthy: health.healthy,
        version: health.version,
        models_loaded: health.models_loaded,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Error::NoFaceDetected), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&Error::InvalidRegionSelector("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&Error::Decode("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&Error::TransferFailed("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(&Error::Model("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(&Error::Timeout(Duration::from_secs(1))), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_transfer_mode_selection() {
        assert_eq!(
            transfer_mode(&TransferForm::default()),
            TransferMode::Full { postprocess: true }
        );
        let form = TransferForm {
            region: Some("lips".into()),
            intensity: None,
            postprocess: Some(false),
        };
        assert_eq!(
            transfer_mode(&form),
            TransferMode::Region { region: "lips".into(), intensity: 1.0 }
        );
        let form = TransferForm {
            region: None,
            intensity: Some(1.5),
            postprocess: None,
        };
        assert_eq!(transfer_mode(&form), TransferMode::Blended { intensity: 1.5 });
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool(" True "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_field_read_error_is_bad_request() {
        assert_eq!(field_text::<String>(Ok("lips".into())).unwrap(), "lips");

        let (status, Json(body)) = field_text(Err("connection reset")).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "READ_ERROR");
        assert_eq!(body.error, "connection reset");
    }
}
