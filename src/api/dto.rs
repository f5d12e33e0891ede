//! REST API request/response data transfer objects

use serde::Serialize;
use std::collections::HashMap;

/// Non-file fields of the transfer form
#[derive(Debug, Default)]
pub struct TransferForm {
    pub region: Option<String>,
    pub intensity: Option<f32>,
    pub postprocess: Option<bool>,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
    pub models_loaded: HashMap<String, bool>,
    pub uptime_seconds: u64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            code: code.to_string(),
        }
    }
}
