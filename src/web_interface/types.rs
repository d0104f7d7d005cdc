use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use warp::http::StatusCode;

use crate::container_management::{ContainerStatus, StartRequest};
use crate::error_handling::types::{ControllerError, StartFailure};

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StartFailure>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            violations: Vec::new(),
            failure: None,
        }
    }
}

impl From<&ControllerError> for ApiError {
    fn from(err: &ControllerError) -> Self {
        let mut api = ApiError::new(err.to_string());
        match err {
            ControllerError::InvalidInput(errors) => {
                api.message = "Invalid input".to_string();
                api.violations = errors.iter().map(|e| e.to_string()).collect();
            }
            ControllerError::StartFailed(failure) => api.failure = Some(failure.clone()),
            _ => {}
        }
        api
    }
}

pub fn status_code_for(err: &ControllerError) -> StatusCode {
    match err {
        ControllerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ControllerError::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ControllerError::StartFailed(_)
        | ControllerError::UpdateInProgress
        | ControllerError::PullCancelled => StatusCode::CONFLICT,
        ControllerError::NoLocalImage | ControllerError::NoRegistryTags => StatusCode::NOT_FOUND,
        ControllerError::Engine(_) | ControllerError::Pull(_) => StatusCode::BAD_GATEWAY,
    }
}

/// Body of `POST /start`; absent fields fall back to the configuration.
#[derive(Debug, Default, Deserialize)]
pub struct StartBody {
    pub mount: Option<PathBuf>,
    pub token: Option<String>,
    /// Number or text, validated later with the other fields.
    pub port: Option<Value>,
}

impl StartBody {
    pub fn into_request(self, defaults: StartRequest) -> StartRequest {
        StartRequest {
            mount: self.mount.unwrap_or(defaults.mount),
            token: self.token.unwrap_or(defaults.token),
            port: match self.port {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => defaults.port,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub status: ContainerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
