use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

use crate::config::{Direction, NumberingMode};

#[derive(Debug, Error)]
pub enum PideeError {
    #[error("Unknown feature: {0}")]
    UnknownFeature(String),
    #[error("Auto setup requires BCM numbering, configured mode is {0:?}")]
    NumberingModeUnsupported(NumberingMode),
    #[error("Feature {feature} is {direction:?} only")]
    DirectionMismatch {
        feature: String,
        direction: Direction,
    },
    #[error("Listener not found: {0}")]
    ListenerNotFound(u64),
    #[error("Dip switch index out of range: {0}")]
    InvalidIndex(usize),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("GPIO error: {0}")]
    Gpio(String),
}

impl ResponseError for PideeError {
    fn status_code(&self) -> StatusCode {
        match self {
            PideeError::UnknownFeature(_) | PideeError::ListenerNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            PideeError::DirectionMismatch { .. }
            | PideeError::InvalidIndex(_)
            | PideeError::InvalidValue(_) => StatusCode::BAD_REQUEST,
            PideeError::NumberingModeUnsupported(_)
            | PideeError::Config(_)
            | PideeError::Gpio(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
