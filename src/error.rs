// src/error.rs

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

pub const INVALID_REQUEST_BODY: &str = "invalid request";
pub const GENERATION_FAILED_BODY: &str = "failed to generate a valid response";
pub const TEXT_PLAIN_UTF8: &str = "text/plain; charset=UTF-8";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid request")]
    InvalidRequest,

    #[error("failed to generate a valid response")]
    GenerationFailed,

    #[error("Failed to load {artifact} `{model_id}`: {reason}")]
    ResourceLoad {
        artifact: &'static str,
        model_id: String,
        reason: String,
    },
}

// The caller only ever sees one of two fixed bodies; the detail stays in the logs.
impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidRequest => StatusCode::BAD_REQUEST,
            ServiceError::GenerationFailed | ServiceError::ResourceLoad { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ServiceError::InvalidRequest => INVALID_REQUEST_BODY,
            _ => GENERATION_FAILED_BODY,
        };
        HttpResponse::build(self.status_code())
            .content_type(TEXT_PLAIN_UTF8)
            .body(body)
    }
}

/// Failure of a single sampling attempt at the model/tokenizer boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SampleError {
    #[error("Failed to tokenize text: {0}")]
    Tokenize(String),

    #[error("Failed to detokenize output: {0}")]
    Detokenize(String),

    #[error("Model evaluation failed: {0}")]
    Decode(String),

    #[error("Failed to create inference context: {0}")]
    Context(String),

    #[error("Context window is empty")]
    EmptyContext,
}

impl SampleError {
    /// Whether another attempt may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SampleError::Tokenize(_) | SampleError::Detokenize(_) | SampleError::Decode(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum HeartbeatError {
    #[error("Heartbeat request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Firestore rejected the write with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Project id unavailable: {0}")]
    Project(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: `{value}`")]
    Invalid { key: &'static str, value: String },
}
