use crate::domain::bank::PartnerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised by a `KvStore` backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A row read by the transaction changed before it could commit.
    #[error("serialization conflict: {0}")]
    Conflict(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("idempotency key reused with a different request: {0}")]
    FingerprintConflict(String),
    #[error("request with this idempotency key is already in progress")]
    OperationInProgress,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("banking partner failure: {0}")]
    Foreign(#[from] PartnerError),
    #[error("bug: {0}")]
    Invariant(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, PaymentError>;

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::Store(StoreError::Codec(err))
    }
}

impl PaymentError {
    /// True when the failure came from optimistic validation at commit time.
    /// These are retried by the phase executor and never surfaced.
    pub fn is_serialization_conflict(&self) -> bool {
        matches!(self, PaymentError::Store(StoreError::Conflict(_)))
    }

    pub fn status_code(&self) -> u16 {
        match self {
            PaymentError::FingerprintConflict(_) => 422,
            PaymentError::OperationInProgress => 409,
            PaymentError::Foreign(PartnerError::Rejected { status, .. }) => *status,
            PaymentError::Foreign(PartnerError::Unavailable(_)) => 502,
            PaymentError::NotFound(_) => 404,
            PaymentError::BadRequest(_)
            | PaymentError::ValidationError(_)
            | PaymentError::CsvError(_) => 400,
            PaymentError::Store(_)
            | PaymentError::Invariant(_)
            | PaymentError::IoError(_)
            | PaymentError::ConfigError(_) => 500,
        }
    }

    pub fn to_body(&self, now: DateTime<Utc>) -> ErrorBody {
        ErrorBody::new(now, self.status_code(), self.to_string(), None)
    }
}

/// JSON shape used for every error surfaced to a caller, including partner
/// rejections that are cached as terminal responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub timestamp: DateTime<Utc>,
    pub code: u16,
    pub message: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    pub fn new(
        timestamp: DateTime<Utc>,
        code: u16,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            timestamp,
            code,
            message: message.into(),
            error: reason_phrase(code).to_string(),
            details,
        }
    }
}

fn reason_phrase(code: u16) -> &'static str {
    match code {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        400..=499 => "Client Error",
        _ => "Server Error",
    }
}
