use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("duration is negative or exceeds six hours")]
    InvalidDuration,
    #[error("event time is more than 15 minutes in the future")]
    FutureEvent,

    #[error("reconciliation lost every retry to concurrent writers, please retry")]
    RetriesExhausted,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Stable machine-readable code, used both as the rejection reason in
    /// batch responses and as a metric tag.
    pub fn reason_code(&self) -> &'static str {
        match self {
            IngestError::InvalidDuration => "INVALID_DURATION",
            IngestError::FutureEvent => "FUTURE_EVENT",
            IngestError::RetriesExhausted => "RETRY_EXHAUSTED",
            IngestError::Store(_) => "STORE_ERROR",
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::InvalidDuration | IngestError::FutureEvent => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }

            IngestError::RetriesExhausted | IngestError::Store(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
        }
        .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(IngestError::InvalidDuration.reason_code(), "INVALID_DURATION");
        assert_eq!(IngestError::FutureEvent.reason_code(), "FUTURE_EVENT");
        assert_eq!(IngestError::RetriesExhausted.reason_code(), "RETRY_EXHAUSTED");
        assert_eq!(
            IngestError::Store(StoreError::VersionConflict).reason_code(),
            "STORE_ERROR"
        );
    }
}
