//! Error taxonomy of the streaming routes.

use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::RangeNotSatisfiable;

/// Errors a streaming request can end with before any byte is sent.
///
/// Failures after the headers went out can't change the status; they are
/// logged by [`RangedStream`](crate::RangedStream) and abort the connection.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Missing, not a regular file, or outside the storage root. The three
    /// cases are indistinguishable to the client on purpose.
    #[error("not found")]
    NotFound,

    #[error("range not satisfiable")]
    UnsatisfiableRange(RangeNotSatisfiable),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl StreamError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        StreamError::Io { context: context.into(), source }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::UnsatisfiableRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RangeNotSatisfiable> for StreamError {
    fn from(err: RangeNotSatisfiable) -> Self {
        StreamError::UnsatisfiableRange(err)
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND.into_response(),
            Self::UnsatisfiableRange(err) => err.into_response(),
            Self::Io { context, source } => {
                tracing::error!(%context, error = %source, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// Result type for streaming handlers.
pub type StreamResult<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use std::io;

    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum_extra::headers::ContentRange;

    use super::StreamError;
    use crate::RangeNotSatisfiable;

    #[test]
    fn test_status_codes() {
        assert_eq!(StatusCode::NOT_FOUND, StreamError::NotFound.into_response().status());

        let err = StreamError::from(RangeNotSatisfiable(ContentRange::unsatisfied_bytes(10)));
        assert_eq!(StatusCode::RANGE_NOT_SATISFIABLE, err.status_code());
        let response = err.into_response();
        assert_eq!(StatusCode::RANGE_NOT_SATISFIABLE, response.status());
        assert_eq!("bytes */10", response.headers()["content-range"]);

        let err = StreamError::io("open /x", io::Error::new(io::ErrorKind::Other, "disk on fire"));
        assert_eq!("open /x: disk on fire", err.to_string());
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, err.into_response().status());
    }
}
