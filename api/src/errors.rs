use config_store::{ErrorKind, LabelsError, StoreError};
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use shared::http::make_json_error_response;
use thiserror::Error;

/// Errors of the listener itself. Request failures are turned into responses and
/// never reach hyper.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single request failed.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid labels: {0}")]
    Labels(#[from] LabelsError),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("missing query parameter `{0}`")]
    MissingParameter(&'static str),

    #[error("labels are required")]
    MissingLabels,

    #[error("X-Request-Id header is required")]
    MissingRequestId,

    #[error("not found")]
    RouteNotFound,

    #[error("method not allowed")]
    MethodNotAllowed,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Store(err) => match err.kind() {
                ErrorKind::BadInput => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Transport | ErrorKind::Decode => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Labels(_)
            | ApiError::InvalidBody(_)
            | ApiError::MissingParameter(_)
            | ApiError::MissingLabels
            | ApiError::MissingRequestId => StatusCode::BAD_REQUEST,
            ApiError::RouteNotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    pub fn into_response<E: 'static>(self) -> Response<BoxBody<Bytes, E>> {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            // Storage details stay in the logs
            return make_json_error_response(status, "internal server error");
        }
        make_json_error_response(status, &self.to_string())
    }
}
