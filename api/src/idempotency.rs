//! The `X-Request-Id` contract for POST and PUT.
//!
//! A request id that was already recorded is answered without touching the
//! store: 201 for POST, 200 for PUT. Requests without an id skip the check unless
//! the policy requires one.

use crate::errors::ApiError;
use config_store::ConfigService;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::{Method, Response, StatusCode};
use shared::http::make_json_response;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdempotencyPolicy {
    #[default]
    Optional,
    Required,
}

pub enum Admission<E> {
    /// Run the request, recording the id (if any) once it succeeds.
    Proceed(Option<String>),
    /// The request was already processed.
    Replay(Response<BoxBody<Bytes, E>>),
}

pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
}

pub fn replay_response<E: 'static>(method: &Method) -> Response<BoxBody<Bytes, E>> {
    let status = if *method == Method::POST {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let body = serde_json::json!({
        "idempotent": true,
        "message": "request already processed",
    });
    make_json_response(status, body.to_string())
}

pub async fn admit<E: 'static>(
    policy: IdempotencyPolicy,
    service: &dyn ConfigService,
    method: &Method,
    headers: &HeaderMap,
) -> Result<Admission<E>, ApiError> {
    let Some(id) = request_id(headers) else {
        return match policy {
            IdempotencyPolicy::Optional => Ok(Admission::Proceed(None)),
            IdempotencyPolicy::Required => Err(ApiError::MissingRequestId),
        };
    };

    if service.has_request_been_processed(&id).await? {
        tracing::debug!(request_id = %id, "replaying processed request");
        return Ok(Admission::Replay(replay_response(method)));
    }
    Ok(Admission::Proceed(Some(id)))
}
