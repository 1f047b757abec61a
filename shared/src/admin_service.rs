use crate::http::{full_body, make_boxed_error_response, make_json_response};
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

/// Renders the current metrics snapshot in the Prometheus text format.
pub type MetricsRenderer = Arc<dyn Fn() -> String + Send + Sync>;

pub fn is_admin_path(path: &str) -> bool {
    matches!(path, "/health" | "/ready" | "/metrics")
}

/// Serves `/health`, `/ready` and `/metrics`.
///
/// It can run on its own listener or be consulted by another service through
/// [`AdminService::respond`] so the same paths are answered on the main port.
pub struct AdminService<F, E> {
    service_name: String,
    is_ready: F,
    render_metrics: Option<MetricsRenderer>,
    _error: PhantomData<E>,
}

impl<F, E> AdminService<F, E>
where
    F: Fn() -> bool,
    E: 'static,
{
    pub fn new(
        service_name: impl Into<String>,
        is_ready: F,
        render_metrics: Option<MetricsRenderer>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            is_ready,
            render_metrics,
            _error: PhantomData,
        }
    }

    /// Returns `None` for paths this service does not own.
    pub fn respond(&self, path: &str) -> Option<Response<BoxBody<Bytes, E>>> {
        let res = match path {
            "/health" => {
                let body = serde_json::json!({
                    "status": "healthy",
                    "service": self.service_name,
                });
                make_json_response(StatusCode::OK, body.to_string())
            }
            "/ready" => match (self.is_ready)() {
                true => Response::new(full_body("ok\n")),
                false => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
            },
            "/metrics" => match &self.render_metrics {
                Some(render) => {
                    let mut response = Response::new(full_body(render()));
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; version=0.0.4"),
                    );
                    response
                }
                // A push-based exporter is installed, nothing to scrape
                None => make_boxed_error_response(StatusCode::NOT_FOUND),
            },
            _ => return None,
        };
        Some(res)
    }
}

impl<F, E> Service<Request<Incoming>> for AdminService<F, E>
where
    F: Fn() -> bool + Send + 'static,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let res = self
            .respond(req.uri().path())
            .unwrap_or_else(|| make_boxed_error_response(StatusCode::NOT_FOUND));

        Box::pin(async move { Ok(res) })
    }
}
