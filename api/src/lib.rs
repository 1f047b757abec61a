pub mod config;
pub mod errors;
pub mod handlers;
pub mod idempotency;
pub mod metrics_defs;
pub mod rate_limit;
pub mod router;
pub mod utils;

use crate::errors::{ApiError, ServerError};
use crate::handlers::HandlerResult;
use crate::idempotency::{Admission, IdempotencyPolicy, admit};
use crate::metrics_defs::{HTTP_REQUEST_DURATION, HTTP_REQUESTS, IDEMPOTENT_REPLAYS, RATE_LIMITED};
use crate::rate_limit::{RateLimiter, client_ip};
use crate::router::Route;
use crate::utils::Query;
use config_store::ConfigService;
use http_body_util::combinators::BoxBody;
use hyper::body::{Body, Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use shared::admin_service::{AdminService, MetricsRenderer, is_admin_path};
use shared::http::{PeerAddr, make_json_error_response, run_http_service};
use shared::{counter, histogram};
use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, field, info_span};

pub type ApiBody = BoxBody<Bytes, ServerError>;

type ReadyCheck = fn() -> bool;

fn always_ready() -> bool {
    true
}

pub async fn run(
    config: config::Config,
    service: Arc<dyn ConfigService>,
    metrics: Option<MetricsRenderer>,
) -> Result<(), ServerError> {
    let api_service = ApiService::new(&config, service, metrics.clone());
    let api_task = run_http_service(&config.listener.host, config.listener.port, api_service);

    match &config.admin_listener {
        Some(admin_listener) => {
            let admin_service: AdminService<ReadyCheck, ServerError> =
                AdminService::new(config.service_name.clone(), always_ready, metrics);
            let admin_task =
                run_http_service(&admin_listener.host, admin_listener.port, admin_service);
            tokio::try_join!(api_task, admin_task)?;
        }
        None => api_task.await?,
    }

    Ok(())
}

struct ApiState {
    service: Arc<dyn ConfigService>,
    admin: AdminService<ReadyCheck, ServerError>,
    policy: IdempotencyPolicy,
    limiter: Option<RateLimiter>,
}

/// The configuration API. Admin routes are answered on the same listener.
#[derive(Clone)]
pub struct ApiService {
    state: Arc<ApiState>,
}

impl ApiService {
    pub fn new(
        config: &config::Config,
        service: Arc<dyn ConfigService>,
        metrics: Option<MetricsRenderer>,
    ) -> Self {
        let state = ApiState {
            service,
            admin: AdminService::new(config.service_name.clone(), always_ready, metrics),
            policy: config.idempotency.policy(),
            limiter: RateLimiter::from_config(&config.rate_limit),
        };
        ApiService {
            state: Arc::new(state),
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<ApiBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Display,
    {
        let client = client_ip(req.headers(), req.extensions().get::<PeerAddr>());
        let span = info_span!(
            "http.request",
            http.method = %req.method(),
            http.target = %req.uri().path(),
            client.ip = %client,
            http.status_code = field::Empty
        );

        let response = self.respond(req, &client).instrument(span.clone()).await;
        span.record("http.status_code", response.status().as_u16());
        response
    }

    async fn respond<B>(&self, req: Request<B>, client: &str) -> Response<ApiBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Display,
    {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let route = route_label(&path);

        // Health checks and scrapes skip rate limiting and idempotency
        if is_admin_path(&path) {
            if let Some(response) = self.state.admin.respond(&path) {
                return finish(&method, route, start, response);
            }
        }

        let decision = match &self.state.limiter {
            Some(limiter) => {
                let decision = limiter.check(client);
                if !decision.allowed {
                    counter!(RATE_LIMITED).increment(1);
                    tracing::debug!(client, "rate limit exceeded");
                    let mut response = make_json_error_response(
                        StatusCode::TOO_MANY_REQUESTS,
                        "rate limit exceeded",
                    );
                    decision.apply_headers(response.headers_mut());
                    return finish(&method, route, start, response);
                }
                Some(decision)
            }
            None => None,
        };

        let mut response = self
            .dispatch(req)
            .await
            .unwrap_or_else(ApiError::into_response);
        if let Some(decision) = decision {
            decision.apply_headers(response.headers_mut());
        }

        finish(&method, route, start, response)
    }

    async fn dispatch<B>(&self, req: Request<B>) -> HandlerResult
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Display,
    {
        let route = Route::from_path(req.uri().path()).ok_or(ApiError::RouteNotFound)?;
        let method = req.method().clone();
        let query = Query::parse(req.uri().query());
        let service = &*self.state.service;

        match (route, &method) {
            (Route::Configurations | Route::ConfigGroups, &Method::POST | &Method::PUT) => {
                self.write(route, req).await
            }
            (Route::Configurations, &Method::GET) => {
                handlers::get_configuration(service, &query).await
            }
            (Route::Configurations, &Method::DELETE) => {
                handlers::delete_configuration(service, &query).await
            }
            (Route::ConfigGroups, &Method::GET) => handlers::get_group(service, &query).await,
            (Route::ConfigGroups, &Method::DELETE) => handlers::delete_group(service, &query).await,
            (Route::GroupConfigurations, &Method::GET) => {
                handlers::filter_group_configurations(service, &query).await
            }
            (Route::GroupConfigurations, &Method::DELETE) => {
                handlers::delete_group_configurations(service, &query).await
            }
            _ => Err(ApiError::MethodNotAllowed),
        }
    }

    /// POST and PUT go through the idempotency check first.
    async fn write<B>(&self, route: Route, req: Request<B>) -> HandlerResult
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Display,
    {
        let service = &*self.state.service;
        let (parts, body) = req.into_parts();

        let request_id = match admit(self.state.policy, service, &parts.method, &parts.headers)
            .await?
        {
            Admission::Replay(response) => {
                counter!(IDEMPOTENT_REPLAYS, "method" => parts.method.to_string()).increment(1);
                return Ok(response);
            }
            Admission::Proceed(request_id) => request_id,
        };
        let request_id = request_id.as_deref();

        match (route, parts.method == Method::POST) {
            (Route::Configurations, true) => {
                handlers::add_configuration(service, body, request_id).await
            }
            (Route::Configurations, false) => {
                handlers::update_configuration(service, body, request_id).await
            }
            (Route::ConfigGroups, true) => handlers::add_group(service, body, request_id).await,
            (Route::ConfigGroups, false) => {
                handlers::update_group(service, body, request_id).await
            }
            (Route::GroupConfigurations, _) => Err(ApiError::MethodNotAllowed),
        }
    }
}

fn route_label(path: &str) -> &'static str {
    match Route::from_path(path) {
        Some(route) => route.as_str(),
        None => match path {
            "/health" => "/health",
            "/ready" => "/ready",
            "/metrics" => "/metrics",
            _ => "unmatched",
        },
    }
}

fn finish(
    method: &Method,
    route: &'static str,
    start: Instant,
    response: Response<ApiBody>,
) -> Response<ApiBody> {
    let status = response.status().as_u16();
    counter!(
        HTTP_REQUESTS,
        "method" => method.to_string(),
        "route" => route,
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(HTTP_REQUEST_DURATION, "method" => method.to_string(), "route" => route)
        .record(start.elapsed().as_secs_f64());
    tracing::debug!(%method, route, status, "request served");

    response
}

impl Service<Request<Incoming>> for ApiService {
    type Response = Response<ApiBody>;
    type Error = ServerError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.handle(req).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_store::kv::MemoryKv;
    use config_store::{CoreService, Repository};
    use http_body_util::{BodyExt, Empty, Full};
    use config_store::Traced;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use std::collections::BTreeMap;
    use std::fmt;
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id, Record};
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::registry::LookupSpan;

    fn api(config: &config::Config) -> ApiService {
        let service = Arc::new(CoreService::new(Repository::new(Arc::new(MemoryKv::new()))));
        let renderer: MetricsRenderer = Arc::new(|| "# metrics\n".to_string());
        ApiService::new(config, service, Some(renderer))
    }

    fn get(uri: &str) -> Request<Empty<Bytes>> {
        Request::get(uri).body(Empty::new()).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_path_and_method() {
        let api = api(&config::Config::default());
        assert_eq!(
            api.handle(get("/nope")).await.status(),
            StatusCode::NOT_FOUND
        );

        let patch = Request::patch("/configurations")
            .body(Empty::<Bytes>::new())
            .unwrap();
        assert_eq!(
            api.handle(patch).await.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );

        let post = Request::post("/configgroups/configurations")
            .body(Full::new(Bytes::from_static(b"{}")))
            .unwrap();
        assert_eq!(
            api.handle(post).await.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[tokio::test]
    async fn test_admin_routes_on_main_listener() {
        let mut config = config::Config::default();
        config.rate_limit.requests = 1;
        let api = api(&config);

        for _ in 0..3 {
            let response = api.handle(get("/health")).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get("x-ratelimit-limit").is_none());
        }

        let metrics = api.handle(get("/metrics")).await;
        let body = metrics.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"# metrics\n");
        assert_eq!(api.handle(get("/ready")).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let mut config = config::Config::default();
        config.rate_limit.requests = 2;
        let api = api(&config);

        let request = |ip: &str| {
            Request::get("/configurations?name=svc&version=v1")
                .header("x-forwarded-for", ip)
                .body(Empty::<Bytes>::new())
                .unwrap()
        };

        let first = api.handle(request("10.0.0.1")).await;
        assert_eq!(first.status(), StatusCode::NOT_FOUND);
        assert_eq!(first.headers().get("x-ratelimit-limit").unwrap(), "2");
        assert_eq!(first.headers().get("x-ratelimit-remaining").unwrap(), "1");
        assert!(first.headers().get("x-ratelimit-reset").is_some());

        api.handle(request("10.0.0.1")).await;
        let limited = api.handle(request("10.0.0.1")).await;
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(limited.headers().get("retry-after").is_some());

        // Another client is unaffected
        let other = api.handle(request("10.0.0.2")).await;
        assert_eq!(other.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_disabled_rate_limit_sets_no_headers() {
        let mut config = config::Config::default();
        config.rate_limit.enabled = false;
        let api = api(&config);

        let response = api.handle(get("/configurations?name=a&version=b")).await;
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }

    #[test]
    fn test_http_metrics() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let api = api(&config::Config::default());

        metrics::with_local_recorder(&recorder, || {
            rt.block_on(async {
                api.handle(get("/configurations?name=a&version=b")).await;
                api.handle(get("/nope/1")).await;
            })
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let served: Vec<(String, String, String)> = snapshot
            .iter()
            .filter(|(key, _, _, _)| key.key().name() == "http.requests")
            .map(|(key, _, _, value)| {
                assert_eq!(value, &DebugValue::Counter(1));
                let label = |name: &str| {
                    key.key()
                        .labels()
                        .find(|label| label.key() == name)
                        .map(|label| label.value().to_string())
                        .unwrap_or_default()
                };
                (label("method"), label("route"), label("status"))
            })
            .collect();

        assert_eq!(served.len(), 2);
        assert!(served.contains(&(
            "GET".to_string(),
            "/configurations".to_string(),
            "404".to_string()
        )));
        assert!(served.contains(&(
            "GET".to_string(),
            "unmatched".to_string(),
            "404".to_string()
        )));
    }

    #[derive(Clone, Debug)]
    struct CapturedSpan {
        id: u64,
        name: &'static str,
        parent: Option<&'static str>,
        fields: BTreeMap<String, String>,
    }

    #[derive(Clone, Default)]
    struct SpanCapture {
        spans: Arc<parking_lot::Mutex<Vec<CapturedSpan>>>,
    }

    impl SpanCapture {
        fn named(&self, name: &str) -> Vec<CapturedSpan> {
            self.spans
                .lock()
                .iter()
                .filter(|span| span.name == name)
                .cloned()
                .collect()
        }
    }

    struct FieldVisitor<'a>(&'a mut BTreeMap<String, String>);

    impl Visit for FieldVisitor<'_> {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.insert(field.name().to_string(), value.to_string());
        }

        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.insert(field.name().to_string(), format!("{value:?}"));
        }
    }

    impl<S> Layer<S> for SpanCapture
    where
        S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    {
        fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
            let mut span = CapturedSpan {
                id: id.into_u64(),
                name: attrs.metadata().name(),
                parent: ctx
                    .span(id)
                    .and_then(|span| span.parent())
                    .map(|parent| parent.name()),
                fields: BTreeMap::new(),
            };
            attrs.record(&mut FieldVisitor(&mut span.fields));
            self.spans.lock().push(span);
        }

        fn on_record(&self, id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
            let mut spans = self.spans.lock();
            if let Some(span) = spans.iter_mut().find(|span| span.id == id.into_u64()) {
                values.record(&mut FieldVisitor(&mut span.fields));
            }
        }
    }

    #[test]
    fn test_request_span() {
        let capture = SpanCapture::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let service = Arc::new(Traced::new(CoreService::new(Repository::new(Arc::new(
            MemoryKv::new(),
        )))));
        let api = ApiService::new(&config::Config::default(), service, None);

        tracing::subscriber::with_default(subscriber, || {
            rt.block_on(async {
                let req = Request::get("/configurations?name=svc&version=v1")
                    .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
                    .body(Empty::<Bytes>::new())
                    .unwrap();
                assert_eq!(api.handle(req).await.status(), StatusCode::NOT_FOUND);
                assert_eq!(api.handle(get("/health")).await.status(), StatusCode::OK);
            })
        });

        let requests = capture.named("http.request");
        assert_eq!(requests.len(), 2);

        let get_config = &requests[0];
        assert_eq!(get_config.parent, None);
        assert_eq!(get_config.fields["http.method"], "GET");
        assert_eq!(get_config.fields["http.target"], "/configurations");
        assert_eq!(get_config.fields["client.ip"], "203.0.113.7");
        assert_eq!(get_config.fields["http.status_code"], "404");

        let health = &requests[1];
        assert_eq!(health.fields["http.target"], "/health");
        assert_eq!(health.fields["http.status_code"], "200");

        // Store spans hang off the request that caused them
        let lookups = capture.named("GetConfiguration");
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].parent, Some("http.request"));
        assert_eq!(lookups[0].fields["name"], "svc");
    }
}
