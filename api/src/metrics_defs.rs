use shared::metrics_defs::{MetricDef, MetricType};

pub const HTTP_REQUESTS: MetricDef = MetricDef {
    name: "http.requests",
    metric_type: MetricType::Counter,
    description: "HTTP requests served. Tagged with method, route, status.",
};

pub const HTTP_REQUEST_DURATION: MetricDef = MetricDef {
    name: "http.request.duration",
    metric_type: MetricType::Histogram,
    description: "HTTP request duration in seconds. Tagged with method, route.",
};

pub const RATE_LIMITED: MetricDef = MetricDef {
    name: "http.rate_limited",
    metric_type: MetricType::Counter,
    description: "Requests rejected by the per client rate limit",
};

pub const IDEMPOTENT_REPLAYS: MetricDef = MetricDef {
    name: "http.idempotent_replays",
    metric_type: MetricType::Counter,
    description: "Writes answered from a previously recorded X-Request-Id. Tagged with method.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    HTTP_REQUESTS,
    HTTP_REQUEST_DURATION,
    RATE_LIMITED,
    IDEMPOTENT_REPLAYS,
];
