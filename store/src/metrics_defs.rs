//! Metrics definitions for the config store.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS_TOTAL: MetricDef = MetricDef {
    name: "requests_total",
    metric_type: MetricType::Counter,
    description: "Number of service operations, labeled by method",
};

pub const REQUEST_LATENCY: MetricDef = MetricDef {
    name: "request_latency_seconds",
    metric_type: MetricType::Histogram,
    description: "Latency of service operations in seconds, labeled by method",
};

pub const LABEL_DELETE_CAS_RETRIES: MetricDef = MetricDef {
    name: "label_delete.cas_retries",
    metric_type: MetricType::Counter,
    description: "Bulk label deletes that lost a compare-and-set race and re-read the group",
};

pub const IDEMPOTENCY_MARK_FAILURES: MetricDef = MetricDef {
    name: "idempotency.mark_failures",
    metric_type: MetricType::Counter,
    description: "Idempotency keys that could not be recorded after a committed write",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS_TOTAL,
    REQUEST_LATENCY,
    LABEL_DELETE_CAS_RETRIES,
    IDEMPOTENCY_MARK_FAILURES,
];
