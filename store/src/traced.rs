use crate::errors::StoreError;
use crate::labels::LabelSet;
use crate::model::{Configuration, ConfigurationGroup};
use crate::service::ConfigService;
use async_trait::async_trait;
use tracing::field::{Empty, display};
use tracing::{Instrument, Span, info_span};

/// Runs every call inside a span named after the operation.
///
/// Spans carry the entity identity (`name`, `version`) or the `idempotency.key`.
/// Failed calls set `otel.status_code = "ERROR"` and `error` on the span.
pub struct Traced<S> {
    inner: S,
}

impl<S> Traced<S> {
    pub fn new(inner: S) -> Self {
        Traced { inner }
    }
}

fn record_outcome<T>(span: &Span, result: &Result<T, StoreError>) {
    if let Err(err) = result {
        span.record("otel.status_code", "ERROR");
        span.record("error", display(err));
    }
}

macro_rules! identity_span {
    ($op:literal, $name:expr, $version:expr) => {
        info_span!(
            $op,
            name = %$name,
            version = %$version,
            otel.status_code = Empty,
            error = Empty
        )
    };
    ($op:literal, $name:expr, $version:expr, $key:expr) => {
        info_span!(
            $op,
            name = %$name,
            version = %$version,
            idempotency.key = $key,
            otel.status_code = Empty,
            error = Empty
        )
    };
}

#[async_trait]
impl<S: ConfigService> ConfigService for Traced<S> {
    async fn add_configuration(
        &self,
        config: Configuration,
        idempotency_key: Option<&str>,
    ) -> Result<Configuration, StoreError> {
        let span = identity_span!(
            "AddConfiguration",
            config.name,
            config.version,
            idempotency_key
        );
        let result = self
            .inner
            .add_configuration(config, idempotency_key)
            .instrument(span.clone())
            .await;
        record_outcome(&span, &result);
        result
    }

    async fn get_configuration(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Configuration, StoreError> {
        let span = identity_span!("GetConfiguration", name, version);
        let result = self
            .inner
            .get_configuration(name, version)
            .instrument(span.clone())
            .await;
        record_outcome(&span, &result);
        result
    }

    async fn update_configuration(
        &self,
        config: Configuration,
        idempotency_key: Option<&str>,
    ) -> Result<Configuration, StoreError> {
        let span = identity_span!(
            "UpdateConfiguration",
            config.name,
            config.version,
            idempotency_key
        );
        let result = self
            .inner
            .update_configuration(config, idempotency_key)
            .instrument(span.clone())
            .await;
        record_outcome(&span, &result);
        result
    }

    async fn delete_configuration(&self, name: &str, version: &str) -> Result<(), StoreError> {
        let span = identity_span!("DeleteConfiguration", name, version);
        let result = self
            .inner
            .delete_configuration(name, version)
            .instrument(span.clone())
            .await;
        record_outcome(&span, &result);
        result
    }

    async fn add_group(
        &self,
        group: ConfigurationGroup,
        idempotency_key: Option<&str>,
    ) -> Result<ConfigurationGroup, StoreError> {
        let span = identity_span!(
            "AddConfigurationGroup",
            group.name,
            group.version,
            idempotency_key
        );
        let result = self
            .inner
            .add_group(group, idempotency_key)
            .instrument(span.clone())
            .await;
        record_outcome(&span, &result);
        result
    }

    async fn get_group(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ConfigurationGroup, StoreError> {
        let span = identity_span!("GetConfigurationGroup", name, version);
        let result = self
            .inner
            .get_group(name, version)
            .instrument(span.clone())
            .await;
        record_outcome(&span, &result);
        result
    }

    async fn update_group(
        &self,
        group: ConfigurationGroup,
        idempotency_key: Option<&str>,
    ) -> Result<ConfigurationGroup, StoreError> {
        let span = identity_span!(
            "UpdateConfigurationGroup",
            group.name,
            group.version,
            idempotency_key
        );
        let result = self
            .inner
            .update_group(group, idempotency_key)
            .instrument(span.clone())
            .await;
        record_outcome(&span, &result);
        result
    }

    async fn delete_group(&self, name: &str, version: &str) -> Result<(), StoreError> {
        let span = identity_span!("DeleteConfigurationGroup", name, version);
        let result = self
            .inner
            .delete_group(name, version)
            .instrument(span.clone())
            .await;
        record_outcome(&span, &result);
        result
    }

    async fn filter_configs_by_labels(
        &self,
        name: &str,
        version: &str,
        labels: &LabelSet,
    ) -> Result<Vec<Configuration>, StoreError> {
        let span = info_span!(
            "FilterConfigsByLabels",
            name,
            version,
            labels = %labels,
            otel.status_code = Empty,
            error = Empty
        );
        let result = self
            .inner
            .filter_configs_by_labels(name, version, labels)
            .instrument(span.clone())
            .await;
        record_outcome(&span, &result);
        result
    }

    async fn delete_configs_by_labels(
        &self,
        name: &str,
        version: &str,
        labels: &LabelSet,
    ) -> Result<usize, StoreError> {
        let span = info_span!(
            "DeleteConfigsByLabels",
            name,
            version,
            labels = %labels,
            deleted = Empty,
            otel.status_code = Empty,
            error = Empty
        );
        let result = self
            .inner
            .delete_configs_by_labels(name, version, labels)
            .instrument(span.clone())
            .await;
        if let Ok(deleted) = &result {
            span.record("deleted", deleted);
        }
        record_outcome(&span, &result);
        result
    }

    async fn has_request_been_processed(&self, key: &str) -> Result<bool, StoreError> {
        let span = info_span!(
            "HasRequestBeenProcessed",
            idempotency.key = key,
            otel.status_code = Empty,
            error = Empty
        );
        let result = self
            .inner
            .has_request_been_processed(key)
            .instrument(span.clone())
            .await;
        record_outcome(&span, &result);
        result
    }

    async fn record_request_processed(&self, key: &str) {
        let span = info_span!("RecordRequestProcessed", idempotency.key = key);
        self.inner
            .record_request_processed(key)
            .instrument(span)
            .await
    }
}
