use crate::errors::StoreError;
use crate::labels::LabelSet;
use crate::metrics_defs::{REQUEST_LATENCY, REQUESTS_TOTAL};
use crate::model::{Configuration, ConfigurationGroup};
use crate::service::{ConfigService, Operation};
use async_trait::async_trait;
use shared::{counter, histogram};
use std::time::Instant;

/// Counts every call and records its latency, labeled by operation.
pub struct Metered<S> {
    inner: S,
}

impl<S> Metered<S> {
    pub fn new(inner: S) -> Self {
        Metered { inner }
    }
}

// Latency is recorded on drop so cancelled calls are measured too
struct Timer {
    operation: Operation,
    start: Instant,
}

impl Timer {
    fn start(operation: Operation) -> Self {
        counter!(REQUESTS_TOTAL, "method" => operation.as_str()).increment(1);
        Timer {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        histogram!(REQUEST_LATENCY, "method" => self.operation.as_str())
            .record(self.start.elapsed().as_secs_f64());
    }
}

#[async_trait]
impl<S: ConfigService> ConfigService for Metered<S> {
    async fn add_configuration(
        &self,
        config: Configuration,
        idempotency_key: Option<&str>,
    ) -> Result<Configuration, StoreError> {
        let _timer = Timer::start(Operation::AddConfiguration);
        self.inner.add_configuration(config, idempotency_key).await
    }

    async fn get_configuration(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Configuration, StoreError> {
        let _timer = Timer::start(Operation::GetConfiguration);
        self.inner.get_configuration(name, version).await
    }

    async fn update_configuration(
        &self,
        config: Configuration,
        idempotency_key: Option<&str>,
    ) -> Result<Configuration, StoreError> {
        let _timer = Timer::start(Operation::UpdateConfiguration);
        self.inner.update_configuration(config, idempotency_key).await
    }

    async fn delete_configuration(&self, name: &str, version: &str) -> Result<(), StoreError> {
        let _timer = Timer::start(Operation::DeleteConfiguration);
        self.inner.delete_configuration(name, version).await
    }

    async fn add_group(
        &self,
        group: ConfigurationGroup,
        idempotency_key: Option<&str>,
    ) -> Result<ConfigurationGroup, StoreError> {
        let _timer = Timer::start(Operation::AddConfigurationGroup);
        self.inner.add_group(group, idempotency_key).await
    }

    async fn get_group(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ConfigurationGroup, StoreError> {
        let _timer = Timer::start(Operation::GetConfigurationGroup);
        self.inner.get_group(name, version).await
    }

    async fn update_group(
        &self,
        group: ConfigurationGroup,
        idempotency_key: Option<&str>,
    ) -> Result<ConfigurationGroup, StoreError> {
        let _timer = Timer::start(Operation::UpdateConfigurationGroup);
        self.inner.update_group(group, idempotency_key).await
    }

    async fn delete_group(&self, name: &str, version: &str) -> Result<(), StoreError> {
        let _timer = Timer::start(Operation::DeleteConfigurationGroup);
        self.inner.delete_group(name, version).await
    }

    async fn filter_configs_by_labels(
        &self,
        name: &str,
        version: &str,
        labels: &LabelSet,
    ) -> Result<Vec<Configuration>, StoreError> {
        let _timer = Timer::start(Operation::FilterConfigsByLabels);
        self.inner
            .filter_configs_by_labels(name, version, labels)
            .await
    }

    async fn delete_configs_by_labels(
        &self,
        name: &str,
        version: &str,
        labels: &LabelSet,
    ) -> Result<usize, StoreError> {
        let _timer = Timer::start(Operation::DeleteConfigsByLabels);
        self.inner
            .delete_configs_by_labels(name, version, labels)
            .await
    }

    // Idempotency bookkeeping is not measured
    async fn has_request_been_processed(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.has_request_been_processed(key).await
    }

    async fn record_request_processed(&self, key: &str) {
        self.inner.record_request_processed(key).await
    }
}
