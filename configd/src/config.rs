use config_api::config::{Config as ApiConfig, ValidationError};
use config_store::config::{KvConfig, KvConfigError};
use serde::Deserialize;
use std::fs::File;
use std::path::Path;

pub const KV_ADDR_ENV: &str = "KV_ADDR";
pub const SERVICE_NAME_ENV: &str = "OTEL_SERVICE_NAME";
pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

fn default_statsd_prefix() -> String {
    "configd".to_string()
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum MetricsConfig {
    /// Served as text on `/metrics`.
    #[default]
    Prometheus,
    Statsd {
        host: String,
        port: u16,
        #[serde(default = "default_statsd_prefix")]
        prefix: String,
    },
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub sentry_dsn: Option<String>,
    /// Used when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            sentry_dsn: None,
            level: default_level(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub api: ApiConfig,
    #[serde(default)]
    pub kv: KvConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(skip)]
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Applies the environment overrides. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(address) = lookup(KV_ADDR_ENV) {
            self.kv.override_address(address);
        }
        if let Some(service_name) = lookup(SERVICE_NAME_ENV) {
            self.api.service_name = service_name;
        }
        if let Some(endpoint) = lookup(OTLP_ENDPOINT_ENV) {
            self.otlp_endpoint = Some(endpoint);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api.validate()?;
        self.kv.validate()?;
        if let MetricsConfig::Statsd { port: 0, .. } = self.metrics {
            return Err(ConfigError::InvalidStatsdPort);
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid api config: {0}")]
    Api(#[from] ValidationError),
    #[error("invalid kv config: {0}")]
    Kv(#[from] KvConfigError),
    #[error("statsd port cannot be 0")]
    InvalidStatsdPort,
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_store::config::KvStoreType;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            listener:
                host: 127.0.0.1
                port: 9000
            admin_listener:
                host: 127.0.0.1
                port: 9001
            service_name: configs
            idempotency:
                require_request_id: true
            rate_limit:
                requests: 10
                window_secs: 1
            kv:
                type: consul
                address: consul.internal:8500
                token: secret
            metrics:
                type: statsd
                host: 127.0.0.1
                port: 8125
            logging:
                level: debug
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(config.api.listener.port, 9000);
        assert_eq!(config.api.admin_listener.as_ref().map(|l| l.port), Some(9001));
        assert_eq!(config.api.service_name, "configs");
        assert!(config.api.idempotency.require_request_id);
        assert_eq!(config.api.rate_limit.requests, 10);
        assert_eq!(
            config.kv.r#type,
            KvStoreType::Consul {
                address: Some("consul.internal:8500".into()),
                token: Some("secret".into()),
                timeout_secs: 5,
            }
        );
        assert_eq!(
            config.metrics,
            MetricsConfig::Statsd {
                host: "127.0.0.1".into(),
                port: 8125,
                prefix: "configd".into(),
            }
        );
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.sentry_dsn.is_none());
        config.validate().expect("valid config");
    }

    #[test]
    fn defaults() {
        let tmp = write_tmp_file("kv:\n  type: memory\n");
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(config.api, ApiConfig::default());
        assert_eq!(config.kv.r#type, KvStoreType::Memory);
        assert_eq!(config.metrics, MetricsConfig::Prometheus);
        assert_eq!(config.logging, LoggingConfig::default());
        config.validate().expect("valid config");
    }

    #[test]
    fn consul_address_from_env() {
        let tmp = write_tmp_file("listener:\n  host: 0.0.0.0\n  port: 8080\n");
        let mut config = Config::from_file(tmp.path()).expect("load config");

        // The default backend is consul, which needs an address
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Kv(KvConfigError::MissingAddress))
        ));

        config.apply_env(env(&[
            (KV_ADDR_ENV, "10.0.0.5:8500"),
            (SERVICE_NAME_ENV, "configs-eu"),
            (OTLP_ENDPOINT_ENV, "http://collector:4317"),
        ]));
        config.validate().expect("valid config");

        match &config.kv.r#type {
            KvStoreType::Consul { address, .. } => {
                assert_eq!(address.as_deref(), Some("10.0.0.5:8500"))
            }
            other => panic!("unexpected kv type {other:?}"),
        }
        assert_eq!(config.api.service_name, "configs-eu");
        assert_eq!(config.otlp_endpoint.as_deref(), Some("http://collector:4317"));
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut config = Config {
            api: ApiConfig::default(),
            kv: KvConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
            otlp_endpoint: None,
        };
        config.apply_env(env(&[(KV_ADDR_ENV, " "), (SERVICE_NAME_ENV, "")]));

        assert!(config.validate().is_err());
        assert_eq!(config.api.service_name, ApiConfig::default().service_name);
    }

    #[test]
    fn invalid_values() {
        let tmp = write_tmp_file("listener:\n  host: 0.0.0.0\n  port: 0\nkv:\n  type: memory\n");
        let config = Config::from_file(tmp.path()).expect("load config");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Api(ValidationError::InvalidPort))
        ));

        let tmp = write_tmp_file(
            "kv:\n  type: memory\nmetrics:\n  type: statsd\n  host: localhost\n  port: 0\n",
        );
        let config = Config::from_file(tmp.path()).expect("load config");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidStatsdPort)
        ));

        let tmp = write_tmp_file("kv:\n  type: etcd\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));

        assert!(matches!(
            Config::from_file(Path::new("/nonexistent/configd.yaml")),
            Err(ConfigError::LoadError(_))
        ));
    }
}
