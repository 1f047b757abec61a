use crate::idempotency::IdempotencyPolicy;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_SERVICE_NAME: &str = "configuration-service";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Rate limit must allow at least one request")]
    ZeroRateLimit,

    #[error("Rate limit window cannot be 0")]
    ZeroRateLimitWindow,

    #[error("Service name cannot be empty")]
    EmptyServiceName,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct IdempotencyConfig {
    /// Reject POST and PUT requests without an `X-Request-Id` header.
    #[serde(default)]
    pub require_request_id: bool,
}

impl IdempotencyConfig {
    pub fn policy(&self) -> IdempotencyPolicy {
        if self.require_request_id {
            IdempotencyPolicy::Required
        } else {
            IdempotencyPolicy::Optional
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_requests() -> u32 {
    100
}

fn default_window_secs() -> u64 {
    60
}

/// Fixed window limit per client IP.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_requests")]
    pub requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            enabled: true,
            requests: default_requests(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for the API. Also answers the admin routes.
    #[serde(default)]
    pub listener: Listener,
    /// Optional separate listener for `/health`, `/ready` and `/metrics`.
    #[serde(default)]
    pub admin_listener: Option<Listener>,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            admin_listener: None,
            idempotency: IdempotencyConfig::default(),
            rate_limit: RateLimitConfig::default(),
            service_name: default_service_name(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        if let Some(admin_listener) = &self.admin_listener {
            admin_listener.validate()?;
        }

        if self.rate_limit.enabled {
            if self.rate_limit.requests == 0 {
                return Err(ValidationError::ZeroRateLimit);
            }
            if self.rate_limit.window_secs == 0 {
                return Err(ValidationError::ZeroRateLimitWindow);
            }
        }

        if self.service_name.trim().is_empty() {
            return Err(ValidationError::EmptyServiceName);
        }

        Ok(())
    }
}
