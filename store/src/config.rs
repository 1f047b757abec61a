use crate::consul::ConsulKv;
use crate::kv::{KvError, KvStore, MemoryKv};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

fn default_timeout_secs() -> u64 {
    5
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum KvStoreType {
    Consul {
        /// `host:port` or URL. May also come from `KV_ADDR`.
        #[serde(default)]
        address: Option<String>,
        #[serde(default)]
        token: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Memory,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct KvConfig {
    #[serde(flatten)]
    pub r#type: KvStoreType,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum KvConfigError {
    #[error("consul address is not set (use kv.address or KV_ADDR)")]
    MissingAddress,
    #[error("kv timeout cannot be 0")]
    ZeroTimeout,
}

impl KvConfig {
    pub fn validate(&self) -> Result<(), KvConfigError> {
        match &self.r#type {
            KvStoreType::Consul {
                address,
                timeout_secs,
                ..
            } => {
                if address.as_deref().is_none_or(str::is_empty) {
                    return Err(KvConfigError::MissingAddress);
                }
                if *timeout_secs == 0 {
                    return Err(KvConfigError::ZeroTimeout);
                }
                Ok(())
            }
            KvStoreType::Memory => Ok(()),
        }
    }

    /// Replaces the consul address, e.g. from the environment.
    pub fn override_address(&mut self, new_address: String) {
        if let KvStoreType::Consul { address, .. } = &mut self.r#type {
            *address = Some(new_address);
        }
    }

    pub fn build(&self) -> Result<Arc<dyn KvStore>, KvError> {
        match &self.r#type {
            KvStoreType::Consul {
                address,
                token,
                timeout_secs,
            } => {
                let address = address
                    .as_deref()
                    .ok_or_else(|| KvError::InvalidAddress("no address configured".into()))?;
                let kv = ConsulKv::new(address, token.clone(), Duration::from_secs(*timeout_secs))?;
                tracing::info!(address, "using consul kv store");
                Ok(Arc::new(kv))
            }
            KvStoreType::Memory => {
                tracing::warn!("using the in-memory kv store, data is lost on restart");
                Ok(Arc::new(MemoryKv::new()))
            }
        }
    }
}

impl Default for KvConfig {
    fn default() -> Self {
        KvConfig {
            r#type: KvStoreType::Consul {
                address: None,
                token: None,
                timeout_secs: default_timeout_secs(),
            },
        }
    }
}
