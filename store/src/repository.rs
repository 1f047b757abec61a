//! Typed access to configurations, groups and idempotency markers.
//!
//! Key layout:
//!
//! | Entity | Key |
//! |---|---|
//! | configuration | `configurations/<name>/<version>` |
//! | group | `configgroups/<name>/<version>` |
//! | idempotency marker | `idempotency/<request-key>` |
//!
//! Entities are stored as JSON. Writes are blind overwrites unless the `create_*`
//! or `*_cas` variants are used; existence policy belongs to the service.

use crate::errors::{EntityKind, StoreError};
use crate::kv::KvStore;
use crate::model::{Configuration, ConfigurationGroup};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub const CONFIG_PREFIX: &str = "configurations";
pub const GROUP_PREFIX: &str = "configgroups";
pub const IDEMPOTENCY_PREFIX: &str = "idempotency";

const IDEMPOTENCY_MARKER: &[u8] = b"processed";

pub fn config_key(name: &str, version: &str) -> String {
    format!("{CONFIG_PREFIX}/{name}/{version}")
}

pub fn group_key(name: &str, version: &str) -> String {
    format!("{GROUP_PREFIX}/{name}/{version}")
}

pub fn idempotency_key(request_key: &str) -> String {
    format!("{IDEMPOTENCY_PREFIX}/{request_key}")
}

#[derive(Clone)]
pub struct Repository {
    kv: Arc<dyn KvStore>,
}

impl Repository {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Repository { kv }
    }

    pub async fn put_config(&self, config: &Configuration) -> Result<(), StoreError> {
        let key = config_key(&config.name, &config.version);
        let value = encode(&key, config)?;
        Ok(self.kv.put(&key, value).await?)
    }

    /// Writes only if no configuration with the same identity exists yet.
    pub async fn create_config(&self, config: &Configuration) -> Result<bool, StoreError> {
        let key = config_key(&config.name, &config.version);
        let value = encode(&key, config)?;
        Ok(self.kv.put_cas(&key, value, 0).await?)
    }

    pub async fn get_config(&self, name: &str, version: &str) -> Result<Configuration, StoreError> {
        let key = config_key(name, version);
        match self.kv.get(&key).await? {
            Some(entry) => decode(&key, &entry.value),
            None => Err(StoreError::not_found(
                EntityKind::Configuration,
                name,
                version,
            )),
        }
    }

    pub async fn delete_config(&self, name: &str, version: &str) -> Result<(), StoreError> {
        Ok(self.kv.delete(&config_key(name, version)).await?)
    }

    pub async fn put_group(&self, group: &ConfigurationGroup) -> Result<(), StoreError> {
        let key = group_key(&group.name, &group.version);
        let value = encode(&key, group)?;
        Ok(self.kv.put(&key, value).await?)
    }

    pub async fn create_group(&self, group: &ConfigurationGroup) -> Result<bool, StoreError> {
        let key = group_key(&group.name, &group.version);
        let value = encode(&key, group)?;
        Ok(self.kv.put_cas(&key, value, 0).await?)
    }

    pub async fn get_group(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ConfigurationGroup, StoreError> {
        self.get_group_versioned(name, version)
            .await
            .map(|(group, _)| group)
    }

    /// Returns the group together with the modify index it was read at.
    pub async fn get_group_versioned(
        &self,
        name: &str,
        version: &str,
    ) -> Result<(ConfigurationGroup, u64), StoreError> {
        let key = group_key(name, version);
        match self.kv.get(&key).await? {
            Some(entry) => Ok((decode(&key, &entry.value)?, entry.modify_index)),
            None => Err(StoreError::not_found(EntityKind::Group, name, version)),
        }
    }

    /// Writes only if the group has not been modified since it was read at
    /// `modify_index`.
    pub async fn put_group_cas(
        &self,
        group: &ConfigurationGroup,
        modify_index: u64,
    ) -> Result<bool, StoreError> {
        let key = group_key(&group.name, &group.version);
        let value = encode(&key, group)?;
        Ok(self.kv.put_cas(&key, value, modify_index).await?)
    }

    pub async fn delete_group(&self, name: &str, version: &str) -> Result<(), StoreError> {
        Ok(self.kv.delete(&group_key(name, version)).await?)
    }

    pub async fn has_idempotency(&self, request_key: &str) -> Result<bool, StoreError> {
        let entry = self.kv.get(&idempotency_key(request_key)).await?;
        Ok(entry.is_some())
    }

    pub async fn mark_idempotency(&self, request_key: &str) -> Result<(), StoreError> {
        let key = idempotency_key(request_key);
        Ok(self
            .kv
            .put(&key, Bytes::from_static(IDEMPOTENCY_MARKER))
            .await?)
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<Bytes, StoreError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Decode {
        key: key.to_string(),
        source,
    })
}
