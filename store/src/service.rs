use crate::errors::{EntityKind, StoreError};
use crate::labels::LabelSet;
use crate::metrics_defs::LABEL_DELETE_CAS_RETRIES;
use crate::model::{Configuration, ConfigurationGroup};
use crate::repository::Repository;
use async_trait::async_trait;
use shared::counter;
use uuid::Uuid;

/// Compare-and-set attempts made by a bulk label delete before giving up.
pub const MAX_LABEL_DELETE_ATTEMPTS: usize = 5;

/// Names used for the spans and metric labels of each service operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    AddConfiguration,
    GetConfiguration,
    UpdateConfiguration,
    DeleteConfiguration,
    AddConfigurationGroup,
    GetConfigurationGroup,
    UpdateConfigurationGroup,
    DeleteConfigurationGroup,
    FilterConfigsByLabels,
    DeleteConfigsByLabels,
    HasRequestBeenProcessed,
    RecordRequestProcessed,
}

impl Operation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::AddConfiguration => "AddConfiguration",
            Operation::GetConfiguration => "GetConfiguration",
            Operation::UpdateConfiguration => "UpdateConfiguration",
            Operation::DeleteConfiguration => "DeleteConfiguration",
            Operation::AddConfigurationGroup => "AddConfigurationGroup",
            Operation::GetConfigurationGroup => "GetConfigurationGroup",
            Operation::UpdateConfigurationGroup => "UpdateConfigurationGroup",
            Operation::DeleteConfigurationGroup => "DeleteConfigurationGroup",
            Operation::FilterConfigsByLabels => "FilterConfigsByLabels",
            Operation::DeleteConfigsByLabels => "DeleteConfigsByLabels",
            Operation::HasRequestBeenProcessed => "HasRequestBeenProcessed",
            Operation::RecordRequestProcessed => "RecordRequestProcessed",
        }
    }
}

/// Everything the HTTP edge can ask of the store.
///
/// Write operations take an optional idempotency key which is recorded once the
/// write has been committed. An empty key counts as absent.
#[async_trait]
pub trait ConfigService: Send + Sync {
    /// Creates a configuration, minting an id when none is given. Fails with a
    /// conflict when the identity is taken.
    async fn add_configuration(
        &self,
        config: Configuration,
        idempotency_key: Option<&str>,
    ) -> Result<Configuration, StoreError>;

    async fn get_configuration(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Configuration, StoreError>;

    /// Replaces an existing configuration, keeping the id it was created with.
    async fn update_configuration(
        &self,
        config: Configuration,
        idempotency_key: Option<&str>,
    ) -> Result<Configuration, StoreError>;

    /// Deleting an absent configuration succeeds.
    async fn delete_configuration(&self, name: &str, version: &str) -> Result<(), StoreError>;

    async fn add_group(
        &self,
        group: ConfigurationGroup,
        idempotency_key: Option<&str>,
    ) -> Result<ConfigurationGroup, StoreError>;

    async fn get_group(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ConfigurationGroup, StoreError>;

    async fn update_group(
        &self,
        group: ConfigurationGroup,
        idempotency_key: Option<&str>,
    ) -> Result<ConfigurationGroup, StoreError>;

    async fn delete_group(&self, name: &str, version: &str) -> Result<(), StoreError>;

    /// Members of the group matching every wanted label, in group order.
    async fn filter_configs_by_labels(
        &self,
        name: &str,
        version: &str,
        labels: &LabelSet,
    ) -> Result<Vec<Configuration>, StoreError>;

    /// Removes the members matching every wanted label and returns how many were
    /// removed. The group is not rewritten when nothing matches.
    async fn delete_configs_by_labels(
        &self,
        name: &str,
        version: &str,
        labels: &LabelSet,
    ) -> Result<usize, StoreError>;

    async fn has_request_been_processed(&self, key: &str) -> Result<bool, StoreError>;

    /// Never fails; marker write errors are logged.
    async fn record_request_processed(&self, key: &str);
}

/// The service backed directly by a [`Repository`].
pub struct CoreService {
    repo: Repository,
}

impl CoreService {
    pub fn new(repo: Repository) -> Self {
        CoreService { repo }
    }

    async fn record(&self, idempotency_key: Option<&str>) {
        if let Some(key) = idempotency_key {
            self.record_request_processed(key).await;
        }
    }
}

fn validate_identity(kind: EntityKind, name: &str, version: &str) -> Result<(), StoreError> {
    for (field, value) in [("name", name), ("version", version)] {
        if value.is_empty() {
            return Err(StoreError::BadInput(format!("{kind} {field} is required")));
        }
        // A slash or a dot segment would alias into another entity's key
        if value.contains('/') {
            return Err(StoreError::BadInput(format!(
                "{kind} {field} must not contain `/`"
            )));
        }
        if value == "." || value == ".." {
            return Err(StoreError::BadInput(format!(
                "{kind} {field} must not be `{value}`"
            )));
        }
    }
    Ok(())
}

/// Parameters and labels need a non-empty key and value.
fn validate_pairs(config: &Configuration) -> Result<(), StoreError> {
    let pairs = [("parameter", &config.params), ("label", &config.labels)];
    for (what, list) in pairs {
        for pair in list.iter() {
            if pair.key.is_empty() {
                return Err(StoreError::BadInput(format!(
                    "{what} key is required in {}/{}",
                    config.name, config.version
                )));
            }
            if pair.value.is_empty() {
                return Err(StoreError::BadInput(format!(
                    "{what} `{}` has an empty value in {}/{}",
                    pair.key, config.name, config.version
                )));
            }
        }
    }
    Ok(())
}

fn validate_group(group: &ConfigurationGroup) -> Result<(), StoreError> {
    validate_identity(EntityKind::Group, &group.name, &group.version)?;
    group.configurations.iter().try_for_each(validate_pairs)
}

/// Request keys may contain `/` but no empty or dot segments.
fn validate_request_key(key: &str) -> Result<(), StoreError> {
    if key.split('/').any(|segment| matches!(segment, "" | "." | "..")) {
        return Err(StoreError::BadInput(format!("invalid request id `{key}`")));
    }
    Ok(())
}

/// Checks a write's idempotency key before anything is committed. Empty means absent.
fn validate_write_key(idempotency_key: Option<&str>) -> Result<(), StoreError> {
    match idempotency_key {
        Some(key) if !key.is_empty() => validate_request_key(key),
        _ => Ok(()),
    }
}

fn mint_id(id: Uuid) -> Uuid {
    if id.is_nil() { Uuid::new_v4() } else { id }
}

#[async_trait]
impl ConfigService for CoreService {
    async fn add_configuration(
        &self,
        mut config: Configuration,
        idempotency_key: Option<&str>,
    ) -> Result<Configuration, StoreError> {
        let kind = EntityKind::Configuration;
        validate_identity(kind, &config.name, &config.version)?;
        validate_pairs(&config)?;
        validate_write_key(idempotency_key)?;
        config.id = mint_id(config.id);

        if !self.repo.create_config(&config).await? {
            return Err(StoreError::conflict(kind, &config.name, &config.version));
        }
        self.record(idempotency_key).await;
        Ok(config)
    }

    async fn get_configuration(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Configuration, StoreError> {
        validate_identity(EntityKind::Configuration, name, version)?;
        self.repo.get_config(name, version).await
    }

    async fn update_configuration(
        &self,
        mut config: Configuration,
        idempotency_key: Option<&str>,
    ) -> Result<Configuration, StoreError> {
        validate_identity(EntityKind::Configuration, &config.name, &config.version)?;
        validate_pairs(&config)?;
        validate_write_key(idempotency_key)?;
        let existing = self.repo.get_config(&config.name, &config.version).await?;
        config.id = existing.id;

        self.repo.put_config(&config).await?;
        self.record(idempotency_key).await;
        Ok(config)
    }

    async fn delete_configuration(&self, name: &str, version: &str) -> Result<(), StoreError> {
        validate_identity(EntityKind::Configuration, name, version)?;
        self.repo.delete_config(name, version).await
    }

    async fn add_group(
        &self,
        mut group: ConfigurationGroup,
        idempotency_key: Option<&str>,
    ) -> Result<ConfigurationGroup, StoreError> {
        let kind = EntityKind::Group;
        validate_group(&group)?;
        validate_write_key(idempotency_key)?;
        group.id = mint_id(group.id);

        if !self.repo.create_group(&group).await? {
            return Err(StoreError::conflict(kind, &group.name, &group.version));
        }
        self.record(idempotency_key).await;
        Ok(group)
    }

    async fn get_group(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ConfigurationGroup, StoreError> {
        validate_identity(EntityKind::Group, name, version)?;
        self.repo.get_group(name, version).await
    }

    async fn update_group(
        &self,
        mut group: ConfigurationGroup,
        idempotency_key: Option<&str>,
    ) -> Result<ConfigurationGroup, StoreError> {
        validate_group(&group)?;
        validate_write_key(idempotency_key)?;
        let existing = self.repo.get_group(&group.name, &group.version).await?;
        group.id = existing.id;

        self.repo.put_group(&group).await?;
        self.record(idempotency_key).await;
        Ok(group)
    }

    async fn delete_group(&self, name: &str, version: &str) -> Result<(), StoreError> {
        validate_identity(EntityKind::Group, name, version)?;
        self.repo.delete_group(name, version).await
    }

    async fn filter_configs_by_labels(
        &self,
        name: &str,
        version: &str,
        labels: &LabelSet,
    ) -> Result<Vec<Configuration>, StoreError> {
        validate_identity(EntityKind::Group, name, version)?;
        let group = self.repo.get_group(name, version).await?;
        Ok(group
            .configurations
            .into_iter()
            .filter(|config| labels.matches(config))
            .collect())
    }

    async fn delete_configs_by_labels(
        &self,
        name: &str,
        version: &str,
        labels: &LabelSet,
    ) -> Result<usize, StoreError> {
        validate_identity(EntityKind::Group, name, version)?;

        for attempt in 1..=MAX_LABEL_DELETE_ATTEMPTS {
            let (mut group, modify_index) = self.repo.get_group_versioned(name, version).await?;

            let before = group.configurations.len();
            group.configurations.retain(|config| !labels.matches(config));
            let deleted = before - group.configurations.len();
            if deleted == 0 {
                return Ok(0);
            }

            if self.repo.put_group_cas(&group, modify_index).await? {
                return Ok(deleted);
            }

            counter!(LABEL_DELETE_CAS_RETRIES).increment(1);
            tracing::debug!(name, version, attempt, "group changed during label delete, retrying");
        }

        Err(StoreError::Contention {
            kind: EntityKind::Group,
            name: name.to_string(),
            version: version.to_string(),
            attempts: MAX_LABEL_DELETE_ATTEMPTS,
        })
    }

    async fn has_request_been_processed(&self, key: &str) -> Result<bool, StoreError> {
        if key.is_empty() {
            return Ok(false);
        }
        validate_request_key(key)?;
        self.repo.has_idempotency(key).await
    }

    async fn record_request_processed(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        if let Err(err) = validate_request_key(key) {
            tracing::warn!(idempotency_key = key, "not recording request: {err}");
            return;
        }
        // The write it guards is already committed; a redelivery finds the entity
        if let Err(err) = self.repo.mark_idempotency(key).await {
            counter!(crate::metrics_defs::IDEMPOTENCY_MARK_FAILURES).increment(1);
            tracing::warn!(idempotency_key = key, "failed to record idempotency key: {err}");
        }
    }
}
