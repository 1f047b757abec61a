use crate::errors::ApiError;
use crate::utils::{Query, deserialize_body, json, no_content};
use crate::ApiBody;
use config_store::{ConfigService, Configuration, ConfigurationGroup, LabelSet};
use hyper::body::{Body, Bytes};
use hyper::{Response, StatusCode};
use std::fmt::Display;

pub type HandlerResult = Result<Response<ApiBody>, ApiError>;

pub async fn add_configuration<B>(
    service: &dyn ConfigService,
    body: B,
    request_id: Option<&str>,
) -> HandlerResult
where
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    let config: Configuration = deserialize_body(body).await?;
    let created = service.add_configuration(config, request_id).await?;
    json(StatusCode::CREATED, &created)
}

pub async fn get_configuration(service: &dyn ConfigService, query: &Query) -> HandlerResult {
    let (name, version) = query.identity()?;
    let config = service.get_configuration(name, version).await?;
    json(StatusCode::OK, &config)
}

pub async fn update_configuration<B>(
    service: &dyn ConfigService,
    body: B,
    request_id: Option<&str>,
) -> HandlerResult
where
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    let config: Configuration = deserialize_body(body).await?;
    let updated = service.update_configuration(config, request_id).await?;
    json(StatusCode::OK, &updated)
}

pub async fn delete_configuration(service: &dyn ConfigService, query: &Query) -> HandlerResult {
    let (name, version) = query.identity()?;
    service.delete_configuration(name, version).await?;
    Ok(no_content())
}

pub async fn add_group<B>(
    service: &dyn ConfigService,
    body: B,
    request_id: Option<&str>,
) -> HandlerResult
where
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    let group: ConfigurationGroup = deserialize_body(body).await?;
    let created = service.add_group(group, request_id).await?;
    json(StatusCode::CREATED, &created)
}

pub async fn get_group(service: &dyn ConfigService, query: &Query) -> HandlerResult {
    let (name, version) = query.identity()?;
    let group = service.get_group(name, version).await?;
    json(StatusCode::OK, &group)
}

pub async fn update_group<B>(
    service: &dyn ConfigService,
    body: B,
    request_id: Option<&str>,
) -> HandlerResult
where
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    let group: ConfigurationGroup = deserialize_body(body).await?;
    let updated = service.update_group(group, request_id).await?;
    json(StatusCode::OK, &updated)
}

pub async fn delete_group(service: &dyn ConfigService, query: &Query) -> HandlerResult {
    let (name, version) = query.identity()?;
    service.delete_group(name, version).await?;
    Ok(no_content())
}

/// A missing `labels` parameter selects every member.
pub async fn filter_group_configurations(
    service: &dyn ConfigService,
    query: &Query,
) -> HandlerResult {
    let (name, version) = query.identity()?;
    let labels = LabelSet::parse(query.get("labels").unwrap_or_default())?;
    let configs = service
        .filter_configs_by_labels(name, version, &labels)
        .await?;
    json(StatusCode::OK, &configs)
}

/// Refuses an empty selector, which would empty the whole group.
pub async fn delete_group_configurations(
    service: &dyn ConfigService,
    query: &Query,
) -> HandlerResult {
    let (name, version) = query.identity()?;
    let labels = LabelSet::parse(query.get("labels").unwrap_or_default())?;
    if labels.is_empty() {
        return Err(ApiError::MissingLabels);
    }

    let deleted = service
        .delete_configs_by_labels(name, version, &labels)
        .await?;
    json(StatusCode::OK, &serde_json::json!({ "deleted": deleted }))
}
