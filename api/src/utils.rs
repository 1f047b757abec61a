use crate::errors::ApiError;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Body, Bytes};
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::http::{full_body, make_json_response};
use std::collections::HashMap;
use std::fmt::Display;

/// Deserializes a JSON request body into the specified type.
pub async fn deserialize_body<T, B>(body: B) -> Result<T, ApiError>
where
    T: DeserializeOwned,
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    let bytes = body
        .collect()
        .await
        .map_err(|e| ApiError::InvalidBody(e.to_string()))?
        .to_bytes();
    serde_json::from_slice(&bytes).map_err(|e| ApiError::InvalidBody(e.to_string()))
}

pub fn json<T: Serialize, E: 'static>(
    status: StatusCode,
    value: &T,
) -> Result<Response<BoxBody<Bytes, E>>, ApiError> {
    let body = serde_json::to_vec(value).map_err(|e| ApiError::InvalidBody(e.to_string()))?;
    Ok(make_json_response(status, body))
}

pub fn no_content<E: 'static>() -> Response<BoxBody<Bytes, E>> {
    let mut response = Response::new(full_body(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}

/// Decoded query string. A repeated parameter keeps its first value.
pub struct Query(HashMap<String, String>);

impl Query {
    pub fn parse(query: Option<&str>) -> Self {
        let mut params = HashMap::new();
        if let Some(query) = query {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                params
                    .entry(key.into_owned())
                    .or_insert_with(|| value.into_owned());
            }
        }
        Query(params)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn required(&self, name: &'static str) -> Result<&str, ApiError> {
        match self.get(name) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(ApiError::MissingParameter(name)),
        }
    }

    /// The `name` and `version` parameters identifying an entity.
    pub fn identity(&self) -> Result<(&str, &str), ApiError> {
        Ok((self.required("name")?, self.required("version")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;

    #[test]
    fn test_query() {
        let query = Query::parse(Some("name=svc&version=v1&labels=env%3Adev%3Bregion%3Aeu&name=other"));
        assert_eq!(query.identity().unwrap(), ("svc", "v1"));
        assert_eq!(query.get("labels"), Some("env:dev;region:eu"));

        let query = Query::parse(Some("name=svc&version="));
        assert!(matches!(
            query.identity(),
            Err(ApiError::MissingParameter("version"))
        ));

        let query = Query::parse(None);
        assert!(matches!(
            query.required("name"),
            Err(ApiError::MissingParameter("name"))
        ));
    }

    #[tokio::test]
    async fn test_deserialize_body() {
        #[derive(Debug, serde::Deserialize)]
        struct Named {
            name: String,
        }

        let body = Full::new(Bytes::from_static(br#"{"name":"svc"}"#));
        let named: Named = deserialize_body(body).await.unwrap();
        assert_eq!(named.name, "svc");

        let body = Full::new(Bytes::from_static(b"{"));
        let err = deserialize_body::<Named, _>(body).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidBody(_)));
    }
}
