const BASE_DELAY: u64 = 100;
const MAX_RETRIES: u32 = 3;

use crate::kv::{KvEntry, KvError, KvStore};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;

const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
    StatusCode::TOO_MANY_REQUESTS,     // 429
    StatusCode::INTERNAL_SERVER_ERROR, // 500
    StatusCode::BAD_GATEWAY,           // 502
    StatusCode::SERVICE_UNAVAILABLE,   // 503
    StatusCode::GATEWAY_TIMEOUT,       // 504
];

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulKvPair {
    // Consul returns null for keys stored with an empty body
    value: Option<String>,
    modify_index: u64,
}

/// Client for the Consul KV HTTP API (`/v1/kv/<key>`).
pub struct ConsulKv {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ConsulKv {
    /// `address` may be `host:port` or a full `http(s)://` URL.
    pub fn new(address: &str, token: Option<String>, timeout: Duration) -> Result<Self, KvError> {
        let address = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let base_url =
            Url::parse(&address).map_err(|e| KvError::InvalidAddress(format!("{address}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(KvError::InvalidAddress(address));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(ConsulKv {
            client,
            base_url,
            token,
        })
    }

    fn key_url(&self, key: &str) -> Result<Url, KvError> {
        // URL path normalization drops dot segments and would alias keys
        if key.split('/').any(|segment| matches!(segment, "" | "." | "..")) {
            return Err(KvError::InvalidKey(key.to_string()));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| KvError::InvalidAddress(self.base_url.to_string()))?
            .pop_if_empty()
            .push("v1")
            .push("kv")
            .extend(key.split('/'));
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.header("X-Consul-Token", token),
            None => builder,
        }
    }

    /// Sends a request that is safe to repeat, retrying retriable statuses with
    /// exponential backoff. 404 is returned to the caller as a normal response.
    async fn send_idempotent(
        &self,
        method: Method,
        url: Url,
        body: Option<Bytes>,
    ) -> Result<Response, KvError> {
        let mut retries = 0;

        loop {
            let mut builder = self.request(method.clone(), url.clone());
            if let Some(body) = &body {
                builder = builder.body(body.clone());
            }
            let response = builder.send().await.map_err(map_request_error)?;
            let status = response.status();

            if status.is_success() || status == StatusCode::NOT_FOUND {
                return Ok(response);
            }

            if RETRIABLE_STATUS_CODES.contains(&status) && retries < MAX_RETRIES {
                let retry_millis = BASE_DELAY * 2_u64.pow(retries);
                tracing::debug!(%status, retries, "retrying consul request");
                sleep(Duration::from_millis(retry_millis)).await;
                retries += 1;
                continue;
            }

            return Err(status_error(response).await);
        }
    }
}

#[async_trait]
impl KvStore for ConsulKv {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, KvError> {
        let response = self
            .send_idempotent(Method::GET, self.key_url(key)?, None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let pairs: Vec<ConsulKvPair> = response.json().await.map_err(map_request_error)?;
        let Some(pair) = pairs.into_iter().next() else {
            return Ok(None);
        };

        let value = match pair.value {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(|e| KvError::InvalidResponse(format!("bad base64 value: {e}")))?,
            None => Vec::new(),
        };

        Ok(Some(KvEntry {
            value: Bytes::from(value),
            modify_index: pair.modify_index,
        }))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), KvError> {
        let response = self
            .send_idempotent(Method::PUT, self.key_url(key)?, Some(value))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(status_error(response).await);
        }

        match read_bool(response).await? {
            true => Ok(()),
            false => Err(KvError::InvalidResponse(format!(
                "put of `{key}` was not applied"
            ))),
        }
    }

    async fn put_cas(&self, key: &str, value: Bytes, modify_index: u64) -> Result<bool, KvError> {
        let mut url = self.key_url(key)?;
        url.query_pairs_mut()
            .append_pair("cas", &modify_index.to_string());

        // Not retried: a repeated CAS after a lost response would report a false conflict
        let response = self
            .request(Method::PUT, url)
            .body(value)
            .send()
            .await
            .map_err(map_request_error)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        read_bool(response).await
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let response = self
            .send_idempotent(Method::DELETE, self.key_url(key)?, None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(status_error(response).await);
        }
        Ok(())
    }
}

fn map_request_error(err: reqwest::Error) -> KvError {
    if err.is_timeout() {
        KvError::Timeout
    } else {
        KvError::Request(err)
    }
}

async fn status_error(response: Response) -> KvError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    KvError::Status(status, body)
}

async fn read_bool(response: Response) -> Result<bool, KvError> {
    let body = response.text().await.map_err(map_request_error)?;
    match body.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(KvError::InvalidResponse(format!(
            "expected a boolean, got `{other}`"
        ))),
    }
}
