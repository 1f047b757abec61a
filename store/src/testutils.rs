use crate::kv::{KvEntry, KvError, KvStore, MemoryKv};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Default)]
struct FakeConsulState {
    entries: Mutex<HashMap<String, (Bytes, u64)>>,
    last_index: AtomicU64,
    pending_failures: AtomicUsize,
    token: Mutex<Option<String>>,
}

/// In-process stand-in for the Consul KV endpoints used by `ConsulKv`.
pub struct FakeConsul {
    addr: SocketAddr,
    state: Arc<FakeConsulState>,
    handle: JoinHandle<()>,
}

impl FakeConsul {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(FakeConsulState::default());

        let server_state = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let state = server_state.clone();
                tokio::spawn(async move {
                    let svc = service_fn(move |req| handle(state.clone(), req));
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await;
                });
            }
        });

        FakeConsul {
            addr,
            state,
            handle,
        }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// The next `count` requests are answered with 503.
    pub fn fail_next(&self, count: usize) {
        self.state.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Stored keys as they appeared in the request path, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn require_token(&self, token: &str) {
        *self.state.token.lock() = Some(token.to_string());
    }
}

impl Drop for FakeConsul {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle(
    state: Arc<FakeConsulState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let reply = |status: StatusCode, body: String| {
        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        Ok(response)
    };

    let failing = state
        .pending_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return reply(StatusCode::SERVICE_UNAVAILABLE, "unavailable".into());
    }

    let expected_token = state.token.lock().clone();
    if let Some(expected) = expected_token {
        let sent = req
            .headers()
            .get("X-Consul-Token")
            .and_then(|v| v.to_str().ok());
        if sent != Some(expected.as_str()) {
            return reply(StatusCode::FORBIDDEN, "ACL not found".into());
        }
    }

    let Some(key) = req.uri().path().strip_prefix("/v1/kv/").map(String::from) else {
        return reply(StatusCode::NOT_FOUND, String::new());
    };
    let cas: Option<u64> = req.uri().query().and_then(|query| {
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("cas="))
            .and_then(|index| index.parse().ok())
    });

    match *req.method() {
        Method::GET => {
            let entries = state.entries.lock();
            match entries.get(&key) {
                Some((value, index)) => {
                    let body = serde_json::json!([{
                        "Key": key,
                        "Value": STANDARD.encode(value),
                        "ModifyIndex": index,
                        "CreateIndex": index,
                        "Flags": 0,
                    }]);
                    reply(StatusCode::OK, body.to_string())
                }
                None => reply(StatusCode::NOT_FOUND, String::new()),
            }
        }
        Method::PUT => {
            let value = req.into_body().collect().await.unwrap().to_bytes();
            let mut entries = state.entries.lock();
            if let Some(expected) = cas {
                let current = entries.get(&key).map(|(_, index)| *index).unwrap_or(0);
                if current != expected {
                    return reply(StatusCode::OK, "false".into());
                }
            }
            let index = state.last_index.fetch_add(1, Ordering::SeqCst) + 1;
            entries.insert(key, (value, index));
            reply(StatusCode::OK, "true".into())
        }
        Method::DELETE => {
            state.entries.lock().remove(&key);
            reply(StatusCode::OK, "true".into())
        }
        _ => reply(StatusCode::METHOD_NOT_ALLOWED, String::new()),
    }
}

/// Wraps a `MemoryKv` and injects failures on demand.
#[derive(Default)]
pub struct FlakyKv {
    inner: MemoryKv,
    failing_prefix: Mutex<Option<String>>,
    lost_cas_writes: AtomicUsize,
}

impl FlakyKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryKv {
        &self.inner
    }

    /// Every operation on a key with this prefix fails with a transport error.
    pub fn fail_prefix(&self, prefix: &str) {
        *self.failing_prefix.lock() = Some(prefix.to_string());
    }

    /// The next `count` compare-and-set writes report a concurrent modification.
    pub fn lose_cas_writes(&self, count: usize) {
        self.lost_cas_writes.store(count, Ordering::SeqCst);
    }

    fn check(&self, key: &str) -> Result<(), KvError> {
        match &*self.failing_prefix.lock() {
            Some(prefix) if key.starts_with(prefix.as_str()) => {
                Err(KvError::Status(500, "injected failure".into()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl KvStore for FlakyKv {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, KvError> {
        self.check(key)?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), KvError> {
        self.check(key)?;
        self.inner.put(key, value).await
    }

    async fn put_cas(&self, key: &str, value: Bytes, modify_index: u64) -> Result<bool, KvError> {
        self.check(key)?;
        let lost = self
            .lost_cas_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Ok(false);
        }
        self.inner.put_cas(key, value, modify_index).await
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.check(key)?;
        self.inner.delete(key).await
    }
}
