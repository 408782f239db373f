//! Worker invocation client

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Proxy};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::DispatchConfig;

/// Header asking the worker platform to queue the call and return at once
pub const INVOCATION_TYPE_HEADER: &str = "X-Invocation-Type";
pub const EVENT_INVOCATION: &str = "Event";

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Invalid proxy: {0}")]
    InvalidProxy(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),

    #[error("Invocation request failed: {0}")]
    RequestFailed(String),

    #[error("Invocation timed out")]
    Timeout,

    #[error("Worker platform answered HTTP {0}")]
    Rejected(u16),
}

pub type Result<T> = std::result::Result<T, InvokeError>;

/// Fire-and-forget invocation of a named worker in a region
#[async_trait]
pub trait WorkerInvoker: Send + Sync {
    async fn invoke(&self, region: &str, worker: &str, payload: Bytes) -> Result<()>;
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("HighwayPatrol/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Invokes workers through the platform's HTTP invocation endpoint
pub struct HttpInvoker {
    client: Client,
    endpoint: String,
}

impl HttpInvoker {
    /// `endpoint` is a template with `{region}` and `{worker}` placeholders
    pub fn new(config: HttpConfig, endpoint: impl Into<String>, proxy_url: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent);

        builder = match proxy_url {
            Some(url) => {
                let proxy = Proxy::all(url).map_err(|e| InvokeError::InvalidProxy(e.to_string()))?;
                builder.proxy(proxy)
            }
            // `proxy = false` also ignores HTTP(S)_PROXY from the environment
            None => builder.no_proxy(),
        };

        let client = builder
            .build()
            .map_err(|e| InvokeError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &DispatchConfig, request_timeout: Duration) -> Result<Self> {
        let http = HttpConfig {
            request_timeout,
            ..HttpConfig::default()
        };
        Self::new(http, config.invoke_endpoint.clone(), config.proxy.as_deref())
    }

    pub fn url(&self, region: &str, worker: &str) -> String {
        self.endpoint
            .replace("{region}", region)
            .replace("{worker}", worker)
    }
}

#[async_trait]
impl WorkerInvoker for HttpInvoker {
    async fn invoke(&self, region: &str, worker: &str, payload: Bytes) -> Result<()> {
        let url = self.url(region, worker);
        debug!(url, region, worker, size = payload.len(), "Invoking worker");

        let response = self
            .client
            .post(&url)
            .header(INVOCATION_TYPE_HEADER, EVENT_INVOCATION)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InvokeError::Timeout
                } else {
                    InvokeError::RequestFailed(e.to_string())
                }
            })?;

        // Only the enqueue acknowledgment is checked
        let status = response.status();
        if !status.is_success() {
            return Err(InvokeError::Rejected(status.as_u16()));
        }

        debug!(region, worker, status = status.as_u16(), "Worker invocation accepted");
        Ok(())
    }
}

/// One call seen by `MemoryInvoker`
#[derive(Debug, Clone)]
pub struct Invocation {
    pub region: String,
    pub worker: String,
    pub payload: Bytes,
}

/// Records invocations instead of performing them (dry runs, tests)
#[derive(Debug, Clone, Default)]
pub struct MemoryInvoker {
    calls: Arc<Mutex<Vec<Invocation>>>,
    reject_with: Option<u16>,
}

impl MemoryInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// An invoker whose platform answers every call with `status`.
    /// Rejected calls are still recorded.
    pub fn rejecting(status: u16) -> Self {
        Self {
            reject_with: Some(status),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl WorkerInvoker for MemoryInvoker {
    async fn invoke(&self, region: &str, worker: &str, payload: Bytes) -> Result<()> {
        self.calls
            .lock()
            .map_err(|_| InvokeError::RequestFailed("recorder poisoned".to_string()))?
            .push(Invocation {
                region: region.to_string(),
                worker: worker.to_string(),
                payload,
            });
        match self.reject_with {
            Some(status) => Err(InvokeError::Rejected(status)),
            None => Ok(()),
        }
    }
}
