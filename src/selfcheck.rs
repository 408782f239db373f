//! Cold-start public IP self-check
//!
//! Logs the egress address workers will be invoked from. A failed probe is a
//! warning only; it never blocks startup.

use reqwest::{Client, Proxy};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::DispatchConfig;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SelfCheckError {
    #[error("probe request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("probe answered HTTP {0}")]
    Status(u16),

    #[error("probe returned an empty body")]
    Empty,
}

/// Fetch the public IP as seen by `url`, through `proxy` when set
pub async fn public_ip(url: &str, proxy: Option<&str>) -> Result<String, SelfCheckError> {
    let mut builder = Client::builder().timeout(PROBE_TIMEOUT);
    builder = match proxy {
        Some(p) => builder.proxy(Proxy::all(p)?),
        None => builder.no_proxy(),
    };
    let client = builder.build()?;

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SelfCheckError::Status(status.as_u16()));
    }

    let ip = response.text().await?.trim().to_string();
    if ip.is_empty() {
        return Err(SelfCheckError::Empty);
    }
    Ok(ip)
}

/// Run the probe if `chk_ip_url` is configured
pub async fn run(config: &DispatchConfig) -> Option<String> {
    let url = config.chk_ip_url.as_deref()?;
    match public_ip(url, config.proxy.as_deref()).await {
        Ok(ip) => {
            info!(ip = %ip, proxied = config.proxy.is_some(), "Public IP self-check");
            Some(ip)
        }
        Err(e) => {
            warn!(url, error = %e, "Public IP self-check failed");
            None
        }
    }
}
