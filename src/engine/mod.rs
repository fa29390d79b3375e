mod discovery;
mod throughput;

use crate::model::{RunConfig, ServerInfo};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::RngCore;
use reqwest::Url;
use thiserror::Error;

/// Failure kinds a measurement can surface. The shell maps each kind to a
/// terminal status line; the Display text is what the user sees in the
/// error dialog.
#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("Failed to retrieve speed test configuration. Please check your internet connection.")]
    Config(#[source] anyhow::Error),
    #[error("No speed test servers found. Please check your internet connection.")]
    NoServers,
    #[error("Test failed: {0:#}")]
    Other(#[from] anyhow::Error),
}

impl MeasureError {
    pub fn status_label(&self) -> &'static str {
        match self {
            MeasureError::Config(_) => "Configuration Error",
            MeasureError::NoServers => "No Servers",
            MeasureError::Other(_) => "Test Failed",
        }
    }
}

/// The external measurement capability. One production implementation
/// ([`SpeedtestClient`]); tests script their own.
#[async_trait]
pub trait BandwidthProvider: Send + Sync {
    /// Pick the serving endpoint and measure its baseline ping.
    async fn discover_server(&self) -> Result<ServerInfo, MeasureError>;

    /// Saturate the downlink and return the measured rate in bits/second.
    async fn measure_download(&self) -> Result<f64, MeasureError>;

    /// Saturate the uplink and return the measured rate in bits/second.
    async fn measure_upload(&self) -> Result<f64, MeasureError>;
}

/// HTTP speed-test client. Endpoints follow the Cloudflare speed service
/// layout: `/meta` and `/locations` for discovery, `/__down` and `/__up`
/// for throughput.
#[derive(Clone)]
pub struct SpeedtestClient {
    pub(crate) http: reqwest::Client,
    pub(crate) cfg: RunConfig,
    pub(crate) meas_id: String,
    pub(crate) meta_url: Url,
    pub(crate) locations_url: Url,
    pub(crate) down_url: Url,
    pub(crate) up_url: Url,
}

impl SpeedtestClient {
    pub fn new(cfg: &RunConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.as_str())
            .build()
            .context("build HTTP client")?;
        let base: Url = cfg
            .base_url
            .parse()
            .with_context(|| format!("invalid base URL {}", cfg.base_url))?;
        Ok(Self {
            http,
            cfg: cfg.clone(),
            meas_id: new_meas_id(),
            meta_url: base.join("meta").context("build meta URL")?,
            locations_url: base.join("locations").context("build locations URL")?,
            down_url: base.join("__down").context("build download URL")?,
            up_url: base.join("__up").context("build upload URL")?,
        })
    }
}

#[async_trait]
impl BandwidthProvider for SpeedtestClient {
    async fn discover_server(&self) -> Result<ServerInfo, MeasureError> {
        discovery::discover_server(self).await
    }

    async fn measure_download(&self) -> Result<f64, MeasureError> {
        throughput::measure_download(self).await
    }

    async fn measure_upload(&self) -> Result<f64, MeasureError> {
        throughput::measure_upload(self).await
    }
}

/// Random per-run measurement id, attached to every request so the service
/// can correlate one test's traffic.
fn new_meas_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn meas_id_is_hex_of_fixed_length() {
        let id = new_meas_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn client_rejects_invalid_base_url() {
        let cfg = RunConfig {
            base_url: "not a url".into(),
            ..RunConfig::default()
        };
        assert!(SpeedtestClient::new(&cfg).is_err());
    }

    #[test]
    fn client_builds_service_endpoints() {
        let client = SpeedtestClient::new(&RunConfig::default()).unwrap();
        assert_eq!(client.meta_url.as_str(), "https://speed.cloudflare.com/meta");
        assert_eq!(client.down_url.as_str(), "https://speed.cloudflare.com/__down");
    }

    #[test]
    fn error_kinds_map_to_status_labels() {
        assert_eq!(
            MeasureError::Config(anyhow!("offline")).status_label(),
            "Configuration Error"
        );
        assert_eq!(MeasureError::NoServers.status_label(), "No Servers");
        assert_eq!(
            MeasureError::Other(anyhow!("reset")).status_label(),
            "Test Failed"
        );
    }

    #[test]
    fn error_messages_are_user_readable() {
        let msg = MeasureError::Config(anyhow!("offline")).to_string();
        assert!(msg.contains("configuration"));
        let msg = MeasureError::Other(anyhow!("connection reset")).to_string();
        assert!(msg.starts_with("Test failed: "));
        assert!(msg.contains("connection reset"));
    }
}
