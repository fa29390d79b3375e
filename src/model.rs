use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use time::macros::format_description;
use time::OffsetDateTime;

/// Optional configuration override file, read from the working directory.
pub const CONFIG_FILE: &str = "speed_test_config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub base_url: String,
    pub download_bytes_per_req: u64,
    pub upload_bytes_per_req: u64,
    pub concurrency: usize,
    #[serde(with = "humantime_serde")]
    pub download_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub upload_duration: Duration,
    pub ping_probes: u32,
    pub probe_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: "https://speed.cloudflare.com".into(),
            download_bytes_per_req: 10_000_000,
            upload_bytes_per_req: 5_000_000,
            concurrency: 6,
            download_duration: Duration::from_secs(10),
            upload_duration: Duration::from_secs(10),
            ping_probes: 8,
            probe_timeout_ms: 800,
            user_agent: concat!("speedtest-tui/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl RunConfig {
    /// Read config overrides from `path` if present. A missing or malformed
    /// file falls back to compiled-in defaults; the app never refuses to
    /// start over configuration.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "ignoring malformed config: {e}");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

/// One completed measurement. Speeds are stored in Mbps to match the
/// on-disk history format; everything upstream of here works in bits/second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub download: f64,
    pub upload: f64,
    pub ping: f64,
}

impl TestResult {
    /// Build a result stamped with the current local time (UTC when the
    /// local offset cannot be determined).
    pub fn new(download_bps: f64, upload_bps: f64, ping_ms: f64) -> Self {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let date = now
            .format(format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second]"
            ))
            .unwrap_or_default();
        let time = now
            .format(format_description!("[hour]:[minute]:[second]"))
            .unwrap_or_default();
        Self {
            date: Some(date),
            time: Some(time),
            download: download_bps / 1_000_000.0,
            upload: upload_bps / 1_000_000.0,
            ping: ping_ms,
        }
    }

    /// Display timestamp: the full date-time when present, the time-only
    /// field otherwise. Older history files carry only one of the two.
    pub fn timestamp(&self) -> &str {
        self.date
            .as_deref()
            .or(self.time.as_deref())
            .unwrap_or_default()
    }
}

/// Serving endpoint selected during discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub sponsor: String,
    pub country: String,
    pub ping_ms: f64,
}

impl ServerInfo {
    pub fn label(&self) -> String {
        format!("{} ({})", self.sponsor, self.country)
    }
}

/// Events emitted by a measurement run and consumed once by the shell.
/// Speeds are raw bits/second; conversion to display units happens at the
/// presentation boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Status(String),
    Server(String),
    Download(f64),
    Upload(f64),
    Ping(f64),
    Progress(u8),
    Complete(TestResult),
    Error(String),
}
