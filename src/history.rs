//! Rolling history of completed tests.
//!
//! Owns the bounded in-memory log and its JSON file. Load and persist
//! failures degrade silently: the worst outcome of a broken file is an
//! empty history panel, never a startup error.

use crate::model::TestResult;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Fixed relative path in the working directory, shared with the historical
/// file format.
pub const HISTORY_FILE: &str = "speed_test_history.json";

const MAX_ENTRIES: usize = 5;

pub struct HistoryStore {
    path: PathBuf,
    entries: Vec<TestResult>,
}

impl HistoryStore {
    pub fn load() -> Self {
        Self::load_from(HISTORY_FILE)
    }

    /// Load from an explicit path. Missing, unreadable, or malformed files
    /// all yield an empty log; anything beyond the newest five entries is
    /// dropped.
    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut entries = match read_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(path = %path.display(), "starting with empty history: {e:#}");
                Vec::new()
            }
        };
        if entries.len() > MAX_ENTRIES {
            let excess = entries.len() - MAX_ENTRIES;
            entries.drain(..excess);
        }
        Self { path, entries }
    }

    pub fn entries(&self) -> &[TestResult] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a result, evicting the oldest entry beyond five, and persist
    /// the whole log. The in-memory log stays authoritative if the write
    /// fails.
    pub fn append(&mut self, result: TestResult) {
        self.entries.push(result);
        if self.entries.len() > MAX_ENTRIES {
            self.entries.remove(0);
        }
        self.persist();
    }

    /// Empty the log and persist the empty state.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.persist();
    }

    /// Display lines, most recent first. Exactly one placeholder line when
    /// the log is empty.
    pub fn render(&self) -> Vec<String> {
        if self.entries.is_empty() {
            return vec!["No tests yet".into()];
        }
        self.entries
            .iter()
            .rev()
            .enumerate()
            .map(|(i, t)| {
                format!(
                    "{}. {} - ↓{} ↑{}, Ping: {:.0}ms",
                    i + 1,
                    t.timestamp(),
                    format_speed(t.download * 1_000_000.0),
                    format_speed(t.upload * 1_000_000.0),
                    t.ping
                )
            })
            .collect()
    }

    fn persist(&self) {
        if let Err(e) = write_entries(&self.path, &self.entries) {
            tracing::warn!(path = %self.path.display(), "failed to persist history: {e:#}");
        }
    }
}

fn read_entries(path: &Path) -> Result<Vec<TestResult>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read history file {}", path.display()))?;
    serde_json::from_str(&raw).context("parse history JSON")
}

fn write_entries(path: &Path, entries: &[TestResult]) -> Result<()> {
    let json = serde_json::to_string_pretty(entries).context("serialize history")?;
    fs::write(path, json).with_context(|| format!("write history file {}", path.display()))
}

/// Render a speed in the unit matching its magnitude. Thresholds sit at
/// exact powers of 1000, so 1_000 bps already reads as Kbps.
pub fn format_speed(bps: f64) -> String {
    if bps >= 1_000_000_000.0 {
        format!("{:.2} Gbps", bps / 1_000_000_000.0)
    } else if bps >= 1_000_000.0 {
        format!("{:.2} Mbps", bps / 1_000_000.0)
    } else if bps >= 1_000.0 {
        format!("{:.2} Kbps", bps / 1_000.0)
    } else {
        format!("{:.2} bps", bps)
    }
}
