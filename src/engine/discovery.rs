//! Server discovery and baseline latency.
//!
//! The service's `meta` endpoint names the datacenter (colo) serving this
//! client; `locations` maps colos to city and country. Baseline ping is the
//! best of a short burst of timed zero-byte downloads.

use super::{MeasureError, SpeedtestClient};
use crate::model::ServerInfo;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(default)]
    colo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Location {
    iata: String,
    city: String,
    cca2: String,
}

pub(crate) async fn discover_server(client: &SpeedtestClient) -> Result<ServerInfo, MeasureError> {
    let meta = fetch_meta(client).await.map_err(MeasureError::Config)?;
    let locations = fetch_locations(client).await.unwrap_or_default();
    let (sponsor, country) =
        resolve_serving_location(&meta, &locations).ok_or(MeasureError::NoServers)?;
    let ping_ms = baseline_ping(client).await?;
    Ok(ServerInfo {
        sponsor,
        country,
        ping_ms,
    })
}

async fn fetch_meta(client: &SpeedtestClient) -> Result<Meta> {
    let resp = client
        .http
        .get(client.meta_url.clone())
        .send()
        .await
        .context("request service metadata")?
        .error_for_status()
        .context("service metadata status")?;
    resp.json().await.context("parse service metadata")
}

async fn fetch_locations(client: &SpeedtestClient) -> Result<Vec<Location>> {
    let resp = client
        .http
        .get(client.locations_url.clone())
        .send()
        .await
        .context("request server locations")?
        .error_for_status()
        .context("server locations status")?;
    resp.json().await.context("parse server locations")
}

/// Match the serving colo against the published location list. `None` when
/// the service reported no colo or the colo is unknown, which the caller
/// treats as "no servers".
fn resolve_serving_location(meta: &Meta, locations: &[Location]) -> Option<(String, String)> {
    let colo = meta.colo.as_deref()?;
    let loc = locations.iter().find(|l| l.iata == colo)?;
    Some((format!("Cloudflare {}", loc.city), loc.cca2.clone()))
}

async fn baseline_ping(client: &SpeedtestClient) -> Result<f64, MeasureError> {
    let mut best: Option<f64> = None;
    for _ in 0..client.cfg.ping_probes {
        if let Ok(ms) = probe_once(client).await {
            best = Some(best.map_or(ms, |b: f64| b.min(ms)));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    best.ok_or_else(|| MeasureError::Other(anyhow!("all latency probes failed")))
}

async fn probe_once(client: &SpeedtestClient) -> Result<f64> {
    let mut url = client.down_url.clone();
    url.query_pairs_mut()
        .append_pair("measId", &client.meas_id)
        .append_pair("bytes", "0");

    let start = Instant::now();
    let resp = tokio::time::timeout(
        Duration::from_millis(client.cfg.probe_timeout_ms),
        client.http.get(url).send(),
    )
    .await
    .context("latency probe timed out")?
    .context("latency probe failed")?;
    resp.error_for_status().context("latency probe status")?;
    Ok(start.elapsed().as_secs_f64() * 1_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locations() -> Vec<Location> {
        serde_json::from_str(
            r#"[
                {"iata": "AMS", "city": "Amsterdam", "cca2": "NL"},
                {"iata": "FRA", "city": "Frankfurt", "cca2": "DE"}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn resolves_known_colo_to_city_and_country() {
        let meta: Meta = serde_json::from_str(r#"{"colo": "AMS"}"#).unwrap();
        let resolved = resolve_serving_location(&meta, &locations());
        assert_eq!(
            resolved,
            Some(("Cloudflare Amsterdam".to_string(), "NL".to_string()))
        );
    }

    #[test]
    fn unknown_colo_means_no_servers() {
        let meta: Meta = serde_json::from_str(r#"{"colo": "XXX"}"#).unwrap();
        assert!(resolve_serving_location(&meta, &locations()).is_none());
    }

    #[test]
    fn missing_colo_means_no_servers() {
        let meta: Meta = serde_json::from_str("{}").unwrap();
        assert!(resolve_serving_location(&meta, &locations()).is_none());
        let meta: Meta = serde_json::from_str(r#"{"colo": "AMS"}"#).unwrap();
        assert!(resolve_serving_location(&meta, &[]).is_none());
    }

    #[test]
    fn meta_tolerates_extra_fields() {
        let meta: Meta =
            serde_json::from_str(r#"{"colo": "FRA", "ip": "203.0.113.9", "asn": 64496}"#).unwrap();
        assert_eq!(meta.colo.as_deref(), Some("FRA"));
    }
}
