//! Link saturation. A pool of worker tasks keeps requests in flight for the
//! configured window while a shared counter tracks transferred bytes; the
//! result is the average rate over the whole window.

use super::{MeasureError, SpeedtestClient};
use anyhow::anyhow;
use bytes::Bytes;
use futures::{stream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Chunk size for upload stream generation (64 KB)
const UPLOAD_CHUNK_SIZE: u64 = 64 * 1024;

pub(crate) async fn measure_download(client: &SpeedtestClient) -> Result<f64, MeasureError> {
    let stop = Arc::new(AtomicBool::new(false));
    let total = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();
    for _ in 0..client.cfg.concurrency {
        let http = client.http.clone();
        let mut url = client.down_url.clone();
        url.query_pairs_mut()
            .append_pair("measId", &client.meas_id)
            .append_pair("bytes", &client.cfg.download_bytes_per_req.to_string());
        let stop2 = stop.clone();
        let total2 = total.clone();

        handles.push(tokio::spawn(async move {
            while !stop2.load(Ordering::Relaxed) {
                let resp = match http.get(url.clone()).send().await {
                    Ok(r) if r.status().is_success() => r,
                    _ => {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };

                let mut body = resp.bytes_stream();
                while let Some(chunk) = body.next().await {
                    let Ok(b) = chunk else { break };
                    total2.fetch_add(b.len() as u64, Ordering::Relaxed);
                    if stop2.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }
        }));
    }

    let start = Instant::now();
    tokio::time::sleep(client.cfg.download_duration).await;
    stop.store(true, Ordering::Relaxed);
    for h in handles {
        let _ = h.await;
    }

    finish(total.load(Ordering::Relaxed), start.elapsed(), "download")
}

pub(crate) async fn measure_upload(client: &SpeedtestClient) -> Result<f64, MeasureError> {
    let stop = Arc::new(AtomicBool::new(false));
    let total = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();
    for _ in 0..client.cfg.concurrency {
        let http = client.http.clone();
        let mut url = client.up_url.clone();
        url.query_pairs_mut().append_pair("measId", &client.meas_id);
        let stop2 = stop.clone();
        let total2 = total.clone();
        let bytes_per_req = client.cfg.upload_bytes_per_req;

        handles.push(tokio::spawn(async move {
            while !stop2.load(Ordering::Relaxed) {
                // Bytes are counted as chunks are handed to the request body,
                // a close approximation of bytes put on the wire.
                let body = upload_body(bytes_per_req, &total2);
                if http.post(url.clone()).body(body).send().await.is_err() {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }));
    }

    let start = Instant::now();
    tokio::time::sleep(client.cfg.upload_duration).await;
    stop.store(true, Ordering::Relaxed);
    for h in handles {
        let _ = h.await;
    }

    finish(total.load(Ordering::Relaxed), start.elapsed(), "upload")
}

/// Bounded stream of zero-filled chunks totalling `bytes_per_req`, counting
/// into `total` as each chunk is produced.
fn upload_body(bytes_per_req: u64, total: &Arc<AtomicU64>) -> reqwest::Body {
    let chunk = Bytes::from(vec![0u8; UPLOAD_CHUNK_SIZE as usize]);
    let full = bytes_per_req / UPLOAD_CHUNK_SIZE;
    let tail = bytes_per_req % UPLOAD_CHUNK_SIZE;

    let total_full = total.clone();
    let chunk_full = chunk.clone();
    let s_full = stream::iter(0..full).map(move |_| {
        total_full.fetch_add(UPLOAD_CHUNK_SIZE, Ordering::Relaxed);
        Ok::<Bytes, std::io::Error>(chunk_full.clone())
    });

    if tail == 0 {
        reqwest::Body::wrap_stream(s_full)
    } else {
        let total_tail = total.clone();
        let chunk_tail = chunk.slice(..tail as usize);
        let s_tail = stream::once(async move {
            total_tail.fetch_add(tail, Ordering::Relaxed);
            Ok::<Bytes, std::io::Error>(chunk_tail)
        });
        reqwest::Body::wrap_stream(s_full.chain(s_tail))
    }
}

fn finish(bytes: u64, elapsed: Duration, direction: &str) -> Result<f64, MeasureError> {
    if bytes == 0 {
        return Err(MeasureError::Other(anyhow!(
            "{direction} test transferred no data"
        )));
    }
    Ok(bits_per_second(bytes, elapsed))
}

fn bits_per_second(bytes: u64, elapsed: Duration) -> f64 {
    (bytes as f64 * 8.0) / elapsed.as_secs_f64().max(1e-9)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[test]
    fn rate_is_bits_over_elapsed() {
        // 12.5 MB in one second is 100 Mbps.
        let bps = bits_per_second(12_500_000, Duration::from_secs(1));
        assert!((bps - 100_000_000.0).abs() < 1.0);
    }

    #[test]
    fn zero_bytes_is_a_failed_measurement() {
        let err = finish(0, Duration::from_secs(10), "download").unwrap_err();
        assert_eq!(err.status_label(), "Test Failed");
        assert!(err.to_string().contains("transferred no data"));
    }

    #[tokio::test]
    async fn upload_body_counts_every_byte() {
        let total = Arc::new(AtomicU64::new(0));
        // 64 KB chunks with a 1000-byte tail.
        let n = UPLOAD_CHUNK_SIZE * 3 + 1_000;
        let chunk = Bytes::from(vec![0u8; UPLOAD_CHUNK_SIZE as usize]);
        let full = n / UPLOAD_CHUNK_SIZE;
        let tail = n % UPLOAD_CHUNK_SIZE;

        // Drive the same stream construction used for the request body.
        let total2 = total.clone();
        let s_full = stream::iter(0..full).map(move |_| {
            total2.fetch_add(UPLOAD_CHUNK_SIZE, Ordering::Relaxed);
            Ok::<Bytes, std::io::Error>(chunk.clone())
        });
        let total3 = total.clone();
        let tail_chunk = Bytes::from(vec![0u8; tail as usize]);
        let s_tail = stream::once(async move {
            total3.fetch_add(tail, Ordering::Relaxed);
            Ok::<Bytes, std::io::Error>(tail_chunk)
        });

        let produced: Vec<Bytes> = s_full.chain(s_tail).try_collect().await.unwrap();
        let produced_bytes: u64 = produced.iter().map(|b| b.len() as u64).sum();
        assert_eq!(produced_bytes, n);
        assert_eq!(total.load(Ordering::Relaxed), n);
    }
}
