//! One measurement pass, reported as an ordered event stream.
//!
//! The runner owns the stage sequence and its nominal progress ladder; the
//! provider owns the network work. A run is exactly one attempt: any stage
//! failure ends the sequence with a single error event, the terminal status
//! for that failure kind, and a progress reset.

use crate::engine::{BandwidthProvider, MeasureError};
use crate::model::{ProgressEvent, TestResult};
use tokio::sync::mpsc::UnboundedSender;

pub async fn run<P: BandwidthProvider>(provider: &P, tx: &UnboundedSender<ProgressEvent>) {
    if let Err(e) = run_stages(provider, tx).await {
        let _ = tx.send(ProgressEvent::Error(e.to_string()));
        let _ = tx.send(ProgressEvent::Status(e.status_label().into()));
        let _ = tx.send(ProgressEvent::Progress(0));
    }
}

async fn run_stages<P: BandwidthProvider>(
    provider: &P,
    tx: &UnboundedSender<ProgressEvent>,
) -> Result<(), MeasureError> {
    // Send failures mean the shell abandoned the channel; the run finishes
    // unobserved, which is the advisory-cancellation contract.
    let send = |ev: ProgressEvent| {
        let _ = tx.send(ev);
    };

    send(ProgressEvent::Status("Initializing speed test…".into()));
    send(ProgressEvent::Progress(0));

    send(ProgressEvent::Status("Finding best server…".into()));
    send(ProgressEvent::Progress(10));
    let server = provider.discover_server().await?;
    send(ProgressEvent::Server(server.label()));
    send(ProgressEvent::Progress(20));

    send(ProgressEvent::Status("Testing download speed…".into()));
    send(ProgressEvent::Progress(30));
    let download_bps = provider.measure_download().await?;
    send(ProgressEvent::Download(download_bps));
    send(ProgressEvent::Progress(60));

    send(ProgressEvent::Status("Testing upload speed…".into()));
    send(ProgressEvent::Progress(70));
    let upload_bps = provider.measure_upload().await?;
    send(ProgressEvent::Upload(upload_bps));
    send(ProgressEvent::Progress(90));

    send(ProgressEvent::Ping(server.ping_ms));
    send(ProgressEvent::Progress(100));

    send(ProgressEvent::Complete(TestResult::new(
        download_bps,
        upload_bps,
        server.ping_ms,
    )));
    send(ProgressEvent::Status("Test completed".into()));
    Ok(())
}
