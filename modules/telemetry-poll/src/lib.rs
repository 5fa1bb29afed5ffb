//! Telemetry polling: fetch each known host's beacon snapshot, flatten its
//! timeseries, ingest new samples, and mirror them to the CSV log.

use anyhow::{Context, Result};
use beaconwatch_core::Endpoint;
use reqwest::{redirect::Policy, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use telemetry_store::{Db, NewSample};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

/// Snapshot shape a device serves at its telemetry path. Extra fields are
/// ignored; a snapshot missing any required key is treated as malformed.
#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    pub meta: Meta,
    pub beacons: BTreeMap<String, BeaconSeries>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    #[serde(rename = "bluetoothMac")]
    pub bluetooth_mac: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeaconSeries {
    pub timeseries: Vec<SeriesEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeriesEntry {
    pub timestamp: i64,
    pub rssi: i64,
    pub distance: f64,
}

/// Why one host contributed nothing to a poll. Skips are logged and counted,
/// never escalated; only storage and sink failures abort a poll.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("malformed snapshot: {0}")]
    Malformed(reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub telemetry_path: String,
    pub connect_timeout_ms: u64,
    pub timeout_ms: u64,
    pub concurrency: usize,
    /// Where the CSV mirror lives. Every poll opens it; the path is the only
    /// thing callers choose.
    pub log_path: PathBuf,
}

impl Default for PollOptions {
    fn default() -> Self {
        PollOptions {
            telemetry_path: "data.json".into(),
            connect_timeout_ms: 1_000,
            timeout_ms: 1_000,
            concurrency: 16,
            log_path: "beacons.csv".into(),
        }
    }
}

/// One host that contributed nothing this poll, with the rendered reason.
#[derive(Debug, Clone, Serialize)]
pub struct HostSkip {
    pub address: String,
    pub reason: String,
}

/// Outcome of one poll. `ingested` counts samples newly accepted by the
/// store, after dedup, across all hosts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollReport {
    pub polled: usize,
    pub ingested: usize,
    pub skipped: Vec<HostSkip>,
}

pub async fn fetch_snapshot(client: &Client, url: &str) -> Result<Snapshot, SkipReason> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if status != StatusCode::OK {
        return Err(SkipReason::Status(status));
    }
    resp.json::<Snapshot>().await.map_err(SkipReason::Malformed)
}

/// Flatten a snapshot into store-ready samples: one per timeseries entry,
/// with the device's own MAC as emitter and the seen MAC as observer.
pub fn flatten(snapshot: &Snapshot) -> Vec<NewSample> {
    let mut out = Vec::new();
    for (observer_mac, series) in &snapshot.beacons {
        for entry in &series.timeseries {
            out.push(NewSample {
                emitter_mac: snapshot.meta.bluetooth_mac.clone(),
                observer_mac: observer_mac.clone(),
                rssi: entry.rssi,
                estimated_distance: entry.distance,
                observed_at: entry.timestamp,
            });
        }
    }
    out
}

/// Append-only CSV mirror of accepted samples. The header row goes in once,
/// when the file is new or empty.
pub struct SampleLog {
    writer: csv::Writer<File>,
}

impl SampleLog {
    pub fn open(path: &Path) -> Result<Self> {
        let needs_header = match std::fs::metadata(path) {
            Ok(m) => m.len() == 0,
            Err(_) => true,
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open sample log {}", path.display()))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer.write_record([
                "emitter_mac",
                "observer_mac",
                "rssi",
                "estimated_distance",
                "observed_at",
            ])?;
        }
        Ok(SampleLog { writer })
    }

    pub fn append(&mut self, s: &NewSample) -> Result<()> {
        let rssi = s.rssi.to_string();
        let distance = s.estimated_distance.to_string();
        let observed_at = s.observed_at.to_string();
        self.writer.write_record([
            s.emitter_mac.as_str(),
            s.observer_mac.as_str(),
            rssi.as_str(),
            distance.as_str(),
            observed_at.as_str(),
        ])?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }
}

/// Poll every known host once: snapshots are fetched concurrently under a
/// semaphore, then ingested serially in host order so the log stays
/// deterministic. A host that cannot be fetched or parsed is skipped and
/// the rest proceed; a store or sink write failure aborts the poll and
/// propagates.
pub async fn run(db: &Db, opts: &PollOptions) -> Result<PollReport> {
    let client = Client::builder()
        .connect_timeout(Duration::from_millis(opts.connect_timeout_ms))
        .timeout(Duration::from_millis(opts.timeout_ms))
        .redirect(Policy::none())
        .build()?;

    let hosts = db.hosts()?;
    let mut log = SampleLog::open(&opts.log_path)?;

    let mut report = PollReport {
        polled: hosts.len(),
        ..PollReport::default()
    };

    let (tx, mut rx) = mpsc::channel(hosts.len().max(1));
    let limit = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    for (idx, host) in hosts.iter().enumerate() {
        let permit = limit.clone().acquire_owned().await?;
        let client = client.clone();
        let tx = tx.clone();
        let address = host.address.clone();
        let url = Endpoint::new(host.address.as_str(), &opts.telemetry_path).url();
        tokio::spawn(async move {
            let outcome = fetch_snapshot(&client, &url).await;
            drop(permit);
            let _ = tx.send((idx, address, outcome)).await;
        });
    }
    drop(tx);

    let mut fetched = Vec::with_capacity(hosts.len());
    while let Some(item) = rx.recv().await {
        fetched.push(item);
    }
    fetched.sort_by_key(|(idx, _, _)| *idx);

    for (_, address, outcome) in fetched {
        let snapshot = match outcome {
            Ok(s) => s,
            Err(reason) => {
                warn!(host = %address, %reason, "skipping host");
                report.skipped.push(HostSkip {
                    address,
                    reason: reason.to_string(),
                });
                continue;
            }
        };
        for sample in flatten(&snapshot) {
            if db.insert_sample(&sample)? {
                log.append(&sample)?;
                report.ingested += 1;
            }
        }
    }

    log.flush()?;
    debug!(
        polled = report.polled,
        ingested = report.ingested,
        skipped = report.skipped.len(),
        "poll done"
    );
    Ok(report)
}
