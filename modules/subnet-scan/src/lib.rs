//! Subnet sweep: probe every candidate address for a telemetry endpoint,
//! record the responsive ones, and log the run.

use anyhow::{Context, Result};
use beaconwatch_core::ratelimiter::RateLimiter;
use beaconwatch_core::{authority, Endpoint};
use ipnet::Ipv4Net;
use reqwest::{redirect::Policy, Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use telemetry_store::Db;
use time::OffsetDateTime;
use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub telemetry_path: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub timeout_ms: u64,
    pub concurrency: usize,
    pub qps: Option<u32>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            telemetry_path: "data.json".into(),
            port: 80,
            connect_timeout_ms: 1_000,
            timeout_ms: 1_000,
            concurrency: 64,
            qps: None,
        }
    }
}

/// What one sweep did, mirroring the scan_runs row it appended.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: i64,
    pub started_at: i64,
    pub ended_at: i64,
    pub duration_secs: i64,
    pub probed: usize,
    pub responsive: usize,
}

/// Expand an IPv4 CIDR into its usable host addresses.
pub fn expand_cidr(cidr: &str) -> Result<Vec<Ipv4Addr>> {
    let net: Ipv4Net = cidr
        .parse()
        .with_context(|| format!("invalid IPv4 range {cidr:?}"))?;
    Ok(net.hosts().collect())
}

/// Probe one endpoint. Responsive means HTTP 200 with a JSON body carrying
/// both a `meta` object and a `beacons` object; every other outcome, from
/// refused connection to missing keys, just means not responsive right now.
pub async fn probe(client: &Client, endpoint: &Endpoint) -> bool {
    let resp = match client.get(endpoint.url()).send().await {
        Ok(r) => r,
        Err(_) => return false,
    };
    if resp.status() != StatusCode::OK {
        return false;
    }
    match resp.json::<Value>().await {
        Ok(body) => looks_like_telemetry(&body),
        Err(_) => false,
    }
}

fn looks_like_telemetry(body: &Value) -> bool {
    body.get("meta").is_some_and(Value::is_object)
        && body.get("beacons").is_some_and(Value::is_object)
}

/// Run one sweep over `addrs`: probe all of them, upsert the responsive ones
/// into the host store, and append exactly one run-log row, even when nothing
/// answered. Storage failure is the only error this returns.
pub async fn run(db: &Db, addrs: Vec<Ipv4Addr>, opts: &ScanOptions) -> Result<RunSummary> {
    let started_at = now_unix();
    let probed = addrs.len();
    let responsive = sweep(addrs, opts).await?;

    for (address, seen_at) in &responsive {
        db.upsert_host(address, *seen_at)?;
    }

    let ended_at = now_unix();
    let run_id = db.append_scan_run(started_at, ended_at)?;
    debug!(run_id, probed, responsive = responsive.len(), "sweep done");
    Ok(RunSummary {
        run_id,
        started_at,
        ended_at,
        duration_secs: ended_at - started_at,
        probed,
        responsive: responsive.len(),
    })
}

/// Probe all addresses with a bounded worker pool and optional QPS pacing.
/// Returns each responsive authority with the time its probe succeeded.
async fn sweep(addrs: Vec<Ipv4Addr>, opts: &ScanOptions) -> Result<Vec<(String, i64)>> {
    let client = Client::builder()
        .connect_timeout(Duration::from_millis(opts.connect_timeout_ms))
        .timeout(Duration::from_millis(opts.timeout_ms))
        .redirect(Policy::none())
        .build()?;

    let (tx, mut rx) = mpsc::channel::<(String, i64)>(addrs.len().max(1));
    let sem = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let pace = opts.qps.map(RateLimiter::new);

    for addr in addrs {
        if let Some(p) = &pace {
            p.acquire().await;
        }
        let permit = sem.clone().acquire_owned().await?;
        let txc = tx.clone();
        let client = client.clone();
        let endpoint = Endpoint::new(authority(addr, opts.port), &opts.telemetry_path);
        tokio::spawn(async move {
            if probe(&client, &endpoint).await {
                let _ = txc.send((endpoint.authority, now_unix())).await;
            }
            drop(permit);
        });
    }
    drop(tx);

    let mut live = Vec::new();
    while let Some(hit) = rx.recv().await {
        live.push(hit);
    }
    Ok(live)
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn stub_server(status: &'static str, body: String) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = sock.read(&mut buf).await;
                    let resp = format!(
                        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = sock.write_all(resp.as_bytes()).await;
                });
            }
        });
        addr
    }

    fn telemetry_body() -> String {
        json!({"meta": {"bluetoothMac": "aa:bb:cc:dd:ee:ff"}, "beacons": {}}).to_string()
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn expand_small_block() {
        let ips = expand_cidr("192.168.1.0/30").unwrap();
        assert_eq!(ips.len(), 2);
        assert_eq!(ips[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(ips[1], Ipv4Addr::new(192, 168, 1, 2));
    }

    #[test]
    fn expand_slash24() {
        assert_eq!(expand_cidr("192.168.1.0/24").unwrap().len(), 254);
    }

    #[test]
    fn reject_bad_ranges() {
        assert!(expand_cidr("not-a-range").is_err());
        assert!(expand_cidr("fe80::/64").is_err());
    }

    #[test]
    fn shape_check_requires_both_objects() {
        assert!(looks_like_telemetry(&json!({"meta": {}, "beacons": {}})));
        assert!(!looks_like_telemetry(&json!({"meta": {}})));
        assert!(!looks_like_telemetry(&json!({"beacons": {}})));
        assert!(!looks_like_telemetry(&json!({"meta": 3, "beacons": {}})));
        assert!(!looks_like_telemetry(&json!({"meta": {}, "beacons": []})));
    }

    #[tokio::test]
    async fn probe_accepts_telemetry_endpoint() {
        let addr = stub_server("200 OK", telemetry_body()).await;
        let client = Client::new();
        let ep = Endpoint::new(addr.to_string(), "data.json");
        assert!(probe(&client, &ep).await);
    }

    #[tokio::test]
    async fn probe_rejects_non_200_and_bad_bodies() {
        let client = Client::new();

        let addr = stub_server("500 Internal Server Error", telemetry_body()).await;
        assert!(!probe(&client, &Endpoint::new(addr.to_string(), "data.json")).await);

        let addr = stub_server("200 OK", "not json at all".to_string()).await;
        assert!(!probe(&client, &Endpoint::new(addr.to_string(), "data.json")).await);

        let addr = stub_server("200 OK", json!({"meta": {}}).to_string()).await;
        assert!(!probe(&client, &Endpoint::new(addr.to_string(), "data.json")).await);
    }

    #[tokio::test]
    async fn probe_rejects_refused_connection() {
        let port = free_port().await;
        let client = Client::new();
        let ep = Endpoint::new(format!("127.0.0.1:{port}"), "data.json");
        assert!(!probe(&client, &ep).await);
    }

    #[tokio::test]
    async fn run_records_hosts_and_run_row() {
        let db = Db::open_in_memory().unwrap();
        let addr = stub_server("200 OK", telemetry_body()).await;
        let opts = ScanOptions {
            port: addr.port(),
            ..ScanOptions::default()
        };

        let summary = run(&db, vec![Ipv4Addr::new(127, 0, 0, 1), Ipv4Addr::new(127, 0, 0, 2)], &opts)
            .await
            .unwrap();
        assert_eq!(summary.probed, 2);
        assert_eq!(summary.responsive, 1);
        assert_eq!(summary.duration_secs, summary.ended_at - summary.started_at);

        let hosts = db.hosts().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].address, format!("127.0.0.1:{}", addr.port()));

        let runs = db.recent_scan_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, summary.run_id);
    }

    #[tokio::test]
    async fn empty_range_still_logs_run() {
        let db = Db::open_in_memory().unwrap();
        let summary = run(&db, Vec::new(), &ScanOptions::default()).await.unwrap();
        assert_eq!(summary.probed, 0);
        assert_eq!(summary.responsive, 0);
        assert_eq!(db.recent_scan_runs(10).unwrap().len(), 1);
        assert!(db.hosts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn qps_pacing_spreads_probes() {
        let db = Db::open_in_memory().unwrap();
        let addr = stub_server("200 OK", telemetry_body()).await;
        let opts = ScanOptions {
            port: addr.port(),
            qps: Some(50),
            ..ScanOptions::default()
        };

        let begun = std::time::Instant::now();
        let summary = run(&db, vec![Ipv4Addr::new(127, 0, 0, 1); 3], &opts)
            .await
            .unwrap();
        // one launch per 20 ms token; the first token is immediate
        assert!(begun.elapsed() >= Duration::from_millis(30));
        assert_eq!(summary.probed, 3);
        assert_eq!(summary.responsive, 3);
    }

    #[tokio::test]
    async fn dead_addresses_finish_within_timeout_budget() {
        let db = Db::open_in_memory().unwrap();
        let opts = ScanOptions {
            connect_timeout_ms: 250,
            timeout_ms: 250,
            concurrency: 8,
            ..ScanOptions::default()
        };
        let addrs: Vec<Ipv4Addr> = (1..=8).map(|i| Ipv4Addr::new(203, 0, 113, i)).collect();

        let begun = std::time::Instant::now();
        let summary = run(&db, addrs, &opts).await.unwrap();
        assert!(begun.elapsed() < Duration::from_secs(5));
        assert_eq!(summary.responsive, 0);
    }
}
