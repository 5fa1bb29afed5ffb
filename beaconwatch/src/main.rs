use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use subnet_scan::ScanOptions;
use telemetry_poll::PollOptions;
use telemetry_store::Db;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json }

mod config;
mod server;

const DEFAULT_DB: &str = "beaconwatch.db";
const DEFAULT_SAMPLE_LOG: &str = "beacons.csv";
const DEFAULT_RANGE: &str = "192.168.1.0/24";
const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_RECENT_WINDOW_SECS: i64 = 180;
const DEFAULT_BEACON_WINDOW_SECS: i64 = 86_400;

#[derive(Debug, Parser)]
#[command(name = "beaconwatch", version, about = "Subnet sweeper and beacon proximity collector")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./beaconwatch.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Sweep an IPv4 range once for live telemetry endpoints
    Scan {
        /// IPv4 CIDR to sweep (e.g., 192.168.1.0/24)
        #[arg(long, default_value = DEFAULT_RANGE)]
        range: String,
        /// Port the telemetry endpoint listens on
        #[arg(long, default_value_t = 80)]
        port: u16,
        /// Telemetry document path on each device
        #[arg(long, default_value = "data.json")]
        path: String,
        /// Connect timeout per probe in milliseconds
        #[arg(long, default_value_t = 1000)]
        connect_timeout_ms: u64,
        /// Total timeout per probe in milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
        /// Max concurrent probes
        #[arg(long, default_value_t = 64)]
        concurrency: usize,
        /// QPS cap for probe launches; 0 disables pacing
        #[arg(long, default_value_t = 0)]
        qps: u32,
        /// Output format: text or json
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Poll every known host once for new beacon samples
    Poll {
        /// Telemetry document path on each device
        #[arg(long, default_value = "data.json")]
        path: String,
        /// Connect timeout per fetch in milliseconds
        #[arg(long, default_value_t = 1000)]
        connect_timeout_ms: u64,
        /// Total timeout per fetch in milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
        /// Max concurrent fetches
        #[arg(long, default_value_t = 16)]
        concurrency: usize,
        /// CSV file mirroring newly accepted samples
        #[arg(long, value_name = "FILE", default_value = DEFAULT_SAMPLE_LOG)]
        log: PathBuf,
        /// Output format: text or json
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print known hosts, run history, and windowed pair averages
    Report {
        /// Recency window for pair averages in seconds
        #[arg(long, default_value_t = DEFAULT_RECENT_WINDOW_SECS)]
        recent_window_secs: i64,
        /// Window for beacon-only averages in seconds
        #[arg(long, default_value_t = DEFAULT_BEACON_WINDOW_SECS)]
        beacon_window_secs: i64,
        /// Output format: text or json
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Serve the HTTP trigger endpoints
    Serve {
        /// Listen address (host:port)
        #[arg(long, default_value = DEFAULT_LISTEN)]
        listen: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    let loaded_cfg = config::load_config(cli.config.as_deref());
    let db_path = cli
        .db
        .clone()
        .or_else(|| loaded_cfg.as_ref().and_then(|c| c.db.clone()))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB));
    match cli.command {
        Commands::Version => {
            println!("beaconwatch {} (core {})", env!("CARGO_PKG_VERSION"), beaconwatch_core::version());
        }
        Commands::Scan { mut range, mut port, mut path, mut connect_timeout_ms, mut timeout_ms, mut concurrency, mut qps, format } => {
            if let Some(cfg) = &loaded_cfg { if let Some(s) = &cfg.scan {
                if s.range.is_some() { range = s.range.clone().unwrap(); }
                if s.port.is_some() { port = s.port.unwrap(); }
                if s.path.is_some() { path = s.path.clone().unwrap(); }
                if s.connect_timeout_ms.is_some() { connect_timeout_ms = s.connect_timeout_ms.unwrap(); }
                if s.timeout_ms.is_some() { timeout_ms = s.timeout_ms.unwrap(); }
                if s.concurrency.is_some() { concurrency = s.concurrency.unwrap(); }
                if s.qps.is_some() { qps = s.qps.unwrap(); }
            }}
            let opts = ScanOptions {
                telemetry_path: path,
                port,
                connect_timeout_ms,
                timeout_ms,
                concurrency,
                qps: if qps == 0 { None } else { Some(qps) },
            };
            let addrs = subnet_scan::expand_cidr(&range)?;
            let db = Db::open_or_create(&db_path)?;
            let rt = tokio::runtime::Runtime::new()?;
            let summary = rt.block_on(async { subnet_scan::run(&db, addrs, &opts).await })?;
            match format {
                OutputFormat::Text => println!(
                    "run {}: {} of {} hosts responsive ({} s)",
                    summary.run_id, summary.responsive, summary.probed, summary.duration_secs
                ),
                OutputFormat::Json => println!("{}", serde_json::to_string(&summary)?),
            }
        }
        Commands::Poll { mut path, mut connect_timeout_ms, mut timeout_ms, mut concurrency, mut log, format } => {
            if let Some(cfg) = &loaded_cfg { if let Some(p) = &cfg.poll {
                if p.path.is_some() { path = p.path.clone().unwrap(); }
                if p.connect_timeout_ms.is_some() { connect_timeout_ms = p.connect_timeout_ms.unwrap(); }
                if p.timeout_ms.is_some() { timeout_ms = p.timeout_ms.unwrap(); }
                if p.concurrency.is_some() { concurrency = p.concurrency.unwrap(); }
                if p.log.is_some() { log = p.log.clone().unwrap(); }
            }}
            let opts = PollOptions {
                telemetry_path: path,
                connect_timeout_ms,
                timeout_ms,
                concurrency,
                log_path: log,
            };
            let db = Db::open_or_create(&db_path)?;
            let rt = tokio::runtime::Runtime::new()?;
            let report = rt.block_on(async { telemetry_poll::run(&db, &opts).await })?;
            match format {
                OutputFormat::Text => println!(
                    "polled {} hosts: {} new samples, {} skipped",
                    report.polled, report.ingested, report.skipped.len()
                ),
                OutputFormat::Json => println!("{}", serde_json::to_string(&report)?),
            }
        }
        Commands::Report { mut recent_window_secs, mut beacon_window_secs, format } => {
            if let Some(cfg) = &loaded_cfg { if let Some(r) = &cfg.report {
                if r.recent_window_secs.is_some() { recent_window_secs = r.recent_window_secs.unwrap(); }
                if r.beacon_window_secs.is_some() { beacon_window_secs = r.beacon_window_secs.unwrap(); }
            }}
            let db = Db::open_or_create(&db_path)?;
            let now = now_unix();
            let hosts = db.hosts()?;
            let runs = db.recent_scan_runs(10)?;
            let recent = db.recent_pair_averages(now, recent_window_secs)?;
            let beacons = db.beacon_pair_averages(now, beacon_window_secs)?;
            match format {
                OutputFormat::Text => {
                    println!("report at {}", now_rfc3339());
                    println!("hosts ({}):", hosts.len());
                    for h in &hosts { println!("  {} last seen {}", h.address, h.last_seen); }
                    println!("runs ({}):", runs.len());
                    for r in &runs { println!("  run {}: {} s", r.run_id, r.duration_secs); }
                    println!("pair averages over {} s ({}):", recent_window_secs, recent.len());
                    for p in &recent {
                        println!("  {} -> {}: rssi {:.1}, distance {:.2} m", p.emitter_mac, p.observer_mac, p.avg_rssi, p.avg_distance);
                    }
                    println!("beacon averages over {} s ({}):", beacon_window_secs, beacons.len());
                    for p in &beacons {
                        println!("  {} -> {}: rssi {:.1}, distance {:.2} m", p.emitter_mac, p.observer_mac, p.avg_rssi, p.avg_distance);
                    }
                }
                OutputFormat::Json => {
                    let obj = serde_json::json!({
                        "ipData": hosts,
                        "runtimeData": runs,
                        "avgDistanceData": recent,
                        "beaconAvgDistanceData": beacons,
                    });
                    println!("{}", serde_json::to_string(&obj)?);
                }
            }
        }
        Commands::Serve { mut listen } => {
            if let Some(cfg) = &loaded_cfg { if let Some(s) = &cfg.serve {
                if s.listen.is_some() { listen = s.listen.clone().unwrap(); }
            }}
            let settings = server::Settings::from_config(loaded_cfg.as_ref());
            let db = Db::open_or_create(&db_path)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(server::serve(&listen, db, settings))?;
        }
    }
    Ok(())
}
