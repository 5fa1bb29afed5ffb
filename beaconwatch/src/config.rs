use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ScanConfig {
    pub range: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub qps: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct PollConfig {
    pub path: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub log: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ReportConfig {
    pub recent_window_secs: Option<i64>,
    pub beacon_window_secs: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ServeConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub db: Option<PathBuf>,
    pub scan: Option<ScanConfig>,
    pub poll: Option<PollConfig>,
    pub report: Option<ReportConfig>,
    pub serve: Option<ServeConfig>,
}

pub fn load_config(path: Option<&Path>) -> Option<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new("beaconwatch.yaml");
            if p.exists() { p.to_path_buf() } else { return None; }
        }
    };
    let s = fs::read_to_string(path).ok()?;
    serde_yaml::from_str(&s).ok()
}
