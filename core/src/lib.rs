//! Core utilities and shared types for the beaconwatch engine.

pub mod ratelimiter;

use std::fmt;
use std::net::Ipv4Addr;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// A device's telemetry endpoint: the authority we store in the host table
/// plus the well-known path the device serves its snapshot under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub authority: String,
    pub path: String,
}

impl Endpoint {
    pub fn new(authority: impl Into<String>, path: &str) -> Self {
        Endpoint {
            authority: authority.into(),
            path: path.trim_start_matches('/').to_string(),
        }
    }

    /// Full URL of the telemetry snapshot. Devices expose it over plain HTTP.
    pub fn url(&self) -> String {
        format!("http://{}/{}", self.authority, self.path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Authority string for a probed address. Port 80 is elided so the stored
/// host address matches what a browser or curl would show.
pub fn authority(addr: Ipv4Addr, port: u16) -> String {
    if port == 80 {
        addr.to_string()
    } else {
        format!("{addr}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }

    #[test]
    fn endpoint_url_joins_authority_and_path() {
        let ep = Endpoint::new("192.168.1.7", "data.json");
        assert_eq!(ep.url(), "http://192.168.1.7/data.json");
    }

    #[test]
    fn endpoint_trims_leading_slash() {
        let ep = Endpoint::new("192.168.1.7:8080", "/data.json");
        assert_eq!(ep.url(), "http://192.168.1.7:8080/data.json");
    }

    #[test]
    fn default_port_is_elided() {
        assert_eq!(authority(Ipv4Addr::new(10, 0, 0, 2), 80), "10.0.0.2");
        assert_eq!(authority(Ipv4Addr::new(10, 0, 0, 2), 8080), "10.0.0.2:8080");
    }
}
