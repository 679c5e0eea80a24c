//! Server configuration.
//!
//! Plain data with defaults. Where it comes from (file, environment, flags)
//! is up to the application; `ServerConfig` derives `Deserialize` so any
//! serde format works.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

use crate::middleware::cors::CorsPolicy;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    /// `0` asks the OS for a free port.
    pub port: u16,
    pub enable_cors: bool,
    pub cors: CorsPolicy,
    /// Register `/healthz` and `/readyz`.
    pub enable_predefined_routes: bool,
    /// Stamp access-log records in UTC instead of local time.
    pub logger_utc: bool,
    /// Stop gracefully on SIGTERM / Ctrl-C.
    pub shutdown_on_signal: bool,
    /// Drain deadline used when a signal triggers the shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            enable_cors: false,
            cors: CorsPolicy::default(),
            enable_predefined_routes: false,
            logger_utc: false,
            shutdown_on_signal: true,
            shutdown_grace_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
