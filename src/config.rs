use crate::error::{Error, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "jparser", version, about = "Rate limited JSON and JSON:API pretty-printer")]
pub struct Config {
    /// Requests per second allowed for each client address
    #[arg(long = "rate-limit", env = "JPARSER_RATE_LIMIT", default_value_t = 1.0)]
    pub requests_per_second: f64,

    /// Server bind address
    #[arg(long, env = "JPARSER_BIND_ADDRESS", default_value = "0.0.0.0:8000")]
    pub bind_address: SocketAddr,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "JPARSER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// How long in-flight requests may run after a shutdown signal
    #[arg(long, env = "JPARSER_SHUTDOWN_GRACE_MS", default_value_t = 5000)]
    pub shutdown_grace_ms: u64,
}

impl Config {
    /// Load configuration from command line arguments and environment variables.
    /// Usage errors and `--help` are reported by clap, which exits the process.
    pub fn from_env() -> Result<Self> {
        let config = Config::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(Error::Config(format!(
                "rate limit must be a positive number, got {}",
                self.requests_per_second
            )));
        }
        Ok(())
    }

    /// Burst size of each client bucket: one second worth of requests, at least one.
    pub fn bucket_capacity(&self) -> f64 {
        self.requests_per_second.max(1.0)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8000)),
            log_level: "info".to_string(),
            shutdown_grace_ms: 5000,
        }
    }
}
