//! CLI configuration via environment variables
//!
//! Only presentation settings live here; build settings come from
//! `pyshield.toml` and `PYSHIELD_*` variables via `pyshield-config`.

use std::env;

/// Environment variable holding a tracing filter directive
pub const LOG_ENV: &str = "PYSHIELD_LOG";

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Disable colored output (PYSHIELD_NO_COLOR=1 or NO_COLOR=1)
    pub no_color: bool,
    /// Explicit log filter (PYSHIELD_LOG=debug)
    pub log_filter: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            no_color: env::var("PYSHIELD_NO_COLOR").is_ok() || env::var("NO_COLOR").is_ok(),
            log_filter: env::var(LOG_ENV).ok().filter(|v| !v.trim().is_empty()),
        }
    }

    /// Filter used when PYSHIELD_LOG is unset
    pub fn default_filter(verbosity: u8) -> &'static str {
        match verbosity {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
