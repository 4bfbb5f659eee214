//! netmux CLI Configuration
//!
//! One TOML file carries the multiplexer configuration and the loopback
//! engine settings:
//!
//! ```toml
//! [netmux.queue]
//! max_clients = 4
//! queue_capacity = 8
//!
//! [loopback]
//! receive_window = 512
//! hosts = { "echo.local" = "10.0.0.1" }
//! ```
//!
//! Missing sections fall back to defaults; command line flags win over the file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use netmux_core::NetmuxConfig;
use netmux_harness::LoopbackConfig;

use crate::error::{CliError, Result};

/// Complete configuration for the CLI application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Multiplexer capacities and timers
    pub netmux: NetmuxConfig,
    /// Simulated engine behavior
    pub loopback: LoopbackConfig,
}

impl AppConfig {
    /// Load and validate a configuration file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.netmux.validate()?;
        if self.loopback.receive_window == 0 {
            return Err(CliError::Config("loopback receive_window must be non-zero".into()));
        }
        // Echo scenarios need a server client and a peer client
        if self.netmux.queue.max_clients < 2 {
            return Err(CliError::Config("scenarios need at least two clients".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.netmux, NetmuxConfig::default());
        assert_eq!(config.loopback.receive_window, 4096);
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let text = r#"
            [netmux.queue]
            max_clients = 3
            queue_capacity = 8

            [loopback]
            receive_window = 128
            hosts = { "echo.local" = "10.0.0.1" }
        "#;
        let config = AppConfig::from_toml(text).unwrap();
        assert_eq!(config.netmux.queue.queue_capacity, 8);
        assert_eq!(config.netmux.registry.tcp_sockets, 5);
        assert_eq!(config.loopback.receive_window, 128);
        assert!(config.loopback.hosts.contains_key("echo.local"));
    }

    #[test]
    fn test_single_client_rejected() {
        let text = "[netmux.queue]\nmax_clients = 1\nqueue_capacity = 4\n";
        assert!(matches!(AppConfig::from_toml(text), Err(CliError::Config(_))));
    }

    #[test]
    fn test_invalid_netmux_config_rejected() {
        let text = "[netmux.registry]\ntcp_sockets = 0\nudp_sockets = 0\n";
        assert!(matches!(AppConfig::from_toml(text), Err(CliError::Net(_))));
    }
}
