//! Vehicle link configuration

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use crate::error::{ArdError, ArdResult};

/// Configuration constants
pub mod constants {
    use std::time::Duration;

    /// Address of the vehicle on its own access point
    pub const DEFAULT_ADDRESS: &str = "192.168.1.1";

    /// UDP port receiving AT commands
    pub const COMMAND_PORT: u16 = 5556;

    /// UDP port streaming navdata
    pub const NAVDATA_PORT: u16 = 5554;

    /// Minimum time between navdata dispatches
    pub const NAVDATA_INTERVAL_MS: i64 = 1000;

    /// Navdata receive timeout; every timeout resends the handshake
    pub const NAVDATA_TIMEOUT: Duration = Duration::from_secs(3);

    /// Command send timeout
    pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

    /// Altitude limit sent when the command channel opens
    pub const DEFAULT_MAX_ALTITUDE_MM: u32 = 2000;
}

/// Everything needed to reach one vehicle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LinkConfig {
    /// Vehicle IP address
    pub address: String,
    pub command_port: u16,
    pub telemetry_port: u16,
    /// Minimum milliseconds between dispatches, zero or less dispatches every frame
    pub navdata_interval_ms: i64,
    pub receive_timeout_ms: u64,
    pub max_altitude_mm: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: constants::DEFAULT_ADDRESS.to_string(),
            command_port: constants::COMMAND_PORT,
            telemetry_port: constants::NAVDATA_PORT,
            navdata_interval_ms: constants::NAVDATA_INTERVAL_MS,
            receive_timeout_ms: constants::NAVDATA_TIMEOUT.as_millis() as u64,
            max_altitude_mm: constants::DEFAULT_MAX_ALTITUDE_MM,
        }
    }
}

impl LinkConfig {
    pub fn new(address: impl Into<String>, command_port: u16, telemetry_port: u16) -> Self {
        Self {
            address: address.into(),
            command_port,
            telemetry_port,
            ..Default::default()
        }
    }

    /// Get the receive timeout as Duration
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn command_addr(&self) -> ArdResult<SocketAddr> {
        Ok(SocketAddr::new(parse_address(&self.address)?, self.command_port))
    }

    pub fn telemetry_addr(&self) -> ArdResult<SocketAddr> {
        Ok(SocketAddr::new(parse_address(&self.address)?, self.telemetry_port))
    }

    /// Reject values no link can work with
    pub fn validate(&self) -> ArdResult<()> {
        parse_address(&self.address)?;
        if self.command_port == 0 || self.telemetry_port == 0 {
            return Err(ArdError::Config("vehicle ports must be non-zero".to_string()));
        }
        if self.receive_timeout_ms == 0 {
            return Err(ArdError::Config("receive_timeout_ms must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Parse a literal IP address. Host names are not resolved.
pub fn parse_address(address: &str) -> ArdResult<IpAddr> {
    address
        .trim()
        .parse::<IpAddr>()
        .map_err(|e| ArdError::Address(format!("{:?}: {}", address, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LinkConfig::default();
        assert_eq!(config.address, "192.168.1.1");
        assert_eq!(config.command_port, 5556);
        assert_eq!(config.telemetry_port, 5554);
        assert_eq!(config.navdata_interval_ms, 1000);
        assert_eq!(config.receive_timeout(), Duration::from_secs(3));
        assert_eq!(config.max_altitude_mm, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("192.168.1.1").unwrap(), IpAddr::from([192, 168, 1, 1]));
        assert_eq!(parse_address(" 10.0.0.2 ").unwrap(), IpAddr::from([10, 0, 0, 2]));
        assert!(parse_address("::1").unwrap().is_loopback());
        assert!(matches!(parse_address("192.168.1"), Err(ArdError::Address(_))));
        assert!(matches!(parse_address("300.1.1.1"), Err(ArdError::Address(_))));
        assert!(matches!(parse_address("drone.local"), Err(ArdError::Address(_))));
    }

    #[test]
    fn test_socket_addrs() {
        let config = LinkConfig::new("127.0.0.1", 6000, 6001);
        assert_eq!(config.command_addr().unwrap(), "127.0.0.1:6000".parse().unwrap());
        assert_eq!(config.telemetry_addr().unwrap(), "127.0.0.1:6001".parse().unwrap());
        assert!(LinkConfig::new("nope", 1, 2).command_addr().is_err());
    }

    #[test]
    fn test_validate() {
        assert!(LinkConfig::new("127.0.0.1", 0, 5554).validate().is_err());
        let mut config = LinkConfig::default();
        config.receive_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ArdError::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: LinkConfig = serde_json::from_str(r#"{"address": "10.1.1.1"}"#).unwrap();
        assert_eq!(config.address, "10.1.1.1");
        assert_eq!(config.command_port, 5556);
        assert_eq!(config.navdata_interval_ms, 1000);
    }
}
