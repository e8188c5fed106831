//! Simulator configuration

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};
use ardlibgs::{constants, ArdResult};

/// Simulated vehicle settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    /// Local address both ports are bound on
    pub bind_address: String,
    pub command_port: u16,
    pub navdata_port: u16,
    /// Time between navdata frames
    pub frame_interval_ms: u64,
    /// Battery drained per second of flight, in percent
    pub battery_drain_per_sec: f32,
    /// Altitude reached after takeoff
    pub hover_altitude_mm: i32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            command_port: constants::COMMAND_PORT,
            navdata_port: constants::NAVDATA_PORT,
            frame_interval_ms: 66,
            battery_drain_per_sec: 0.1,
            hover_altitude_mm: 1000,
        }
    }
}

impl SimConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Load the simulator configuration. A missing file gives the defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> ArdResult<SimConfig> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("{} not found, using default configuration", path.display());
            return Ok(SimConfig::default());
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(br#"{"command_port": 7556, "frame_interval_ms": 20}"#)
            .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.command_port, 7556);
        assert_eq!(config.navdata_port, 5554);
        assert_eq!(config.frame_interval(), Duration::from_millis(20));
        assert_eq!(config.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_config(dir.path().join("sim.json")).unwrap(), SimConfig::default());
    }
}
