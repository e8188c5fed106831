//! Configuration loading for the bridge

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};
use ardlib::{ArdResult, LinkConfig};

/// Configuration constants
pub mod constants {
    /// Config file read when none is given on the command line
    pub const DEFAULT_CONFIG_PATH: &str = "ardbridge.json";

    /// Topic navdata is published under
    pub const DEFAULT_PUBLISH_TOPIC: &str = "ardrone/navdata";

    /// LED blink on connect, as visual confirmation
    pub const BLINK_ON_CONNECT_SECS: u32 = 6;
}

/// Bridge process configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Vehicle link settings, at the top level of the file
    #[serde(flatten)]
    pub link: LinkConfig,
    pub publish_topic: String,
    /// Publish each frame as one JSON document instead of one message per field
    pub json_mode: bool,
    /// Zero disables the blink
    pub blink_on_connect_secs: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            publish_topic: constants::DEFAULT_PUBLISH_TOPIC.to_string(),
            json_mode: true,
            blink_on_connect_secs: constants::BLINK_ON_CONNECT_SECS,
        }
    }
}

/// Load the bridge configuration from a JSON file. A missing file gives the
/// defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> ArdResult<BridgeConfig> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("{} not found, using default configuration", path.display());
            return Ok(BridgeConfig::default());
        }
        Err(e) => return Err(e.into()),
    };
    let reader = BufReader::new(file);
    let config: BridgeConfig = serde_json::from_reader(reader)?;
    config.link.validate()?;
    Ok(config)
}
