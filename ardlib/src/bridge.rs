//! Message bus mapping
//!
//! Turns incoming `(topic, payload)` messages into link operations and
//! renders navdata frames as outgoing `(topic, payload)` publications.

use std::fmt;

use log::debug;
use serde_json::Value;
use ardlibgs::{ArdResult, AtVerb, NavData};

use crate::link::VehicleLink;

/// Topic segment names understood besides the raw AT verbs
pub mod topics {
    pub const NAVDATA: &str = "NAVDATA";
    pub const TRIM: &str = "TRIM";
    pub const RESET: &str = "RESET";
    pub const TAKEOFF: &str = "TAKEOFF";
    pub const LAND: &str = "LAND";
}

/// Command received from the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    /// Send `verb` with the message payload as is
    Raw(AtVerb, String),
    Reset,
    Takeoff,
    Land,
    FlatTrim,
    StopTelemetry,
    /// Optionally switch the stream mode or the dispatch interval, then start
    StartTelemetry {
        demo_only: Option<bool>,
        interval_ms: Option<i64>,
    },
}

impl BridgeCommand {
    /// Map a message by the last `/`-separated segment of its topic.
    /// Returns `None` for names nothing is bound to.
    pub fn parse(topic: &str, payload: &str) -> Option<Self> {
        let name = topic.rsplit('/').next().unwrap_or(topic);

        if let Some(verb) = AtVerb::from_name(name) {
            return Some(BridgeCommand::Raw(verb, payload.to_string()));
        }

        let command = match name {
            topics::RESET => BridgeCommand::Reset,
            topics::TAKEOFF => BridgeCommand::Takeoff,
            topics::LAND => BridgeCommand::Land,
            topics::TRIM => BridgeCommand::FlatTrim,
            topics::NAVDATA => Self::parse_navdata(payload),
            _ => {
                debug!("No command bound to topic {:?}", topic);
                return None;
            }
        };
        Some(command)
    }

    fn parse_navdata(payload: &str) -> Self {
        let kind = payload.trim().to_lowercase();
        match kind.as_str() {
            "stop" => BridgeCommand::StopTelemetry,
            "demo" => BridgeCommand::StartTelemetry {
                demo_only: Some(true),
                interval_ms: None,
            },
            "all" => BridgeCommand::StartTelemetry {
                demo_only: Some(false),
                interval_ms: None,
            },
            _ => BridgeCommand::StartTelemetry {
                demo_only: None,
                interval_ms: kind.parse::<i64>().ok(),
            },
        }
    }

    /// Execute on `link`
    pub fn apply(&self, link: &VehicleLink) -> ArdResult<()> {
        match self {
            BridgeCommand::Raw(verb, payload) => link.send_raw(*verb, payload),
            BridgeCommand::Reset => link.reset(),
            BridgeCommand::Takeoff => link.takeoff(),
            BridgeCommand::Land => link.land(),
            BridgeCommand::FlatTrim => link.flat_trim(),
            BridgeCommand::StopTelemetry => {
                link.stop_telemetry();
                Ok(())
            }
            BridgeCommand::StartTelemetry {
                demo_only,
                interval_ms,
            } => {
                if let Some(interval_ms) = interval_ms {
                    link.set_telemetry_interval(*interval_ms);
                }
                if let Some(demo_only) = demo_only {
                    link.set_telemetry_mode(*demo_only)?;
                }
                link.resume_telemetry()
            }
        }
    }
}

/// One outgoing bus message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
}

impl fmt::Display for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.topic, self.payload)
    }
}

/// Render `frame` for publishing under `prefix`: the whole frame as one JSON
/// document, or one `prefix/FIELD` message per top-level field.
pub fn format_frame(prefix: &str, frame: &NavData, json_mode: bool) -> ArdResult<Vec<Publication>> {
    if json_mode {
        return Ok(vec![Publication {
            topic: prefix.to_string(),
            payload: serde_json::to_string(frame)?,
        }]);
    }

    let prefix = prefix.trim_end_matches('/');
    let publications = match serde_json::to_value(frame)? {
        Value::Object(fields) => fields
            .into_iter()
            .map(|(key, value)| Publication {
                topic: format!("{}/{}", prefix, key.to_uppercase()),
                payload: value.to_string(),
            })
            .collect(),
        other => vec![Publication {
            topic: prefix.to_string(),
            payload: other.to_string(),
        }],
    };
    Ok(publications)
}
