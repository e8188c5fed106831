//! ARDLink Vehicle Library (ardlib)
//!
//! This library drives one vehicle over its two UDP ports: sequenced AT
//! commands out, decoded navdata frames in, and the mapping between bus
//! messages and link operations used by the bridge.

pub mod bridge;
pub mod command;
pub mod link;
pub mod telemetry;

pub use bridge::*;
pub use command::*;
pub use link::*;
pub use telemetry::*;
pub use ardlibgs::*;
