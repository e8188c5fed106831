//! ARDLink bridge
//!
//! Connects to one vehicle, publishes its navdata, and forwards bus messages
//! to it as AT commands.

pub mod config;
pub mod input;

pub use config::*;
pub use input::*;
