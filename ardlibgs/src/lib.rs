//! ARDLink Shared Library (ardlibgs)
//!
//! This library contains the vehicle protocol definitions shared between the
//! link library (ardlib), the bridge process, and the vehicle simulator.

pub mod commands;
pub mod config;
pub mod error;
pub mod navdata;
pub mod state;

pub use commands::*;
pub use config::*;
pub use error::*;
pub use navdata::*;
pub use state::*;
