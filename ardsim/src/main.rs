//! ARDLink Vehicle Simulator (ardsim)
//!
//! Stands in for a vehicle on the local machine:
//!
//! | Port | Default | Behavior                                               |
//! |------|---------|--------------------------------------------------------|
//! | AT   | 5556    | parses commands, drives takeoff/land/emergency/config  |
//! | Nav  | 5554    | streams navdata to the last handshake sender           |
//!
//! The configuration file is the first argument, `ardsim.json` by default.

mod config;
mod vehicle;

use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info};
use config::load_config;
use vehicle::Simulator;

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    info!("ARDSim vehicle simulator starting up");

    let config_path = env::args().nth(1).unwrap_or_else(|| "ardsim.json".to_string());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration {}: {}", config_path, e);
            process::exit(1);
        }
    };

    let simulator = match Simulator::bind(config) {
        Ok(simulator) => simulator,
        Err(e) => {
            error!("Failed to bind simulator sockets: {}", e);
            process::exit(1);
        }
    };
    let state = simulator.state();

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running_clone.store(false, Ordering::SeqCst);
    }) {
        error!("Failed to set Ctrl+C handler: {}", e);
    }

    let handles = match simulator.run(running.clone()) {
        Ok(handles) => handles,
        Err(e) => {
            error!("Failed to start simulator: {}", e);
            process::exit(1);
        }
    };

    // Periodic status line
    let mut ticks = 0u32;
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
        ticks += 1;
        if ticks % 50 == 0 {
            if let Ok(s) = state.lock() {
                info!(
                    "{:?} altitude {:.0}mm battery {:.1}% emergency {}",
                    s.control_state, s.altitude_mm, s.battery, s.emergency
                );
            }
        }
    }

    info!("Waiting for simulator threads to finish...");

    for handle in handles {
        let _ = handle.join();
    }

    info!("ARDSim shutdown complete");
}
