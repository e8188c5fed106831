//! ARDLink bridge process
//!
//! Publishes navdata to stdout as `topic=payload` lines and reads
//! `TOPIC PAYLOAD` lines from stdin, forwarding them to the vehicle.

use std::env;
use std::io::{self, BufRead};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use ardbridge_lib::{config::constants, handle_line, load_config};
use ardlib::{format_frame, NavData, VehicleLink};

/// How often the main loop checks the running flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| constants::DEFAULT_CONFIG_PATH.to_string());

    info!("ARDBridge starting, configuration {}", config_path);

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let link = match VehicleLink::from_config(&config.link) {
        Ok(link) => link,
        Err(e) => {
            error!("Failed to connect to {}: {}", config.link.address, e);
            process::exit(1);
        }
    };

    let topic = config.publish_topic.clone();
    let json_mode = config.json_mode;
    let publish = move |frame: &NavData| match format_frame(&topic, frame, json_mode) {
        Ok(publications) => {
            for publication in publications {
                println!("{}", publication);
            }
        }
        Err(e) => warn!("Failed to format navdata {}: {}", frame.sequence, e),
    };
    if let Err(e) = link.start_telemetry(publish, config.link.navdata_interval_ms) {
        error!("Failed to start navdata receiver: {}", e);
        process::exit(1);
    }

    // Visual feedback of connection
    if config.blink_on_connect_secs > 0 {
        if let Err(e) = link.blink(config.blink_on_connect_secs) {
            warn!("Blink failed: {}", e);
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    // Stdin blocks, so lines arrive through a channel
    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    info!("ARDBridge running, publishing under {}", config.publish_topic);

    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => {
                handle_line(&link, &line);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                info!("Input closed");
                break;
            }
        }
    }

    link.stop_telemetry();
    info!("ARDBridge shutdown complete");
}

/// Set up Ctrl+C handler for graceful shutdown
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    }) {
        error!("Failed to set Ctrl+C handler: {}", e);
    }
}
