//! Simulated vehicle
//!
//! Listens for AT commands on the command port, and streams navdata frames
//! to whoever sent the last handshake on the navdata port.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::Rng;
use ardlibgs::{
    is_timeout, parse_address, ArdResult, AtCommand, AtVerb, ControlState, DemoOption,
    NavDataBuilder, MAX_PACKET_SIZE, NAVDATA_HANDSHAKE, REF_LAND, REF_RESET_EMERGENCY,
    REF_TAKEOFF,
};

use crate::config::SimConfig;

/// State word bits the simulator drives
mod bits {
    pub const FLYING: u32 = 1 << 0;
    pub const CONTROL_RECEIVED: u32 = 1 << 6;
    pub const TRIM_RECEIVED: u32 = 1 << 7;
    pub const NAVDATA_DEMO_ONLY: u32 = 1 << 10;
    pub const BATTERY_TOO_LOW: u32 = 1 << 15;
    pub const AT_CODEC_THREAD_ON: u32 = 1 << 24;
    pub const NAVDATA_THREAD_ON: u32 = 1 << 25;
    pub const COMMUNICATION_PROBLEM: u32 = 1 << 30;
    pub const EMERGENCY: u32 = 1 << 31;
}

/// Battery level raising the low battery flag
const LOW_BATTERY: f32 = 20.0;

/// Climb or descent rate
const VERTICAL_SPEED_MM_PER_SEC: f32 = 500.0;

/// Silence after which the communication watchdog trips
const COMMAND_WATCHDOG: Duration = Duration::from_secs(2);

/// Receive poll interval for the worker threads
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Flight model driven by AT commands
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub control_state: ControlState,
    pub emergency: bool,
    pub demo_only: bool,
    pub trimmed: bool,
    pub command_seen: bool,
    /// Time since the last command
    pub since_command: Duration,
    /// Percent
    pub battery: f32,
    pub altitude_mm: f32,
    pub max_altitude_mm: i32,
    pub hover_altitude_mm: i32,
    pub battery_drain_per_sec: f32,
    pub last_sequence: Option<u32>,
    pub leds: Option<String>,
}

impl VehicleState {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            control_state: ControlState::Landed,
            emergency: false,
            demo_only: false,
            trimmed: false,
            command_seen: false,
            since_command: Duration::ZERO,
            battery: 100.0,
            altitude_mm: 0.0,
            max_altitude_mm: ardlibgs::constants::DEFAULT_MAX_ALTITUDE_MM as i32,
            hover_altitude_mm: config.hover_altitude_mm,
            battery_drain_per_sec: config.battery_drain_per_sec,
            last_sequence: None,
            leds: None,
        }
    }

    pub fn flying(&self) -> bool {
        !matches!(self.control_state, ControlState::Landed | ControlState::Default)
    }

    /// Apply one received command
    pub fn apply(&mut self, cmd: &AtCommand) {
        self.command_seen = true;
        self.last_sequence = Some(cmd.sequence);
        self.since_command = Duration::ZERO;
        let payload = cmd.payload.as_deref().unwrap_or("");

        match cmd.verb {
            AtVerb::Ref => match payload.parse::<u32>() {
                Ok(REF_TAKEOFF) => self.takeoff(),
                Ok(REF_LAND) => self.land(),
                Ok(REF_RESET_EMERGENCY) => {
                    if self.emergency {
                        info!("Emergency cleared");
                    }
                    self.emergency = false;
                }
                _ => debug!("Unhandled REF {:?}", payload),
            },
            AtVerb::Config => self.configure(payload),
            AtVerb::Ftrim => {
                if self.flying() {
                    warn!("Flat trim ignored while flying");
                } else {
                    self.trimmed = true;
                }
            }
            AtVerb::Led => self.leds = Some(payload.to_string()),
            AtVerb::Comwdg | AtVerb::Pcmd | AtVerb::Ctrl | AtVerb::Anim => {
                debug!("{} {:?} accepted", cmd.verb, payload)
            }
        }
    }

    fn takeoff(&mut self) {
        if self.emergency {
            warn!("Takeoff refused, emergency set");
            return;
        }
        if !self.flying() {
            info!("Taking off");
            self.control_state = ControlState::TransitionTakeoff;
        }
    }

    fn land(&mut self) {
        if self.flying() {
            info!("Landing");
            self.control_state = ControlState::TransitionLanding;
        }
    }

    fn configure(&mut self, payload: &str) {
        let Some((key, value)) = payload.split_once(',') else {
            warn!("Malformed CONFIG {:?}", payload);
            return;
        };
        let key = key.trim_matches('"');
        let value = value.trim_matches('"');

        match key {
            "control:altitude_max" => match value.parse::<i32>() {
                Ok(mm) => self.max_altitude_mm = mm,
                Err(e) => warn!("Bad altitude_max {:?}: {}", value, e),
            },
            "general:navdata_demo" => self.demo_only = value.eq_ignore_ascii_case("TRUE"),
            _ => debug!("Ignoring config key {}", key),
        }
    }

    /// Advance the flight model by `dt`
    pub fn tick(&mut self, dt: Duration) {
        self.since_command += dt;
        let secs = dt.as_secs_f32();
        let target = self.hover_altitude_mm.min(self.max_altitude_mm) as f32;
        let step = VERTICAL_SPEED_MM_PER_SEC * secs;

        match self.control_state {
            ControlState::TransitionTakeoff => {
                self.altitude_mm = (self.altitude_mm + step).min(target);
                if self.altitude_mm >= target {
                    self.control_state = ControlState::Hovering;
                }
            }
            ControlState::TransitionLanding => {
                self.altitude_mm = (self.altitude_mm - step).max(0.0);
                if self.altitude_mm <= 0.0 {
                    self.control_state = ControlState::Landed;
                }
            }
            _ => {}
        }

        if self.flying() {
            self.battery = (self.battery - self.battery_drain_per_sec * secs).max(0.0);
            if self.battery <= 0.0 && !self.emergency {
                warn!("Battery empty, emergency");
                self.emergency = true;
                self.control_state = ControlState::Landed;
                self.altitude_mm = 0.0;
            }
        }
    }

    pub fn watchdog_tripped(&self) -> bool {
        self.command_seen && self.since_command > COMMAND_WATCHDOG
    }

    /// State word for the navdata header
    pub fn state_word(&self) -> u32 {
        let mut state = bits::AT_CODEC_THREAD_ON | bits::NAVDATA_THREAD_ON;
        let set = [
            (self.flying(), bits::FLYING),
            (self.command_seen, bits::CONTROL_RECEIVED),
            (self.trimmed, bits::TRIM_RECEIVED),
            (self.demo_only, bits::NAVDATA_DEMO_ONLY),
            (self.battery < LOW_BATTERY, bits::BATTERY_TOO_LOW),
            (self.watchdog_tripped(), bits::COMMUNICATION_PROBLEM),
            (self.emergency, bits::EMERGENCY),
        ];
        for (on, bit) in set {
            if on {
                state |= bit;
            }
        }
        state
    }

    /// Encode the current state as a navdata datagram. Attitude noise comes
    /// from `rng` while flying.
    pub fn frame<R: Rng>(&self, sequence: u32, rng: &mut R) -> Vec<u8> {
        let (theta, phi, psi) = if self.flying() {
            (
                rng.gen_range(-2000.0..2000.0),
                rng.gen_range(-2000.0..2000.0),
                rng.gen_range(-180_000.0..180_000.0),
            )
        } else {
            (0.0, 0.0, 0.0)
        };
        let altitude = self.altitude_mm.round() as i32;

        let builder = NavDataBuilder::new(sequence, self.state_word()).demo(DemoOption {
            control_state: self.control_state.code().unwrap_or(0),
            battery: self.battery.round() as i32,
            theta,
            phi,
            psi,
            altitude,
        });
        let builder = if self.demo_only {
            builder
        } else {
            builder.wifi(rng.gen_range(0..=500)).altitude(altitude)
        };
        builder.build_with_checksum()
    }
}

/// Simulator sockets and shared state
pub struct Simulator {
    config: SimConfig,
    commands: UdpSocket,
    navdata: UdpSocket,
    state: Arc<Mutex<VehicleState>>,
}

impl Simulator {
    pub fn bind(config: SimConfig) -> ArdResult<Self> {
        let ip = parse_address(&config.bind_address)?;
        let commands = UdpSocket::bind(SocketAddr::new(ip, config.command_port))?;
        let navdata = UdpSocket::bind(SocketAddr::new(ip, config.navdata_port))?;
        commands.set_read_timeout(Some(POLL_TIMEOUT))?;
        navdata.set_read_timeout(Some(POLL_TIMEOUT))?;

        let state = Arc::new(Mutex::new(VehicleState::new(&config)));
        Ok(Self {
            config,
            commands,
            navdata,
            state,
        })
    }

    pub fn command_addr(&self) -> ArdResult<SocketAddr> {
        Ok(self.commands.local_addr()?)
    }

    pub fn navdata_addr(&self) -> ArdResult<SocketAddr> {
        Ok(self.navdata.local_addr()?)
    }

    pub fn state(&self) -> Arc<Mutex<VehicleState>> {
        Arc::clone(&self.state)
    }

    /// Start the command and navdata threads; both exit once `running` clears
    pub fn run(self, running: Arc<AtomicBool>) -> ArdResult<Vec<JoinHandle<()>>> {
        info!(
            "Simulated vehicle on commands {} navdata {}",
            self.commands.local_addr()?,
            self.navdata.local_addr()?
        );

        let mut handles = Vec::new();

        let commands = CommandListener {
            socket: self.commands,
            state: Arc::clone(&self.state),
        };
        let r = running.clone();
        handles.push(
            thread::Builder::new()
                .name("sim-commands".to_string())
                .spawn(move || commands.run(r))?,
        );

        let streamer = NavdataStreamer {
            socket: self.navdata,
            state: self.state,
            interval: self.config.frame_interval(),
        };
        handles.push(
            thread::Builder::new()
                .name("sim-navdata".to_string())
                .spawn(move || streamer.run(running))?,
        );

        Ok(handles)
    }
}

fn lock(state: &Mutex<VehicleState>) -> MutexGuard<'_, VehicleState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct CommandListener {
    socket: UdpSocket,
    state: Arc<Mutex<VehicleState>>,
}

impl CommandListener {
    fn run(&self, running: Arc<AtomicBool>) {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];

        while running.load(Ordering::SeqCst) {
            let (n, from) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    warn!("Command receive error: {}", e);
                    continue;
                }
            };

            let text = String::from_utf8_lossy(&buf[..n]);
            for cmd in AtCommand::parse_datagram(&text) {
                match cmd {
                    Ok(cmd) => {
                        debug!("{} -> {}", from, cmd);
                        lock(&self.state).apply(&cmd);
                    }
                    Err(e) => warn!("Bad command from {}: {}", from, e),
                }
            }
        }
    }
}

struct NavdataStreamer {
    socket: UdpSocket,
    state: Arc<Mutex<VehicleState>>,
    interval: Duration,
}

impl NavdataStreamer {
    fn run(&self, running: Arc<AtomicBool>) {
        let mut rng = rand::thread_rng();
        let mut buf = [0u8; 64];
        let mut client: Option<SocketAddr> = None;
        let mut sequence: u32 = 1;
        let mut last_tick = Instant::now();
        let mut last_send = Instant::now();

        while running.load(Ordering::SeqCst) {
            match self.receive_handshake(&mut buf) {
                Ok(Some(from)) => {
                    if client != Some(from) {
                        info!("Navdata client {}", from);
                    }
                    client = Some(from);
                }
                Ok(None) => {}
                Err(e) => warn!("Navdata receive error: {}", e),
            }

            let now = Instant::now();
            lock(&self.state).tick(now - last_tick);
            last_tick = now;

            let Some(to) = client else {
                continue;
            };
            if now.duration_since(last_send) < self.interval {
                continue;
            }

            let frame = lock(&self.state).frame(sequence, &mut rng);
            match self.socket.send_to(&frame, to) {
                Ok(_) => {
                    sequence = sequence.wrapping_add(1);
                }
                Err(e) => warn!("Navdata send to {} failed: {}", to, e),
            }
            last_send = now;
        }
    }

    /// Wait up to the poll timeout for a handshake. Other datagrams are ignored.
    fn receive_handshake(&self, buf: &mut [u8]) -> io::Result<Option<SocketAddr>> {
        match self.socket.recv_from(buf) {
            Ok((n, from)) if buf[..n] == NAVDATA_HANDSHAKE => Ok(Some(from)),
            Ok((n, from)) => {
                debug!("Ignoring {} byte datagram from {}", n, from);
                Ok(None)
            }
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
