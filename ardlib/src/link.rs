//! Vehicle link
//!
//! Composes the command channel and the navdata receiver for one vehicle.

use std::net::SocketAddr;
use std::sync::mpsc::Receiver;

use log::info;
use ardlibgs::{parse_address, ArdResult, AtVerb, InternalCommand, LinkConfig, NavData};

use crate::command::CommandChannel;
use crate::telemetry::{ReceiverState, SubscriberId, TelemetryReceiver};

/// Connection to a single vehicle
pub struct VehicleLink {
    commands: CommandChannel,
    telemetry: TelemetryReceiver,
}

impl VehicleLink {
    /// Connect with default timing. The address must be a literal IP address.
    pub fn connect(address: &str, command_port: u16, telemetry_port: u16) -> ArdResult<Self> {
        Self::from_config(&LinkConfig::new(address, command_port, telemetry_port))
    }

    /// Connect using every setting in `config`. Nothing is returned unless
    /// both sockets are open.
    pub fn from_config(config: &LinkConfig) -> ArdResult<Self> {
        config.validate()?;
        let ip = parse_address(&config.address)?;

        let commands = CommandChannel::open(
            SocketAddr::new(ip, config.command_port),
            config.max_altitude_mm,
        )?;
        let telemetry = TelemetryReceiver::bind(
            SocketAddr::new(ip, config.telemetry_port),
            config.receive_timeout(),
            config.navdata_interval_ms,
        )?;

        info!("Connected to vehicle at {}", ip);
        Ok(Self { commands, telemetry })
    }

    pub fn commands(&self) -> &CommandChannel {
        &self.commands
    }

    pub fn takeoff(&self) -> ArdResult<()> {
        self.commands.send_internal(InternalCommand::Takeoff, &[])
    }

    pub fn land(&self) -> ArdResult<()> {
        self.commands.send_internal(InternalCommand::Land, &[])
    }

    /// Clear the emergency state
    pub fn reset(&self) -> ArdResult<()> {
        self.commands.send_internal(InternalCommand::ResetEmergency, &[])
    }

    /// Blink the LEDs for `seconds`
    pub fn blink(&self, seconds: u32) -> ArdResult<()> {
        self.commands.send_internal(InternalCommand::Blink, &[&seconds])
    }

    pub fn set_telemetry_mode(&self, demo_only: bool) -> ArdResult<()> {
        self.commands.send_navdata_demo(demo_only)
    }

    pub fn send_raw(&self, verb: AtVerb, payload: &str) -> ArdResult<()> {
        self.commands.send_raw(verb, payload)
    }

    pub fn flat_trim(&self) -> ArdResult<()> {
        self.commands.send_internal(InternalCommand::FlatTrim, &[])
    }

    pub fn hover(&self) -> ArdResult<()> {
        self.commands.send_internal(InternalCommand::Hover, &[])
    }

    pub fn reset_watchdog(&self) -> ArdResult<()> {
        self.commands.send_internal(InternalCommand::Watchdog, &[])
    }

    pub fn set_max_altitude(&self, millimetres: u32) -> ArdResult<()> {
        self.commands.send_internal(InternalCommand::MaxAltitude, &[&millimetres])
    }

    /// Register `subscriber`, set the dispatch interval and start the
    /// receiver if it is not already running
    pub fn start_telemetry<F>(&self, subscriber: F, interval_ms: i64) -> ArdResult<SubscriberId>
    where
        F: Fn(&NavData) + Send + Sync + 'static,
    {
        self.telemetry.set_interval_ms(interval_ms);
        let id = self.telemetry.subscribers().add(subscriber);
        self.telemetry.start()?;
        Ok(id)
    }

    /// Start the receiver with the subscribers already registered
    pub fn resume_telemetry(&self) -> ArdResult<()> {
        self.telemetry.start()
    }

    pub fn stop_telemetry(&self) {
        self.telemetry.stop();
    }

    pub fn subscribe<F>(&self, subscriber: F) -> SubscriberId
    where
        F: Fn(&NavData) + Send + Sync + 'static,
    {
        self.telemetry.subscribe(subscriber)
    }

    /// Frames as a channel; dropping the receiver unsubscribes
    pub fn subscribe_channel(&self) -> (SubscriberId, Receiver<NavData>) {
        self.telemetry.subscribers().subscribe_channel()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.telemetry.unsubscribe(id)
    }

    pub fn set_telemetry_interval(&self, interval_ms: i64) {
        self.telemetry.set_interval_ms(interval_ms);
    }

    pub fn telemetry_interval(&self) -> i64 {
        self.telemetry.interval_ms()
    }

    pub fn telemetry_state(&self) -> ReceiverState {
        self.telemetry.state()
    }
}

impl Drop for VehicleLink {
    fn drop(&mut self) {
        self.telemetry.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::time::Duration;
    use ardlibgs::{ArdError, AtCommand, DemoOption, NavDataBuilder, NAVDATA_HANDSHAKE};

    struct Vehicle {
        commands: UdpSocket,
        navdata: UdpSocket,
    }

    impl Vehicle {
        fn new() -> Self {
            let commands = UdpSocket::bind("127.0.0.1:0").unwrap();
            let navdata = UdpSocket::bind("127.0.0.1:0").unwrap();
            commands.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            navdata.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            Self { commands, navdata }
        }

        fn config(&self) -> LinkConfig {
            let mut config = LinkConfig::new(
                "127.0.0.1",
                self.commands.local_addr().unwrap().port(),
                self.navdata.local_addr().unwrap().port(),
            );
            config.receive_timeout_ms = 200;
            config.navdata_interval_ms = 0;
            config
        }

        fn command(&self) -> AtCommand {
            let mut buf = [0u8; 1024];
            let (n, _) = self.commands.recv_from(&mut buf).unwrap();
            AtCommand::parse(std::str::from_utf8(&buf[..n]).unwrap()).unwrap()
        }
    }

    #[test]
    fn test_bad_address_is_fatal() {
        assert!(matches!(
            VehicleLink::connect("192.168.1", 5556, 5554),
            Err(ArdError::Address(_))
        ));
        assert!(VehicleLink::connect("not an address", 5556, 5554).is_err());
    }

    #[test]
    fn test_operations() {
        let vehicle = Vehicle::new();
        let link = VehicleLink::from_config(&vehicle.config()).unwrap();

        let open: Vec<_> = (0..2).map(|_| vehicle.command()).collect();
        assert_eq!(open[0].verb, AtVerb::Config);
        assert_eq!(open[1].payload.as_deref(), Some("290717952"));

        link.takeoff().unwrap();
        link.land().unwrap();
        link.reset().unwrap();
        link.blink(3).unwrap();
        link.set_telemetry_mode(true).unwrap();
        link.send_raw(AtVerb::Ctrl, "5,0").unwrap();
        link.flat_trim().unwrap();
        link.hover().unwrap();
        link.reset_watchdog().unwrap();
        link.set_max_altitude(3000).unwrap();

        let sent: Vec<String> = (0..10).map(|_| vehicle.command().to_string()).collect();
        assert_eq!(
            sent,
            vec![
                "AT*REF=3,290718208",
                "AT*REF=4,290717696",
                "AT*REF=5,290717952",
                "AT*LED=6,20,1056964608,3",
                "AT*CONFIG=7,\"general:navdata_demo\",\"TRUE\"",
                "AT*CTRL=8,5,0",
                "AT*FTRIM=9",
                "AT*PCMD=10,1,0,0,0,0",
                "AT*COMWDG=11",
                "AT*CONFIG=12,\"control:altitude_max\",\"3000\"",
            ]
        );
    }

    #[test]
    fn test_telemetry() {
        let vehicle = Vehicle::new();
        let link = VehicleLink::from_config(&vehicle.config()).unwrap();
        assert_eq!(link.telemetry_state(), ReceiverState::Idle);

        let (tx, rx) = std::sync::mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let id = link
            .start_telemetry(
                move |frame: &NavData| {
                    let _ = tx.lock().unwrap().send(frame.sequence);
                },
                0,
            )
            .unwrap();
        assert_eq!(link.telemetry_state(), ReceiverState::Running);

        let mut buf = [0u8; 16];
        let (n, client) = vehicle.navdata.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &NAVDATA_HANDSHAKE);

        let frame = NavDataBuilder::new(7, 0)
            .demo(DemoOption {
                battery: 88,
                ..Default::default()
            })
            .build_with_checksum();
        vehicle.navdata.send_to(&frame, client).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 7);

        link.set_telemetry_interval(250);
        assert_eq!(link.telemetry_interval(), 250);
        assert!(link.unsubscribe(id));
        assert!(!link.unsubscribe(id));

        link.stop_telemetry();
        assert_eq!(link.telemetry_state(), ReceiverState::Stopped);
    }
}
