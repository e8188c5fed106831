//! AT command channel
//!
//! Owns the command socket. Every command gets the next sequence number and
//! goes out as a single datagram; the vehicle sends nothing back.

use std::fmt::Display;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, info};
use ardlibgs::{
    config_bool, constants, substitute, ArdResult, AtCommand, AtVerb, InternalCommand,
};

/// Sequenced AT command sender
pub struct CommandChannel {
    socket: UdpSocket,
    vehicle: SocketAddr,
    sequence: AtomicU32,
}

impl CommandChannel {
    /// Open the channel and put the vehicle in a known-safe state: cap the
    /// altitude, then clear any emergency.
    pub fn open(vehicle: SocketAddr, max_altitude_mm: u32) -> ArdResult<Self> {
        let bind_addr: SocketAddr = if vehicle.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_write_timeout(Some(constants::COMMAND_TIMEOUT))?;

        info!("Command channel to {} on {}", vehicle, socket.local_addr()?);

        let channel = Self {
            socket,
            vehicle,
            sequence: AtomicU32::new(1),
        };

        channel.send_internal(InternalCommand::MaxAltitude, &[&max_altitude_mm])?;
        channel.send_internal(InternalCommand::ResetEmergency, &[])?;

        Ok(channel)
    }

    /// Address the commands are sent to
    pub fn vehicle(&self) -> SocketAddr {
        self.vehicle
    }

    /// Local address of the command socket
    pub fn local_addr(&self) -> ArdResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Get the next sequence number
    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Format a command with the next sequence number. `template` placeholders
    /// are replaced by `args` in order.
    pub fn format(
        &self,
        verb: AtVerb,
        template: Option<&str>,
        args: &[&dyn Display],
    ) -> ArdResult<String> {
        let payload = match template {
            Some(template) => Some(substitute(template, args)?),
            None => None,
        };
        Ok(AtCommand::new(verb, self.next_sequence(), payload).encode())
    }

    /// Format a predefined command
    pub fn format_internal(&self, cmd: InternalCommand, args: &[&dyn Display]) -> ArdResult<String> {
        let template = cmd.template();
        self.format(template.verb, template.payload, args)
    }

    /// Send an already formatted command as one datagram
    pub fn send(&self, formatted: &str) -> ArdResult<()> {
        debug!("Send to {} -> {:?}", self.vehicle, formatted);
        self.socket.send_to(formatted.as_bytes(), self.vehicle)?;
        Ok(())
    }

    /// Format and send a predefined command
    pub fn send_internal(&self, cmd: InternalCommand, args: &[&dyn Display]) -> ArdResult<()> {
        let formatted = self.format_internal(cmd, args)?;
        self.send(&formatted)
    }

    /// Send `verb` with a literal payload. An empty payload sends the bare verb.
    pub fn send_raw(&self, verb: AtVerb, payload: &str) -> ArdResult<()> {
        let payload = (!payload.is_empty()).then(|| payload.to_string());
        let formatted = AtCommand::new(verb, self.next_sequence(), payload).encode();
        self.send(&formatted)
    }

    /// Switch between the DEMO-only and full navdata streams
    pub fn send_navdata_demo(&self, demo_only: bool) -> ArdResult<()> {
        self.send_internal(InternalCommand::NavdataDemo, &[&config_bool(demo_only)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn vehicle() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        socket
    }

    fn recv_text(socket: &UdpSocket) -> String {
        let mut buf = [0u8; 1024];
        let (n, _) = socket.recv_from(&mut buf).unwrap();
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }

    #[test]
    fn test_open_sends_safe_state() {
        let vehicle = vehicle();
        let channel = CommandChannel::open(vehicle.local_addr().unwrap(), 2000).unwrap();

        assert_eq!(recv_text(&vehicle), "AT*CONFIG=1,\"control:altitude_max\",\"2000\"\r");
        assert_eq!(recv_text(&vehicle), "AT*REF=2,290717952\r");

        channel.send_internal(InternalCommand::Takeoff, &[]).unwrap();
        assert_eq!(recv_text(&vehicle), "AT*REF=3,290718208\r");
    }

    #[test]
    fn test_format() {
        let vehicle = vehicle();
        let channel = CommandChannel::open(vehicle.local_addr().unwrap(), 1500).unwrap();

        assert_eq!(channel.format(AtVerb::Ftrim, None, &[]).unwrap(), "AT*FTRIM=3\r");
        assert_eq!(
            channel.format_internal(InternalCommand::Blink, &[&6]).unwrap(),
            "AT*LED=4,20,1056964608,6\r"
        );
        assert_eq!(
            channel.format(AtVerb::Pcmd, Some("1,{},{},0,0"), &[&-5, &7]).unwrap(),
            "AT*PCMD=5,1,-5,7,0,0\r"
        );
        // A failed substitution does not consume a sequence number
        assert!(channel.format_internal(InternalCommand::Blink, &[]).is_err());
        assert_eq!(channel.format(AtVerb::Comwdg, None, &[]).unwrap(), "AT*COMWDG=6\r");
    }

    #[test]
    fn test_send_raw() {
        let vehicle = vehicle();
        let channel = CommandChannel::open(vehicle.local_addr().unwrap(), 2000).unwrap();
        recv_text(&vehicle);
        recv_text(&vehicle);

        channel.send_raw(AtVerb::Anim, "3,2").unwrap();
        assert_eq!(recv_text(&vehicle), "AT*ANIM=3,3,2\r");

        channel.send_raw(AtVerb::Ftrim, "").unwrap();
        assert_eq!(recv_text(&vehicle), "AT*FTRIM=4\r");

        channel.send_navdata_demo(false).unwrap();
        assert_eq!(recv_text(&vehicle), "AT*CONFIG=5,\"general:navdata_demo\",\"FALSE\"\r");
    }

    #[test]
    fn test_concurrent_sequences_increase() {
        let vehicle = vehicle();
        let channel = Arc::new(CommandChannel::open(vehicle.local_addr().unwrap(), 2000).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let channel = Arc::clone(&channel);
                thread::spawn(move || {
                    (0..200)
                        .map(|_| {
                            let formatted = channel.format_internal(InternalCommand::Hover, &[]).unwrap();
                            AtCommand::parse(&formatted).unwrap().sequence
                        })
                        .collect::<Vec<u32>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            let sequences = handle.join().unwrap();
            assert!(sequences.windows(2).all(|w| w[0] < w[1]));
            for seq in sequences {
                assert!(seq >= 3);
                assert!(all.insert(seq), "sequence {} issued twice", seq);
            }
        }
        assert_eq!(all.len(), 8 * 200);
    }
}
