//! Bus messages read from a line stream
//!
//! Each line is `TOPIC PAYLOAD`; the payload is everything after the first
//! run of whitespace and may be empty.

use log::{debug, warn};
use ardlib::{BridgeCommand, VehicleLink};

/// Split a line into topic and payload, `None` for blank lines and comments
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match line.split_once(char::is_whitespace) {
        Some((topic, payload)) => Some((topic, payload.trim_start())),
        None => Some((line, "")),
    }
}

/// Apply one input line to the link. Returns whether a command was sent.
pub fn handle_line(link: &VehicleLink, line: &str) -> bool {
    let Some((topic, payload)) = parse_line(line) else {
        return false;
    };
    debug!("Message {}: {:?}", topic, payload);

    let Some(command) = BridgeCommand::parse(topic, payload) else {
        warn!("Ignoring message for unknown topic {}", topic);
        return false;
    };
    match command.apply(link) {
        Ok(()) => true,
        Err(e) => {
            warn!("{:?} failed: {}", command, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::time::Duration;
    use ardlib::{AtCommand, AtVerb, LinkConfig};

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("ardrone/cmd/TAKEOFF"), Some(("ardrone/cmd/TAKEOFF", "")));
        assert_eq!(parse_line("  d/PCMD   1,0,0,0,0 \n"), Some(("d/PCMD", "1,0,0,0,0")));
        assert_eq!(parse_line("d/CONFIG \"a b\",\"c\""), Some(("d/CONFIG", "\"a b\",\"c\"")));
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("# comment"), None);
    }

    #[test]
    fn test_handle_line() {
        let vehicle = UdpSocket::bind("127.0.0.1:0").unwrap();
        let navdata = UdpSocket::bind("127.0.0.1:0").unwrap();
        vehicle.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let config = LinkConfig::new(
            "127.0.0.1",
            vehicle.local_addr().unwrap().port(),
            navdata.local_addr().unwrap().port(),
        );
        let link = VehicleLink::from_config(&config).unwrap();

        let next = || {
            let mut buf = [0u8; 512];
            let (n, _) = vehicle.recv_from(&mut buf).unwrap();
            AtCommand::parse(std::str::from_utf8(&buf[..n]).unwrap()).unwrap()
        };
        next();
        next();

        assert!(handle_line(&link, "d/LAND"));
        assert_eq!(next().payload.as_deref(), Some("290717696"));

        assert!(!handle_line(&link, "d/SOMERSAULT now"));
        assert!(!handle_line(&link, ""));

        assert!(handle_line(&link, "d/LED 1,1056964608,2"));
        let led = next();
        assert_eq!(led.verb, AtVerb::Led);
        assert_eq!(led.sequence, 4);
    }
}
