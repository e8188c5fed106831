//! AT command definitions for ARDLink
//!
//! Commands are sent from the client to the vehicle as text, one command per
//! UDP datagram. The vehicle never acknowledges them.
//!
//! ```text
//! AT*<VERB>=<seq>\r
//! AT*<VERB>=<seq>,<payload>\r
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use crate::error::{ArdError, ArdResult};

/// Prefix of every AT command
pub const AT_COMMAND_PREFIX: &str = "AT*";

/// Separates the verb from the sequence number
pub const AT_COMMAND_DELIM: char = '=';

/// Separates the sequence number from the payload
pub const AT_PAYLOAD_DELIM: char = ',';

/// Terminates every AT command
pub const AT_COMMAND_TERMINATOR: char = '\r';

/// Placeholder substituted by template arguments
pub const TEMPLATE_PLACEHOLDER: &str = "{}";

/// Supported AT command verbs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AtVerb {
    Ref,
    Pcmd,
    Config,
    Ctrl,
    Ftrim,
    Led,
    Anim,
    Comwdg,
}

impl AtVerb {
    pub const ALL: [AtVerb; 8] = [
        AtVerb::Ref,
        AtVerb::Pcmd,
        AtVerb::Config,
        AtVerb::Ctrl,
        AtVerb::Ftrim,
        AtVerb::Led,
        AtVerb::Anim,
        AtVerb::Comwdg,
    ];

    /// Wire token for this verb
    pub fn as_str(&self) -> &'static str {
        match self {
            AtVerb::Ref => "REF",
            AtVerb::Pcmd => "PCMD",
            AtVerb::Config => "CONFIG",
            AtVerb::Ctrl => "CTRL",
            AtVerb::Ftrim => "FTRIM",
            AtVerb::Led => "LED",
            AtVerb::Anim => "ANIM",
            AtVerb::Comwdg => "COMWDG",
        }
    }

    /// Look up a verb by its wire token. Matching is case sensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|verb| verb.as_str() == name)
    }
}

impl fmt::Display for AtVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A formatted AT command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtCommand {
    pub verb: AtVerb,
    pub sequence: u32,
    pub payload: Option<String>,
}

impl AtCommand {
    pub fn new(verb: AtVerb, sequence: u32, payload: Option<String>) -> Self {
        Self {
            verb,
            sequence,
            payload,
        }
    }

    /// Encode to the exact wire form, terminator included
    pub fn encode(&self) -> String {
        let mut s = String::with_capacity(32);
        s.push_str(AT_COMMAND_PREFIX);
        s.push_str(self.verb.as_str());
        s.push(AT_COMMAND_DELIM);
        s.push_str(&self.sequence.to_string());
        if let Some(payload) = &self.payload {
            s.push(AT_PAYLOAD_DELIM);
            s.push_str(payload);
        }
        s.push(AT_COMMAND_TERMINATOR);
        s
    }

    /// Parse a single command in wire form. The trailing terminator is optional.
    pub fn parse(text: &str) -> ArdResult<Self> {
        let text = text.strip_suffix(AT_COMMAND_TERMINATOR).unwrap_or(text);
        let body = text
            .strip_prefix(AT_COMMAND_PREFIX)
            .ok_or_else(|| ArdError::protocol(format!("missing AT prefix: {:?}", text)))?;

        let (verb, rest) = body
            .split_once(AT_COMMAND_DELIM)
            .ok_or_else(|| ArdError::protocol(format!("missing sequence: {:?}", text)))?;
        let verb = AtVerb::from_name(verb)
            .ok_or_else(|| ArdError::protocol(format!("unknown verb: {:?}", verb)))?;

        let (sequence, payload) = match rest.split_once(AT_PAYLOAD_DELIM) {
            Some((seq, payload)) => (seq, Some(payload.to_string())),
            None => (rest, None),
        };
        let sequence = sequence
            .parse::<u32>()
            .map_err(|e| ArdError::protocol(format!("bad sequence {:?}: {}", sequence, e)))?;

        Ok(Self::new(verb, sequence, payload))
    }

    /// Parse every command in a datagram. The vehicle accepts several
    /// `\r`-terminated commands packed into one packet.
    pub fn parse_datagram(text: &str) -> Vec<ArdResult<Self>> {
        text.split(AT_COMMAND_TERMINATOR)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }
}

impl fmt::Display for AtCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode().trim_end_matches(AT_COMMAND_TERMINATOR))
    }
}

/// Substitute `{}` placeholders in `template` with `args`, in order.
///
/// The number of placeholders must match the number of arguments.
pub fn substitute(template: &str, args: &[&dyn fmt::Display]) -> ArdResult<String> {
    let placeholders = template.matches(TEMPLATE_PLACEHOLDER).count();
    if placeholders != args.len() {
        return Err(ArdError::argument(format!(
            "template {:?} takes {} argument(s), got {}",
            template,
            placeholders,
            args.len()
        )));
    }

    let mut out = String::with_capacity(template.len() + 8 * args.len());
    let mut pieces = template.split(TEMPLATE_PLACEHOLDER);
    if let Some(first) = pieces.next() {
        out.push_str(first);
    }
    for (piece, arg) in pieces.zip(args) {
        out.push_str(&arg.to_string());
        out.push_str(piece);
    }
    Ok(out)
}

/// REF argument: clear the emergency flag
pub const REF_RESET_EMERGENCY: u32 = 290717952;
/// REF argument: take off
pub const REF_TAKEOFF: u32 = 290718208;
/// REF argument: land
pub const REF_LAND: u32 = 290717696;

/// LED animation used by `Blink` (animation id 20, frequency 0.5 Hz as raw float bits)
pub const LED_BLINK_PATTERN: &str = "20,1056964608";

/// Predefined vehicle commands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum InternalCommand {
    Blink,
    ResetEmergency,
    MaxAltitude,
    NavdataDemo,
    Watchdog,
    FlatTrim,
    Takeoff,
    Land,
    Hover,
}

/// Verb and payload template bound to a predefined command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTemplate {
    pub verb: AtVerb,
    pub payload: Option<&'static str>,
}

impl CommandTemplate {
    /// Number of arguments the payload template expects
    pub fn arity(&self) -> usize {
        self.payload
            .map(|p| p.matches(TEMPLATE_PLACEHOLDER).count())
            .unwrap_or(0)
    }
}

impl InternalCommand {
    /// Resolve the verb and payload template for this command
    pub fn template(&self) -> CommandTemplate {
        let (verb, payload) = match self {
            InternalCommand::Blink => (AtVerb::Led, Some("20,1056964608,{}")),
            InternalCommand::ResetEmergency => (AtVerb::Ref, Some("290717952")),
            InternalCommand::MaxAltitude => (AtVerb::Config, Some("\"control:altitude_max\",\"{}\"")),
            InternalCommand::NavdataDemo => (AtVerb::Config, Some("\"general:navdata_demo\",\"{}\"")),
            InternalCommand::Watchdog => (AtVerb::Comwdg, None),
            InternalCommand::FlatTrim => (AtVerb::Ftrim, None),
            InternalCommand::Takeoff => (AtVerb::Ref, Some("290718208")),
            InternalCommand::Land => (AtVerb::Ref, Some("290717696")),
            InternalCommand::Hover => (AtVerb::Pcmd, Some("1,0,0,0,0")),
        };
        CommandTemplate { verb, payload }
    }

    pub fn verb(&self) -> AtVerb {
        self.template().verb
    }
}

/// `navdata_demo` takes the upper-case boolean spelling
pub fn config_bool(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_names() {
        for verb in AtVerb::ALL {
            assert_eq!(AtVerb::from_name(verb.as_str()), Some(verb));
        }
        assert_eq!(AtVerb::from_name("ref"), None);
        assert_eq!(AtVerb::from_name("TAKEOFF"), None);
    }

    #[test]
    fn test_encode_without_payload() {
        let cmd = AtCommand::new(AtVerb::Ftrim, 7, None);
        assert_eq!(cmd.encode(), "AT*FTRIM=7\r");
    }

    #[test]
    fn test_encode_with_payload() {
        let cmd = AtCommand::new(AtVerb::Ref, 1, Some("290718208".to_string()));
        assert_eq!(cmd.encode(), "AT*REF=1,290718208\r");
        assert_eq!(cmd.to_string(), "AT*REF=1,290718208");
    }

    #[test]
    fn test_parse() {
        let cmd = AtCommand::parse("AT*CONFIG=12,\"control:altitude_max\",\"2000\"\r").unwrap();
        assert_eq!(cmd.verb, AtVerb::Config);
        assert_eq!(cmd.sequence, 12);
        assert_eq!(cmd.payload.as_deref(), Some("\"control:altitude_max\",\"2000\""));

        let cmd = AtCommand::parse("AT*COMWDG=3").unwrap();
        assert_eq!(cmd.verb, AtVerb::Comwdg);
        assert_eq!(cmd.payload, None);

        assert!(AtCommand::parse("REF=1,2").is_err());
        assert!(AtCommand::parse("AT*FLY=1").is_err());
        assert!(AtCommand::parse("AT*REF=x,1").is_err());
        assert!(AtCommand::parse("AT*REF").is_err());
    }

    #[test]
    fn test_parse_datagram() {
        let cmds = AtCommand::parse_datagram("AT*REF=1,290717952\rAT*FTRIM=2\r");
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[1].as_ref().unwrap().verb, AtVerb::Ftrim);
    }

    #[test]
    fn test_substitute() {
        assert_eq!(substitute("20,1056964608,{}", &[&6]).unwrap(), "20,1056964608,6");
        assert_eq!(
            substitute("\"general:navdata_demo\",\"{}\"", &[&config_bool(true)]).unwrap(),
            "\"general:navdata_demo\",\"TRUE\""
        );
        assert_eq!(substitute("290717952", &[]).unwrap(), "290717952");
        assert!(matches!(substitute("{},{}", &[&1]), Err(ArdError::Argument(_))));
        assert!(substitute("fixed", &[&1]).is_err());
    }

    #[test]
    fn test_command_table() {
        assert_eq!(InternalCommand::Takeoff.verb(), AtVerb::Ref);
        assert_eq!(InternalCommand::Takeoff.template().payload, Some("290718208"));
        assert_eq!(InternalCommand::Land.template().payload, Some("290717696"));
        assert_eq!(InternalCommand::ResetEmergency.template().payload, Some("290717952"));
        assert_eq!(InternalCommand::MaxAltitude.template().arity(), 1);
        assert_eq!(InternalCommand::Blink.template().arity(), 1);
        assert_eq!(InternalCommand::FlatTrim.template().payload, None);
        assert_eq!(InternalCommand::Watchdog.verb(), AtVerb::Comwdg);
        assert_eq!(InternalCommand::Hover.verb(), AtVerb::Pcmd);

        assert_eq!(REF_TAKEOFF.to_string(), InternalCommand::Takeoff.template().payload.unwrap());
        assert_eq!(REF_LAND.to_string(), InternalCommand::Land.template().payload.unwrap());
        assert_eq!(
            REF_RESET_EMERGENCY.to_string(),
            InternalCommand::ResetEmergency.template().payload.unwrap()
        );
        assert!(InternalCommand::Blink.template().payload.unwrap().starts_with(LED_BLINK_PATTERN));
    }
}
