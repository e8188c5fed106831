//! Navdata decoding
//!
//! A navdata datagram is little-endian throughout:
//!
//! ```text
//! +-----------------+-----------------+-----------------+
//! | state (u32)     | sequence (u32)  | vision (u32)    |   header, 12 bytes
//! +-----------------+-----------------+-----------------+
//! | tag (u16) | size (u16) | payload (size - 4 bytes)    |   option, repeated
//! +-----------+------------+-----------------------------+
//! ```
//!
//! The last option is normally the checksum option. Option sizes include the
//! 4-byte option header. Some firmware reports sizes past the end of the
//! datagram, so payloads are clamped to what was actually received.

use log::{debug, warn};
use serde::Serialize;

use crate::error::{ArdError, ArdResult};
use crate::state::StateFlags;

/// Size of the fixed navdata header
pub const NAVDATA_HEADER_SIZE: usize = 12;

/// Size of an option's tag and size fields
pub const OPTION_HEADER_SIZE: usize = 4;

/// Size of the checksum value at the end of a datagram
pub const CHECKSUM_SIZE: usize = 4;

/// Largest navdata datagram accepted
pub const MAX_PACKET_SIZE: usize = 4096;

/// Sent to the navdata port to start (or resume) the stream
pub const NAVDATA_HANDSHAKE: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// Navdata option tags
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub enum NavdataTag {
    Demo,
    Time,
    RawMeasures,
    PhysMeasures,
    GyrosOffsets,
    EulerAngles,
    References,
    Trims,
    RcReferences,
    Pwm,
    Altitude,
    VisionRaw,
    VisionOf,
    Vision,
    VisionPerf,
    TrackersSend,
    VisionDetect,
    Watchdog,
    AdcDataFrame,
    VideoStream,
    Games,
    PressureRaw,
    Magneto,
    Wind,
    KalmanPressure,
    HdVideoStream,
    Wifi,
    Zimmu3000,
    Checksum,
}

impl NavdataTag {
    pub fn to_u16(&self) -> u16 {
        match self {
            NavdataTag::Demo => 0,
            NavdataTag::Time => 1,
            NavdataTag::RawMeasures => 2,
            NavdataTag::PhysMeasures => 3,
            NavdataTag::GyrosOffsets => 4,
            NavdataTag::EulerAngles => 5,
            NavdataTag::References => 6,
            NavdataTag::Trims => 7,
            NavdataTag::RcReferences => 8,
            NavdataTag::Pwm => 9,
            NavdataTag::Altitude => 10,
            NavdataTag::VisionRaw => 11,
            NavdataTag::VisionOf => 12,
            NavdataTag::Vision => 13,
            NavdataTag::VisionPerf => 14,
            NavdataTag::TrackersSend => 15,
            NavdataTag::VisionDetect => 16,
            NavdataTag::Watchdog => 17,
            NavdataTag::AdcDataFrame => 18,
            NavdataTag::VideoStream => 19,
            NavdataTag::Games => 20,
            NavdataTag::PressureRaw => 21,
            NavdataTag::Magneto => 22,
            NavdataTag::Wind => 23,
            NavdataTag::KalmanPressure => 24,
            NavdataTag::HdVideoStream => 25,
            NavdataTag::Wifi => 26,
            NavdataTag::Zimmu3000 => 27,
            NavdataTag::Checksum => 0xFFFF,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(NavdataTag::Demo),
            1 => Some(NavdataTag::Time),
            2 => Some(NavdataTag::RawMeasures),
            3 => Some(NavdataTag::PhysMeasures),
            4 => Some(NavdataTag::GyrosOffsets),
            5 => Some(NavdataTag::EulerAngles),
            6 => Some(NavdataTag::References),
            7 => Some(NavdataTag::Trims),
            8 => Some(NavdataTag::RcReferences),
            9 => Some(NavdataTag::Pwm),
            10 => Some(NavdataTag::Altitude),
            11 => Some(NavdataTag::VisionRaw),
            12 => Some(NavdataTag::VisionOf),
            13 => Some(NavdataTag::Vision),
            14 => Some(NavdataTag::VisionPerf),
            15 => Some(NavdataTag::TrackersSend),
            16 => Some(NavdataTag::VisionDetect),
            17 => Some(NavdataTag::Watchdog),
            18 => Some(NavdataTag::AdcDataFrame),
            19 => Some(NavdataTag::VideoStream),
            20 => Some(NavdataTag::Games),
            21 => Some(NavdataTag::PressureRaw),
            22 => Some(NavdataTag::Magneto),
            23 => Some(NavdataTag::Wind),
            24 => Some(NavdataTag::KalmanPressure),
            25 => Some(NavdataTag::HdVideoStream),
            26 => Some(NavdataTag::Wifi),
            27 => Some(NavdataTag::Zimmu3000),
            0xFFFF => Some(NavdataTag::Checksum),
            _ => None,
        }
    }
}

/// Flight phase reported in the DEMO option
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub enum ControlState {
    Default,
    Init,
    Landed,
    Flying,
    Hovering,
    Test,
    TransitionTakeoff,
    TransitionGoToFix,
    TransitionLanding,
    /// No DEMO option seen, or a code outside 0..=8
    #[default]
    Unknown,
}

impl ControlState {
    /// Map a raw code; anything out of range is `Unknown`
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ControlState::Default,
            1 => ControlState::Init,
            2 => ControlState::Landed,
            3 => ControlState::Flying,
            4 => ControlState::Hovering,
            5 => ControlState::Test,
            6 => ControlState::TransitionTakeoff,
            7 => ControlState::TransitionGoToFix,
            8 => ControlState::TransitionLanding,
            _ => ControlState::Unknown,
        }
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ControlState::Default => Some(0),
            ControlState::Init => Some(1),
            ControlState::Landed => Some(2),
            ControlState::Flying => Some(3),
            ControlState::Hovering => Some(4),
            ControlState::Test => Some(5),
            ControlState::TransitionTakeoff => Some(6),
            ControlState::TransitionGoToFix => Some(7),
            ControlState::TransitionLanding => Some(8),
            ControlState::Unknown => None,
        }
    }
}

/// One decoded navdata datagram
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavData {
    /// Navdata sequence number, wraps
    pub sequence: u32,
    /// Raw state bitmask
    pub state: u32,
    pub flags: StateFlags,
    pub vision_defined: bool,
    pub control_state: ControlState,
    /// Battery charge in percent
    pub battery: i32,
    /// Altitude in millimeters
    pub altitude: i32,
    /// Pitch, vehicle units
    pub theta: f32,
    /// Roll, vehicle units
    pub phi: f32,
    /// Yaw, vehicle units
    pub psi: f32,
    pub link_quality: i32,
    /// Value of the CHECKSUM option, if one was present
    pub checksum: Option<i32>,
    /// Whether `checksum` matched the CRC-32 of the datagram
    pub checksum_ok: Option<bool>,
}

impl NavData {
    fn new(state: u32, sequence: u32, vision: u32) -> Self {
        Self {
            sequence,
            state,
            flags: StateFlags::from_bits(state),
            vision_defined: vision == 1,
            control_state: ControlState::Unknown,
            battery: 0,
            altitude: 0,
            theta: 0.0,
            phi: 0.0,
            psi: 0.0,
            link_quality: 0,
            checksum: None,
            checksum_ok: None,
        }
    }

    /// Decode a navdata datagram.
    ///
    /// Only a datagram shorter than the fixed header is an error. Unknown
    /// options are skipped, oversized options are clamped, and a checksum
    /// mismatch is reported through `checksum_ok`.
    pub fn decode(data: &[u8]) -> ArdResult<Self> {
        let mut cursor = Cursor::new(data);
        let (state, sequence, vision) = match (cursor.u32(), cursor.u32(), cursor.u32()) {
            (Some(state), Some(sequence), Some(vision)) => (state, sequence, vision),
            _ => {
                return Err(ArdError::protocol(format!(
                    "navdata header needs {} bytes, got {}",
                    NAVDATA_HEADER_SIZE,
                    data.len()
                )))
            }
        };

        let mut navdata = NavData::new(state, sequence, vision);

        while cursor.remaining() > 0 {
            let (tag, size) = match (cursor.u16(), cursor.u16()) {
                (Some(tag), Some(size)) => (tag, size),
                _ => {
                    debug!("navdata {}: trailing {} byte(s) ignored", sequence, cursor.remaining());
                    break;
                }
            };

            let wanted = (size as usize).saturating_sub(OPTION_HEADER_SIZE);
            if wanted > cursor.remaining() {
                debug!(
                    "navdata {}: option {} claims {} bytes, {} left",
                    sequence,
                    tag,
                    wanted,
                    cursor.remaining()
                );
            }
            let payload = cursor.take(wanted);

            if navdata.apply_option(tag, payload).is_none() {
                debug!(
                    "navdata {}: option {} too short ({} bytes), skipped",
                    sequence,
                    tag,
                    payload.len()
                );
            }
        }

        if let Some(expected) = navdata.checksum {
            let computed = checksum(data);
            let ok = computed as i32 == expected;
            if !ok {
                warn!(
                    "navdata {}: checksum mismatch, computed {:#010x}, received {:#010x}",
                    sequence, computed, expected as u32
                );
            }
            navdata.checksum_ok = Some(ok);
        }

        Ok(navdata)
    }

    /// Interpret a single option, `None` if its payload is too short
    fn apply_option(&mut self, tag: u16, payload: &[u8]) -> Option<()> {
        let mut option = Cursor::new(payload);
        match NavdataTag::from_u16(tag) {
            Some(NavdataTag::Demo) => {
                let control_state = option.i32()?;
                let battery = option.i32()?;
                let theta = option.f32()?;
                let phi = option.f32()?;
                let psi = option.f32()?;
                let altitude = option.i32()?;
                // Three velocity floats follow, unused

                self.control_state = ControlState::from_code(control_state);
                self.battery = battery;
                self.theta = theta;
                self.phi = phi;
                self.psi = psi;
                self.altitude = altitude;
            }
            Some(NavdataTag::Wifi) => {
                self.link_quality = option.u32()? as i32;
            }
            Some(NavdataTag::Altitude) => {
                self.altitude = option.i32()?;
            }
            Some(NavdataTag::Checksum) => {
                self.checksum = Some(option.i32()?);
            }
            Some(other) => {
                debug!("navdata {}: {:?} option not interpreted", self.sequence, other);
            }
            None => {
                debug!("navdata {}: unknown option tag {}", self.sequence, tag);
            }
        }
        Some(())
    }
}

/// CRC-32 over everything but the trailing checksum value
pub fn checksum(data: &[u8]) -> u32 {
    let end = data.len().saturating_sub(CHECKSUM_SIZE);
    crc32fast::hash(&data[..end])
}

/// Little-endian reader that never reads past the end of its slice
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Take up to `n` bytes
    fn take(&mut self, n: usize) -> &'a [u8] {
        let n = n.min(self.remaining());
        let data = self.data;
        let bytes = &data[self.pos..self.pos + n];
        self.pos += n;
        bytes
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        if self.remaining() < N {
            return None;
        }
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N));
        Some(out)
    }

    fn u16(&mut self) -> Option<u16> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Option<i32> {
        self.array().map(i32::from_le_bytes)
    }

    fn f32(&mut self) -> Option<f32> {
        self.array().map(f32::from_le_bytes)
    }
}

/// Fields of a DEMO option
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DemoOption {
    pub control_state: i32,
    pub battery: i32,
    pub theta: f32,
    pub phi: f32,
    pub psi: f32,
    pub altitude: i32,
}

/// Builds navdata datagrams the way the vehicle sends them
#[derive(Debug, Clone)]
pub struct NavDataBuilder {
    state: u32,
    sequence: u32,
    vision: u32,
    options: Vec<u8>,
}

impl NavDataBuilder {
    pub fn new(sequence: u32, state: u32) -> Self {
        Self {
            state,
            sequence,
            vision: 0,
            options: Vec::new(),
        }
    }

    pub fn vision(mut self, vision: u32) -> Self {
        self.vision = vision;
        self
    }

    /// Append an option whose size field is computed from the payload
    pub fn option(self, tag: u16, payload: &[u8]) -> Self {
        let size = (payload.len() + OPTION_HEADER_SIZE) as u16;
        self.option_with_size(tag, size, payload)
    }

    /// Append an option with an arbitrary size field
    pub fn option_with_size(mut self, tag: u16, size: u16, payload: &[u8]) -> Self {
        self.options.extend_from_slice(&tag.to_le_bytes());
        self.options.extend_from_slice(&size.to_le_bytes());
        self.options.extend_from_slice(payload);
        self
    }

    pub fn demo(self, demo: DemoOption) -> Self {
        let mut payload = Vec::with_capacity(36);
        payload.extend_from_slice(&demo.control_state.to_le_bytes());
        payload.extend_from_slice(&demo.battery.to_le_bytes());
        payload.extend_from_slice(&demo.theta.to_le_bytes());
        payload.extend_from_slice(&demo.phi.to_le_bytes());
        payload.extend_from_slice(&demo.psi.to_le_bytes());
        payload.extend_from_slice(&demo.altitude.to_le_bytes());
        payload.extend_from_slice(&[0u8; 12]);
        self.option(NavdataTag::Demo.to_u16(), &payload)
    }

    pub fn wifi(self, link_quality: u32) -> Self {
        self.option(NavdataTag::Wifi.to_u16(), &link_quality.to_le_bytes())
    }

    /// ALTITUDE option with only the vision altitude filled in
    pub fn altitude(self, vision_altitude: i32) -> Self {
        let mut payload = Vec::with_capacity(52);
        payload.extend_from_slice(&vision_altitude.to_le_bytes());
        payload.extend_from_slice(&[0u8; 48]);
        self.option(NavdataTag::Altitude.to_u16(), &payload)
    }

    fn header(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(NAVDATA_HEADER_SIZE + self.options.len() + 8);
        data.extend_from_slice(&self.state.to_le_bytes());
        data.extend_from_slice(&self.sequence.to_le_bytes());
        data.extend_from_slice(&self.vision.to_le_bytes());
        data.extend_from_slice(&self.options);
        data
    }

    /// Datagram without a checksum option
    pub fn build(&self) -> Vec<u8> {
        self.header()
    }

    /// Datagram terminated by a correct checksum option
    pub fn build_with_checksum(&self) -> Vec<u8> {
        let mut data = self.header();
        data.extend_from_slice(&NavdataTag::Checksum.to_u16().to_le_bytes());
        data.extend_from_slice(&((OPTION_HEADER_SIZE + CHECKSUM_SIZE) as u16).to_le_bytes());
        let crc = crc32fast::hash(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        data
    }
}
