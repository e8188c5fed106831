//! Vehicle state bitmask carried in every navdata header
//!
//! Each of the 32 bits has a fixed meaning. Bits 7, 8, 9, 14, 16 and 18 were
//! reassigned between the first and second hardware generation; both names
//! are exposed and read the same bit.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Hardware generation a flag name belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareGeneration {
    /// Same meaning on every vehicle
    All,
    /// AR.Drone 1.0 meaning
    First,
    /// AR.Drone 2.0 meaning
    Second,
}

/// Name and position of one state flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateFlagInfo {
    pub name: &'static str,
    pub bit: u8,
    pub generation: HardwareGeneration,
}

/// State bitmask decoded into individual flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateFlags {
    raw: u32,
    bits: [bool; 32],
}

impl StateFlags {
    pub fn from_bits(raw: u32) -> Self {
        let mut bits = [false; 32];
        for (i, bit) in bits.iter_mut().enumerate() {
            *bit = raw & (1 << i) != 0;
        }
        Self { raw, bits }
    }

    /// The undecoded bitmask
    pub fn bits(&self) -> u32 {
        self.raw
    }

    /// Value of the bit at `position`, `None` past bit 31
    pub fn bit(&self, position: u8) -> Option<bool> {
        self.bits.get(position as usize).copied()
    }

    /// Look up a flag by name, either generation's name works
    pub fn flag(&self, name: &str) -> Option<bool> {
        STATE_FLAGS
            .iter()
            .find(|info| info.name == name)
            .map(|info| self.bits[info.bit as usize])
    }

    /// Every named flag with its value, dual-meaning bits appear once per name
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, bool)> + '_ {
        STATE_FLAGS
            .iter()
            .map(move |info| (info.name, self.bits[info.bit as usize]))
    }

    /// Names of the flags currently set
    pub fn active(&self) -> Vec<&'static str> {
        self.iter().filter(|(_, set)| *set).map(|(name, _)| name).collect()
    }
}

macro_rules! state_flags {
    ($( $(#[$doc:meta])* $name:ident = $bit:literal, $generation:ident; )*) => {
        impl StateFlags {
            $(
                $(#[$doc])*
                pub fn $name(&self) -> bool {
                    self.bits[$bit]
                }
            )*
        }

        /// Every flag name, in bit order
        pub const STATE_FLAGS: &[StateFlagInfo] = &[
            $(
                StateFlagInfo {
                    name: stringify!($name),
                    bit: $bit,
                    generation: HardwareGeneration::$generation,
                },
            )*
        ];
    };
}

state_flags! {
    /// Vehicle is flying
    flying = 0, All;
    /// Video stream enabled
    video_enabled = 1, All;
    /// Vision processing enabled
    vision_enabled = 2, All;
    /// Control loop uses angular speed instead of Euler angles
    angular_speed_control = 3, All;
    /// Altitude control loop active
    altitude_control_active = 4, All;
    /// User feedback (start button) on
    user_feedback_on = 5, All;
    /// Control command acknowledged by the vehicle
    control_received = 6, All;
    trim_received = 7, First;
    camera_ready = 7, Second;
    trim_running = 8, First;
    travelling_mask = 8, Second;
    trim_succeeded = 9, First;
    usb_key_ready = 9, Second;
    /// Only the DEMO option is streamed
    navdata_demo_only = 10, All;
    /// Navdata bootstrap mode, no options are streamed
    navdata_bootstrap = 11, All;
    motors_down = 12, All;
    /// Communication with the client lost
    communication_lost = 13, All;
    gyrometers_down = 14, First;
    software_fault_detected = 14, Second;
    battery_too_low = 15, All;
    battery_too_high = 16, First;
    user_emergency_landing = 16, Second;
    timer_elapsed = 17, All;
    not_enough_power = 18, First;
    magneto_calibration_needed = 18, Second;
    angles_out_of_range = 19, All;
    too_much_wind = 20, All;
    ultrasonic_sensor_deaf = 21, All;
    cutout_system_detected = 22, All;
    pic_version_ok = 23, All;
    at_codec_thread_on = 24, All;
    navdata_thread_on = 25, All;
    video_thread_on = 26, All;
    acquisition_thread_on = 27, All;
    control_watchdog_delayed = 28, All;
    adc_watchdog_delayed = 29, All;
    /// Communication watchdog triggered
    communication_problem = 30, All;
    emergency = 31, All;
}

impl Serialize for StateFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(STATE_FLAGS.len()))?;
        for (name, set) in self.iter() {
            map.serialize_entry(name, &set)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flying_only() {
        let flags = StateFlags::from_bits(0x0000_0001);
        assert!(flags.flying());
        assert_eq!(flags.active(), vec!["flying"]);
        assert!(!flags.emergency());
        assert!(!flags.camera_ready());
    }

    #[test]
    fn test_every_bit_is_named() {
        for bit in 0..32u8 {
            assert!(
                STATE_FLAGS.iter().any(|info| info.bit == bit),
                "bit {} has no name",
                bit
            );
        }
        assert_eq!(STATE_FLAGS.len(), 38);
    }

    #[test]
    fn test_each_bit_sets_only_its_names() {
        for info in STATE_FLAGS {
            let flags = StateFlags::from_bits(1 << info.bit);
            for (name, set) in flags.iter() {
                let same_bit = STATE_FLAGS
                    .iter()
                    .any(|other| other.name == name && other.bit == info.bit);
                assert_eq!(set, same_bit, "bit {} name {}", info.bit, name);
            }
        }
    }

    #[test]
    fn test_dual_generation_names() {
        let pairs = [
            ("trim_received", "camera_ready", 7),
            ("trim_running", "travelling_mask", 8),
            ("trim_succeeded", "usb_key_ready", 9),
            ("gyrometers_down", "software_fault_detected", 14),
            ("battery_too_high", "user_emergency_landing", 16),
            ("not_enough_power", "magneto_calibration_needed", 18),
        ];
        for (first, second, bit) in pairs {
            let flags = StateFlags::from_bits(1 << bit);
            assert_eq!(flags.flag(first), Some(true));
            assert_eq!(flags.flag(second), Some(true));

            let flags = StateFlags::from_bits(!(1u32 << bit));
            assert_eq!(flags.flag(first), Some(false));
            assert_eq!(flags.flag(second), Some(false));
        }

        let flags = StateFlags::from_bits(1 << 16);
        assert!(flags.battery_too_high());
        assert!(flags.user_emergency_landing());
    }

    #[test]
    fn test_flag_lookup() {
        let flags = StateFlags::from_bits(0x8000_0000);
        assert_eq!(flags.flag("emergency"), Some(true));
        assert_eq!(flags.flag("flying"), Some(false));
        assert_eq!(flags.flag("warp_drive"), None);
        assert_eq!(flags.bit(31), Some(true));
        assert_eq!(flags.bit(32), None);
        assert_eq!(flags.bits(), 0x8000_0000);
    }

    #[test]
    fn test_serialize_as_map() {
        let flags = StateFlags::from_bits(0x0000_0081);
        let json = serde_json::to_value(flags).unwrap();
        assert_eq!(json["flying"], true);
        assert_eq!(json["camera_ready"], true);
        assert_eq!(json["trim_received"], true);
        assert_eq!(json["emergency"], false);
    }
}
