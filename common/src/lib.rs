#![cfg_attr(not(feature = "std"), no_std)]

use core::fmt;

use serde::{Deserialize, Serialize};
#[cfg(feature = "std")]
use types::{Count, Gain, RegisterValue, SampleFraction};

pub mod types;

pub type Error = postcard::Error;

/// Whether the last correction landed inside the fractional table.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum LockStatus {
    /// Index clamped to the first entry, the output cannot go any slower.
    UnlockedLow = -1,
    Locked = 0,
    /// Index clamped to the last entry, the output cannot go any faster.
    UnlockedHigh = 1,
}

impl LockStatus {
    pub fn as_i8(self) -> i8 {
        self as i8
    }

    pub fn from_i8(raw: i8) -> Option<Self> {
        match raw {
            -1 => Some(Self::UnlockedLow),
            0 => Some(Self::Locked),
            1 => Some(Self::UnlockedHigh),
            _ => None,
        }
    }

    pub fn is_locked(self) -> bool {
        self == Self::Locked
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UnlockedLow => "UNLOCKED LOW",
            Self::Locked => "LOCKED",
            Self::UnlockedHigh => "UNLOCKED HIGH",
        })
    }
}

/// Everything a reference implementation needs to build the same loop.
#[cfg(feature = "std")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSetup {
    pub input_frequency: f64,
    /// F
    pub feedback_multiplier: u16,
    /// R
    pub ref_divider: u8,
    /// OD
    pub output_divider: u8,
    /// ACD
    pub app_clock_divider: u16,
    pub ratio: f64,
    pub ticks_per_call: u32,
    pub kp: Gain,
    pub ki: Gain,
    pub kii: Gain,
    pub initial_count: Count,
    pub counter_bits: u8,
    pub lut: Vec<RegisterValue>,
}

#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stimulus {
    pub mclk_count: Count,
    pub period_fraction: SampleFraction,
}

#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub lock_status: LockStatus,
    pub register: RegisterValue,
    pub index: u16,
}

#[cfg(feature = "std")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostMessage {
    Configure(ReferenceSetup),
    Tick(Stimulus),
}

#[cfg(feature = "std")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReferenceMessage {
    Configured { lut_size: u16 },
    Report(TickReport),
    Rejected(String),
}

#[cfg(feature = "std")]
pub fn encode_host_message(msg: &HostMessage) -> Result<Vec<u8>, postcard::Error> {
    postcard::to_stdvec_cobs(msg)
}

#[cfg(feature = "std")]
pub fn decode_host_message(data: &mut [u8]) -> Result<HostMessage, postcard::Error> {
    postcard::from_bytes_cobs(data)
}

#[cfg(feature = "std")]
pub fn encode_reference_message(msg: &ReferenceMessage) -> Result<Vec<u8>, postcard::Error> {
    postcard::to_stdvec_cobs(msg)
}

#[cfg(feature = "std")]
pub fn decode_reference_message(data: &mut [u8]) -> Result<ReferenceMessage, postcard::Error> {
    postcard::from_bytes_cobs(data)
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use fixed::traits::ToFixed;

    #[test]
    fn lock_status_matches_firmware_encoding() {
        for status in [LockStatus::UnlockedLow, LockStatus::Locked, LockStatus::UnlockedHigh] {
            assert_eq!(LockStatus::from_i8(status.as_i8()), Some(status));
        }
        assert_eq!(LockStatus::UnlockedLow.as_i8(), -1);
        assert_eq!(LockStatus::UnlockedHigh.as_i8(), 1);
        assert_eq!(LockStatus::from_i8(2), None);
        assert_eq!(LockStatus::UnlockedHigh.to_string(), "UNLOCKED HIGH");
    }

    #[test]
    fn frames_are_zero_terminated() {
        let msg = HostMessage::Tick(Stimulus {
            mclk_count: 0xdead_beef,
            period_fraction: 1.to_fixed(),
        });
        let mut data = encode_host_message(&msg).unwrap();
        assert_eq!(data.last(), Some(&0));
        assert_eq!(data.iter().filter(|b| **b == 0).count(), 1);
        assert_eq!(decode_host_message(&mut data).unwrap(), msg);
    }

    #[test]
    fn configure_carries_the_whole_table() {
        let setup = ReferenceSetup {
            input_frequency: 24e6,
            feedback_multiplier: 146,
            ref_divider: 0,
            output_divider: 7,
            app_clock_divider: 8,
            ratio: 256.0,
            ticks_per_call: 512,
            kp: 0.1.to_fixed(),
            ki: 2.to_fixed(),
            kii: Gain::ZERO,
            initial_count: 0,
            counter_bits: 32,
            lut: (0..300u16).map(|i| i << 3).collect(),
        };
        let mut data = encode_host_message(&HostMessage::Configure(setup.clone())).unwrap();
        assert_eq!(
            decode_host_message(&mut data).unwrap(),
            HostMessage::Configure(setup)
        );

        let mut data = encode_reference_message(&ReferenceMessage::Rejected("bad".into())).unwrap();
        assert_eq!(
            decode_reference_message(&mut data).unwrap(),
            ReferenceMessage::Rejected("bad".into())
        );
    }
}
