//! Configuration errors

use core::fmt;

/// Everything that can be wrong with a loop before the first tick.
///
/// None of these are recoverable: the PLL or the table would be driven
/// outside of what the hardware supports, so the loop must not start.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigError {
    InvalidInputFrequency,
    /// F outside of 1..=8191
    FeedbackMultiplierOutOfRange(u16),
    /// R outside of 0..=63
    RefDividerOutOfRange(u8),
    /// OD outside of 0..=7
    OutputDividerOutOfRange(u8),
    /// Intermediate (VCO) frequency outside of 360..=1800 MHz
    VcoOutOfRange(f64),
    /// Fractional multiplier must be strictly below the divider
    ImproperFraction { f: u8, p: u8 },
    EmptyLut,
    LutTooLarge(usize),
    /// LUT indices must count up from 0 without holes
    LutIndexGap { expected: usize, found: usize },
    /// Entry `index` produces a lower frequency than the one before it
    NonMonotonicLut { index: usize },
    InvalidFractionRange,
    InvalidGain,
    InvalidRatio,
    InvalidCounterWidth(u8),
    /// Nominal per-tick increment does not fit in the measurement counter
    ExpectedIncrementTooLarge,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInputFrequency => write!(f, "input frequency must be positive and finite"),
            Self::FeedbackMultiplierOutOfRange(v) => write!(f, "invalid F setting {v}"),
            Self::RefDividerOutOfRange(v) => write!(f, "invalid R setting {v}"),
            Self::OutputDividerOutOfRange(v) => write!(f, "invalid OD setting {v}"),
            Self::VcoOutOfRange(hz) => write!(f, "invalid VCO frequency {hz} Hz"),
            Self::ImproperFraction { f: num, p } => write!(f, "fraction f {num} is not < p {p}"),
            Self::EmptyLut => write!(f, "LUT is empty"),
            Self::LutTooLarge(len) => write!(f, "LUT has {len} entries, more than supported"),
            Self::LutIndexGap { expected, found } => {
                write!(f, "LUT index {found} found where {expected} was expected")
            }
            Self::NonMonotonicLut { index } => {
                write!(f, "LUT frequency decreases at index {index}")
            }
            Self::InvalidFractionRange => write!(f, "invalid fractional range"),
            Self::InvalidGain => write!(f, "gains must be finite and not negative"),
            Self::InvalidRatio => write!(f, "nominal ratio and loop rate must be positive"),
            Self::InvalidCounterWidth(bits) => write!(f, "counter width {bits} not in 1..=32"),
            Self::ExpectedIncrementTooLarge => {
                write!(f, "expected count increment does not fit the counter")
            }
        }
    }
}

impl core::error::Error for ConfigError {}
