//! Application PLL output frequency

use crate::{error::ConfigError, register::Fraction};

pub const FEEDBACK_MULTIPLIER_MAX: u16 = 8191;
pub const REF_DIVIDER_MAX: u8 = 63;
pub const OUTPUT_DIVIDER_MAX: u8 = 7;

/// Intermediate (VCO) frequency limits, Hz
pub const VCO_FREQ_MIN: f64 = 360_000_000.0;
pub const VCO_FREQ_MAX: f64 = 1_800_000_000.0;

/// Fixed part of an application PLL configuration.
///
/// Only the fractional pair changes once the loop runs, so it is passed
/// per evaluation instead of being stored here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppPll {
    input_frequency: f64,
    /// F
    feedback_multiplier: u16,
    /// R
    ref_divider: u8,
    /// OD
    output_divider: u8,
    /// ACD
    app_clock_divider: u16,
}

impl AppPll {
    pub fn new(
        input_frequency: f64,
        feedback_multiplier: u16,
        ref_divider: u8,
        output_divider: u8,
        app_clock_divider: u16,
    ) -> Result<Self, ConfigError> {
        if !(input_frequency.is_finite() && input_frequency > 0.0) {
            return Err(ConfigError::InvalidInputFrequency);
        }
        if !(1..=FEEDBACK_MULTIPLIER_MAX).contains(&feedback_multiplier) {
            return Err(ConfigError::FeedbackMultiplierOutOfRange(feedback_multiplier));
        }
        if ref_divider > REF_DIVIDER_MAX {
            return Err(ConfigError::RefDividerOutOfRange(ref_divider));
        }
        if output_divider > OUTPUT_DIVIDER_MAX {
            return Err(ConfigError::OutputDividerOutOfRange(output_divider));
        }

        let pll = Self {
            input_frequency,
            feedback_multiplier,
            ref_divider,
            output_divider,
            app_clock_divider,
        };

        let vco = pll.vco_frequency();
        if !(VCO_FREQ_MIN..=VCO_FREQ_MAX).contains(&vco) {
            return Err(ConfigError::VcoOutOfRange(vco));
        }

        Ok(pll)
    }

    pub fn input_frequency(&self) -> f64 {
        self.input_frequency
    }

    pub fn feedback_multiplier(&self) -> u16 {
        self.feedback_multiplier
    }

    pub fn ref_divider(&self) -> u8 {
        self.ref_divider
    }

    pub fn output_divider(&self) -> u8 {
        self.output_divider
    }

    pub fn app_clock_divider(&self) -> u16 {
        self.app_clock_divider
    }

    /// VCO = IN × (F + 1) / 2 / (R + 1)
    pub fn vco_frequency(&self) -> f64 {
        self.input_frequency * (self.feedback_multiplier as f64 + 1.0)
            / 2.0
            / (self.ref_divider as f64 + 1.0)
    }

    /// OUT = IN × (F + 1 + (f + 1)/(p + 1)) / 2 / (R + 1) / (OD + 1) / (2 × (ACD + 1))
    pub fn frequency(&self, frac: Fraction) -> f64 {
        self.input_frequency * (self.feedback_multiplier as f64 + 1.0 + frac.value())
            / 2.0
            / (self.ref_divider as f64 + 1.0)
            / (self.output_divider as f64 + 1.0)
            / (2.0 * (self.app_clock_divider as f64 + 1.0))
    }
}

/// Output frequency for a complete set of register fields.
pub fn compute_frequency(
    input_frequency: f64,
    feedback_multiplier: u16,
    ref_divider: u8,
    output_divider: u8,
    app_clock_divider: u16,
    f: u8,
    p: u8,
) -> Result<f64, ConfigError> {
    let pll = AppPll::new(
        input_frequency,
        feedback_multiplier,
        ref_divider,
        output_divider,
        app_clock_divider,
    )?;
    Ok(pll.frequency(Fraction::new(f, p)?))
}
