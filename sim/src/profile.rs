//! JSON loop profiles

use std::path::{Path, PathBuf};

use common::{types::Gain, ReferenceSetup};
use serde::{Deserialize, Serialize};
use sw_pll::{AppPll, ConfigError, Gains, LoopConfig, Lut, RegisterFormat};
use thiserror::Error;

use crate::header;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Malformed profile")]
    JsonError(#[from] serde_json::Error),
    #[error("Invalid loop configuration: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Header error")]
    HeaderError(#[from] header::HeaderError),
    #[error("Gain {0} does not fit Q16.16")]
    GainOutOfRange(f64),
    #[error("LUT with {0} entries cannot be described to a reference")]
    LutTooLarge(usize),
}

/// Integer fields of the application PLL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PllFields {
    /// F
    pub feedback_multiplier: u16,
    /// R
    pub ref_divider: u8,
    /// OD
    pub output_divider: u8,
    /// ACD
    pub app_clock_divider: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LutSource {
    /// Every reduced fraction with a denominator up to `max_denominator`
    /// inside `[min_fraction, max_fraction]`.
    Generated {
        max_denominator: u16,
        min_fraction: f64,
        max_fraction: f64,
    },
    /// A `fractions.h` table, optionally with the `register_setup.h` it was
    /// generated with. Fields from the register file take precedence over
    /// `pll`.
    Header {
        fractions: PathBuf,
        registers: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainSettings {
    pub kp: f64,
    pub ki: f64,
    #[serde(default)]
    pub kii: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub input_frequency: f64,
    pub target_frequency: f64,
    pub reference_frequency: f64,
    pub pll: PllFields,
    pub lut: LutSource,
    pub gains: GainSettings,
    /// Reference clock cycles per control call.
    pub ticks_per_call: u32,
    pub counter_bits: u8,
}

impl Default for Profile {
    /// 24 MHz crystal to a 12.288 MHz MCLK locked to a 48 kHz word clock,
    /// covering roughly +-700 ppm.
    fn default() -> Self {
        Self {
            input_frequency: 24_000_000.0,
            target_frequency: 12_288_000.0,
            reference_frequency: 48_000.0,
            pll: PllFields {
                feedback_multiplier: 146,
                ref_divider: 0,
                output_divider: 7,
                app_clock_divider: 8,
            },
            lut: LutSource::Generated {
                max_denominator: 80,
                min_fraction: 0.35,
                max_fraction: 0.56,
            },
            gains: GainSettings {
                kp: 0.1,
                ki: 2.0,
                kii: 0.0,
            },
            ticks_per_call: 512,
            counter_bits: 32,
        }
    }
}

impl Profile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProfileError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Nominal output clock cycles per reference cycle.
    pub fn ratio(&self) -> f64 {
        self.target_frequency / self.reference_frequency
    }

    /// PLL fields after applying a register file, if the profile names one.
    pub fn pll_fields(&self) -> Result<PllFields, ProfileError> {
        match &self.lut {
            LutSource::Header {
                registers: Some(path),
                ..
            } => {
                let setup = header::parse_register_setup(&std::fs::read_to_string(path)?)?;
                Ok(setup.pll)
            }
            _ => Ok(self.pll),
        }
    }

    pub fn app_pll(&self) -> Result<AppPll, ProfileError> {
        let fields = self.pll_fields()?;
        Ok(AppPll::new(
            self.input_frequency,
            fields.feedback_multiplier,
            fields.ref_divider,
            fields.output_divider,
            fields.app_clock_divider,
        )?)
    }

    pub fn build_lut(&self, pll: &AppPll) -> Result<Lut, ProfileError> {
        let format = RegisterFormat::default();
        let lut = match &self.lut {
            LutSource::Generated {
                max_denominator,
                min_fraction,
                max_fraction,
            } => Lut::generate(pll, format, *max_denominator, *min_fraction, *max_fraction)?,
            LutSource::Header { fractions, .. } => {
                let entries = header::parse_fractions(&std::fs::read_to_string(fractions)?)?;
                Lut::build(pll, format, entries)?
            }
        };
        Ok(lut)
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            ratio: self.ratio(),
            ticks_per_call: self.ticks_per_call,
            gains: Gains::new(self.gains.kp, self.gains.ki, self.gains.kii),
            initial_count: 0,
            initial_ref_count: 0,
            counter_bits: self.counter_bits,
        }
    }

    /// The same loop as seen by a reference implementation. Gains go out
    /// as Q16.16, so a local loop built from the result may differ slightly
    /// from [`Profile::loop_config`].
    pub fn reference_setup(&self, pll: &AppPll, lut: &Lut) -> Result<ReferenceSetup, ProfileError> {
        let q16 = |gain: f64| Gain::checked_from_num(gain).ok_or(ProfileError::GainOutOfRange(gain));
        let config = self.loop_config();
        if lut.size() > u16::MAX as usize {
            return Err(ProfileError::LutTooLarge(lut.size()));
        }

        Ok(ReferenceSetup {
            input_frequency: pll.input_frequency(),
            feedback_multiplier: pll.feedback_multiplier(),
            ref_divider: pll.ref_divider(),
            output_divider: pll.output_divider(),
            app_clock_divider: pll.app_clock_divider(),
            ratio: config.ratio,
            ticks_per_call: config.ticks_per_call,
            kp: q16(self.gains.kp)?,
            ki: q16(self.gains.ki)?,
            kii: q16(self.gains.kii)?,
            initial_count: config.initial_count,
            counter_bits: config.counter_bits,
            lut: lut.registers().collect(),
        })
    }
}
