//! Tick driven control loop

use common::{
    types::{Count, Gain, SampleFraction},
    LockStatus,
};
use num_traits::Float;

use crate::{
    error::ConfigError,
    mapper::{FrequencyMapper, Resolution},
    pid::{PiiController, Terms},
};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kii: f64,
}

impl Gains {
    pub fn new(kp: f64, ki: f64, kii: f64) -> Self {
        Self { kp, ki, kii }
    }

    /// Gains in the Q16.16 encoding used by the firmware.
    pub fn from_q16(kp: Gain, ki: Gain, kii: Gain) -> Self {
        Self {
            kp: kp.to_num(),
            ki: ki.to_num(),
            kii: kii.to_num(),
        }
    }
}

/// Nominal clock relationship and loop tuning, fixed for the lifetime of
/// a loop.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopConfig {
    /// Nominal output clock cycles per reference clock cycle.
    pub ratio: f64,
    /// Reference clock cycles between two control calls.
    pub ticks_per_call: u32,
    pub gains: Gains,
    pub initial_count: Count,
    pub initial_ref_count: Count,
    /// Width of the free running counters, they wrap at `2^counter_bits`.
    pub counter_bits: u8,
}

impl LoopConfig {
    pub fn expected_increment(&self) -> f64 {
        self.ratio * self.ticks_per_call as f64
    }

    fn counter_mask(&self) -> Count {
        Count::MAX >> (Count::BITS - self.counter_bits as u32)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.ratio.is_finite() && self.ratio > 0.0) || self.ticks_per_call == 0 {
            return Err(ConfigError::InvalidRatio);
        }
        if self.counter_bits == 0 || self.counter_bits as u32 > Count::BITS {
            return Err(ConfigError::InvalidCounterWidth(self.counter_bits));
        }
        if self.expected_increment() >= self.counter_mask() as f64 + 1.0 {
            return Err(ConfigError::ExpectedIncrementTooLarge);
        }
        Ok(())
    }
}

/// Measurement window over the nominal window, strictly positive.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct PeriodFraction(f64);

impl PeriodFraction {
    pub const NOMINAL: Self = Self(1.0);

    pub fn new(fraction: f64) -> Option<Self> {
        (fraction.is_finite() && fraction > 0.0).then_some(Self(fraction))
    }

    pub fn from_fixed(fraction: SampleFraction) -> Option<Self> {
        Self::new(fraction.to_num())
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl Default for PeriodFraction {
    fn default() -> Self {
        Self::NOMINAL
    }
}

/// Software PLL: turns the output clock count seen once per control call
/// into a fractional register setting.
pub struct SwPll<'a> {
    mapper: FrequencyMapper<'a>,
    pii: PiiController,
    expected_increment: f64,
    expected_floor: f64,
    counter_mask: Count,
    ticks_per_call: Count,
    last_count: Count,
    expected_count: f64,
    ref_count: Count,
    error: i64,
    terms: Terms,
    lock_status: LockStatus,
}

impl<'a> SwPll<'a> {
    pub fn new(config: LoopConfig, mapper: FrequencyMapper<'a>) -> Result<Self, ConfigError> {
        config.validate()?;

        let Gains { kp, ki, kii } = config.gains;
        let lut_size = mapper.lut().size();
        let pii = PiiController::new(kp, ki, kii, lut_size)?;

        let counter_mask = config.counter_mask();
        let expected_increment = config.expected_increment();
        let (limit_i, limit_ii) = pii.windup_limits();

        info!(
            "sw pll params: kp {}, ki {}, kii {}, expected increment {}, windup limits {} / {}, lut size {}",
            kp,
            ki,
            kii,
            expected_increment,
            limit_i,
            limit_ii,
            lut_size,
        );

        Ok(Self {
            mapper,
            pii,
            expected_increment,
            expected_floor: Float::floor(expected_increment),
            counter_mask,
            ticks_per_call: config.ticks_per_call,
            last_count: config.initial_count & counter_mask,
            expected_count: (config.initial_count & counter_mask) as f64,
            ref_count: config.initial_ref_count & counter_mask,
            error: 0,
            terms: Terms::default(),
            lock_status: LockStatus::Locked,
        })
    }

    pub fn tick(&mut self, count: Count) -> Resolution {
        self.tick_with_fraction(count, PeriodFraction::NOMINAL)
    }

    /// One control step. `fraction` scales the observed increment back to
    /// a nominal window when the measurement period was late or early.
    pub fn tick_with_fraction(&mut self, count: Count, fraction: PeriodFraction) -> Resolution {
        let count = count & self.counter_mask;
        let increment = count.wrapping_sub(self.last_count) & self.counter_mask;
        self.last_count = count;
        self.advance_expected();

        let raw_error = increment as f64 / fraction.get() - self.expected_floor;
        let terms = self.pii.update(raw_error);
        let error = terms.total() as i64;

        self.terms = terms;
        self.error = error;

        let resolution = self.mapper.resolve(error);
        debug!(
            "tick: increment {}, error {}, index {}, register {:#x}",
            increment,
            error,
            resolution.index,
            resolution.register,
        );

        if resolution.lock_status != self.lock_status {
            if resolution.lock_status.is_locked() {
                info!("sw pll locked at index {}", resolution.index);
            } else {
                warn!("sw pll lost lock: {}, error {}", resolution.lock_status, error);
            }
            self.lock_status = resolution.lock_status;
        }

        resolution
    }

    fn advance_expected(&mut self) {
        let modulus = self.counter_mask as f64 + 1.0;
        self.expected_count += self.expected_increment;
        if self.expected_count >= modulus {
            self.expected_count -= modulus;
        }
        self.ref_count = self.ref_count.wrapping_add(self.ticks_per_call) & self.counter_mask;
    }

    /// Correction fed to the mapper on the last tick, after truncation.
    pub fn error(&self) -> i64 {
        self.error
    }

    pub fn terms(&self) -> Terms {
        self.terms
    }

    pub fn expected_increment(&self) -> f64 {
        self.expected_increment
    }

    pub fn expected_count(&self) -> f64 {
        self.expected_count
    }

    pub fn ref_count(&self) -> Count {
        self.ref_count
    }

    pub fn lock_status(&self) -> LockStatus {
        self.lock_status
    }

    pub fn active_index(&self) -> usize {
        self.mapper.active_index()
    }

    pub fn active_register(&self) -> u16 {
        self.mapper
            .lut()
            .register(self.mapper.active_index())
            .unwrap_or_default()
    }

    pub fn frequency(&self) -> f64 {
        self.mapper.frequency()
    }

    pub fn mapper(&self) -> &FrequencyMapper<'a> {
        &self.mapper
    }

    pub fn integral(&self) -> f64 {
        self.pii.integral()
    }
}
