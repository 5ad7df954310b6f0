//! Error to output frequency mapping

use common::LockStatus;

use crate::{frequency::AppPll, lut::Lut, register::Fraction};

/// Sign of the index step per unit of error.
///
/// Table frequency grows with index and a positive error means the
/// measured clock ran fast, so the index has to move down.
pub const FEEDBACK_SIGN: i64 = -1;

/// Outcome of one mapping step.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub frequency: f64,
    pub lock_status: LockStatus,
    pub index: usize,
    pub register: u16,
}

/// Selects table entries for a correction and tracks the fraction the PLL
/// is currently running with.
#[derive(Debug, Clone)]
pub struct FrequencyMapper<'a> {
    pll: AppPll,
    lut: &'a Lut,
    active: Fraction,
    active_index: usize,
}

impl<'a> FrequencyMapper<'a> {
    /// Starts out on the table midpoint.
    pub fn new(pll: AppPll, lut: &'a Lut) -> Self {
        let active_index = lut.mid_index();
        let (_, active) = lut.entry(active_index);
        Self {
            pll,
            lut,
            active,
            active_index,
        }
    }

    pub fn resolve(&mut self, error: i64) -> Resolution {
        let size = self.lut.size() as i64;
        let set_point = (self.lut.mid_index() as i64).saturating_add(FEEDBACK_SIGN.saturating_mul(error));

        let (index, lock_status) = if set_point < 0 {
            (0, LockStatus::UnlockedLow)
        } else if set_point >= size {
            (self.lut.size() - 1, LockStatus::UnlockedHigh)
        } else {
            (set_point as usize, LockStatus::Locked)
        };

        let (register, fraction) = self.lut.entry(index);
        self.active = fraction;
        self.active_index = index;

        Resolution {
            frequency: self.pll.frequency(fraction),
            lock_status,
            index,
            register,
        }
    }

    pub fn active_fraction(&self) -> Fraction {
        self.active
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn frequency(&self) -> f64 {
        self.pll.frequency(self.active)
    }

    pub fn pll(&self) -> &AppPll {
        &self.pll
    }

    pub fn lut(&self) -> &'a Lut {
        self.lut
    }
}
