//! Software PLL control loop.
//!
//! Locks an application PLL to a reference clock by counting output clock
//! cycles once per control call and stepping the PLL's fractional divider
//! through a lookup table of monotonic register values.
#![cfg_attr(not(test), no_std)]

// must stay first, the logging macros are textually scoped
mod fmt;

pub mod controller;
pub mod error;
pub mod frequency;
pub mod lut;
pub mod mapper;
pub mod pid;
pub mod register;

pub use common::LockStatus;
pub use controller::{Gains, LoopConfig, PeriodFraction, SwPll};
pub use error::ConfigError;
pub use frequency::{compute_frequency, AppPll};
pub use lut::{Lut, LutStats};
pub use mapper::{FrequencyMapper, Resolution, FEEDBACK_SIGN};
pub use register::{Fraction, RegisterFormat};
