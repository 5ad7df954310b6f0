use fixed::types::{I16F16, U1F31};

/// Loop gain as loaded into the firmware, Q16.16.
pub type Gain = I16F16;

/// Actual sampling interval over the nominal one.
pub type SampleFraction = U1F31;

pub type Count = u32;
pub type RegisterValue = u16;
