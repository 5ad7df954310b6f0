use crate::error::ConfigError;

pub struct PController {
    kp: f64,
}

impl PController {
    pub fn new(kp: f64) -> Self {
        Self { kp }
    }

    pub fn update(&self, error: f64) -> f64 {
        self.kp * error
    }
}

/// Integrator whose output term is clamped to `±span / gain`.
///
/// Only the output is clamped, the sum keeps integrating.
pub struct IController {
    ki: f64,
    windup_limit: f64,
    integral: f64,
}

impl IController {
    pub fn new(ki: f64, span: f64) -> Self {
        let windup_limit = if ki != 0.0 { span / ki } else { 0.0 };
        Self {
            ki,
            windup_limit,
            integral: 0.0,
        }
    }

    /// Adds `input` and returns the new sum.
    pub fn accumulate(&mut self, input: f64) -> f64 {
        self.integral += input;
        self.integral
    }

    pub fn term(&self) -> f64 {
        (self.ki * self.integral).clamp(-self.windup_limit, self.windup_limit)
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn windup_limit(&self) -> f64 {
        self.windup_limit
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Terms {
    pub p: f64,
    pub i: f64,
    pub ii: f64,
}

impl Terms {
    pub fn total(&self) -> f64 {
        self.p + self.i + self.ii
    }
}

/// Proportional, integral and double integral control.
///
/// The double integrator integrates the single integrator's sum, both terms
/// are bounded by the table span so neither can push the index further
/// than the table is long.
pub struct PiiController {
    p: PController,
    i: IController,
    ii: IController,
}

impl PiiController {
    pub fn new(kp: f64, ki: f64, kii: f64, span: usize) -> Result<Self, ConfigError> {
        if ![kp, ki, kii].iter().all(|k| k.is_finite() && *k >= 0.0) {
            return Err(ConfigError::InvalidGain);
        }

        let span = span as f64;
        let p = PController::new(kp);
        let i = IController::new(ki, span);
        let ii = IController::new(kii, span);

        if !(i.windup_limit().is_finite() && ii.windup_limit().is_finite()) {
            return Err(ConfigError::InvalidGain);
        }

        Ok(Self { p, i, ii })
    }

    pub fn update(&mut self, error: f64) -> Terms {
        let sum = self.i.accumulate(error);
        self.ii.accumulate(sum);

        Terms {
            p: self.p.update(error),
            i: self.i.term(),
            ii: self.ii.term(),
        }
    }

    pub fn integral(&self) -> f64 {
        self.i.integral()
    }

    pub fn double_integral(&self) -> f64 {
        self.ii.integral()
    }

    pub fn windup_limits(&self) -> (f64, f64) {
        (self.i.windup_limit(), self.ii.windup_limit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_term_saturates_at_span_over_gain() {
        let mut pii = PiiController::new(0.0, 2.0, 0.0, 416).unwrap();
        assert_eq!(pii.windup_limits(), (208.0, 0.0));

        let mut max_seen: f64 = 0.0;
        for _ in 0..10_000 {
            let terms = pii.update(7.0);
            max_seen = max_seen.max(terms.i);
            assert!(terms.i <= 208.0);
        }
        assert_eq!(max_seen, 208.0);
        assert_eq!(pii.integral(), 70_000.0);

        let mut neg = PiiController::new(0.0, 2.0, 0.0, 416).unwrap();
        for _ in 0..10_000 {
            assert!(neg.update(-3.0).i >= -208.0);
        }
        assert_eq!(neg.update(-3.0).i, -208.0);
    }

    #[test]
    fn double_integral_saturates_too() {
        let mut pii = PiiController::new(0.0, 0.0, 0.5, 100).unwrap();
        let mut last = Terms::default();
        for _ in 0..1000 {
            last = pii.update(1.0);
            assert!(last.ii <= 200.0);
        }
        assert_eq!(last.ii, 200.0);
        assert_eq!(last.i, 0.0);
        // sum of 1..=1000
        assert_eq!(pii.double_integral(), 500_500.0);
    }

    #[test]
    fn zero_gain_means_zero_term() {
        let mut pii = PiiController::new(0.5, 0.0, 0.0, 416).unwrap();
        let terms = pii.update(10.0);
        assert_eq!(terms, Terms { p: 5.0, i: 0.0, ii: 0.0 });
        assert_eq!(terms.total(), 5.0);
    }

    #[test]
    fn terms_add_up() {
        let mut pii = PiiController::new(1.0, 0.5, 0.25, 1000).unwrap();
        pii.update(2.0);
        let terms = pii.update(4.0);
        // integral 6, double integral 2 + 6
        assert_eq!(terms, Terms { p: 4.0, i: 3.0, ii: 2.0 });
        assert_eq!(terms.total(), 9.0);
    }

    #[test]
    fn bad_gains_are_rejected() {
        assert_eq!(PiiController::new(f64::NAN, 1.0, 0.0, 10).err(), Some(ConfigError::InvalidGain));
        assert_eq!(PiiController::new(0.1, -1.0, 0.0, 10).err(), Some(ConfigError::InvalidGain));
        assert_eq!(PiiController::new(0.1, 1.0, f64::INFINITY, 10).err(), Some(ConfigError::InvalidGain));
        // denormal gain overflows the windup limit
        assert_eq!(PiiController::new(0.1, 1e-320, 0.0, 1000).err(), Some(ConfigError::InvalidGain));
    }
}
