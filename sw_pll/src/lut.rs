//! Fractional register lookup table

use crate::{
    error::ConfigError,
    frequency::AppPll,
    register::{Fraction, RegisterFormat},
};

/// Upper bound on table entries, the table lives in a fixed-size buffer.
pub const MAX_LUT_ENTRIES: usize = 1024;

/// Packed fractional register values ordered by output frequency.
///
/// The loop assumes that a higher index never means a lower frequency, so
/// the ordering is checked against the PLL model when the table is built
/// and the table is read-only afterwards.
#[derive(Debug, Clone)]
pub struct Lut {
    format: RegisterFormat,
    entries: heapless::Vec<(u16, Fraction), MAX_LUT_ENTRIES>,
}

/// Range summary of a table for a given PLL.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LutStats {
    pub min_frequency: f64,
    pub mid_frequency: f64,
    pub max_frequency: f64,
    pub steps: usize,
    pub average_step: f64,
    /// Half of the relative span, in ppm.
    pub ppm_range: f64,
}

impl Lut {
    /// Builds a table from `(index, register)` pairs.
    ///
    /// Indices must run 0, 1, 2... and every register must decode to a
    /// proper fraction whose frequency is not below the previous entry's.
    pub fn build<I>(pll: &AppPll, format: RegisterFormat, entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (usize, u16)>,
    {
        let mut table = heapless::Vec::new();
        let mut last_frequency = None;

        for (expected, (index, raw)) in entries.into_iter().enumerate() {
            if index != expected {
                return Err(ConfigError::LutIndexGap {
                    expected,
                    found: index,
                });
            }

            let fraction = format.decode(raw)?;
            let frequency = pll.frequency(fraction);
            if matches!(last_frequency, Some(last) if frequency < last) {
                return Err(ConfigError::NonMonotonicLut { index });
            }
            last_frequency = Some(frequency);

            table
                .push((raw, fraction))
                .map_err(|_| ConfigError::LutTooLarge(expected + 1))?;
        }

        if table.is_empty() {
            return Err(ConfigError::EmptyLut);
        }

        Ok(Self {
            format,
            entries: table,
        })
    }

    pub fn from_registers(
        pll: &AppPll,
        format: RegisterFormat,
        registers: &[u16],
    ) -> Result<Self, ConfigError> {
        Self::build(pll, format, registers.iter().copied().enumerate())
    }

    /// Table of every reduced fraction n/d with d up to `max_denominator`
    /// inside `[min, max]`, in increasing order.
    pub fn generate(
        pll: &AppPll,
        format: RegisterFormat,
        max_denominator: u16,
        min: f64,
        max: f64,
    ) -> Result<Self, ConfigError> {
        if !(2..=256).contains(&max_denominator)
            || !(min.is_finite() && max.is_finite())
            || min > max
            || min >= 1.0
            || max <= 0.0
        {
            return Err(ConfigError::InvalidFractionRange);
        }

        let mut ratios = heapless::Vec::<(u16, u16), MAX_LUT_ENTRIES>::new();
        for d in 2..=max_denominator {
            for n in 1..d {
                if gcd(n, d) != 1 {
                    continue;
                }
                let value = n as f64 / d as f64;
                if value < min || value > max {
                    continue;
                }
                ratios
                    .push((n, d))
                    .map_err(|_| ConfigError::LutTooLarge(ratios.len() + 1))?;
            }
        }

        // n1/d1 < n2/d2 <=> n1*d2 < n2*d1, exact for the whole range
        ratios.sort_unstable_by(|a, b| (a.0 as u32 * b.1 as u32).cmp(&(b.0 as u32 * a.1 as u32)));

        let mut registers = heapless::Vec::<u16, MAX_LUT_ENTRIES>::new();
        for (n, d) in ratios {
            let raw = format.encode(Fraction::from_ratio(n, d)?);
            registers
                .push(raw)
                .map_err(|_| ConfigError::LutTooLarge(registers.len() + 1))?;
        }

        Self::from_registers(pll, format, &registers)
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Index the loop sits at with zero error.
    pub fn mid_index(&self) -> usize {
        self.entries.len() / 2
    }

    pub fn format(&self) -> RegisterFormat {
        self.format
    }

    pub fn register(&self, index: usize) -> Option<u16> {
        self.entries.get(index).map(|(raw, _)| *raw)
    }

    pub fn decode(&self, index: usize) -> Option<Fraction> {
        self.entries.get(index).map(|(_, fraction)| *fraction)
    }

    pub fn registers(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.iter().map(|(raw, _)| *raw)
    }

    pub fn frequencies<'a>(&'a self, pll: &'a AppPll) -> impl Iterator<Item = f64> + 'a {
        self.entries.iter().map(|(_, fraction)| pll.frequency(*fraction))
    }

    /// Entry at an index known to be in range.
    pub(crate) fn entry(&self, index: usize) -> (u16, Fraction) {
        self.entries[index]
    }

    pub fn stats(&self, pll: &AppPll) -> LutStats {
        let frequency = |index: usize| pll.frequency(self.entry(index).1);

        let steps = self.size();
        let min_frequency = frequency(0);
        let mid_frequency = frequency(self.mid_index());
        let max_frequency = frequency(steps - 1);

        LutStats {
            min_frequency,
            mid_frequency,
            max_frequency,
            steps,
            average_step: (max_frequency - min_frequency) / steps as f64,
            ppm_range: 1e6 * (max_frequency / min_frequency - 1.0) / 2.0,
        }
    }
}

fn gcd(mut a: u16, mut b: u16) -> u16 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pll() -> AppPll {
        AppPll::new(24e6, 146, 0, 7, 8).unwrap()
    }

    #[test]
    fn generated_table_is_strictly_increasing() {
        let pll = pll();
        let lut = Lut::generate(&pll, RegisterFormat::FracHighByte, 80, 0.35, 0.56).unwrap();

        assert_eq!(lut.size(), 416);
        assert_eq!(lut.register(0), Some(0x0613)); // 7/20
        assert_eq!(lut.register(415), Some(0x0d18)); // 14/25
        assert_eq!(lut.register(lut.mid_index()), Some(0x040a)); // 5/11

        let freqs: std::vec::Vec<f64> = lut.frequencies(&pll).collect();
        assert!(freqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn small_farey_table_order() {
        let lut = Lut::generate(&pll(), RegisterFormat::FracHighByte, 5, 0.0, 1.0).unwrap();
        // 1/5 1/4 1/3 2/5 1/2 3/5 2/3 3/4 4/5
        let expected = [0x0004, 0x0003, 0x0002, 0x0104, 0x0001, 0x0204, 0x0102, 0x0203, 0x0304];
        assert!(lut.registers().eq(expected.iter().copied()));
    }

    #[test]
    fn decode_splits_register() {
        let lut = Lut::from_registers(&pll(), RegisterFormat::FracHighByte, &[0x0613, 0x0d18]).unwrap();
        let frac = lut.decode(1).unwrap();
        assert_eq!((frac.f(), frac.p()), (0x0d, 0x18));
        assert_eq!(lut.decode(2), None);
        assert_eq!(lut.register(2), None);
    }

    #[test]
    fn indices_must_be_contiguous() {
        let err = Lut::build(
            &pll(),
            RegisterFormat::FracHighByte,
            [(0, 0x0613), (2, 0x0d18)],
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::LutIndexGap { expected: 1, found: 2 });

        let err = Lut::build(&pll(), RegisterFormat::FracHighByte, [(1, 0x0613)]).unwrap_err();
        assert_eq!(err, ConfigError::LutIndexGap { expected: 0, found: 1 });
    }

    #[test]
    fn empty_table_is_rejected() {
        let err = Lut::from_registers(&pll(), RegisterFormat::FracHighByte, &[]).unwrap_err();
        assert_eq!(err, ConfigError::EmptyLut);
    }

    #[test]
    fn decreasing_frequency_is_rejected() {
        // 14/25 then 7/20
        let err = Lut::from_registers(&pll(), RegisterFormat::FracHighByte, &[0x0d18, 0x0613])
            .unwrap_err();
        assert_eq!(err, ConfigError::NonMonotonicLut { index: 1 });
    }

    #[test]
    fn equal_neighbours_are_allowed() {
        // 1/2 and 2/4 give the same frequency
        let lut = Lut::from_registers(&pll(), RegisterFormat::FracHighByte, &[0x0001, 0x0103]).unwrap();
        assert_eq!(lut.size(), 2);
    }

    #[test]
    fn improper_entry_is_rejected() {
        let err = Lut::from_registers(&pll(), RegisterFormat::FracHighByte, &[0x0613, 0x1818])
            .unwrap_err();
        assert_eq!(err, ConfigError::ImproperFraction { f: 0x18, p: 0x18 });
    }

    #[test]
    fn oversized_table_is_rejected() {
        let err = Lut::generate(&pll(), RegisterFormat::FracHighByte, 256, 0.0, 1.0).unwrap_err();
        assert!(matches!(err, ConfigError::LutTooLarge(_)));
    }

    #[test]
    fn bad_ranges_are_rejected() {
        let pll = pll();
        for (denom, min, max) in [(1, 0.1, 0.9), (257, 0.1, 0.9), (80, 0.9, 0.1), (80, 1.0, 1.0), (80, f64::NAN, 0.5)] {
            assert_eq!(
                Lut::generate(&pll, RegisterFormat::FracHighByte, denom, min, max).unwrap_err(),
                ConfigError::InvalidFractionRange
            );
        }
    }

    #[test]
    fn stats_cover_the_table() {
        let pll = pll();
        let lut = Lut::generate(&pll, RegisterFormat::FracHighByte, 80, 0.35, 0.56).unwrap();
        let stats = lut.stats(&pll);

        assert_eq!(stats.steps, 416);
        assert_relative_eq!(stats.min_frequency, 24e6 * (147.0 + 7.0 / 20.0) / 288.0, max_relative = 1e-12);
        assert_relative_eq!(stats.max_frequency, 24e6 * (147.0 + 14.0 / 25.0) / 288.0, max_relative = 1e-12);
        assert_relative_eq!(stats.mid_frequency, 24e6 * (147.0 + 5.0 / 11.0) / 288.0, max_relative = 1e-12);
        assert_relative_eq!(stats.ppm_range, 712.589, epsilon = 1e-3);
        assert_relative_eq!(
            stats.average_step,
            (stats.max_frequency - stats.min_frequency) / 416.0
        );
    }

    #[test]
    fn gcd_reduces() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(7, 20), 1);
    }
}
