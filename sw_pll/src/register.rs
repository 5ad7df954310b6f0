//! Fractional divider register

use crate::error::ConfigError;

/// Fractional multiplier/divider pair as written to the PLL.
///
/// The hardware adds one to both fields, so the fractional part of the
/// feedback divider is `(f + 1) / (p + 1)`, always below 1.0.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction {
    f: u8,
    p: u8,
}

impl Fraction {
    pub fn new(f: u8, p: u8) -> Result<Self, ConfigError> {
        if f < p {
            Ok(Self { f, p })
        } else {
            Err(ConfigError::ImproperFraction { f, p })
        }
    }

    /// Fraction `numerator / denominator` in register form, `0 < numerator < denominator <= 256`.
    pub fn from_ratio(numerator: u16, denominator: u16) -> Result<Self, ConfigError> {
        if numerator == 0 || numerator >= denominator || denominator > 256 {
            return Err(ConfigError::InvalidFractionRange);
        }
        Self::new((numerator - 1) as u8, (denominator - 1) as u8)
    }

    pub fn f(&self) -> u8 {
        self.f
    }

    pub fn p(&self) -> u8 {
        self.p
    }

    pub fn value(&self) -> f64 {
        (self.f as f64 + 1.0) / (self.p as f64 + 1.0)
    }
}

/// One bitfield inside a 16 bit register word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    offset: u8,
    num_bits: u8,
}

impl Field {
    #[inline]
    fn mask(self) -> u16 {
        !(0xFFFFu16 << self.num_bits)
    }

    #[inline]
    fn get(self, w: u16) -> u8 {
        ((w >> self.offset) & self.mask()) as u8
    }

    #[inline]
    fn set(self, w: u16, v: u8) -> u16 {
        let fbits = (v as u16 & self.mask()) << self.offset;
        let rbits = w & !(self.mask() << self.offset);
        rbits | fbits
    }
}

/// Layout of the packed table entries emitted by the divider search.
///
/// The table generator owns this format. A new layout gets a new variant
/// so tables written for the old one keep decoding the way they were built.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum RegisterFormat {
    /// Bits 15..8 hold f, bits 7..0 hold p.
    #[default]
    FracHighByte,
}

impl RegisterFormat {
    fn fields(self) -> (Field, Field) {
        match self {
            Self::FracHighByte => (
                Field { offset: 8, num_bits: 8 },
                Field { offset: 0, num_bits: 8 },
            ),
        }
    }

    pub fn decode(self, raw: u16) -> Result<Fraction, ConfigError> {
        let (f, p) = self.fields();
        Fraction::new(f.get(raw), p.get(raw))
    }

    pub fn encode(self, fraction: Fraction) -> u16 {
        let (f, p) = self.fields();
        p.set(f.set(0, fraction.f), fraction.p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_byte_is_multiplier() {
        let frac = RegisterFormat::FracHighByte.decode(0x1214).unwrap();
        assert_eq!((frac.f(), frac.p()), (0x12, 0x14));
        assert_eq!(RegisterFormat::FracHighByte.encode(frac), 0x1214);
    }

    #[test]
    fn round_trip_is_bit_exact() {
        let format = RegisterFormat::default();
        for p in 1..=255u8 {
            for f in (0..p).step_by(7) {
                let raw = format.encode(Fraction::new(f, p).unwrap());
                assert_eq!(raw, (f as u16) << 8 | p as u16);
                assert_eq!(format.decode(raw).unwrap(), Fraction::new(f, p).unwrap());
            }
        }
    }

    #[test]
    fn improper_fraction_is_rejected() {
        assert_eq!(
            RegisterFormat::FracHighByte.decode(0x1414),
            Err(ConfigError::ImproperFraction { f: 0x14, p: 0x14 })
        );
        assert!(Fraction::new(3, 2).is_err());
    }

    #[test]
    fn ratio_maps_to_register_offsets() {
        let frac = Fraction::from_ratio(19, 21).unwrap();
        assert_eq!((frac.f(), frac.p()), (18, 20));
        assert_eq!(frac.value(), 19.0 / 21.0);
        assert!(Fraction::from_ratio(0, 2).is_err());
        assert!(Fraction::from_ratio(3, 257).is_err());
        assert_eq!(Fraction::from_ratio(1, 0), Err(ConfigError::InvalidFractionRange));
        assert_eq!(Fraction::from_ratio(4, 4), Err(ConfigError::InvalidFractionRange));
        assert!(Fraction::from_ratio(255, 256).is_ok());
    }
}
