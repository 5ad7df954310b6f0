//! `fractions.h` and `register_setup.h` as produced by the PLL search
//! tools.
//!
//! The fraction table looks like
//!
//! ```text
//! static unsigned short frac_values_80[416] = {
//! 0x0613, // Index: 0 Fraction: 7/20 = 0.3500
//! ...
//! };
//! ```
//!
//! and the register file carries the PLL fields in its leading comment as
//! `F: 146`, `R: 0`, `f: 4`, `p: 10`, `OD: 7` and `ACD: 8` lines.

use sw_pll::{lut::MAX_LUT_ENTRIES, AppPll, Lut};
use thiserror::Error;

use crate::profile::PllFields;

#[derive(Debug, Error, PartialEq)]
pub enum HeaderError {
    #[error("No frac_values declaration found")]
    MissingDeclaration,
    #[error("Line {line}: table of {size} entries exceeds the supported maximum")]
    TableTooLarge { line: usize, size: usize },
    #[error("Line {line}: entry index {index} outside of the declared {size} entries")]
    IndexOutOfRange { line: usize, index: usize, size: usize },
    #[error("Line {line}: malformed table entry")]
    MalformedEntry { line: usize },
    #[error("Table entry {0} is missing")]
    MissingEntry(usize),
    #[error("Field {0} not found in register setup")]
    MissingField(&'static str),
    #[error("Field {name} has invalid value {value}")]
    InvalidField { name: &'static str, value: String },
}

/// Register setup parsed from the comment block of `register_setup.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSetup {
    pub pll: PllFields,
    pub f: u8,
    pub p: u8,
}

/// Reads a fraction table into `(index, register)` pairs in index order.
pub fn parse_fractions(text: &str) -> Result<Vec<(usize, u16)>, HeaderError> {
    let mut table: Option<Vec<Option<u16>>> = None;

    for (line_no, line) in text.lines().enumerate() {
        let line_no = line_no + 1;

        if let Some(size) = declared_size(line) {
            if size > MAX_LUT_ENTRIES {
                return Err(HeaderError::TableTooLarge { line: line_no, size });
            }
            table = Some(vec![None; size]);
            continue;
        }

        let Some(entry) = parse_entry(line, line_no)? else {
            continue;
        };
        let Some(table) = table.as_mut() else {
            return Err(HeaderError::MissingDeclaration);
        };

        let (index, raw) = entry;
        let size = table.len();
        let slot = table.get_mut(index).ok_or(HeaderError::IndexOutOfRange {
            line: line_no,
            index,
            size,
        })?;
        *slot = Some(raw);
    }

    table
        .ok_or(HeaderError::MissingDeclaration)?
        .into_iter()
        .enumerate()
        .map(|(index, raw)| raw.map(|raw| (index, raw)).ok_or(HeaderError::MissingEntry(index)))
        .collect()
}

/// `frac_values[N]`, `frac_values_80[N]` and so on.
fn declared_size(line: &str) -> Option<usize> {
    let rest = &line[line.find("frac_values")? + "frac_values".len()..];
    let rest = rest.strip_prefix('_').unwrap_or(rest);
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    let rest = rest.strip_prefix('[')?;
    let (size, _) = rest.split_once(']')?;
    size.parse().ok()
}

fn parse_entry(line: &str, line_no: usize) -> Result<Option<(usize, u16)>, HeaderError> {
    let (Some(hex_at), Some(index_at)) = (line.find("0x"), line.find("Index:")) else {
        return Ok(None);
    };
    let malformed = || HeaderError::MalformedEntry { line: line_no };

    let hex: String = line[hex_at + 2..]
        .chars()
        .take_while(char::is_ascii_hexdigit)
        .collect();
    let raw = u16::from_str_radix(&hex, 16).map_err(|_| malformed())?;

    let index: String = line[index_at + "Index:".len()..]
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    let index = index.parse().map_err(|_| malformed())?;

    Ok(Some((index, raw)))
}

pub fn parse_register_setup(text: &str) -> Result<RegisterSetup, HeaderError> {
    let field = |name: &'static str| -> Result<u32, HeaderError> {
        let value = text
            .lines()
            .map(|line| line.trim_start_matches("/*").trim())
            .find_map(|line| {
                let (key, value) = line.split_once(':')?;
                (key.trim() == name).then_some(value)
            })
            .ok_or(HeaderError::MissingField(name))?;

        let digits: String = value
            .trim()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().map_err(|_| HeaderError::InvalidField {
            name,
            value: value.trim().to_string(),
        })
    };
    let narrow = |name: &'static str, value: u32| -> Result<u8, HeaderError> {
        u8::try_from(value).map_err(|_| HeaderError::InvalidField {
            name,
            value: value.to_string(),
        })
    };
    let wide = |name: &'static str, value: u32| -> Result<u16, HeaderError> {
        u16::try_from(value).map_err(|_| HeaderError::InvalidField {
            name,
            value: value.to_string(),
        })
    };

    Ok(RegisterSetup {
        pll: PllFields {
            feedback_multiplier: wide("F", field("F")?)?,
            ref_divider: narrow("R", field("R")?)?,
            output_divider: narrow("OD", field("OD")?)?,
            app_clock_divider: wide("ACD", field("ACD")?)?,
        },
        f: narrow("f", field("f")?)?,
        p: narrow("p", field("p")?)?,
    })
}

pub fn emit_fractions(lut: &Lut, name: &str) -> String {
    let fractions = || (0..lut.size()).filter_map(|index| lut.decode(index));
    let min = fractions().map(|frac| frac.value()).fold(f64::INFINITY, f64::min);
    let max = fractions().map(|frac| frac.value()).fold(f64::NEG_INFINITY, f64::max);

    let entries: String = lut
        .registers()
        .zip(fractions())
        .enumerate()
        .map(|(index, (raw, frac))| {
            format!(
                "0x{:04X}, // Index: {} Fraction: {}/{} = {:.4}\n",
                raw,
                index,
                frac.f() as u16 + 1,
                frac.p() as u16 + 1,
                frac.value()
            )
        })
        .collect();

    format!(
        "/* Autogenerated by sw-pll-sim\n   {size} entries, fractions {min:.4} to {max:.4} */\n\n\
         static unsigned short {name}[{size}] = {{\n{entries}}};\n",
        size = lut.size(),
    )
}

/// Register setup starting the PLL on the middle of `lut`.
pub fn emit_register_setup(pll: &AppPll, lut: &Lut) -> String {
    let mid = lut.decode(lut.mid_index());
    let (f, p, frequency) = match mid {
        Some(frac) => (frac.f(), frac.p(), pll.frequency(frac)),
        None => (0, 1, f64::NAN),
    };

    [
        "/* Autogenerated by sw-pll-sim".to_string(),
        format!("   F: {}", pll.feedback_multiplier()),
        format!("   R: {}", pll.ref_divider()),
        format!("   f: {f}"),
        format!("   p: {p}"),
        format!("   OD: {}", pll.output_divider()),
        format!("   ACD: {}", pll.app_clock_divider()),
        format!("   Output freq: {frequency}"),
        format!("   VCO freq: {} */", pll.vco_frequency()),
    ]
    .iter()
    .map(|line| format!("{line}\n"))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_pll::RegisterFormat;

    const FRACTIONS: &str = "\
/* Autogenerated by pll_calc.py */
static unsigned short frac_values_90[4] = {
0x0613, // Index: 0 Fraction: 7/20 = 0.3500
0x0509, // Index: 1 Fraction: 6/10 = 0.6000
0x3A4B, // Index: 2 Fraction: 59/76 = 0.7763
0x0D18, // Index: 3 Fraction: 14/25 = 0.5600
};
";

    const REGISTERS: &str = "\
/* Autogenerated by SDM using command line:
   ./pll_calc.py -i 24.0  -a -m 80 -t 12.288 -p 6.0 -e 5 -r --fracmin 0.843 --fracmax 0.95 --header
   Picked output solution #0
   F: 506
   R: 3
   f: 18
   p: 20
   OD: 1
   ACD: 30
   Output freq: 12288018.433179723
   VCO freq: 3048000000.0 */

#define APP_PLL_CTL_REG  \t0x0A01F903
#define APP_PLL_DIV_REG  \t0x8000001E
#define APP_PLL_FRAC_REG  \t0x80001214
";

    #[test]
    fn parses_fraction_table() {
        let entries = parse_fractions(FRACTIONS).unwrap();
        assert_eq!(entries, vec![(0, 0x0613), (1, 0x0509), (2, 0x3a4b), (3, 0x0d18)]);
    }

    #[test]
    fn entries_may_come_out_of_order() {
        let text = "uint16_t frac_values[2] = {\n0x0002, // Index: 1 = 0.5\n0x0001, // Index: 0 = 0.33\n};";
        assert_eq!(parse_fractions(text).unwrap(), vec![(0, 0x0001), (1, 0x0002)]);
    }

    #[test]
    fn table_errors() {
        assert_eq!(
            parse_fractions("0x0613, // Index: 0 = 0.35"),
            Err(HeaderError::MissingDeclaration)
        );
        assert_eq!(
            parse_fractions("frac_values_8[2] = {\n0x0001, // Index: 0 = 0.5\n"),
            Err(HeaderError::MissingEntry(1))
        );
        assert_eq!(
            parse_fractions("frac_values_8[1] = {\n0x0001, // Index: 1 = 0.5\n"),
            Err(HeaderError::IndexOutOfRange { line: 2, index: 1, size: 1 })
        );
        assert_eq!(
            parse_fractions("frac_values_8[1] = {\n0xZZ, // Index: 0 = 0.5\n"),
            Err(HeaderError::MalformedEntry { line: 2 })
        );
    }

    #[test]
    fn oversized_tables_are_rejected() {
        assert_eq!(
            parse_fractions("/* huge */\nunsigned short frac_values[18446744073709551615] = {\n"),
            Err(HeaderError::TableTooLarge { line: 2, size: usize::MAX })
        );
        assert_eq!(
            parse_fractions("frac_values_80[1025] = {\n0x0001, // Index: 0 = 0.5\n"),
            Err(HeaderError::TableTooLarge { line: 1, size: 1025 })
        );

        let body: String = (0..MAX_LUT_ENTRIES)
            .map(|index| format!("0x0001, // Index: {index} = 0.5\n"))
            .collect();
        let text = format!("frac_values[{MAX_LUT_ENTRIES}] = {{\n{body}}};\n");
        assert_eq!(parse_fractions(&text).map(|entries| entries.len()), Ok(MAX_LUT_ENTRIES));
    }

    #[test]
    fn parses_register_setup() {
        let setup = parse_register_setup(REGISTERS).unwrap();
        assert_eq!(
            setup,
            RegisterSetup {
                pll: PllFields {
                    feedback_multiplier: 506,
                    ref_divider: 3,
                    output_divider: 1,
                    app_clock_divider: 30,
                },
                f: 18,
                p: 20,
            }
        );
    }

    #[test]
    fn register_setup_errors() {
        assert_eq!(
            parse_register_setup("F: 1\nR: 0\nf: 1\np: 2\nOD: 0\n"),
            Err(HeaderError::MissingField("ACD"))
        );
        assert_eq!(
            parse_register_setup("F: 1\nR: 300\nf: 1\np: 2\nOD: 0\nACD: 1\n"),
            Err(HeaderError::InvalidField { name: "R", value: "300".into() })
        );
    }

    #[test]
    fn emitted_headers_parse_back() {
        let pll = AppPll::new(24e6, 146, 0, 7, 8).unwrap();
        let lut = Lut::generate(&pll, RegisterFormat::FracHighByte, 80, 0.35, 0.56).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let fractions = dir.path().join("fractions.h");
        let registers = dir.path().join("register_setup.h");
        std::fs::write(&fractions, emit_fractions(&lut, "frac_values_80")).unwrap();
        std::fs::write(&registers, emit_register_setup(&pll, &lut)).unwrap();

        let entries = parse_fractions(&std::fs::read_to_string(&fractions).unwrap()).unwrap();
        let reparsed = Lut::build(&pll, RegisterFormat::FracHighByte, entries).unwrap();
        assert!(reparsed.registers().eq(lut.registers()));

        let header = emit_fractions(&lut, "frac_values_80");
        assert!(header.starts_with(
            "/* Autogenerated by sw-pll-sim\n   416 entries, fractions 0.3500 to 0.5600 */\n\n"
        ));
        assert!(header.contains(
            "static unsigned short frac_values_80[416] = {\n0x0613, // Index: 0 Fraction: 7/20 = 0.3500\n"
        ));
        assert!(header.ends_with("0x0D18, // Index: 415 Fraction: 14/25 = 0.5600\n};\n"));
        assert!(emit_register_setup(&pll, &lut).ends_with(" */\n"));

        let setup = parse_register_setup(&std::fs::read_to_string(&registers).unwrap()).unwrap();
        assert_eq!(setup.pll.feedback_multiplier, 146);
        assert_eq!(setup.pll.output_divider, 7);
        assert_eq!(setup.pll.app_clock_divider, 8);
        assert_eq!((setup.f, setup.p), (4, 10));
    }
}
