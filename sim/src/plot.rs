//! SVG charts of a run and of a table's range.
//!
//! Only lines are drawn, no text, so no font backend is needed.

use std::path::Path;

use plotters::prelude::*;
use sw_pll::{AppPll, Lut};

use crate::driver::Trajectory;

const SIZE: (u32, u32) = (1024, 768);

#[derive(Debug, thiserror::Error)]
#[error("Plotting failed: {0}")]
pub struct PlotError(String);

fn plot_error<E: std::error::Error + Send + Sync>(err: DrawingAreaErrorKind<E>) -> PlotError {
    PlotError(err.to_string())
}

/// Padded `(min, max)` over `values`, never an empty range.
fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
        (min.min(v), max.max(v))
    });
    if !(min.is_finite() && max.is_finite()) {
        return (0.0, 1.0);
    }
    let pad = ((max - min) * 0.05).max(max.abs() * 1e-6).max(1e-9);
    (min - pad, max + pad)
}

/// Actual output frequency in red against the target in blue.
pub fn step_response(path: &Path, trajectory: &Trajectory) -> Result<(), PlotError> {
    let records = trajectory.to_vec();
    let first = records.first().map_or(0, |r| r.tick) as f64;
    let last = records.last().map_or(1, |r| r.tick.max(1)) as f64;
    let (min, max) = bounds(
        records
            .iter()
            .flat_map(|r| [r.frequency, r.target_frequency]),
    );

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d(first..last, min..max)
        .map_err(plot_error)?;

    chart
        .draw_series(LineSeries::new(
            records.iter().map(|r| (r.tick as f64, r.target_frequency)),
            &BLUE,
        ))
        .map_err(plot_error)?;
    chart
        .draw_series(LineSeries::new(
            records.iter().map(|r| (r.tick as f64, r.frequency)),
            &RED,
        ))
        .map_err(plot_error)?;

    root.present().map_err(plot_error)
}

/// Output frequency over the table index.
pub fn frequency_range(path: &Path, lut: &Lut, pll: &AppPll) -> Result<(), PlotError> {
    let frequencies: Vec<f64> = lut.frequencies(pll).collect();
    let (min, max) = bounds(frequencies.iter().copied());
    let last = frequencies.len().saturating_sub(1).max(1) as f64;

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d(0.0..last, min..max)
        .map_err(plot_error)?;

    chart
        .draw_series(LineSeries::new(
            frequencies
                .iter()
                .enumerate()
                .map(|(index, freq)| (index as f64, *freq)),
            &GREEN,
        ))
        .map_err(plot_error)?;

    root.present().map_err(plot_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Driver, Scenario};
    use crate::profile::Profile;
    use sw_pll::{FrequencyMapper, SwPll};

    #[test]
    fn writes_svg_files() {
        let dir = tempfile::tempdir().unwrap();
        let profile = Profile::default();
        let pll = profile.app_pll().unwrap();
        let lut = profile.build_lut(&pll).unwrap();

        let range = dir.path().join("range.svg");
        frequency_range(&range, &lut, &pll).unwrap();

        let sw_pll = SwPll::new(profile.loop_config(), FrequencyMapper::new(pll, &lut)).unwrap();
        let scenario = Scenario {
            ticks: 30,
            ..Scenario::default()
        };
        let trajectory = Driver::new(sw_pll, &profile, scenario).run();
        let response = dir.path().join("response.svg");
        step_response(&response, &trajectory).unwrap();

        for path in [range, response] {
            let svg = std::fs::read_to_string(path).unwrap();
            assert!(svg.contains("<svg"));
            assert!(svg.contains("<polyline"));
        }
    }

    #[test]
    fn bounds_are_never_empty() {
        assert_eq!(bounds(std::iter::empty()), (0.0, 1.0));
        let (min, max) = bounds([5.0, 5.0].into_iter());
        assert!(min < 5.0 && max > 5.0);
    }
}
