//! Automatic axis limits and tick spacing for MSD plots.

use crate::data::filter::matching_keys;
use crate::error::{DiffusionError, Result};
use crate::summary::SeriesMap;

/// Upper axis limit, tick interval, and decimals to display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisParams {
    pub range: f64,
    pub ticks: f64,
    pub decimals: u32,
}

/// Pick an axis range for `values[..to_frame]` (positive data only).
///
/// Starting from the smallest power of ten that contains the maximum, the
/// range steps down by tenths until the data fills more than 75% of it.  The
/// tick interval is one or two tenths of the power of ten, then halved until
/// at least five ticks fit.
pub fn range_and_ticks(
    values: &[f64],
    to_frame: usize,
    manual_decimals: Option<u32>,
) -> Result<AxisParams> {
    let graph_max = values
        .iter()
        .take(to_frame)
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f64::NEG_INFINITY, f64::max);
    if !(graph_max.is_finite() && graph_max > 0.0) {
        return Err(DiffusionError::NoAxisRange(graph_max));
    }

    let exponent = graph_max.log10().ceil();
    let mut raw_max = 10f64.powf(exponent);
    let mut decimals = if exponent >= 0.0 { 1 } else { (2.0 - exponent) as u32 };

    let step = 0.1 * raw_max;
    let mut steps = 0u32;
    // Ten steps reach the next power of ten down, which always holds the max.
    while graph_max / raw_max <= 0.75 && steps < 10 {
        raw_max -= step;
        steps += 1;
    }
    let mut range = raw_max;
    if graph_max > range {
        range += step;
    }

    let mut ticks = if steps % 2 == 0 { 2.0 * step } else { step };
    while ticks / range >= 0.24 {
        ticks /= 2.0;
    }

    if let Some(d) = manual_decimals {
        decimals = d;
    }

    Ok(AxisParams {
        range,
        ticks,
        decimals,
    })
}

/// Axis parameters that fit every series whose name contains both `name1`
/// and `name2`: the one with the largest range wins, the first on ties.
pub fn choose_y_axis_params(
    all_avg: &SeriesMap,
    name1: &str,
    name2: &str,
    to_frame: usize,
) -> Result<AxisParams> {
    let keys = matching_keys(all_avg.keys(), &[name1, name2]);
    let mut best: Option<AxisParams> = None;
    for key in &keys {
        let params = range_and_ticks(&all_avg[key], to_frame, None)?;
        if best.map_or(true, |b| params.range > b.range) {
            best = Some(params);
        }
    }
    best.ok_or_else(|| DiffusionError::NoMatchingSeries(vec![name1.to_string(), name2.to_string()]))
}
