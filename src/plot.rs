use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use image::{Rgb, RgbImage};

use crate::axes::{AxisParams, choose_y_axis_params, range_and_ticks};
use crate::color::ColorMap;
use crate::data::filter::matching_keys;
use crate::histogram::FrameHistogram;
use crate::summary::SeriesMap;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

// ---------------------------------------------------------------------------
// Canvas – raster plot area with data coordinates
// ---------------------------------------------------------------------------

/// A white image with a rectangular plot area mapped to data coordinates.
/// Data marks are clipped to the plot area; axes and legend are not.
pub struct Canvas {
    img: RgbImage,
    left: u32,
    right: u32,
    top: u32,
    bottom: u32,
    x_range: (f64, f64),
    y_range: (f64, f64),
}

impl Canvas {
    pub fn new(width: u32, height: u32, x_range: (f64, f64), y_range: (f64, f64)) -> Self {
        let margin_x = width / 10;
        let margin_y = height / 10;
        Canvas {
            img: RgbImage::from_pixel(width, height, WHITE),
            left: margin_x,
            right: width.saturating_sub(margin_x / 2),
            top: margin_y / 2,
            bottom: height.saturating_sub(margin_y),
            x_range,
            y_range,
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.img
    }

    /// Data coordinates to pixel coordinates (y grows downward).
    fn to_px(&self, x: f64, y: f64) -> (f64, f64) {
        let (x0, x1) = self.x_range;
        let (y0, y1) = self.y_range;
        let w = f64::from(self.right - self.left);
        let h = f64::from(self.bottom - self.top);
        let px = f64::from(self.left) + (x - x0) / (x1 - x0) * w;
        let py = f64::from(self.bottom) - (y - y0) / (y1 - y0) * h;
        (px, py)
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb<u8>, clip: bool) {
        let (w, h) = (self.img.width().saturating_sub(1), self.img.height().saturating_sub(1));
        let (min_x, max_x, min_y, max_y) = if clip {
            (self.left, self.right.min(w), self.top, self.bottom.min(h))
        } else {
            (0, w, 0, h)
        };
        if self.img.width() == 0
            || self.img.height() == 0
            || x < i64::from(min_x)
            || x > i64::from(max_x)
            || y < i64::from(min_y)
            || y > i64::from(max_y)
        {
            return;
        }
        self.img.put_pixel(x as u32, y as u32, color);
    }

    fn dot(&mut self, x: f64, y: f64, color: Rgb<u8>, width: u32, clip: bool) {
        let half = i64::from(width / 2);
        let (cx, cy) = (x.round() as i64, y.round() as i64);
        for dy in -half..=half {
            for dx in -half..=half {
                self.put(cx + dx, cy + dy, color, clip);
            }
        }
    }

    /// Straight segment between two pixel positions.
    fn segment_px(&mut self, a: (f64, f64), b: (f64, f64), color: Rgb<u8>, width: u32, clip: bool) {
        let pad = f64::from(width);
        let bounds = (
            -pad,
            f64::from(self.img.width()) + pad,
            -pad,
            f64::from(self.img.height()) + pad,
        );
        let Some((a, b)) = clip_segment(a, b, bounds) else {
            return;
        };
        let steps = (b.0 - a.0).abs().max((b.1 - a.1).abs()).ceil().max(1.0) as usize;
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            self.dot(a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t, color, width, clip);
        }
    }

    /// Segment between two data points.
    pub fn segment(&mut self, a: (f64, f64), b: (f64, f64), color: Rgb<u8>, width: u32) {
        let (pa, pb) = (self.to_px(a.0, a.1), self.to_px(b.0, b.1));
        self.segment_px(pa, pb, color, width, true);
    }

    /// Connected line through the points; non-finite points break the line.
    pub fn polyline(&mut self, points: &[(f64, f64)], color: Rgb<u8>, width: u32) {
        for pair in points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if [a.0, a.1, b.0, b.1].iter().all(|v| v.is_finite()) {
                self.segment(a, b, color, width);
            }
        }
    }

    /// Vertical bar of ±`sd` around `(x, y)` with caps.
    pub fn error_bar(&mut self, x: f64, y: f64, sd: f64, color: Rgb<u8>, width: u32) {
        if ![x, y, sd].iter().all(|v| v.is_finite()) {
            return;
        }
        let lo = self.to_px(x, y - sd);
        let hi = self.to_px(x, y + sd);
        self.segment_px(lo, hi, color, width, true);
        let cap = f64::from(width.max(2) * 4);
        for end in [lo, hi] {
            self.segment_px((end.0 - cap, end.1), (end.0 + cap, end.1), color, width, true);
        }
    }

    /// Histogram outline (`histtype='step'`) over `edges`.
    pub fn step_outline(&mut self, edges: &[f64], counts: &[usize], color: Rgb<u8>, width: u32) {
        if edges.len() != counts.len() + 1 {
            return;
        }
        let mut prev = 0.0;
        for (i, &count) in counts.iter().enumerate() {
            let c = count as f64;
            self.segment((edges[i], prev), (edges[i], c), color, width);
            self.segment((edges[i], c), (edges[i + 1], c), color, width);
            prev = c;
        }
        if let Some(&last) = edges.last() {
            self.segment((last, prev), (last, 0.0), color, width);
        }
    }

    /// Left and bottom axes with outward tick marks every `x_tick`/`y_tick`.
    pub fn draw_axes(&mut self, x_tick: f64, y_tick: f64) {
        let (l, r, t, b) = (
            f64::from(self.left),
            f64::from(self.right),
            f64::from(self.top),
            f64::from(self.bottom),
        );
        self.segment_px((l, b), (r, b), BLACK, 3, false);
        self.segment_px((l, t), (l, b), BLACK, 3, false);

        let tick_len = f64::from(self.img.height() / 80).max(4.0);
        for x in tick_positions(self.x_range, x_tick) {
            let (px, _) = self.to_px(x, self.y_range.0);
            self.segment_px((px, b), (px, b + tick_len), BLACK, 2, false);
        }
        for y in tick_positions(self.y_range, y_tick) {
            let (_, py) = self.to_px(self.x_range.0, y);
            self.segment_px((l - tick_len, py), (l, py), BLACK, 2, false);
        }
    }

    /// Colour swatches stacked in the upper-left corner of the plot area.
    pub fn legend(&mut self, entries: &[(String, Rgb<u8>)]) {
        let size = (self.img.height() / 60).max(6);
        let x0 = self.left + size * 2;
        for (i, (_, color)) in entries.iter().enumerate() {
            let y0 = self.top + size * 2 + i as u32 * size * 2;
            for y in y0..y0 + size {
                for x in x0..x0 + size * 3 {
                    self.put(i64::from(x), i64::from(y), *color, true);
                }
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.img
            .save(path)
            .with_context(|| format!("writing plot {}", path.display()))
    }
}

/// Liang-Barsky clip of segment `a`-`b` to `(x0, x1, y0, y1)`.
fn clip_segment(
    a: (f64, f64),
    b: (f64, f64),
    bounds: (f64, f64, f64, f64),
) -> Option<((f64, f64), (f64, f64))> {
    if ![a.0, a.1, b.0, b.1].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (x0, x1, y0, y1) = bounds;
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [(-dx, a.0 - x0), (dx, x1 - a.0), (-dy, a.1 - y0), (dy, y1 - a.1)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((
        (a.0 + t0 * dx, a.1 + t0 * dy),
        (a.0 + t1 * dx, a.1 + t1 * dy),
    ))
}

/// Multiples of `tick` inside `range`, starting at the first one at or above
/// the lower bound.
fn tick_positions(range: (f64, f64), tick: f64) -> Vec<f64> {
    let (lo, hi) = range;
    if !(tick.is_finite() && tick > 0.0 && hi > lo) {
        return Vec::new();
    }
    let start = (lo / tick).ceil();
    let end = (hi / tick + 1e-9).floor();
    (start as i64..=end as i64).map(|k| k as f64 * tick).collect()
}

fn hex(c: Rgb<u8>) -> String {
    format!("#{:02x}{:02x}{:02x}", c.0[0], c.0[1], c.0[2])
}

// ---------------------------------------------------------------------------
// MSD line plot
// ---------------------------------------------------------------------------

/// Options for [`graph_single_variable`].
#[derive(Debug, Clone, PartialEq)]
pub struct LinePlotOptions {
    /// Series are drawn over frames `0..to_frame`.
    pub to_frame: usize,
    /// Fixed (x, y) axes; chosen from the data when absent.
    pub manual_axes: Option<(AxisParams, AxisParams)>,
    pub width: u32,
    pub height: u32,
    pub line_width: u32,
    /// When set, legend labels keep only the text after this marker.
    pub label_identifier: Option<String>,
    pub base_name: String,
}

impl LinePlotOptions {
    pub fn from_config(plot: &crate::config::PlotConfig) -> Self {
        Self {
            to_frame: plot.to_frame,
            manual_axes: None,
            width: plot.width,
            height: plot.height,
            line_width: plot.line_width,
            label_identifier: plot.label_identifier.clone(),
            base_name: plot.base_name.clone(),
        }
    }
}

/// Axes used for a written plot.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotAxes {
    pub x: AxisParams,
    pub y: AxisParams,
    pub path: PathBuf,
}

/// Plot every averaged series whose name contains both `name1` and `name2`,
/// with standard deviation bars at `sd_frames`, to
/// `{base_name}_{name1}_{name2}.png` in `out_dir`.
#[allow(clippy::too_many_arguments)]
pub fn graph_single_variable(
    all_avg: &SeriesMap,
    all_sd: &SeriesMap,
    time: &[f64],
    time_sd: &[f64],
    sd_frames: &[usize],
    name1: &str,
    name2: &str,
    options: &LinePlotOptions,
    out_dir: &Path,
) -> Result<PlotAxes> {
    let keys = matching_keys(all_avg.keys(), &[name1, name2]);
    if keys.is_empty() {
        bail!("no averaged series matches '{name1}' and '{name2}'");
    }
    if time_sd.len() != sd_frames.len() {
        bail!(
            "{} SD times for {} SD frames",
            time_sd.len(),
            sd_frames.len()
        );
    }

    let (x, y) = match options.manual_axes {
        Some(axes) => axes,
        None => (
            range_and_ticks(time, options.to_frame, None).context("choosing time axis")?,
            choose_y_axis_params(all_avg, name1, name2, options.to_frame)
                .context("choosing MSD axis")?,
        ),
    };

    let mut canvas = Canvas::new(options.width, options.height, (0.0, x.range), (0.0, y.range));
    let colors = ColorMap::new(&keys);

    for key in &keys {
        let color = colors.color_for(key);
        let avg = &all_avg[key];
        let points: Vec<(f64, f64)> = time
            .iter()
            .zip(avg.iter())
            .take(options.to_frame)
            .map(|(&t, &v)| (t, v))
            .collect();
        canvas.polyline(&points, color, options.line_width);

        if let Some(sd) = all_sd.get(key) {
            for ((&frame, &t), &s) in sd_frames.iter().zip(time_sd).zip(sd) {
                if let Some(&v) = avg.get(frame) {
                    canvas.error_bar(t, v, s, color, (options.line_width / 3).max(1));
                }
            }
        }
    }

    canvas.draw_axes(x.ticks, y.ticks);
    let legend: Vec<(String, Rgb<u8>)> = colors
        .legend_entries()
        .into_iter()
        .map(|(key, c)| (legend_label(&key, options.label_identifier.as_deref()), c))
        .collect();
    canvas.legend(&legend);
    for (label, c) in &legend {
        log::info!("Legend {}: {label}", hex(*c));
    }

    std::fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let path = out_dir.join(format!("{}_{name1}_{name2}.png", options.base_name));
    canvas.save(&path)?;
    log::info!(
        "Wrote {} (time 0-{:.*} s, MSD 0-{:.*} µm²)",
        path.display(),
        x.decimals as usize,
        x.range,
        y.decimals as usize,
        y.range
    );

    Ok(PlotAxes { x, y, path })
}

/// Text after `identifier` when present, the whole key otherwise.
pub fn legend_label(key: &str, identifier: Option<&str>) -> String {
    identifier
        .and_then(|id| key.split_once(id))
        .map_or(key, |(_, rest)| rest)
        .to_string()
}

// ---------------------------------------------------------------------------
// Histogram plot
// ---------------------------------------------------------------------------

/// Overlay the per-frame histograms as step outlines.
pub fn histogram_plot(
    path: &Path,
    histograms: &[FrameHistogram],
    y_range: Option<f64>,
    width: u32,
    height: u32,
) -> Result<()> {
    let Some(first) = histograms.first() else {
        bail!("no histograms to plot");
    };
    let edges = &first.histogram.edges;
    let (Some(&x0), Some(&x1)) = (edges.first(), edges.last()) else {
        bail!("histogram has no bins");
    };

    let max_count = histograms
        .iter()
        .flat_map(|h| h.histogram.counts.iter().copied())
        .max()
        .unwrap_or(0);
    let y = match y_range {
        Some(r) => AxisParams {
            range: r,
            ticks: r / 5.0,
            decimals: 0,
        },
        None => range_and_ticks(&[max_count.max(1) as f64], 1, Some(0))?,
    };
    let x_span = if x1 > x0 { x1 - x0 } else { 1.0 };

    let mut canvas = Canvas::new(width, height, (x0, x0 + x_span), (0.0, y.range));
    let names: Vec<String> = histograms.iter().map(|h| format!("frame_{}", h.frame)).collect();
    let colors = ColorMap::new(&names);
    for (h, name) in histograms.iter().zip(&names) {
        canvas.step_outline(&h.histogram.edges, &h.histogram.counts, colors.color_for(name), 3);
    }
    canvas.draw_axes(x_span / 10.0, y.ticks);
    canvas.legend(&colors.legend_entries());
    canvas.save(path)
}
