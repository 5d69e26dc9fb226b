//! Per-frame histograms of particle MSDs or diffusion coefficients.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::data::loader::load_matrix;
use crate::data::model::FrameMatrix;
use crate::data::writer::save_table;
use crate::error::{DiffusionError, Result};
use crate::msd::diffusion_coefficients;
use crate::plot::histogram_plot;

// ---------------------------------------------------------------------------
// Quantity and scale
// ---------------------------------------------------------------------------

/// Which per-particle quantity is binned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theta {
    /// Mean squared displacement as stored.
    Msd,
    /// `D = MSD / (4 t)`.
    Diffusion,
}

/// Scale the quantity is binned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Analysis {
    /// Natural log.
    Log,
    Raw,
}

impl fmt::Display for Theta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Theta::Msd => "msd",
            Theta::Diffusion => "diffusion",
        })
    }
}

impl FromStr for Theta {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "msd" => Ok(Theta::Msd),
            "diffusion" | "d" => Ok(Theta::Diffusion),
            other => Err(format!("unknown theta '{other}', expected msd or diffusion")),
        }
    }
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Analysis::Log => "log",
            Analysis::Raw => "raw",
        })
    }
}

impl FromStr for Analysis {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "log" => Ok(Analysis::Log),
            "raw" => Ok(Analysis::Raw),
            other => Err(format!("unknown analysis '{other}', expected log or raw")),
        }
    }
}

// ---------------------------------------------------------------------------
// Binning
// ---------------------------------------------------------------------------

/// Counts over `edges.len() - 1` bins.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub edges: Vec<f64>,
    pub counts: Vec<usize>,
}

impl Histogram {
    /// Bin `values` into `[edges[i], edges[i+1])`; the last bin also holds its
    /// right edge. Values outside the edges are dropped.
    pub fn from_values(values: &[f64], edges: &[f64]) -> Self {
        let bins = edges.len().saturating_sub(1);
        let mut counts = vec![0usize; bins];
        if bins == 0 {
            return Histogram {
                edges: edges.to_vec(),
                counts,
            };
        }
        let (lo, hi) = (edges[0], edges[bins]);
        for &v in values {
            if !(v >= lo && v <= hi) {
                continue;
            }
            // First edge strictly above v, minus one.
            let idx = edges.partition_point(|&e| e <= v).saturating_sub(1).min(bins - 1);
            counts[idx] += 1;
        }
        Histogram {
            edges: edges.to_vec(),
            counts,
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// `bins + 1` evenly spaced edges covering `[min, max]`. A degenerate range
/// is widened by 0.5 on either side.
pub fn bin_edges(min: f64, max: f64, bins: usize) -> Result<Vec<f64>> {
    if bins == 0 {
        return Err(DiffusionError::InvalidParameter("bins must be at least 1".to_string()));
    }
    if !(min.is_finite() && max.is_finite()) || min > max {
        return Err(DiffusionError::NothingToBin);
    }
    let (lo, hi) = if min == max { (min - 0.5, max + 0.5) } else { (min, max) };
    let width = (hi - lo) / bins as f64;
    let mut edges: Vec<f64> = (0..bins).map(|i| lo + i as f64 * width).collect();
    edges.push(hi);
    Ok(edges)
}

// ---------------------------------------------------------------------------
// Histograms by video
// ---------------------------------------------------------------------------

/// Options for [`histogram_by_video`].
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramOptions {
    pub fps: f64,
    pub frame_range: Vec<usize>,
    pub bins: usize,
    pub analysis: Analysis,
    pub theta: Theta,
    pub y_range: Option<f64>,
    pub output_dir: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
}

impl HistogramOptions {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        let h = &config.histogram;
        Self {
            fps: h.fps,
            frame_range: h.frame_range.clone(),
            bins: h.bins,
            analysis: h.analysis,
            theta: h.theta,
            y_range: h.y_range,
            output_dir: h.output_dir.clone(),
            width: config.plot.width,
            height: config.plot.height,
        }
    }
}

impl Default for HistogramOptions {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}

/// One frame's histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHistogram {
    pub frame: usize,
    /// Values that went into the histogram.
    pub values: Vec<f64>,
    pub histogram: Histogram,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramReport {
    pub histograms: Vec<FrameHistogram>,
    pub png_path: PathBuf,
    pub csv_path: PathBuf,
}

/// The binned values for each requested frame of an MSD matrix. Zeros and
/// non-finite values are removed after the transform.
pub fn frame_values(
    msd: &FrameMatrix,
    options: &HistogramOptions,
) -> Result<Vec<(usize, Vec<f64>)>> {
    if let Some(&frame) = options.frame_range.iter().find(|&&f| f >= msd.frames()) {
        return Err(DiffusionError::FrameOutOfRange {
            frame,
            frames: msd.frames(),
        });
    }
    let theta = match options.theta {
        Theta::Msd => msd.clone(),
        Theta::Diffusion => diffusion_coefficients(msd, options.fps)?,
    };

    Ok(options
        .frame_range
        .iter()
        .map(|&frame| {
            let values = theta
                .row(frame)
                .iter()
                .filter(|&&v| v != 0.0)
                .map(|&v| match options.analysis {
                    Analysis::Log => v.ln(),
                    Analysis::Raw => v,
                })
                .filter(|v| v.is_finite())
                .collect();
            (frame, values)
        })
        .collect())
}

/// Shared-bin histograms of every frame in `frame_range`.
pub fn frame_histograms(
    msd: &FrameMatrix,
    options: &HistogramOptions,
) -> Result<Vec<FrameHistogram>> {
    let per_frame = frame_values(msd, options)?;
    let (min, max) = per_frame
        .iter()
        .flat_map(|(_, v)| v.iter().copied())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let edges = bin_edges(min, max, options.bins)?;

    Ok(per_frame
        .into_iter()
        .map(|(frame, values)| {
            let histogram = Histogram::from_values(&values, &edges);
            FrameHistogram {
                frame,
                values,
                histogram,
            }
        })
        .collect())
}

/// Load an `SM2xy` matrix, bin the requested frames, and write
/// `{stem}_hist.png` and `{stem}_hist.csv`.
pub fn histogram_by_video(
    sm_filename: &Path,
    options: &HistogramOptions,
) -> AnyResult<HistogramReport> {
    let msd = load_matrix(sm_filename)?;
    let histograms = frame_histograms(&msd, options)
        .with_context(|| format!("building histograms for {}", sm_filename.display()))?;

    let stem = sm_filename
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("histogram");
    let dir = match &options.output_dir {
        Some(d) => d.clone(),
        None => sm_filename.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    if !dir.as_os_str().is_empty() {
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let png_path = dir.join(format!("{stem}_hist.png"));
    let csv_path = dir.join(format!("{stem}_hist.csv"));

    histogram_plot(&png_path, &histograms, options.y_range, options.width, options.height)?;
    save_histogram_table(&csv_path, &histograms)?;

    for h in &histograms {
        if h.values.is_empty() {
            log::warn!("{stem} frame {}: no finite non-zero values", h.frame);
        }
        log::info!(
            "{stem} frame {}: {} values ({} {})",
            h.frame,
            h.histogram.total(),
            options.analysis,
            options.theta
        );
    }
    log::info!("Wrote {} and {}", png_path.display(), csv_path.display());

    Ok(HistogramReport {
        histograms,
        png_path,
        csv_path,
    })
}

fn save_histogram_table(path: &Path, histograms: &[FrameHistogram]) -> AnyResult<()> {
    let mut header = vec!["bin_start".to_string(), "bin_end".to_string()];
    header.extend(histograms.iter().map(|h| format!("frame_{}", h.frame)));

    let edges = histograms
        .first()
        .map(|h| h.histogram.edges.as_slice())
        .unwrap_or_default();
    let rows: Vec<Vec<f64>> = edges
        .windows(2)
        .enumerate()
        .map(|(i, e)| {
            let mut row = vec![e[0], e[1]];
            row.extend(histograms.iter().map(|h| h.histogram.counts[i] as f64));
            row
        })
        .collect();
    save_table(path, &header, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn options(theta: Theta, analysis: Analysis, frames: Vec<usize>) -> HistogramOptions {
        HistogramOptions {
            fps: 10.0,
            frame_range: frames,
            bins: 4,
            analysis,
            theta,
            y_range: None,
            output_dir: None,
            width: 200,
            height: 150,
        }
    }

    #[test]
    fn last_bin_is_closed() {
        let h = Histogram::from_values(&[0.0, 0.5, 1.0, 2.0, 2.5, -1.0], &[0.0, 1.0, 2.0]);
        assert_eq!(h.counts, vec![2, 2]);
    }

    #[test]
    fn edges_are_evenly_spaced() {
        let e = bin_edges(1.0, 3.0, 4).unwrap();
        assert_eq!(e.len(), 5);
        assert_relative_eq!(e[1], 1.5);
        assert_relative_eq!(e[4], 3.0);
        assert_eq!(bin_edges(2.0, 2.0, 2).unwrap(), vec![1.5, 2.0, 2.5]);
        assert!(bin_edges(0.0, 1.0, 0).is_err());
    }

    #[test]
    fn zeros_and_nan_are_dropped_before_binning() {
        let msd = FrameMatrix::from_rows(vec![
            vec![0.0, 0.0, 0.0],
            vec![1.0, 0.0, f64::NAN],
            vec![4.0, 8.0, 2.0],
        ])
        .unwrap();
        let hs = frame_histograms(&msd, &options(Theta::Msd, Analysis::Raw, vec![1, 2])).unwrap();
        assert_eq!(hs[0].values, vec![1.0]);
        assert_eq!(hs[1].values, vec![4.0, 8.0, 2.0]);
        for h in &hs {
            assert_eq!(h.histogram.total(), h.values.len());
            assert_eq!(h.histogram.edges, hs[0].histogram.edges);
        }
    }

    #[test]
    fn diffusion_log_values() {
        // Frame 2 at 10 fps: t = 0.2 s, D = 0.8 / 0.8 = 1, ln 1 = 0.
        let msd = FrameMatrix::from_rows(vec![vec![0.0], vec![0.4], vec![0.8]]).unwrap();
        let v = frame_values(&msd, &options(Theta::Diffusion, Analysis::Log, vec![2])).unwrap();
        assert_relative_eq!(v[0].1[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn invalid_requests_fail() {
        let msd = FrameMatrix::from_rows(vec![vec![0.0], vec![1.0]]).unwrap();
        assert!(matches!(
            frame_histograms(&msd, &options(Theta::Msd, Analysis::Raw, vec![5])),
            Err(DiffusionError::FrameOutOfRange { frame: 5, frames: 2 })
        ));
        let mut zero_fps = options(Theta::Diffusion, Analysis::Raw, vec![1]);
        zero_fps.fps = 0.0;
        assert!(frame_histograms(&msd, &zero_fps).is_err());
        assert_eq!(
            frame_histograms(&msd, &options(Theta::Msd, Analysis::Raw, vec![0])),
            Err(DiffusionError::NothingToBin)
        );
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("MSD".parse::<Theta>().unwrap(), Theta::Msd);
        assert_eq!("log".parse::<Analysis>().unwrap(), Analysis::Log);
        assert!("sqrt".parse::<Analysis>().is_err());
        assert_eq!(Theta::Diffusion.to_string(), "diffusion");
    }

    #[test]
    fn outputs_land_next_to_the_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("SM2xy_sample.csv");
        std::fs::write(&input, "0,0\n1,2\n3,4\n").unwrap();

        let report =
            histogram_by_video(&input, &options(Theta::Msd, Analysis::Raw, vec![1, 2])).unwrap();
        assert_eq!(report.png_path, dir.path().join("SM2xy_sample_hist.png"));
        let csv = std::fs::read_to_string(&report.csv_path).unwrap();
        assert!(csv.starts_with("bin_start,bin_end,frame_1,frame_2\n"));
        assert_eq!(csv.lines().count(), 5);
        assert!(report.png_path.exists());
    }
}
