use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::model::Conversion;
use crate::histogram::{Analysis, Theta};

// ---------------------------------------------------------------------------
// Analysis configuration
// ---------------------------------------------------------------------------

/// Every tunable of a run. Loaded from JSON; any omitted field keeps its
/// default, so `{}` is a valid config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub conversion: Conversion,
    pub msd: MsdConfig,
    pub histogram: HistogramConfig,
    pub plot: PlotConfig,
}

impl AnalysisConfig {
    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AnalysisConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        log::debug!("Loaded config from {}: {config:?}", path.display());
        Ok(config)
    }

    /// `load` when a path is given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

/// Trajectory assembly settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MsdConfig {
    /// Tracks with fewer recorded frames than this are discarded.
    pub cut: usize,
    /// Videos are numbered `1..=total_videos`.
    pub total_videos: usize,
    /// Upper bound on the number of frames kept per particle.
    pub max_frames: Option<usize>,
    /// File name template; `{name}` and `{video}` are substituted.
    pub file_template: String,
}

impl Default for MsdConfig {
    fn default() -> Self {
        Self {
            cut: 1,
            total_videos: 1,
            max_frames: Some(651),
            file_template: "Traj_{name}_{video}.tif.csv".to_string(),
        }
    }
}

/// Histogram settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramConfig {
    /// Frame rate of the analysed video, used for diffusion coefficients.
    pub fps: f64,
    /// Frames at which a histogram is drawn.
    pub frame_range: Vec<usize>,
    pub bins: usize,
    pub analysis: Analysis,
    pub theta: Theta,
    /// Fixed upper limit of the count axis; chosen from the data when absent.
    pub y_range: Option<f64>,
    /// Where outputs go; next to the input file when absent.
    pub output_dir: Option<PathBuf>,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            fps: 100.02,
            frame_range: (5..30).step_by(5).collect(),
            bins: 50,
            analysis: Analysis::Log,
            theta: Theta::Diffusion,
            y_range: None,
            output_dir: None,
        }
    }
}

/// Line plot settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub width: u32,
    pub height: u32,
    pub line_width: u32,
    /// Series are drawn over frames `0..to_frame`.
    pub to_frame: usize,
    /// Frames at which standard deviation bars are drawn.
    pub sd_frames: Vec<usize>,
    pub base_name: String,
    /// When set, legend labels keep only the text after this marker.
    pub label_identifier: Option<String>,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: 1600,
            height: 1440,
            line_width: 6,
            to_frame: 15,
            sd_frames: vec![1, 7, 14],
            base_name: "KO".to_string(),
            label_identifier: None,
        }
    }
}
