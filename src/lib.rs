//! Mean squared displacement analysis of particle-tracking trajectories.
//!
//! Trajectories are loaded from CSV (MOSAIC layout), JSON or Parquet, gaps
//! are filled, tracks from several videos are stacked into frame x particle
//! matrices and reduced to per-lag MSDs.  Replicate averages, axis choice and
//! PNG plots support comparing samples; per-frame histograms show the spread
//! of MSDs or diffusion coefficients.

pub mod axes;
pub mod color;
pub mod config;
pub mod data;
pub mod error;
pub mod histogram;
pub mod msd;
pub mod plot;
pub mod samples;
pub mod summary;

pub use config::AnalysisConfig;
pub use error::{DiffusionError, Result};
pub use histogram::{Analysis, HistogramOptions, HistogramReport, Theta, histogram_by_video};
pub use msd::{
    MmsdResult, MsdOptions, TrajectoryStack, fill_in_frames, msd_iteration, vectorized_mmsd_calcs,
};
