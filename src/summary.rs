//! Averages and standard deviations of MSD curves across replicates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyResult};

use crate::data::filter::matching_keys;
use crate::data::model::Conversion;
use crate::data::writer::save_table;
use crate::error::{DiffusionError, Result};
use crate::samples::{GelGrid, PupGrid};

pub type SeriesMap = BTreeMap<String, Vec<f64>>;

// ---------------------------------------------------------------------------
// Time axes
// ---------------------------------------------------------------------------

/// Time in seconds of frames `0..=frames`, and the times of `sd_frames`.
pub fn build_time_array(
    frames: usize,
    conversion: &Conversion,
    sd_frames: &[usize],
) -> Result<(Vec<f64>, Vec<f64>)> {
    let fps = conversion.frames_per_second;
    if !(fps.is_finite() && fps > 0.0) {
        return Err(DiffusionError::InvalidParameter(format!(
            "frame rate must be positive, got {fps}"
        )));
    }
    let time: Vec<f64> = (0..=frames).map(|f| f as f64 / fps).collect();
    let time_sd = sd_frames
        .iter()
        .map(|&f| {
            time.get(f).copied().ok_or(DiffusionError::FrameOutOfRange {
                frame: f,
                frames: time.len(),
            })
        })
        .collect::<Result<Vec<f64>>>()?;
    Ok((time, time_sd))
}

/// `frames` when given, otherwise the length of the shortest loaded series.
pub fn resolve_frames(data: &SeriesMap, frames: Option<usize>) -> Result<usize> {
    match frames {
        Some(f) => Ok(f),
        None => data
            .values()
            .map(Vec::len)
            .min()
            .ok_or(DiffusionError::EmptyInput("no series loaded")),
    }
}

// ---------------------------------------------------------------------------
// Replicate statistics
// ---------------------------------------------------------------------------

/// The first `frames` values of every series whose name contains `needle`.
fn matching_series<'a>(data: &'a SeriesMap, frames: usize, needle: &str) -> Result<Vec<&'a [f64]>> {
    let keys = matching_keys(data.keys(), &[needle]);
    if keys.is_empty() {
        return Err(DiffusionError::NoMatchingSeries(vec![needle.to_string()]));
    }
    keys.iter()
        .map(|k| {
            let series = &data[k];
            if series.len() < frames {
                return Err(DiffusionError::SeriesTooShort {
                    name: k.clone(),
                    len: series.len(),
                    frames,
                });
            }
            Ok(&series[..frames])
        })
        .collect()
}

/// Per-frame mean over every series whose name contains `to_average`.
pub fn return_average(data: &SeriesMap, frames: usize, to_average: &str) -> Result<Vec<f64>> {
    let members = matching_series(data, frames, to_average)?;
    let n = members.len() as f64;
    Ok((0..frames)
        .map(|j| members.iter().map(|s| s[j]).sum::<f64>() / n)
        .collect())
}

/// [`return_average`] for each group in `avg_sets`.
pub fn avg_all(data: &SeriesMap, frames: usize, avg_sets: &[String]) -> Result<SeriesMap> {
    avg_sets
        .iter()
        .map(|set| Ok((set.clone(), return_average(data, frames, set)?)))
        .collect()
}

/// Population standard deviation over every series whose name contains
/// `to_stdev`, taken at `sd_frames`.
pub fn return_sd(
    data: &SeriesMap,
    frames: usize,
    sd_frames: &[usize],
    to_stdev: &str,
) -> Result<Vec<f64>> {
    if let Some(&frame) = sd_frames.iter().find(|&&f| f >= frames) {
        return Err(DiffusionError::FrameOutOfRange { frame, frames });
    }
    let members = matching_series(data, frames, to_stdev)?;
    let n = members.len() as f64;
    Ok(sd_frames
        .iter()
        .map(|&j| {
            let mean = members.iter().map(|s| s[j]).sum::<f64>() / n;
            let var = members.iter().map(|s| (s[j] - mean).powi(2)).sum::<f64>() / n;
            var.sqrt()
        })
        .collect())
}

/// [`return_sd`] for each group in `avg_sets`.
pub fn sd_all(
    data: &SeriesMap,
    frames: usize,
    sd_frames: &[usize],
    avg_sets: &[String],
) -> Result<SeriesMap> {
    avg_sets
        .iter()
        .map(|set| Ok((set.clone(), return_sd(data, frames, sd_frames, set)?)))
        .collect()
}

// ---------------------------------------------------------------------------
// Prepared studies
// ---------------------------------------------------------------------------

/// Gel data averaged over replicates.
#[derive(Debug, Clone, PartialEq)]
pub struct GelStudy {
    pub data: SeriesMap,
    pub avg_sets: Vec<String>,
    pub time: Vec<f64>,
    pub time_sd: Vec<f64>,
    pub sd_frames: Vec<usize>,
    pub averages: SeriesMap,
    pub sds: SeriesMap,
}

/// Load the gel grid and average it over replicates. Without `frames` the
/// shortest series sets the frame count.
pub fn prepare_gel_study(
    path_template: &str,
    frames: Option<usize>,
    sd_frames: &[usize],
    conversion: &Conversion,
    grid: &GelGrid,
) -> AnyResult<GelStudy> {
    let loaded = grid.load(path_template)?;
    let frames = resolve_frames(&loaded.data, frames)?;
    let (time, time_sd) = build_time_array(frames, conversion, sd_frames)?;
    let averages = avg_all(&loaded.data, frames, &loaded.avg_sets).context("averaging replicates")?;
    let sds = sd_all(&loaded.data, frames, sd_frames, &loaded.avg_sets)
        .context("standard deviations over replicates")?;
    log::info!("Averaged {} samples into {} groups", loaded.data.len(), averages.len());
    Ok(GelStudy {
        data: loaded.data,
        avg_sets: loaded.avg_sets,
        time,
        time_sd,
        sd_frames: sd_frames.to_vec(),
        averages,
        sds,
    })
}

impl GelStudy {
    /// Write `averages.csv` (time plus one column per group) and `sd.csv`
    /// (SD times plus one column per group) into `dir`.
    pub fn save(&self, dir: &Path) -> AnyResult<Vec<PathBuf>> {
        save_group_tables(dir, &self.time, &self.averages, &self.time_sd, &self.sds)
    }
}

/// Slice data averaged over slices, then over pups.
#[derive(Debug, Clone, PartialEq)]
pub struct PupStudy {
    /// Slice name → MSD series.
    pub data: SeriesMap,
    pub avg_over_slices: Vec<String>,
    pub avg_over_pups: Vec<String>,
    pub names_with_replicates: Vec<String>,
    pub time: Vec<f64>,
    pub time_sd: Vec<f64>,
    pub sd_frames: Vec<usize>,
    pub average_over_slices: SeriesMap,
    pub average_over_pups: SeriesMap,
    pub sd_over_slices: SeriesMap,
    pub sd_over_pups: SeriesMap,
}

/// Load the slice grid, build time arrays, average over slices then pups,
/// and compute standard deviations at both levels. `frames` defaults to the
/// shortest slice series.
pub fn prepare_pup_study(
    path_template: &str,
    frames: Option<usize>,
    sd_frames: &[usize],
    conversion: &Conversion,
    grid: &PupGrid,
) -> AnyResult<PupStudy> {
    let loaded = grid.load(path_template)?;
    let frames = resolve_frames(&loaded.data, frames)?;
    let (time, time_sd) = build_time_array(frames, conversion, sd_frames)?;

    let average_over_slices =
        avg_all(&loaded.data, frames, &loaded.avg_over_slices).context("averaging over slices")?;
    let average_over_pups = avg_all(&average_over_slices, frames, &loaded.avg_over_pups)
        .context("averaging over pups")?;
    let sd_over_slices = sd_all(&loaded.data, frames, sd_frames, &loaded.avg_over_slices)
        .context("standard deviations over slices")?;
    let sd_over_pups = sd_all(&average_over_slices, frames, sd_frames, &loaded.avg_over_pups)
        .context("standard deviations over pups")?;

    log::info!(
        "Prepared {} slices: {} pup groups, {} region groups",
        loaded.data.len(),
        average_over_slices.len(),
        average_over_pups.len()
    );

    Ok(PupStudy {
        data: loaded.data,
        avg_over_slices: loaded.avg_over_slices,
        avg_over_pups: loaded.avg_over_pups,
        names_with_replicates: loaded.names_with_replicates,
        time,
        time_sd,
        sd_frames: sd_frames.to_vec(),
        average_over_slices,
        average_over_pups,
        sd_over_slices,
        sd_over_pups,
    })
}

impl PupStudy {
    /// Write the pup-level averages and standard deviations into `dir`.
    pub fn save(&self, dir: &Path) -> AnyResult<Vec<PathBuf>> {
        save_group_tables(
            dir,
            &self.time,
            &self.average_over_pups,
            &self.time_sd,
            &self.sd_over_pups,
        )
    }
}

fn save_group_tables(
    dir: &Path,
    time: &[f64],
    averages: &SeriesMap,
    time_sd: &[f64],
    sds: &SeriesMap,
) -> AnyResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut written = Vec::with_capacity(2);
    for (file, times, series) in [("averages.csv", time, averages), ("sd.csv", time_sd, sds)] {
        let header: Vec<String> = std::iter::once("time".to_string())
            .chain(series.keys().cloned())
            .collect();
        let len = series.values().map(Vec::len).max().unwrap_or(0).min(times.len());
        let rows: Vec<Vec<f64>> = (0..len)
            .map(|i| {
                std::iter::once(times[i])
                    .chain(series.values().map(|s| s.get(i).copied().unwrap_or(f64::NAN)))
                    .collect()
            })
            .collect();
        let path = dir.join(file);
        save_table(&path, &header, &rows)?;
        log::info!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}
