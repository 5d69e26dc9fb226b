//! Mean squared displacement from particle trajectories.
//!
//! Trajectories are first laid out as frames x particles position matrices
//! ([`msd_iteration`]), then every lag is evaluated at once across all
//! particles ([`vectorized_mmsd_calcs`]).  Per-particle MSDs are summarised
//! across particles with a geometric mean and its standard error, which is what
//! downstream averaging and plotting consume.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyResult};

use crate::config::AnalysisConfig;
use crate::data::filter::discard_short_tracks;
use crate::data::loader::load_trajectories;
use crate::data::model::{Conversion, FrameMatrix, Track, TrackPoint, TrajectoryTable};
use crate::data::writer::{save_matrix, save_series};
use crate::error::{DiffusionError, Result};
use crate::samples::render_template;

// ---------------------------------------------------------------------------
// Gap filling
// ---------------------------------------------------------------------------

/// Expand a track to one row per frame, from frame 0 to its last frame.
///
/// Frames are not shifted: row `i` is frame `i`.  Frames before the first
/// detection take the first position, and frames missing inside the track
/// carry over the previous position.
pub fn fill_in_frames(track: &Track) -> Vec<TrackPoint> {
    fill_frames(track, None)
}

/// `fill_in_frames` stopping before frame `limit`.
fn fill_frames(track: &Track, limit: Option<usize>) -> Vec<TrackPoint> {
    let (Some(first), Some(mut last)) = (track.points.first(), track.last_frame()) else {
        return Vec::new();
    };
    if let Some(limit) = limit {
        last = last.min(i64::try_from(limit).unwrap_or(i64::MAX) - 1);
    }
    let Ok(len) = usize::try_from(last) else {
        return Vec::new();
    };

    let mut recorded = track.points.iter().peekable();
    let mut current = *first;
    let mut filled = Vec::with_capacity(len.saturating_add(1));
    for frame in 0..=last {
        while let Some(p) = recorded.next_if(|p| p.frame <= frame) {
            current = *p;
        }
        filled.push(TrackPoint { frame, ..current });
    }
    filled
}

// ---------------------------------------------------------------------------
// Trajectory stacking
// ---------------------------------------------------------------------------

/// Where a stacked particle column came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticleId {
    pub video: usize,
    pub particle: i64,
}

/// Positions of every kept particle, in microns.
///
/// `x_m`/`y_m` are indexed by absolute frame; `xs_m`/`ys_m` are shifted so
/// that each particle's first detection sits in row 0.  Cells outside a
/// particle's track are `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryStack {
    pub total: usize,
    pub frames: usize,
    pub x_m: FrameMatrix,
    pub y_m: FrameMatrix,
    pub xs_m: FrameMatrix,
    pub ys_m: FrameMatrix,
    pub particle_ids: Vec<ParticleId>,
}

/// Options for [`msd_iteration`].
#[derive(Debug, Clone, PartialEq)]
pub struct MsdOptions {
    pub cut: usize,
    pub total_videos: usize,
    pub max_frames: Option<usize>,
    pub file_template: String,
    pub conversion: Conversion,
}

impl Default for MsdOptions {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}

impl MsdOptions {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            cut: config.msd.cut,
            total_videos: config.msd.total_videos,
            max_frames: config.msd.max_frames,
            file_template: config.msd.file_template.clone(),
            conversion: config.conversion,
        }
    }
}

/// Load videos `1..=total_videos` of sample `name` from `folder` and stack
/// their trajectories.
pub fn msd_iteration(
    folder: &Path,
    name: &str,
    options: &MsdOptions,
) -> AnyResult<TrajectoryStack> {
    let mut videos = Vec::with_capacity(options.total_videos);
    for video in 1..=options.total_videos {
        let video_str = video.to_string();
        let fields = BTreeMap::from([("name", name), ("video", video_str.as_str())]);
        let file_name = render_template(&options.file_template, &fields)?;
        let path = folder.join(file_name);
        let table = load_trajectories(&path)?;
        log::info!("Video {video}: {} detections from {}", table.len(), path.display());
        videos.push((video, table));
    }

    let stack = stack_tracks(videos, options.cut, options.max_frames, &options.conversion)
        .with_context(|| format!("stacking trajectories of '{name}'"))?;
    log::info!(
        "Stacked {} particles over {} frames for '{name}'",
        stack.total,
        stack.frames
    );
    Ok(stack)
}

/// Stack already-loaded videos. Particles are numbered in (video, particle id)
/// order after tracks shorter than `cut` are discarded.
pub fn stack_tracks(
    videos: Vec<(usize, TrajectoryTable)>,
    cut: usize,
    max_frames: Option<usize>,
    conversion: &Conversion,
) -> Result<TrajectoryStack> {
    let mut kept: Vec<(usize, Track)> = Vec::new();
    for (video, table) in videos {
        let tracks = table.tracks();
        let before = tracks.len();
        let survivors = discard_short_tracks(tracks, cut);
        if survivors.len() < before {
            log::warn!(
                "Video {video}: discarded {} particles with fewer than {cut} frames",
                before - survivors.len()
            );
        }
        kept.extend(survivors.into_iter().map(|t| (video, t)));
    }
    if kept.is_empty() {
        return Err(DiffusionError::NoParticles { cut });
    }

    let last_frame = kept
        .iter()
        .filter_map(|(_, t)| t.last_frame())
        .max()
        .unwrap_or(-1);
    // Negative frames leave nothing to stack.
    let mut frames = usize::try_from(last_frame).map_or(0, |f| f.saturating_add(1));
    if let Some(cap) = max_frames {
        frames = frames.min(cap);
    }
    if frames == 0 {
        return Err(DiffusionError::EmptyInput("no detection at a non-negative frame"));
    }

    let total = kept.len();
    let mut x_m = FrameMatrix::filled(frames, total, f64::NAN);
    let mut y_m = x_m.clone();
    let mut xs_m = x_m.clone();
    let mut ys_m = x_m.clone();
    let mut particle_ids = Vec::with_capacity(total);

    for (col, (video, track)) in kept.iter().enumerate() {
        particle_ids.push(ParticleId {
            video: *video,
            particle: track.particle,
        });
        let first = usize::try_from(track.first_frame().unwrap_or(0)).unwrap_or(0);
        for point in fill_frames(track, Some(frames)).iter().skip(first) {
            let frame = point.frame as usize;
            let m = conversion.to_microns(point);
            x_m.set(frame, col, m.x);
            y_m.set(frame, col, m.y);
            xs_m.set(frame - first, col, m.x);
            ys_m.set(frame - first, col, m.y);
        }
    }

    Ok(TrajectoryStack {
        total,
        frames,
        x_m,
        y_m,
        xs_m,
        ys_m,
        particle_ids,
    })
}

// ---------------------------------------------------------------------------
// MSD calculation
// ---------------------------------------------------------------------------

/// Per-particle and ensemble MSDs, one row per lag (in frames).
#[derive(Debug, Clone, PartialEq)]
pub struct MmsdResult {
    /// 1D MSD along x, microns².
    pub sm1x: FrameMatrix,
    /// 1D MSD along y, microns².
    pub sm1y: FrameMatrix,
    /// 2D MSD, `sm1x + sm1y`.
    pub sm2xy: FrameMatrix,
    /// Geometric mean of `sm2xy` across particles.
    pub geo_m2xy: Vec<f64>,
    /// Standard error of the mean of `ln(sm2xy)`.
    pub g_sem: Vec<f64>,
    /// Particles contributing to `geo_m2xy` at each lag.
    pub counts: Vec<usize>,
}

/// Compute MSDs for every lag and particle from the shifted positions.
///
/// For lag τ a particle's MSD is the mean of `(r[k+τ] - r[k])²` over every
/// pair of frames inside its track; it is `NaN` when the track is shorter
/// than τ + 1 frames.
pub fn vectorized_mmsd_calcs(stack: &TrajectoryStack) -> MmsdResult {
    let frames = stack.frames;
    let total = stack.total;
    let mut sm1x = FrameMatrix::filled(frames, total, f64::NAN);
    let mut sm1y = sm1x.clone();
    let mut sm2xy = sm1x.clone();

    if frames > 0 {
        for p in 0..total {
            if stack.xs_m.get(0, p).is_finite() && stack.ys_m.get(0, p).is_finite() {
                sm1x.set(0, p, 0.0);
                sm1y.set(0, p, 0.0);
                sm2xy.set(0, p, 0.0);
            }
        }
    }

    for lag in 1..frames {
        let mut sum_x = vec![0.0; total];
        let mut sum_y = vec![0.0; total];
        let mut pairs = vec![0usize; total];

        for k in 0..frames - lag {
            let (x0, x1) = (stack.xs_m.row(k), stack.xs_m.row(k + lag));
            let (y0, y1) = (stack.ys_m.row(k), stack.ys_m.row(k + lag));
            for p in 0..total {
                let dx = x1[p] - x0[p];
                let dy = y1[p] - y0[p];
                if dx.is_finite() && dy.is_finite() {
                    sum_x[p] += dx * dx;
                    sum_y[p] += dy * dy;
                    pairs[p] += 1;
                }
            }
        }

        for p in 0..total {
            if pairs[p] == 0 {
                continue;
            }
            let n = pairs[p] as f64;
            let (mx, my) = (sum_x[p] / n, sum_y[p] / n);
            sm1x.set(lag, p, mx);
            sm1y.set(lag, p, my);
            sm2xy.set(lag, p, mx + my);
        }
    }

    let mut geo_m2xy = Vec::with_capacity(frames);
    let mut g_sem = Vec::with_capacity(frames);
    let mut counts = Vec::with_capacity(frames);
    for lag in 0..frames {
        let row = sm2xy.row(lag);
        if lag == 0 {
            geo_m2xy.push(0.0);
            g_sem.push(0.0);
            counts.push(row.iter().filter(|v| v.is_finite()).count());
            continue;
        }
        let logs: Vec<f64> = row
            .iter()
            .filter(|v| v.is_finite() && **v > 0.0)
            .map(|v| v.ln())
            .collect();
        counts.push(logs.len());
        match log_mean_and_sem(&logs) {
            Some((mean, sem)) => {
                geo_m2xy.push(mean.exp());
                g_sem.push(sem);
            }
            None => {
                geo_m2xy.push(f64::NAN);
                g_sem.push(f64::NAN);
            }
        }
    }

    MmsdResult {
        sm1x,
        sm1y,
        sm2xy,
        geo_m2xy,
        g_sem,
        counts,
    }
}

/// Mean of `logs` and its standard error (population standard deviation over
/// `sqrt(n)`).
fn log_mean_and_sem(logs: &[f64]) -> Option<(f64, f64)> {
    if logs.is_empty() {
        return None;
    }
    let n = logs.len() as f64;
    let mean = logs.iter().sum::<f64>() / n;
    let var = logs.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.sqrt() / n.sqrt()))
}

impl MmsdResult {
    /// Write `SM1x_`, `SM1y_`, `SM2xy_`, `geoM2xy_` and `gSEM_{name}.csv` into
    /// `dir`. Returns the written paths.
    pub fn save(&self, dir: &Path, name: &str) -> AnyResult<Vec<PathBuf>> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let mut written = Vec::with_capacity(5);
        let matrices = [("SM1x", &self.sm1x), ("SM1y", &self.sm1y), ("SM2xy", &self.sm2xy)];
        for (prefix, matrix) in matrices {
            let path = dir.join(format!("{prefix}_{name}.csv"));
            save_matrix(&path, matrix)?;
            written.push(path);
        }
        for (prefix, series) in [("geoM2xy", &self.geo_m2xy), ("gSEM", &self.g_sem)] {
            let path = dir.join(format!("{prefix}_{name}.csv"));
            save_series(&path, series)?;
            written.push(path);
        }
        for path in &written {
            log::info!("Wrote {}", path.display());
        }
        Ok(written)
    }
}

/// Stack, compute and save in one go.
pub fn analyze_sample(
    folder: &Path,
    name: &str,
    options: &MsdOptions,
    output_dir: &Path,
) -> AnyResult<MmsdResult> {
    let stack = msd_iteration(folder, name, options)?;
    let result = vectorized_mmsd_calcs(&stack);
    result.save(output_dir, name)?;
    Ok(result)
}

// ---------------------------------------------------------------------------
// Diffusion coefficients
// ---------------------------------------------------------------------------

/// Convert an MSD matrix to 2D diffusion coefficients, `D = MSD / (4t)` with
/// `t = frame / fps`. Frame 0 has no defined coefficient and is `NaN`.
pub fn diffusion_coefficients(msd: &FrameMatrix, fps: f64) -> Result<FrameMatrix> {
    if !(fps.is_finite() && fps > 0.0) {
        return Err(DiffusionError::InvalidParameter(format!(
            "frame rate must be positive, got {fps}"
        )));
    }
    let mut out = FrameMatrix::filled(msd.frames(), msd.particles(), f64::NAN);
    for frame in 1..msd.frames() {
        let t = frame as f64 / fps;
        for p in 0..msd.particles() {
            out.set(frame, p, msd.get(frame, p) / (4.0 * t));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn track(particle: i64, rows: &[(i64, f64, f64)]) -> Track {
        Track {
            particle,
            points: rows
                .iter()
                .map(|&(frame, x, y)| TrackPoint {
                    particle,
                    frame,
                    x,
                    y,
                    z: 0.0,
                })
                .collect(),
        }
    }

    fn unit_conversion() -> Conversion {
        Conversion {
            microns_per_pixel: 1.0,
            frames_per_second: 1.0,
            microns_per_slice: 1.0,
        }
    }

    #[test]
    fn fill_in_carries_positions_forward_and_back() {
        let t = track(1, &[(2, 1.0, 1.0), (3, 2.0, 2.0), (6, 5.0, 5.0)]);
        let filled = fill_in_frames(&t);
        let xs: Vec<f64> = filled.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 5.0]);
        assert!(filled.iter().enumerate().all(|(i, p)| p.frame == i as i64));
        assert!(filled.iter().all(|p| p.particle == 1));
    }

    #[test]
    fn fill_stops_at_the_frame_limit() {
        let t = track(1, &[(1, 1.0, 1.0), (9, 5.0, 5.0)]);
        let filled = fill_frames(&t, Some(3));
        assert_eq!(filled.len(), 3);
        assert_eq!(filled[2].x, 1.0);
        assert!(fill_frames(&t, Some(0)).is_empty());
    }

    #[test]
    fn huge_frame_numbers_are_capped_by_max_frames() {
        let points = track(1, &[(0, 2.0, 3.0), (i64::MAX, 9.0, 9.0)]).points;
        let stack =
            stack_tracks(vec![(1, TrajectoryTable::new(points))], 1, Some(4), &unit_conversion())
                .unwrap();
        assert_eq!(stack.frames, 4);
        assert_eq!(stack.x_m.column(0), vec![2.0; 4]);
        assert_eq!(stack.ys_m.get(3, 0), 3.0);
    }

    #[test]
    fn fill_in_of_empty_track_is_empty() {
        assert!(fill_in_frames(&track(1, &[])).is_empty());
    }

    #[test]
    fn stack_shifts_each_particle_to_row_zero() {
        let table = TrajectoryTable::new(
            [track(1, &[(0, 0.0, 0.0), (1, 1.0, 0.0)]), track(2, &[(2, 4.0, 4.0), (4, 6.0, 6.0)])]
                .into_iter()
                .flat_map(|t| t.points)
                .collect(),
        );
        let stack = stack_tracks(vec![(1, table)], 1, None, &unit_conversion()).unwrap();

        assert_eq!(stack.total, 2);
        assert_eq!(stack.frames, 5);
        assert!(stack.x_m.get(1, 1).is_nan());
        assert_eq!(stack.x_m.get(3, 1), 4.0);
        assert_eq!(stack.xs_m.column(1)[..3], [4.0, 4.0, 6.0]);
        assert!(stack.xs_m.get(3, 1).is_nan());
        assert!(stack.xs_m.get(2, 0).is_nan());
        assert_eq!(stack.particle_ids[1], ParticleId { video: 1, particle: 2 });
    }

    #[test]
    fn particles_from_later_videos_are_appended() {
        let a = TrajectoryTable::new(track(1, &[(0, 0.0, 0.0), (1, 1.0, 1.0)]).points);
        let b = TrajectoryTable::new(track(1, &[(0, 5.0, 5.0), (1, 6.0, 6.0)]).points);
        let stack = stack_tracks(vec![(1, a), (2, b)], 1, None, &unit_conversion()).unwrap();
        assert_eq!(stack.total, 2);
        assert_eq!(stack.particle_ids[1], ParticleId { video: 2, particle: 1 });
        assert_eq!(stack.x_m.get(0, 1), 5.0);
    }

    #[test]
    fn cut_and_frame_cap_are_applied() {
        let moving: Vec<_> = (0..10i64).map(|f| (f, f as f64, 0.0)).collect();
        let table = TrajectoryTable::new(
            [track(1, &[(0, 0.0, 0.0)]), track(2, &moving)]
                .into_iter()
                .flat_map(|t| t.points)
                .collect(),
        );
        let stack = stack_tracks(vec![(1, table.clone())], 2, Some(4), &unit_conversion()).unwrap();
        assert_eq!(stack.total, 1);
        assert_eq!(stack.frames, 4);

        let err = stack_tracks(vec![(1, table)], 50, None, &unit_conversion()).unwrap_err();
        assert_eq!(err, DiffusionError::NoParticles { cut: 50 });
    }

    #[test]
    fn conversion_is_applied_to_positions() {
        let table = TrajectoryTable::new(track(1, &[(0, 10.0, 20.0)]).points);
        let conversion = Conversion {
            microns_per_pixel: 0.5,
            ..unit_conversion()
        };
        let stack = stack_tracks(vec![(1, table)], 1, None, &conversion).unwrap();
        assert_eq!(stack.x_m.get(0, 0), 5.0);
        assert_eq!(stack.y_m.get(0, 0), 10.0);
    }

    #[test]
    fn ballistic_particle_has_quadratic_msd() {
        // x = t, y = 2t: every displacement over lag τ is (τ, 2τ).
        let rows: Vec<(i64, f64, f64)> = (0..6).map(|f| (f, f as f64, 2.0 * f as f64)).collect();
        let table = TrajectoryTable::new(track(1, &rows).points);
        let stack = stack_tracks(vec![(1, table)], 1, None, &unit_conversion()).unwrap();
        let result = vectorized_mmsd_calcs(&stack);

        for lag in 0..6 {
            let tau = lag as f64;
            assert_relative_eq!(result.sm1x.get(lag, 0), tau * tau);
            assert_relative_eq!(result.sm1y.get(lag, 0), 4.0 * tau * tau);
            assert_relative_eq!(result.sm2xy.get(lag, 0), 5.0 * tau * tau);
        }
        assert_relative_eq!(result.geo_m2xy[2], 20.0, epsilon = 1e-12);
        assert_eq!(result.g_sem[2], 0.0);
        assert_eq!(result.counts, vec![1; 6]);
    }

    #[test]
    fn msd_averages_over_all_frame_pairs() {
        // x: 0, 1, 3 -> lag 1 displacements 1, 2 -> MSD 2.5; lag 2 -> 9.
        let points = track(1, &[(0, 0.0, 0.0), (1, 1.0, 0.0), (2, 3.0, 0.0)]).points;
        let table = TrajectoryTable::new(points);
        let stack = stack_tracks(vec![(1, table)], 1, None, &unit_conversion()).unwrap();
        let result = vectorized_mmsd_calcs(&stack);
        assert_relative_eq!(result.sm1x.get(1, 0), 2.5);
        assert_relative_eq!(result.sm1x.get(2, 0), 9.0);
        assert_eq!(result.sm1y.get(2, 0), 0.0);
    }

    #[test]
    fn geometric_mean_across_particles() {
        // Particle 1 steps 1 per frame, particle 2 steps 2: lag-1 MSDs 1 and 4.
        let rows1: Vec<(i64, f64, f64)> = (0..3).map(|f| (f, f as f64, 0.0)).collect();
        let rows2: Vec<(i64, f64, f64)> = (0..2).map(|f| (f, 2.0 * f as f64, 0.0)).collect();
        let table = TrajectoryTable::new(
            track(1, &rows1).points.into_iter().chain(track(2, &rows2).points).collect(),
        );
        let stack = stack_tracks(vec![(1, table)], 1, None, &unit_conversion()).unwrap();
        let result = vectorized_mmsd_calcs(&stack);

        assert_relative_eq!(result.geo_m2xy[1], 2.0, epsilon = 1e-12);
        let expected_sem = (4.0f64.ln() / 2.0) / 2.0f64.sqrt();
        assert_relative_eq!(result.g_sem[1], expected_sem, epsilon = 1e-12);
        assert_eq!(result.counts[1], 2);
        // Only particle 1 reaches lag 2.
        assert!(result.sm2xy.get(2, 1).is_nan());
        assert_eq!(result.counts[2], 1);
    }

    #[test]
    fn stationary_particles_give_nan_geometric_mean() {
        let table = TrajectoryTable::new(track(1, &[(0, 1.0, 1.0), (1, 1.0, 1.0)]).points);
        let stack = stack_tracks(vec![(1, table)], 1, None, &unit_conversion()).unwrap();
        let result = vectorized_mmsd_calcs(&stack);
        assert_eq!(result.sm2xy.get(1, 0), 0.0);
        assert!(result.geo_m2xy[1].is_nan());
        assert_eq!(result.counts[1], 0);
    }

    #[test]
    fn diffusion_coefficients_divide_by_four_t() {
        let msd = FrameMatrix::from_rows(vec![vec![0.0], vec![4.0], vec![16.0]]).unwrap();
        let d = diffusion_coefficients(&msd, 2.0).unwrap();
        assert!(d.get(0, 0).is_nan());
        assert_relative_eq!(d.get(1, 0), 2.0);
        assert_relative_eq!(d.get(2, 0), 4.0);
        assert!(diffusion_coefficients(&msd, 0.0).is_err());
    }
}
