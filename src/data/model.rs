use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DiffusionError, Result};

// ---------------------------------------------------------------------------
// TrackPoint – one detection of one particle in one frame
// ---------------------------------------------------------------------------

/// A single tracked detection, in the units of the tracking software
/// (pixels for x/y, stack slices for z).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    #[serde(alias = "trajectory", alias = "Trajectory", alias = "Particle")]
    pub particle: i64,
    #[serde(alias = "Frame")]
    pub frame: i64,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

// ---------------------------------------------------------------------------
// Track – all detections of one particle
// ---------------------------------------------------------------------------

/// One particle's trajectory, sorted by frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub particle: i64,
    pub points: Vec<TrackPoint>,
}

impl Track {
    /// Number of recorded frames.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_frame(&self) -> Option<i64> {
        self.points.first().map(|p| p.frame)
    }

    pub fn last_frame(&self) -> Option<i64> {
        self.points.last().map(|p| p.frame)
    }
}

// ---------------------------------------------------------------------------
// TrajectoryTable – every detection in one video
// ---------------------------------------------------------------------------

/// The raw rows of one trajectory file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrajectoryTable {
    pub points: Vec<TrackPoint>,
}

impl TrajectoryTable {
    pub fn new(points: Vec<TrackPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn max_frame(&self) -> Option<i64> {
        self.points.iter().map(|p| p.frame).max()
    }

    /// Group rows into per-particle tracks, ordered by particle id.
    /// A frame recorded twice for the same particle keeps the row read last.
    pub fn tracks(&self) -> Vec<Track> {
        let mut grouped: BTreeMap<i64, BTreeMap<i64, TrackPoint>> = BTreeMap::new();
        for p in &self.points {
            grouped.entry(p.particle).or_default().insert(p.frame, *p);
        }
        grouped
            .into_iter()
            .map(|(particle, frames)| Track {
                particle,
                points: frames.into_values().collect(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Conversion – pixel/frame/slice units to microns and seconds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Conversion {
    pub microns_per_pixel: f64,
    pub frames_per_second: f64,
    pub microns_per_slice: f64,
}

impl Default for Conversion {
    fn default() -> Self {
        Self {
            microns_per_pixel: 0.16,
            frames_per_second: 9.89,
            microns_per_slice: 1.0,
        }
    }
}

impl Conversion {
    /// Scale a detection's coordinates to microns.
    pub fn to_microns(&self, p: &TrackPoint) -> TrackPoint {
        TrackPoint {
            x: p.x * self.microns_per_pixel,
            y: p.y * self.microns_per_pixel,
            z: p.z * self.microns_per_slice,
            ..*p
        }
    }
}

// ---------------------------------------------------------------------------
// FrameMatrix – frames x particles table of f64
// ---------------------------------------------------------------------------

/// Dense row-major matrix with one row per frame and one column per particle.
/// `NaN` marks a cell with no value.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMatrix {
    frames: usize,
    particles: usize,
    data: Vec<f64>,
}

impl FrameMatrix {
    pub fn filled(frames: usize, particles: usize, value: f64) -> Self {
        Self {
            frames,
            particles,
            data: vec![value; frames * particles],
        }
    }

    /// Build from rows; every row must have the same length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let particles = rows.first().map_or(0, Vec::len);
        let frames = rows.len();
        let mut data = Vec::with_capacity(frames * particles);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != particles {
                return Err(DiffusionError::RaggedRows {
                    row: i,
                    expected: particles,
                    found: row.len(),
                });
            }
            data.extend(row);
        }
        Ok(Self {
            frames,
            particles,
            data,
        })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn particles(&self) -> usize {
        self.particles
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, frame: usize, particle: usize) -> f64 {
        self.data[frame * self.particles + particle]
    }

    pub fn set(&mut self, frame: usize, particle: usize, value: f64) {
        self.data[frame * self.particles + particle] = value;
    }

    pub fn row(&self, frame: usize) -> &[f64] {
        let start = frame * self.particles;
        &self.data[start..start + self.particles]
    }

    pub fn column(&self, particle: usize) -> Vec<f64> {
        (0..self.frames).map(|f| self.get(f, particle)).collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.frames).map(move |f| self.row(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(particle: i64, frame: i64, x: f64) -> TrackPoint {
        TrackPoint {
            particle,
            frame,
            x,
            y: -x,
            z: 0.0,
        }
    }

    #[test]
    fn tracks_are_grouped_and_sorted() {
        let table = TrajectoryTable::new(vec![
            pt(2, 3, 1.0),
            pt(1, 1, 2.0),
            pt(2, 0, 3.0),
            pt(1, 0, 4.0),
        ]);
        let tracks = table.tracks();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].particle, 1);
        assert_eq!(tracks[0].first_frame(), Some(0));
        assert_eq!(tracks[1].points.iter().map(|p| p.frame).collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(table.max_frame(), Some(3));
    }

    #[test]
    fn duplicate_frames_keep_last_row() {
        let table = TrajectoryTable::new(vec![pt(1, 0, 1.0), pt(1, 0, 5.0)]);
        let tracks = table.tracks();
        assert_eq!(tracks[0].len(), 1);
        assert_eq!(tracks[0].points[0].x, 5.0);
    }

    #[test]
    fn conversion_scales_each_axis() {
        let c = Conversion {
            microns_per_pixel: 0.5,
            frames_per_second: 10.0,
            microns_per_slice: 2.0,
        };
        let p = c.to_microns(&TrackPoint {
            particle: 7,
            frame: 3,
            x: 4.0,
            y: 6.0,
            z: 1.5,
        });
        assert_eq!((p.particle, p.frame), (7, 3));
        assert_eq!((p.x, p.y, p.z), (2.0, 3.0, 3.0));
    }

    #[test]
    fn matrix_rejects_ragged_rows() {
        let err = FrameMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert_eq!(
            err,
            DiffusionError::RaggedRows {
                row: 1,
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn matrix_indexing() {
        let mut m = FrameMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        m.set(1, 0, 9.0);
        assert_eq!(m.row(1), &[9.0, 4.0]);
        assert_eq!(m.column(1), vec![2.0, 4.0]);
        assert_eq!(m.rows().count(), 2);
        assert!(FrameMatrix::filled(3, 0, 0.0).rows().all(|r| r.is_empty()));
    }
}
