use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use argh::FromArgs;
use parquet::arrow::ArrowWriter;

/// Write synthetic Brownian trajectories in the MOSAIC CSV layout
#[derive(FromArgs, Debug)]
struct Args {
    /// output directory (default: current directory)
    #[argh(option, short = 'o', default = "PathBuf::from(\".\")")]
    output: PathBuf,

    /// sample name used in the file names
    #[argh(option, short = 'n', default = "String::from(\"sample\")")]
    name: String,

    /// number of videos
    #[argh(option, short = 'v', default = "3")]
    videos: usize,

    /// particles per video
    #[argh(option, short = 'p', default = "40")]
    particles: usize,

    /// frames per video
    #[argh(option, short = 'f', default = "100")]
    frames: i64,

    /// diffusion coefficient in pixels^2 per frame
    #[argh(option, short = 'd', default = "0.5")]
    diffusion: f64,

    /// random seed
    #[argh(option, default = "42")]
    seed: u64,
}

/// One detection: (trajectory, frame, x, y).
type Row = (i64, i64, f64, f64);

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Random walks with per-axis step variance `2D`. Tracks start and end at
/// random frames, and about one detection in twenty is dropped to mimic
/// tracker gaps (never the first or last of a track).
fn simulate_video(rng: &mut SimpleRng, particles: usize, frames: i64, diffusion: f64) -> Vec<Row> {
    let sigma = (2.0 * diffusion).sqrt();
    let mut rows = Vec::new();
    for p in 1..=particles as i64 {
        let start = (rng.next_f64() * frames as f64 / 4.0) as i64;
        let len = frames / 2 + (rng.next_f64() * (frames / 2) as f64) as i64;
        let end = (start + len).min(frames - 1);
        let (mut x, mut y) = (rng.next_f64() * 512.0, rng.next_f64() * 512.0);
        for frame in start..=end {
            if frame > start {
                x += rng.gauss(0.0, sigma);
                y += rng.gauss(0.0, sigma);
            }
            let gap = frame != start && frame != end && rng.next_f64() < 0.05;
            if !gap {
                rows.push((p, frame, x, y));
            }
        }
    }
    rows
}

fn write_csv(path: &Path, rows: &[Row]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record([
        "Trajectory", "Frame", "x", "y", "z", "m0", "m1", "m2", "m3", "m4", "NPscore",
    ])?;
    for &(p, frame, x, y) in rows {
        writer.write_record([
            p.to_string(),
            frame.to_string(),
            format!("{x:.4}"),
            format!("{y:.4}"),
            "0".to_string(),
            "1".to_string(),
            "0".to_string(),
            "0".to_string(),
            "0".to_string(),
            "0".to_string(),
            "0".to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_parquet(path: &Path, rows: &[Row]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("particle", DataType::Int64, false),
        Field::new("frame", DataType::Int64, false),
        Field::new("x", DataType::Float64, false),
        Field::new("y", DataType::Float64, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.0))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.1))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.2))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.3))),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args: Args = argh::from_env();
    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;

    let mut rng = SimpleRng::new(args.seed);
    for video in 1..=args.videos {
        let rows = simulate_video(&mut rng, args.particles, args.frames, args.diffusion);
        let path = args.output.join(format!("Traj_{}_{video}.tif.csv", args.name));
        write_csv(&path, &rows)?;
        log::info!("Wrote {} detections to {}", rows.len(), path.display());

        if video == 1 {
            let pq = args.output.join(format!("Traj_{}_{video}.parquet", args.name));
            write_parquet(&pq, &rows)?;
            log::info!("Wrote {}", pq.display());
        }
    }
    Ok(())
}
