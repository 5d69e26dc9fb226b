use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{Array, Float32Array, Float64Array, Int32Array, Int64Array};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::model::{FrameMatrix, TrackPoint, TrajectoryTable};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load one video's trajectories.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv`     – tracker export with a header row (`Trajectory`, `Frame`, `x`, `y`, `z`, ...)
/// * `.json`    – `[{ "particle": 1, "frame": 0, "x": ..., "y": ..., "z": ... }, ...]`
/// * `.parquet` – scalar columns with the same names as the CSV export
pub fn load_trajectories(path: &Path) -> Result<TrajectoryTable> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let table = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
    .with_context(|| format!("loading trajectories from {}", path.display()))?;

    log::debug!("{}: {} detections", path.display(), table.len());
    Ok(table)
}

/// Load a headerless, comma-delimited numeric table (frames x particles).
///
/// Blank or unparsable cells become `NaN`, so files written with missing
/// values load the same way they were saved.
pub fn load_matrix(path: &Path) -> Result<FrameMatrix> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut rows = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("{} row {row_no}", path.display()))?;
        rows.push(record.iter().map(parse_cell).collect::<Vec<f64>>());
    }
    if rows.is_empty() {
        bail!("{} contains no data", path.display());
    }

    FrameMatrix::from_rows(rows).with_context(|| format!("reading {}", path.display()))
}

/// Load a one-dimensional series saved as a single column or a single row.
pub fn load_series(path: &Path) -> Result<Vec<f64>> {
    let matrix = load_matrix(path)?;
    if matrix.particles() == 1 {
        Ok(matrix.column(0))
    } else if matrix.frames() == 1 {
        Ok(matrix.row(0).to_vec())
    } else {
        bail!(
            "{} is {}x{}, expected a single row or column",
            path.display(),
            matrix.frames(),
            matrix.particles()
        )
    }
}

fn parse_cell(s: &str) -> f64 {
    s.parse::<f64>().unwrap_or(f64::NAN)
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, matched case-insensitively.
/// Particle id comes from `Trajectory` or `Particle`; `z` is optional.
/// Any other column (moments, a leading index column) is ignored.
fn load_csv(path: &Path) -> Result<TrajectoryTable> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_ascii_lowercase())
        .collect();

    let find = |names: &[&str]| headers.iter().position(|h| names.contains(&h.as_str()));
    let particle_idx = find(&["trajectory", "particle"])
        .context("CSV missing 'Trajectory' or 'Particle' column")?;
    let frame_idx = find(&["frame"]).context("CSV missing 'Frame' column")?;
    let x_idx = find(&["x"]).context("CSV missing 'x' column")?;
    let y_idx = find(&["y"]).context("CSV missing 'y' column")?;
    let z_idx = find(&["z"]);

    let mut points = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let cell = |idx: usize, col: &str| -> Result<f64> {
            let raw = record.get(idx).unwrap_or("");
            raw.parse::<f64>()
                .with_context(|| format!("Row {row_no}, {col}: '{raw}' is not a number"))
        };

        points.push(TrackPoint {
            particle: as_index(cell(particle_idx, "particle")?, row_no, "particle")?,
            frame: as_index(cell(frame_idx, "frame")?, row_no, "frame")?,
            x: cell(x_idx, "x")?,
            y: cell(y_idx, "y")?,
            z: match z_idx {
                Some(idx) => cell(idx, "z")?,
                None => 0.0,
            },
        });
    }

    Ok(TrajectoryTable::new(points))
}

/// Trackers sometimes write ids as `3.0`; accept those, reject `3.5`.
fn as_index(v: f64, row: usize, col: &str) -> Result<i64> {
    if !v.is_finite() || v.fract() != 0.0 {
        bail!("Row {row}, {col}: {v} is not an integer");
    }
    Ok(v as i64)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented):
///
/// ```json
/// [
///   { "particle": 1, "frame": 0, "x": 12.5, "y": 40.1, "z": 0.0 },
///   ...
/// ]
/// ```
fn load_json(path: &Path) -> Result<TrajectoryTable> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let points: Vec<TrackPoint> = serde_json::from_str(&text).context("parsing JSON")?;
    Ok(TrajectoryTable::new(points))
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file with one row per detection.
///
/// Expected schema: `particle` (or `Trajectory`), `frame`, `x`, `y` and an
/// optional `z`, each Int32, Int64, Float32 or Float64.
fn load_parquet(path: &Path) -> Result<TrajectoryTable> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut points = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;

        let particle = numeric_column(&batch, &["particle", "trajectory"])?
            .context("Parquet file missing 'particle' column")?;
        let frame =
            numeric_column(&batch, &["frame"])?.context("Parquet file missing 'frame' column")?;
        let x = numeric_column(&batch, &["x"])?.context("Parquet file missing 'x' column")?;
        let y = numeric_column(&batch, &["y"])?.context("Parquet file missing 'y' column")?;
        let z = numeric_column(&batch, &["z"])?;

        for row in 0..batch.num_rows() {
            points.push(TrackPoint {
                particle: as_index(particle[row], row, "particle")?,
                frame: as_index(frame[row], row, "frame")?,
                x: x[row],
                y: y[row],
                z: z.as_ref().map_or(0.0, |z| z[row]),
            });
        }
    }

    Ok(TrajectoryTable::new(points))
}

// -- Parquet / Arrow helpers --

/// Find a column by case-insensitive name and read it as `f64`.
/// Returns `Ok(None)` when no column matches.
fn numeric_column(batch: &RecordBatch, names: &[&str]) -> Result<Option<Vec<f64>>> {
    let schema = batch.schema();
    let Some(idx) = schema
        .fields()
        .iter()
        .position(|f| names.contains(&f.name().to_ascii_lowercase().as_str()))
    else {
        return Ok(None);
    };
    let name = schema.field(idx).name().clone();
    extract_f64(batch.column(idx))
        .with_context(|| format!("reading column '{name}'"))
        .map(Some)
}

fn extract_f64(col: &Arc<dyn Array>) -> Result<Vec<f64>> {
    let values = match col.data_type() {
        DataType::Int32 => downcast::<Int32Array>(col)?
            .iter()
            .map(|v| v.map_or(f64::NAN, f64::from))
            .collect(),
        DataType::Int64 => downcast::<Int64Array>(col)?
            .iter()
            .map(|v| v.map_or(f64::NAN, |v| v as f64))
            .collect(),
        DataType::Float32 => downcast::<Float32Array>(col)?
            .iter()
            .map(|v| v.map_or(f64::NAN, f64::from))
            .collect(),
        DataType::Float64 => downcast::<Float64Array>(col)?
            .iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect(),
        other => bail!("expected a numeric column, got {other:?}"),
    };
    Ok(values)
}

fn downcast<T: Array + 'static>(col: &Arc<dyn Array>) -> Result<&T> {
    col.as_any()
        .downcast_ref::<T>()
        .with_context(|| format!("unexpected array type {:?}", col.data_type()))
}
