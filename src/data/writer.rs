use std::path::Path;

use anyhow::{Context, Result};

use super::model::FrameMatrix;

// ---------------------------------------------------------------------------
// Headerless numeric output (frames x particles, single series)
// ---------------------------------------------------------------------------

/// Write a matrix as comma-delimited rows without a header.
pub fn save_matrix(path: &Path, matrix: &FrameMatrix) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for row in matrix.rows() {
        writer
            .write_record(row.iter().map(|v| format_value(*v)))
            .with_context(|| format!("writing {}", path.display()))?;
    }
    writer.flush().with_context(|| format!("flushing {}", path.display()))?;
    log::debug!(
        "Wrote {}x{} matrix to {}",
        matrix.frames(),
        matrix.particles(),
        path.display()
    );
    Ok(())
}

/// Write a series as a single column.
pub fn save_series(path: &Path, values: &[f64]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for v in values {
        writer
            .write_record([format_value(*v)])
            .with_context(|| format!("writing {}", path.display()))?;
    }
    writer.flush().with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

/// Write a table with a header row.
pub fn save_table(path: &Path, header: &[String], rows: &[Vec<f64>]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer
        .write_record(header)
        .with_context(|| format!("writing header of {}", path.display()))?;
    for row in rows {
        writer
            .write_record(row.iter().map(|v| format_value(*v)))
            .with_context(|| format!("writing {}", path.display()))?;
    }
    writer.flush().with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

/// Shortest round-trip representation; missing values as `nan`.
fn format_value(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else {
        v.to_string()
    }
}
