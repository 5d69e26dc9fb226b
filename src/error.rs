use thiserror::Error;

// ---------------------------------------------------------------------------
// Library error type
// ---------------------------------------------------------------------------

/// Validation and numeric failures raised by the analysis routines.
///
/// File-system problems are reported through `anyhow` with context at the
/// I/O boundary; this enum covers everything that can go wrong once the data
/// is in memory.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DiffusionError {
    #[error("input is empty: {0}")]
    EmptyInput(&'static str),

    #[error("ragged table: row {row} has {found} values, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("frame {frame} is out of range (dataset has {frames} frames)")]
    FrameOutOfRange { frame: usize, frames: usize },

    #[error("series '{name}' has {len} values, {frames} frames requested")]
    SeriesTooShort {
        name: String,
        len: usize,
        frames: usize,
    },

    #[error("no series matches {0:?}")]
    NoMatchingSeries(Vec<String>),

    #[error("no particles left after discarding tracks shorter than {cut} frames")]
    NoParticles { cut: usize },

    #[error("no finite values to bin")]
    NothingToBin,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unknown placeholder {{{0}}} in path template")]
    UnknownPlaceholder(String),

    #[error("unterminated placeholder in path template '{0}'")]
    UnterminatedPlaceholder(String),

    #[error("cannot pick an axis range: maximum value is {0}")]
    NoAxisRange(f64),
}

pub type Result<T> = std::result::Result<T, DiffusionError>;
