/// Data layer: core types, loading, writing, and selection.
///
/// Architecture:
/// ```text
///  Traj_*.csv / .json / .parquet          SM2xy_*.csv, geoM2xy_*.csv
///        │                                        │
///        ▼                                        ▼
///   ┌──────────┐                           ┌─────────────┐
///   │  loader   │  parse → TrajectoryTable  │   loader    │  → FrameMatrix / series
///   └──────────┘                           └─────────────┘
///        │
///        ▼
///   ┌─────────────────┐
///   │ TrajectoryTable  │  tracks(), grouped by particle
///   └─────────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  cut short tracks, select samples by name
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  writer   │  FrameMatrix / series → csv
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;
pub mod writer;
