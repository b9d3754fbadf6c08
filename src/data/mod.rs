/// Data layer: column schema, measurement storage, and file I/O.
///
/// Architecture:
/// ```text
///  .csv / .json / .parquet        .png / .npy
///        │                             │
///        ▼                             ▼
///   ┌──────────┐                 ┌──────────┐
///   │  loader   │  → ObjectTable  │ image_io │  → Array3 [h, w, c]
///   └──────────┘                 └──────────┘
///        │
///        ▼
///   ┌──────────────────┐
///   │ MeasurementTable  │  per-object columns, reader/writer
///   └──────────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  schema   │  column catalog → ordered channel columns
///   └──────────┘
/// ```

pub mod image_io;
pub mod loader;
pub mod model;
pub mod schema;
