//! Spillover (channel crosstalk) compensation for multiplexed images and
//! per-object measurements.
//!
//! A spillover matrix `S` describes how true per-channel signal mixes into
//! the detected channels (`observed = true @ S`). This crate recovers the
//! true signal either by ordinary least squares or by non-negative least
//! squares:
//!
//! - **Batches** ([`compensate`]): one observation per row
//! - **Images** ([`compensate_image`]): every pixel of a `[h, w, c]` array
//! - **Measurements** ([`compensate_measurements`]): the `<base>_c1..cN`
//!   columns of one object type, written back under a suffixed name
//!
//! Rows with any non-finite value are never solved; they come back as NaN.

pub mod compensation;
pub mod config;
pub mod data;
pub mod error;
pub mod workspace;

pub use error::{CompensationError, CompensationResult};

pub use compensation::image::compensate_image;
pub use compensation::matrix::{Method, SpilloverMatrix};
pub use compensation::measurement::{
    compensate_measurements, MeasurementReader, MeasurementRequest, MeasurementWriter,
};
pub use compensation::solver::{compensate, valid_rows};

pub use data::model::{Column, ColumnData, MeasurementTable, ObjectTable};
pub use data::schema::{
    derive_output_name, output_columns, resolve_channels, ChannelColumnSet, ColumnDescriptor,
    ColumnType,
};
