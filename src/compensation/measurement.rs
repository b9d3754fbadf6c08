use log::info;
use ndarray::Array2;

use super::matrix::{Method, SpilloverMatrix};
use super::solver::compensate;
use crate::data::schema::{output_columns, resolve_channels, ColumnDescriptor};
use crate::error::{CompensationError, CompensationResult};

// ---------------------------------------------------------------------------
// Measurement store contract
// ---------------------------------------------------------------------------

/// Read access to per-object measurements. Row `i` of every column of an
/// object refers to the same object.
pub trait MeasurementReader {
    /// Every column currently available, across all objects.
    fn column_catalog(&self) -> Vec<ColumnDescriptor>;

    /// Values of one numeric column, or `None` if absent or not numeric.
    fn measurement(&self, object_name: &str, column_name: &str) -> Option<Vec<f64>>;
}

/// Write access to per-object measurements.
pub trait MeasurementWriter {
    fn add_measurement(&mut self, object_name: &str, column_name: &str, values: Vec<f64>);
}

// ---------------------------------------------------------------------------
// MeasurementCompensator
// ---------------------------------------------------------------------------

/// What to compensate and how to name the result.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRequest {
    pub object_name: String,
    pub base_measurement: String,
    pub suffix: String,
    pub method: Method,
}

/// Compensate the channel columns of one measurement and write the results
/// as new columns.
///
/// Everything is read and solved before the first write, so a failure
/// leaves the store untouched. Returns the descriptors of the written
/// columns.
pub fn compensate_measurements<S>(
    request: &MeasurementRequest,
    spillover: &SpilloverMatrix,
    store: &mut S,
) -> CompensationResult<Vec<ColumnDescriptor>>
where
    S: MeasurementReader + MeasurementWriter,
{
    let MeasurementRequest {
        object_name,
        base_measurement,
        suffix,
        method,
    } = request;

    spillover
        .ensure_square()
        .map_err(|e| e.within(base_measurement.as_str()))?;

    let catalog = store.column_catalog();
    let channels = resolve_channels(&catalog, object_name, base_measurement)?;
    if channels.len() != spillover.input_channels() {
        return Err(CompensationError::ChannelCountMismatch {
            measurement: base_measurement.clone(),
            found: channels.len(),
            expected: spillover.input_channels(),
        });
    }

    let batch = read_batch(store, object_name, channels.column_names())?;
    let compensated = compensate(batch.view(), spillover, *method)
        .map_err(|e| e.within(base_measurement.as_str()))?;

    let outputs = output_columns(object_name, base_measurement, suffix, spillover.output_channels());
    for (column, values) in outputs.iter().zip(compensated.columns()) {
        store.add_measurement(object_name, &column.column_name, values.to_vec());
    }
    info!(
        "{object_name}.{base_measurement}: {} objects x {} channels compensated ({method})",
        compensated.nrows(),
        outputs.len()
    );
    Ok(outputs)
}

/// Stack channel columns into an `objects x channels` batch.
fn read_batch<'a, R: MeasurementReader>(
    reader: &R,
    object_name: &str,
    column_names: impl Iterator<Item = &'a str>,
) -> CompensationResult<Array2<f64>> {
    let mut columns: Vec<(&str, Vec<f64>)> = Vec::new();
    for name in column_names {
        let values = reader
            .measurement(object_name, name)
            .ok_or_else(|| CompensationError::MissingColumn {
                object: object_name.to_string(),
                column: name.to_string(),
            })?;
        columns.push((name, values));
    }

    let n_objects = columns.first().map_or(0, |(_, v)| v.len());
    for (name, values) in &columns {
        if values.len() != n_objects {
            return Err(CompensationError::ColumnLengthMismatch {
                object: object_name.to_string(),
                column: name.to_string(),
                found: values.len(),
                expected: n_objects,
            });
        }
    }

    Ok(Array2::from_shape_fn((n_objects, columns.len()), |(row, channel)| {
        columns[channel].1[row]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{ColumnData, MeasurementTable, ObjectTable};

    const OBJECT: &str = "Obj";

    fn table_with(columns: Vec<(&str, Vec<f64>)>) -> MeasurementTable {
        let mut object = ObjectTable::new(OBJECT);
        object.push_column("ObjectNumber", ColumnData::Integer((1..=6).collect()));
        for (name, values) in columns {
            object.push_column(name, ColumnData::Float(values));
        }
        let mut table = MeasurementTable::default();
        table.insert_object(object);
        table
    }

    fn request(method: Method) -> MeasurementRequest {
        MeasurementRequest {
            object_name: OBJECT.to_string(),
            base_measurement: "m".to_string(),
            suffix: "Corrected".to_string(),
            method,
        }
    }

    fn simple_matrix() -> SpilloverMatrix {
        SpilloverMatrix::from_rows(&[vec![1.0, 0.1], vec![0.0, 1.0]]).unwrap()
    }

    #[test]
    fn writes_corrected_channel_columns() {
        let mut table = table_with(vec![
            ("m_c1", vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.5]),
            ("m_c2", vec![0.1, 1.0, 0.1, 1.0, 0.1, 0.05]),
        ]);
        for method in [Method::LeastSquares, Method::NonNegativeLeastSquares] {
            let written = compensate_measurements(&request(method), &simple_matrix(), &mut table).unwrap();
            let names: Vec<_> = written.iter().map(|c| c.column_name.as_str()).collect();
            assert_eq!(names, vec!["mCorrected_c1", "mCorrected_c2"]);

            let c1 = table.measurement(OBJECT, "mCorrected_c1").unwrap();
            let c2 = table.measurement(OBJECT, "mCorrected_c2").unwrap();
            let expected_c1 = [1.0, 0.0, 1.0, 0.0, 1.0, 0.5];
            let expected_c2 = [0.0, 1.0, 0.0, 1.0, 0.0, 0.0];
            for i in 0..6 {
                assert!((c1[i] - expected_c1[i]).abs() < 1e-6);
                assert!((c2[i] - expected_c2[i]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn rerun_replaces_previous_output() {
        let mut table = table_with(vec![("m_c1", vec![1.0; 6]), ("m_c2", vec![0.0; 6])]);
        compensate_measurements(&request(Method::LeastSquares), &simple_matrix(), &mut table).unwrap();
        compensate_measurements(&request(Method::NonNegativeLeastSquares), &simple_matrix(), &mut table)
            .unwrap();
        let object = table.object(OBJECT).unwrap();
        assert_eq!(object.columns().len(), 5);
        let c2 = table.measurement(OBJECT, "mCorrected_c2").unwrap();
        assert!(c2.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn nan_object_row_is_nan_in_every_output() {
        let mut table = table_with(vec![
            ("m_c1", vec![1.0, f64::NAN, 1.0, 0.0, 1.0, 0.5]),
            ("m_c2", vec![0.1, 1.0, 0.1, 1.0, 0.1, 0.05]),
        ]);
        compensate_measurements(&request(Method::NonNegativeLeastSquares), &simple_matrix(), &mut table)
            .unwrap();
        let c1 = table.measurement(OBJECT, "mCorrected_c1").unwrap();
        let c2 = table.measurement(OBJECT, "mCorrected_c2").unwrap();
        assert_eq!(c1.len(), 6);
        assert!(c1[1].is_nan() && c2[1].is_nan());
        assert!(c1[0].is_finite() && c2[5].is_finite());
    }

    #[test]
    fn channel_count_mismatch_writes_nothing() {
        let mut table = table_with(vec![
            ("m_c1", vec![0.0; 6]),
            ("m_c2", vec![0.0; 6]),
            ("m_c3", vec![0.0; 6]),
        ]);
        let err = compensate_measurements(&request(Method::LeastSquares), &simple_matrix(), &mut table)
            .unwrap_err();
        assert!(matches!(
            err,
            CompensationError::ChannelCountMismatch { found: 3, expected: 2, .. }
        ));
        assert!(table.measurement(OBJECT, "mCorrected_c1").is_none());
    }

    #[test]
    fn asymmetric_matrix_is_rejected() {
        let mut table = table_with(vec![("m_c1", vec![0.0; 6]), ("m_c2", vec![0.0; 6])]);
        let sm = SpilloverMatrix::from_rows(&[vec![1.0, 0.1]]).unwrap();
        let err = compensate_measurements(&request(Method::LeastSquares), &sm, &mut table).unwrap_err();
        assert!(matches!(
            err.root(),
            CompensationError::AsymmetricMatrix { rows: 1, cols: 2 }
        ));
    }

    #[test]
    fn unknown_object_reports_zero_channels() {
        let mut table = table_with(vec![("m_c1", vec![0.0; 6]), ("m_c2", vec![0.0; 6])]);
        let mut req = request(Method::LeastSquares);
        req.object_name = "Nuclei".to_string();
        let err = compensate_measurements(&req, &simple_matrix(), &mut table).unwrap_err();
        assert!(matches!(err, CompensationError::ChannelCountMismatch { found: 0, .. }));
    }

    // A store whose catalog promises more than it can deliver.
    struct Inconsistent {
        lengths: [usize; 2],
        written: usize,
    }

    impl MeasurementReader for Inconsistent {
        fn column_catalog(&self) -> Vec<ColumnDescriptor> {
            output_columns(OBJECT, "m", "", 2)
        }

        fn measurement(&self, _object: &str, column: &str) -> Option<Vec<f64>> {
            let channel = if column.ends_with("c1") { 0 } else { 1 };
            match self.lengths[channel] {
                0 => None,
                n => Some(vec![1.0; n]),
            }
        }
    }

    impl MeasurementWriter for Inconsistent {
        fn add_measurement(&mut self, _object: &str, _column: &str, _values: Vec<f64>) {
            self.written += 1;
        }
    }

    #[test]
    fn ragged_columns_are_fatal() {
        let mut store = Inconsistent { lengths: [6, 5], written: 0 };
        let err = compensate_measurements(&request(Method::LeastSquares), &simple_matrix(), &mut store)
            .unwrap_err();
        assert!(matches!(
            err,
            CompensationError::ColumnLengthMismatch { found: 5, expected: 6, .. }
        ));
        assert_eq!(store.written, 0);
    }

    #[test]
    fn missing_column_is_fatal() {
        let mut store = Inconsistent { lengths: [6, 0], written: 0 };
        let err = compensate_measurements(&request(Method::LeastSquares), &simple_matrix(), &mut store)
            .unwrap_err();
        assert!(matches!(err, CompensationError::MissingColumn { ref column, .. } if column == "m_c2"));
        assert_eq!(store.written, 0);
    }
}
