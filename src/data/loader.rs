use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::{debug, info};
use ndarray::Array2;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde_json::Value as JsonValue;

use super::model::{ColumnData, ObjectTable};
use crate::compensation::matrix::SpilloverMatrix;

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Object name implied by a table file: its stem (`cells.csv` -> `cells`).
pub fn object_name_from_path(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .with_context(|| format!("cannot derive an object name from {}", path.display()))
}

// ---------------------------------------------------------------------------
// Public entry-points: measurement tables
// ---------------------------------------------------------------------------

/// Load the measurements of one object type. Dispatch by extension.
///
/// Supported formats:
/// * `.csv`     – one header row, one row per object (spreadsheet export)
/// * `.json`    – `[{ "ObjectNumber": 1, "m_c1": 0.5, ... }, ...]`
/// * `.parquet` – flat numeric / string columns
pub fn load_table(path: &Path, object_name: &str) -> Result<ObjectTable> {
    let table = match extension(path).as_str() {
        "csv" => load_csv(path, object_name),
        "json" => load_json(path, object_name),
        "parquet" | "pq" => load_parquet(path, object_name),
        other => bail!("Unsupported table extension: .{other}"),
    }
    .with_context(|| format!("loading {}", path.display()))?;
    info!("loaded {table} from {}", path.display());
    Ok(table)
}

/// Write the measurements of one object type, format chosen by extension.
pub fn write_table(path: &Path, table: &ObjectTable) -> Result<()> {
    table
        .check_lengths()
        .with_context(|| format!("writing {}", path.display()))?;
    match extension(path).as_str() {
        "csv" => write_csv(path, table),
        "json" => write_json(path, table),
        "parquet" | "pq" => write_parquet(path, table),
        other => bail!("Unsupported table extension: .{other}"),
    }
    .with_context(|| format!("writing {}", path.display()))?;
    info!("wrote {table} to {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

fn load_csv(path: &Path, object_name: &str) -> Result<ObjectTable> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        if record.len() != headers.len() {
            bail!(
                "CSV row {row_no}: {} fields but {} columns in the header",
                record.len(),
                headers.len()
            );
        }
        for (col, value) in record.iter().enumerate() {
            cells[col].push(value.to_string());
        }
    }

    let mut table = ObjectTable::new(object_name);
    for (name, values) in headers.iter().zip(cells) {
        table.push_column(name, guess_column_type(values));
    }
    Ok(table)
}

/// Integer if every cell is an integer, float if every cell is a number
/// (empty counts as NaN), text otherwise.
fn guess_column_type(values: Vec<String>) -> ColumnData {
    if !values.is_empty() {
        let ints: Option<Vec<i64>> = values.iter().map(|s| s.trim().parse::<i64>().ok()).collect();
        if let Some(ints) = ints {
            return ColumnData::Integer(ints);
        }
    }
    let floats: Option<Vec<f64>> = values.iter().map(|s| parse_float_cell(s)).collect();
    match floats {
        Some(floats) => ColumnData::Float(floats),
        None => ColumnData::Text(values),
    }
}

fn parse_float_cell(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return Some(f64::NAN);
    }
    s.parse::<f64>().ok()
}

fn write_csv(path: &Path, table: &ObjectTable) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).context("creating CSV")?;
    writer.write_record(table.columns().iter().map(|c| c.name.as_str()))?;
    for row in 0..table.len() {
        writer.write_record(table.columns().iter().map(|c| c.data.cell_text(row)))?;
    }
    writer.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// JSON records
// ---------------------------------------------------------------------------

fn load_json(path: &Path, object_name: &str) -> Result<ObjectTable> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;
    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut columns: BTreeMap<String, Vec<JsonValue>> = BTreeMap::new();
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;
        for key in obj.keys() {
            columns.entry(key.clone()).or_insert_with(|| vec![JsonValue::Null; i]);
        }
        for (key, values) in columns.iter_mut() {
            values.push(obj.get(key).cloned().unwrap_or(JsonValue::Null));
        }
    }

    let mut table = ObjectTable::new(object_name);
    for (name, values) in columns {
        table.push_column(&name, json_column(values));
    }
    Ok(table)
}

fn json_column(values: Vec<JsonValue>) -> ColumnData {
    let ints: Option<Vec<i64>> = values.iter().map(JsonValue::as_i64).collect();
    if let Some(ints) = ints {
        return ColumnData::Integer(ints);
    }
    let floats: Option<Vec<f64>> = values
        .iter()
        .map(|v| match v {
            JsonValue::Null => Some(f64::NAN),
            other => other.as_f64(),
        })
        .collect();
    if let Some(floats) = floats {
        return ColumnData::Float(floats);
    }
    ColumnData::Text(
        values
            .into_iter()
            .map(|v| match v {
                JsonValue::String(s) => s,
                JsonValue::Null => String::new(),
                other => other.to_string(),
            })
            .collect(),
    )
}

fn write_json(path: &Path, table: &ObjectTable) -> Result<()> {
    let records: Vec<serde_json::Map<String, JsonValue>> = (0..table.len())
        .map(|row| {
            table
                .columns()
                .iter()
                .map(|c| {
                    let value = match &c.data {
                        // JSON has no NaN; non-finite values become null
                        ColumnData::Float(v) => serde_json::Number::from_f64(v[row])
                            .map_or(JsonValue::Null, JsonValue::Number),
                        ColumnData::Integer(v) => JsonValue::from(v[row]),
                        ColumnData::Text(v) => JsonValue::String(v[row].clone()),
                    };
                    (c.name.clone(), value)
                })
                .collect()
        })
        .collect();
    let file = std::fs::File::create(path).context("creating JSON file")?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), &records).context("writing JSON")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

fn load_parquet(path: &Path, object_name: &str) -> Result<ObjectTable> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut names: Vec<String> = Vec::new();
    let mut columns: Vec<ColumnData> = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        if names.is_empty() {
            names = schema.fields().iter().map(|f| f.name().clone()).collect();
        }
        for (idx, field) in schema.fields().iter().enumerate() {
            let chunk = arrow_to_column(batch.column(idx))
                .with_context(|| format!("column {}", field.name()))?;
            match columns.get_mut(idx) {
                Some(existing) => append_column(existing, chunk),
                None => columns.push(chunk),
            }
        }
    }

    let mut table = ObjectTable::new(object_name);
    for (name, data) in names.iter().zip(columns) {
        table.push_column(name, data);
    }
    Ok(table)
}

/// Convert one Arrow array to column storage. Integer arrays with nulls
/// become float columns holding NaN.
fn arrow_to_column(col: &ArrayRef) -> Result<ColumnData> {
    let data = match col.data_type() {
        DataType::Float64 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float64Array>()
                .context("expected Float64Array")?;
            ColumnData::Float(arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
        }
        DataType::Float32 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float32Array>()
                .context("expected Float32Array")?;
            ColumnData::Float(arr.iter().map(|v| v.map_or(f64::NAN, f64::from)).collect())
        }
        DataType::Int32 => {
            let arr = col
                .as_any()
                .downcast_ref::<Int32Array>()
                .context("expected Int32Array")?;
            integers(arr.iter().map(|v| v.map(i64::from)).collect())
        }
        DataType::Int64 => {
            let arr = col
                .as_any()
                .downcast_ref::<Int64Array>()
                .context("expected Int64Array")?;
            integers(arr.iter().collect())
        }
        DataType::Boolean => {
            let arr = col
                .as_any()
                .downcast_ref::<BooleanArray>()
                .context("expected BooleanArray")?;
            integers(arr.iter().map(|v| v.map(i64::from)).collect())
        }
        DataType::Utf8 => {
            let arr = col
                .as_any()
                .downcast_ref::<StringArray>()
                .context("expected StringArray")?;
            ColumnData::Text(arr.iter().map(|v| v.unwrap_or("").to_string()).collect())
        }
        DataType::LargeUtf8 => {
            let arr = col.as_string::<i64>();
            ColumnData::Text(arr.iter().map(|v| v.unwrap_or("").to_string()).collect())
        }
        other => bail!("unsupported column type {other:?}"),
    };
    Ok(data)
}

fn integers(values: Vec<Option<i64>>) -> ColumnData {
    let all: Option<Vec<i64>> = values.iter().copied().collect();
    match all {
        Some(ints) => ColumnData::Integer(ints),
        None => ColumnData::Float(values.iter().map(|v| v.map_or(f64::NAN, |i| i as f64)).collect()),
    }
}

/// Concatenate a later record batch onto a column, widening integer to float
/// when the chunks disagree.
fn append_column(target: &mut ColumnData, chunk: ColumnData) {
    let current = std::mem::replace(target, ColumnData::Float(Vec::new()));
    *target = match (current, chunk) {
        (ColumnData::Float(mut a), ColumnData::Float(b)) => {
            a.extend(b);
            ColumnData::Float(a)
        }
        (ColumnData::Integer(mut a), ColumnData::Integer(b)) => {
            a.extend(b);
            ColumnData::Integer(a)
        }
        (ColumnData::Text(mut a), ColumnData::Text(b)) => {
            a.extend(b);
            ColumnData::Text(a)
        }
        (ColumnData::Float(mut a), ColumnData::Integer(b)) => {
            a.extend(b.into_iter().map(|i| i as f64));
            ColumnData::Float(a)
        }
        (ColumnData::Integer(a), ColumnData::Float(b)) => {
            let mut widened: Vec<f64> = a.into_iter().map(|i| i as f64).collect();
            widened.extend(b);
            ColumnData::Float(widened)
        }
        (existing, other) => {
            let mut text: Vec<String> = (0..existing.len()).map(|r| existing.cell_text(r)).collect();
            text.extend((0..other.len()).map(|r| other.cell_text(r)));
            ColumnData::Text(text)
        }
    };
}

/// Object table as a single Arrow record batch.
pub fn to_record_batch(table: &ObjectTable) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(table.columns().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.columns().len());
    for column in table.columns() {
        let (data_type, array): (DataType, ArrayRef) = match &column.data {
            ColumnData::Float(v) => (DataType::Float64, Arc::new(Float64Array::from(v.clone()))),
            ColumnData::Integer(v) => (DataType::Int64, Arc::new(Int64Array::from(v.clone()))),
            ColumnData::Text(v) => (DataType::Utf8, Arc::new(StringArray::from(v.clone()))),
        };
        fields.push(Field::new(&column.name, data_type, true));
        arrays.push(array);
    }
    let schema = Arc::new(Schema::new(fields));
    RecordBatch::try_new(schema, arrays).context("building record batch")
}

fn write_parquet(path: &Path, table: &ObjectTable) -> Result<()> {
    let batch = to_record_batch(table)?;
    let file = std::fs::File::create(path).context("creating parquet file")?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).context("creating writer")?;
    writer.write(&batch).context("writing batch")?;
    writer.close().context("closing writer")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Spillover matrices
// ---------------------------------------------------------------------------

/// Load a spillover matrix. Dispatch by extension.
///
/// * `.csv`  – numeric grid; an optional header row and an optional leading
///             label column (channel names) are skipped
/// * `.json` – `[[1.0, 0.02], [0.01, 1.0]]`
/// * `.npy`  – 2-D float array
pub fn load_spillover_matrix(path: &Path) -> Result<SpilloverMatrix> {
    let matrix = match extension(path).as_str() {
        "csv" | "txt" => load_matrix_csv(path),
        "json" => load_matrix_json(path),
        "npy" => load_matrix_npy(path),
        other => bail!("Unsupported spillover matrix extension: .{other}"),
    }
    .with_context(|| format!("loading spillover matrix {}", path.display()))?;
    info!(
        "spillover matrix {}: {}x{}",
        path.display(),
        matrix.output_channels(),
        matrix.input_channels()
    );
    Ok(matrix)
}

fn load_matrix_csv(path: &Path) -> Result<SpilloverMatrix> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .context("opening CSV")?;
    let mut records: Vec<Vec<String>> = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        if record.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        records.push(record.iter().map(|c| c.trim().to_string()).collect());
    }

    let is_number = |s: &String| s.parse::<f64>().is_ok();
    // An empty corner cell marks a header even when channel names are numeric
    let has_header = records.first().is_some_and(|row| {
        row.first().is_some_and(|c| c.is_empty()) || row.iter().skip(1).any(|c| !is_number(c))
    });
    let data = if has_header { &records[1..] } else { &records[..] };
    let has_labels = !data.is_empty() && data.iter().all(|row| row.first().is_some_and(|c| !is_number(c)));
    debug!("matrix CSV: header={has_header} labels={has_labels}");

    let skip = usize::from(has_labels);
    let rows = data
        .iter()
        .enumerate()
        .map(|(r, row)| {
            row.iter()
                .skip(skip)
                .enumerate()
                .map(|(c, cell)| {
                    cell.parse::<f64>()
                        .with_context(|| format!("row {r}, column {c}: '{cell}' is not a number"))
                })
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;
    Ok(SpilloverMatrix::from_rows(&rows)?)
}

fn load_matrix_json(path: &Path) -> Result<SpilloverMatrix> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let rows: Vec<Vec<f64>> = serde_json::from_str(&text).context("expected an array of rows")?;
    Ok(SpilloverMatrix::from_rows(&rows)?)
}

fn load_matrix_npy(path: &Path) -> Result<SpilloverMatrix> {
    let array: Array2<f64> = match ndarray_npy::read_npy::<_, Array2<f64>>(path) {
        Ok(array) => array,
        Err(_) => ndarray_npy::read_npy::<_, Array2<f32>>(path)
            .context("reading .npy (expected a 2-D f64 or f32 array)")?
            .mapv(f64::from),
    };
    Ok(SpilloverMatrix::new(array)?)
}

/// Write a matrix as a plain CSV grid.
pub fn write_matrix_csv(path: &Path, matrix: &SpilloverMatrix) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).context("creating CSV")?;
    for row in matrix.coefficients().rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}
