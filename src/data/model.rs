use std::collections::BTreeMap;
use std::fmt;

use log::warn;

use crate::compensation::measurement::{MeasurementReader, MeasurementWriter};
use crate::data::schema::{ColumnDescriptor, ColumnType};
use crate::error::{CompensationError, CompensationResult};

// ---------------------------------------------------------------------------
// ColumnData – the values of one measurement column
// ---------------------------------------------------------------------------

/// Typed column storage mirroring the host's float / integer / text columns.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float(Vec<f64>),
    Integer(Vec<i64>),
    Text(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Integer(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> ColumnType {
        match self {
            ColumnData::Float(_) => ColumnType::Float,
            ColumnData::Integer(_) => ColumnType::Integer,
            ColumnData::Text(_) => ColumnType::Text,
        }
    }

    /// Numeric view of the column; text columns have none.
    pub fn as_f64(&self) -> Option<Vec<f64>> {
        match self {
            ColumnData::Float(v) => Some(v.clone()),
            ColumnData::Integer(v) => Some(v.iter().map(|&i| i as f64).collect()),
            ColumnData::Text(_) => None,
        }
    }

    /// Cell `row` rendered as text (used by the CSV writer).
    pub fn cell_text(&self, row: usize) -> String {
        match self {
            ColumnData::Float(v) => format_float(v[row]),
            ColumnData::Integer(v) => v[row].to_string(),
            ColumnData::Text(v) => v[row].clone(),
        }
    }
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else {
        v.to_string()
    }
}

/// One named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

// ---------------------------------------------------------------------------
// ObjectTable – all measurements of one object type
// ---------------------------------------------------------------------------

/// Columns of one object type (e.g. `cell`), one row per object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectTable {
    pub object_name: String,
    columns: Vec<Column>,
}

impl ObjectTable {
    pub fn new(object_name: &str) -> Self {
        Self {
            object_name: object_name.to_string(),
            columns: Vec::new(),
        }
    }

    /// Number of objects (rows).
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, |c| c.data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Append a column, or replace the column of the same name in place.
    ///
    /// A column whose length differs from the table is kept but reported;
    /// [`ObjectTable::check_lengths`] rejects the table before it is written.
    pub fn push_column(&mut self, name: &str, data: ColumnData) {
        let is_only_column = self.columns.len() == 1 && self.columns[0].name == name;
        if !self.columns.is_empty() && !is_only_column && data.len() != self.len() {
            warn!(
                "{}.{name}: {} values, table has {} objects",
                self.object_name,
                data.len(),
                self.len()
            );
        }
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.data = data,
            None => self.columns.push(Column {
                name: name.to_string(),
                data,
            }),
        }
    }

    /// Every column must hold one value per object.
    pub fn check_lengths(&self) -> CompensationResult<()> {
        let expected = self.len();
        match self.columns.iter().find(|c| c.data.len() != expected) {
            Some(column) => Err(CompensationError::ColumnLengthMismatch {
                object: self.object_name.clone(),
                column: column.name.clone(),
                found: column.data.len(),
                expected,
            }),
            None => Ok(()),
        }
    }

    pub fn descriptors(&self) -> impl Iterator<Item = ColumnDescriptor> + '_ {
        self.columns
            .iter()
            .map(|c| ColumnDescriptor::new(&self.object_name, &c.name, c.data.data_type()))
    }
}

impl fmt::Display for ObjectTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} objects, {} columns",
            self.object_name,
            self.len(),
            self.columns.len()
        )
    }
}

// ---------------------------------------------------------------------------
// MeasurementTable – every object type of one run
// ---------------------------------------------------------------------------

/// In-memory measurement store keyed by object name.
#[derive(Debug, Clone, Default)]
pub struct MeasurementTable {
    objects: BTreeMap<String, ObjectTable>,
}

impl MeasurementTable {
    pub fn insert_object(&mut self, table: ObjectTable) {
        self.objects.insert(table.object_name.clone(), table);
    }

    pub fn object(&self, object_name: &str) -> Option<&ObjectTable> {
        self.objects.get(object_name)
    }

    pub fn object_names(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn take_object(&mut self, object_name: &str) -> Option<ObjectTable> {
        self.objects.remove(object_name)
    }
}

impl MeasurementReader for MeasurementTable {
    fn column_catalog(&self) -> Vec<ColumnDescriptor> {
        self.objects.values().flat_map(|t| t.descriptors()).collect()
    }

    fn measurement(&self, object_name: &str, column_name: &str) -> Option<Vec<f64>> {
        self.objects
            .get(object_name)?
            .column(column_name)?
            .data
            .as_f64()
    }
}

impl MeasurementWriter for MeasurementTable {
    fn add_measurement(&mut self, object_name: &str, column_name: &str, values: Vec<f64>) {
        self.objects
            .entry(object_name.to_string())
            .or_insert_with(|| ObjectTable::new(object_name))
            .push_column(column_name, ColumnData::Float(values));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells() -> ObjectTable {
        let mut t = ObjectTable::new("cell");
        t.push_column("ObjectNumber", ColumnData::Integer(vec![1, 2, 3]));
        t.push_column("Label", ColumnData::Text(vec!["a".into(), "b".into(), "c".into()]));
        t.push_column("m_c1", ColumnData::Float(vec![0.5, f64::NAN, 2.0]));
        t
    }

    #[test]
    fn catalog_lists_every_column_with_type() {
        let mut table = MeasurementTable::default();
        table.insert_object(cells());
        let catalog = table.column_catalog();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog[0], ColumnDescriptor::new("cell", "ObjectNumber", ColumnType::Integer));
        assert_eq!(catalog[1].data_type, ColumnType::Text);
        assert_eq!(catalog[2].data_type, ColumnType::Float);
    }

    #[test]
    fn reads_numeric_columns_only() {
        let mut table = MeasurementTable::default();
        table.insert_object(cells());
        assert_eq!(table.measurement("cell", "ObjectNumber"), Some(vec![1.0, 2.0, 3.0]));
        assert!(table.measurement("cell", "Label").is_none());
        assert!(table.measurement("cell", "missing").is_none());
        assert!(table.measurement("nuclei", "m_c1").is_none());
    }

    #[test]
    fn add_measurement_creates_or_replaces() {
        let mut table = MeasurementTable::default();
        table.add_measurement("nuclei", "area", vec![1.0, 2.0]);
        table.add_measurement("nuclei", "area", vec![3.0, 4.0]);
        let nuclei = table.object("nuclei").unwrap();
        assert_eq!(nuclei.columns().len(), 1);
        assert_eq!(nuclei.len(), 2);
        assert_eq!(table.measurement("nuclei", "area"), Some(vec![3.0, 4.0]));
    }

    #[test]
    fn ragged_column_fails_length_check() {
        let mut table = MeasurementTable::default();
        table.add_measurement("cell", "a", vec![1.0, 2.0, 3.0]);
        table.add_measurement("cell", "b", vec![1.0]);
        let err = table.object("cell").unwrap().check_lengths().unwrap_err();
        assert!(matches!(
            err,
            CompensationError::ColumnLengthMismatch { ref column, found: 1, expected: 3, .. } if column == "b"
        ));
        assert!(cells().check_lengths().is_ok());
    }

    #[test]
    fn float_cells_render_nan() {
        let t = cells();
        let col = t.column("m_c1").unwrap();
        assert_eq!(col.data.cell_text(1), "nan");
        assert_eq!(col.data.cell_text(2), "2");
        assert_eq!(t.to_string(), "cell: 3 objects, 3 columns");
    }
}
