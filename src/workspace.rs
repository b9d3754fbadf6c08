use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::compensation::image::compensate_image;
use crate::compensation::measurement::{compensate_measurements, MeasurementRequest};
use crate::config::{ImageGroup, JobConfig, MeasurementGroup};
use crate::data::image_io::{load_image, save_image};
use crate::data::loader::{load_spillover_matrix, load_table, object_name_from_path, write_table};
use crate::data::model::MeasurementTable;
use crate::data::schema::ColumnDescriptor;

// ---------------------------------------------------------------------------
// Workspace state
// ---------------------------------------------------------------------------

/// Everything one compensation run holds between steps.
#[derive(Debug, Default)]
pub struct Workspace {
    /// Loaded per-object measurements.
    pub measurements: MeasurementTable,

    /// Where each loaded object is written back to.
    destinations: BTreeMap<String, PathBuf>,
}

/// What a finished run produced.
#[derive(Debug, Default)]
pub struct JobReport {
    pub images_written: Vec<PathBuf>,
    pub columns_written: Vec<ColumnDescriptor>,
    pub tables_written: Vec<PathBuf>,
}

impl Workspace {
    /// Load one object table and remember where it goes afterwards.
    pub fn load_object(&mut self, input: &Path, object: Option<&str>, output: &Path) -> Result<()> {
        let object_name = match object {
            Some(name) => name.to_string(),
            None => object_name_from_path(input)?,
        };
        if self.destinations.contains_key(&object_name) {
            warn!("object '{object_name}' loaded twice; {} replaces it", input.display());
        }
        let table = load_table(input, &object_name)?;
        self.measurements.insert_object(table);
        self.destinations.insert(object_name, output.to_path_buf());
        Ok(())
    }

    /// Compensate one measurement of a loaded object.
    pub fn run_measurement_group(&mut self, group: &MeasurementGroup) -> Result<Vec<ColumnDescriptor>> {
        let spillover = load_spillover_matrix(&group.spillover)?;
        let request = MeasurementRequest {
            object_name: group.object.clone(),
            base_measurement: group.measurement.clone(),
            suffix: group.suffix.clone(),
            method: group.method,
        };
        compensate_measurements(&request, &spillover, &mut self.measurements)
            .with_context(|| format!("compensating {}.{}", group.object, group.measurement))
    }

    /// Write every loaded object back to its destination.
    pub fn write_all(&self) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (object_name, path) in &self.destinations {
            if let Some(table) = self.measurements.object(object_name) {
                write_table(path, table)?;
                written.push(path.clone());
            }
        }
        Ok(written)
    }
}

/// Compensate one image file and save the result.
pub fn run_image_group(group: &ImageGroup) -> Result<PathBuf> {
    let spillover = load_spillover_matrix(&group.spillover)?;
    let image = load_image(&group.input)?;
    let corrected = compensate_image(image.view(), &spillover, group.method)
        .with_context(|| format!("compensating {}", group.input.display()))?;
    let output = group.output_path();
    save_image(&output, &corrected)?;
    Ok(output)
}

/// Run a whole job: load tables, compensate images, compensate measurements
/// in the order given, then write the tables.
///
/// Stops at the first failing step; tables are only written when every
/// step succeeded.
pub fn run_job(config: &JobConfig) -> Result<JobReport> {
    let mut workspace = Workspace::default();
    let mut report = JobReport::default();

    for table in &config.tables {
        workspace.load_object(&table.input, table.object.as_deref(), table.output_path())?;
    }

    for (i, group) in config.images.iter().enumerate() {
        let out = run_image_group(group).with_context(|| format!("image group {}", i + 1))?;
        report.images_written.push(out);
    }

    for (i, group) in config.measurements.iter().enumerate() {
        let columns = workspace
            .run_measurement_group(group)
            .with_context(|| format!("measurement group {}", i + 1))?;
        report.columns_written.extend(columns);
    }

    report.tables_written = workspace.write_all()?;
    info!(
        "job done: {} images, {} columns, {} tables",
        report.images_written.len(),
        report.columns_written.len(),
        report.tables_written.len()
    );
    Ok(report)
}
