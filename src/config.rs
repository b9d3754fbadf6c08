use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::compensation::matrix::Method;

pub const DEFAULT_SUFFIX: &str = "Corrected";
pub const DEFAULT_IMAGE_SUFFIX: &str = "SpillCorrected";

fn default_image_method() -> Method {
    Method::LeastSquares
}

fn default_measurement_method() -> Method {
    Method::NonNegativeLeastSquares
}

fn default_suffix() -> String {
    DEFAULT_SUFFIX.to_string()
}

// ---------------------------------------------------------------------------
// Job file
// ---------------------------------------------------------------------------

/// A batch compensation job, usually read from JSON.
///
/// ```json
/// {
///   "tables": [{ "input": "cell.csv", "output": "cell_comp.csv" }],
///   "images": [{ "input": "stack.npy", "spillover": "sm.csv" }],
///   "measurements": [{
///     "object": "cell",
///     "measurement": "Intensity_MeanIntensity_FullStack",
///     "spillover": "sm.csv"
///   }]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    #[serde(default)]
    pub tables: Vec<TableConfig>,
    #[serde(default)]
    pub images: Vec<ImageGroup>,
    #[serde(default)]
    pub measurements: Vec<MeasurementGroup>,
}

/// A per-object measurement table to load, and where to write it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    pub input: PathBuf,
    /// Defaults to overwriting `input`.
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Defaults to the file stem of `input`.
    #[serde(default)]
    pub object: Option<String>,
}

/// One image to compensate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageGroup {
    pub input: PathBuf,
    /// Defaults to `<input stem>_SpillCorrected.<ext>` next to the input.
    #[serde(default)]
    pub output: Option<PathBuf>,
    pub spillover: PathBuf,
    /// Older image groups carried no method; they mean least squares.
    #[serde(default = "default_image_method")]
    pub method: Method,
}

/// One measurement of one object type to compensate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeasurementGroup {
    pub object: String,
    pub measurement: String,
    #[serde(default = "default_suffix")]
    pub suffix: String,
    pub spillover: PathBuf,
    #[serde(default = "default_measurement_method")]
    pub method: Method,
}

impl ImageGroup {
    pub fn output_path(&self) -> PathBuf {
        if let Some(out) = &self.output {
            return out.clone();
        }
        let stem = self
            .input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        let ext = self.input.extension().and_then(|e| e.to_str()).unwrap_or("npy");
        self.input
            .with_file_name(format!("{stem}_{DEFAULT_IMAGE_SUFFIX}.{ext}"))
    }
}

impl TableConfig {
    pub fn output_path(&self) -> &Path {
        self.output.as_deref().unwrap_or(&self.input)
    }
}

impl JobConfig {
    /// Read a job file; relative paths are taken relative to its directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading job file {}", path.display()))?;
        let mut config: JobConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing job file {}", path.display()))?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        for t in &mut self.tables {
            fix(&mut t.input);
            if let Some(out) = t.output.as_mut() {
                fix(out);
            }
        }
        for g in &mut self.images {
            fix(&mut g.input);
            fix(&mut g.spillover);
            if let Some(out) = g.output.as_mut() {
                fix(out);
            }
        }
        for g in &mut self.measurements {
            fix(&mut g.spillover);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_group_kind() {
        let config: JobConfig = serde_json::from_str(
            r#"{
                "images": [{ "input": "a.png", "spillover": "sm.csv" }],
                "measurements": [{ "object": "cell", "measurement": "m", "spillover": "sm.csv" }]
            }"#,
        )
        .unwrap();
        assert!(config.tables.is_empty());
        assert_eq!(config.images[0].method, Method::LeastSquares);
        assert_eq!(config.measurements[0].method, Method::NonNegativeLeastSquares);
        assert_eq!(config.measurements[0].suffix, "Corrected");
        assert_eq!(
            config.images[0].output_path(),
            PathBuf::from("a_SpillCorrected.png")
        );
    }

    #[test]
    fn unknown_method_is_rejected() {
        let err = serde_json::from_str::<JobConfig>(
            r#"{ "images": [{ "input": "a.png", "spillover": "s.csv", "method": "Divide" }] }"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn relative_paths_follow_job_file() {
        let dir = tempfile::tempdir().unwrap();
        let job = dir.path().join("job.json");
        std::fs::write(
            &job,
            r#"{
                "tables": [{ "input": "cell.csv" }],
                "measurements": [{ "object": "cell", "measurement": "m",
                                   "spillover": "/abs/sm.csv", "method": "LeastSquares" }]
            }"#,
        )
        .unwrap();
        let config = JobConfig::from_file(&job).unwrap();
        assert_eq!(config.tables[0].input, dir.path().join("cell.csv"));
        assert_eq!(config.tables[0].output_path(), dir.path().join("cell.csv"));
        assert_eq!(config.measurements[0].spillover, PathBuf::from("/abs/sm.csv"));
        assert_eq!(config.measurements[0].method, Method::LeastSquares);
    }
}
