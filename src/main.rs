use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use arrow::util::pretty::pretty_format_batches;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;

use spillcomp::config::{ImageGroup, JobConfig, MeasurementGroup, DEFAULT_SUFFIX};
use spillcomp::data::loader::{load_table, object_name_from_path, to_record_batch};
use spillcomp::data::schema::{output_columns, resolve_channels};
use spillcomp::workspace::{run_image_group, run_job, Workspace};
use spillcomp::{ColumnData, MeasurementReader, MeasurementTable, Method, ObjectTable};

#[derive(Parser)]
#[command(name = "spillcomp")]
#[command(about = "Spillover compensation for multiplexed images and per-object measurements")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compensate every pixel of a multichannel image.
    Image(ImageArgs),

    /// Compensate the channel columns of one measurement in a table.
    Measurements(MeasurementArgs),

    /// Run a JSON job file.
    Run {
        #[arg(long)]
        config: PathBuf,
    },

    /// Show the channel columns a measurement resolves to.
    Channels(ChannelArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MethodArg {
    /// Unconstrained least squares.
    Ls,
    /// Non-negative least squares.
    Nnls,
}

impl MethodArg {
    fn to_core(self) -> Method {
        match self {
            Self::Ls => Method::LeastSquares,
            Self::Nnls => Method::NonNegativeLeastSquares,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct ImageArgs {
    /// Input image (.png or .npy).
    #[arg(long)]
    input: PathBuf,

    /// Output image; defaults to `<stem>_SpillCorrected.<ext>`.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Spillover matrix (.csv, .json or .npy).
    #[arg(long)]
    spillover: PathBuf,

    #[arg(long, value_enum, default_value_t = MethodArg::Ls)]
    method: MethodArg,
}

#[derive(Debug, Clone, Args)]
struct TableArgs {
    /// Per-object measurement table (.csv, .json or .parquet).
    #[arg(long)]
    table: PathBuf,

    /// Object name; defaults to the table's file stem.
    #[arg(long)]
    object: Option<String>,

    /// Base measurement name, e.g. Intensity_MeanIntensity_FullStack.
    #[arg(long)]
    measurement: String,

    /// Suffix inserted into the output column names.
    #[arg(long, default_value = DEFAULT_SUFFIX)]
    suffix: String,
}

impl TableArgs {
    fn object_name(&self) -> Result<String> {
        match &self.object {
            Some(name) => Ok(name.clone()),
            None => object_name_from_path(&self.table),
        }
    }
}

#[derive(Debug, Clone, Args)]
struct MeasurementArgs {
    #[command(flatten)]
    table: TableArgs,

    /// Spillover matrix (.csv, .json or .npy).
    #[arg(long)]
    spillover: PathBuf,

    #[arg(long, value_enum, default_value_t = MethodArg::Nnls)]
    method: MethodArg,

    /// Output table; defaults to overwriting the input.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ChannelArgs {
    #[command(flatten)]
    table: TableArgs,

    /// Rows shown in the preview.
    #[arg(long, default_value = "5")]
    rows: usize,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Image(args) => run_image(&args),
        Commands::Measurements(args) => run_measurements(&args),
        Commands::Run { config } => run_config(&config),
        Commands::Channels(args) => run_channels(&args),
    }
}

fn run_image(args: &ImageArgs) -> Result<()> {
    let group = ImageGroup {
        input: args.input.clone(),
        output: args.output.clone(),
        spillover: args.spillover.clone(),
        method: args.method.to_core(),
    };
    let output = run_image_group(&group)?;
    println!("wrote {}", output.display());
    Ok(())
}

fn run_measurements(args: &MeasurementArgs) -> Result<()> {
    let object = args.table.object_name()?;
    let output = args.output.as_deref().unwrap_or(&args.table.table);

    let mut workspace = Workspace::default();
    workspace.load_object(&args.table.table, Some(&object), output)?;
    let columns = workspace.run_measurement_group(&MeasurementGroup {
        object,
        measurement: args.table.measurement.clone(),
        suffix: args.table.suffix.clone(),
        spillover: args.spillover.clone(),
        method: args.method.to_core(),
    })?;
    workspace.write_all()?;

    for column in &columns {
        println!("{}.{}", column.object_name, column.column_name);
    }
    println!("wrote {}", output.display());
    Ok(())
}

fn run_config(path: &Path) -> Result<()> {
    let config = JobConfig::from_file(path)?;
    info!(
        "job {}: {} tables, {} image groups, {} measurement groups",
        path.display(),
        config.tables.len(),
        config.images.len(),
        config.measurements.len()
    );
    let report = run_job(&config)?;
    for p in report.images_written.iter().chain(&report.tables_written) {
        println!("wrote {}", p.display());
    }
    println!("{} columns compensated", report.columns_written.len());
    Ok(())
}

fn run_channels(args: &ChannelArgs) -> Result<()> {
    let object = args.table.object_name()?;
    let table = load_table(&args.table.table, &object)?;
    let mut store = MeasurementTable::default();
    store.insert_object(table);

    let channels = resolve_channels(&store.column_catalog(), &object, &args.table.measurement)
        .with_context(|| format!("resolving {object}.{}", args.table.measurement))?;
    let planned = output_columns(&object, &args.table.measurement, &args.table.suffix, channels.len());

    println!("{object}.{}: {} channels", args.table.measurement, channels.len());
    for (input, output) in channels.columns().iter().zip(&planned) {
        println!("  {:<48} -> {}", input.column_name, output.column_name);
    }
    if channels.is_empty() {
        return Ok(());
    }

    let mut preview = ObjectTable::new(&object);
    if let Some(source) = store.object(&object) {
        for name in channels.column_names() {
            if let Some(column) = source.column(name) {
                let mut data = column.data.clone();
                truncate(&mut data, args.rows);
                preview.push_column(name, data);
            }
        }
    }
    let batch = to_record_batch(&preview)?;
    println!("{}", pretty_format_batches(&[batch])?);
    Ok(())
}

fn truncate(data: &mut ColumnData, rows: usize) {
    match data {
        ColumnData::Float(v) => v.truncate(rows),
        ColumnData::Integer(v) => v.truncate(rows),
        ColumnData::Text(v) => v.truncate(rows),
    }
}
