use std::path::PathBuf;

use anyhow::{Context, Result};
use ndarray::Array2;

use spillcomp::data::loader::{write_matrix_csv, write_table};
use spillcomp::{ColumnData, ObjectTable, SpilloverMatrix};

const MEASUREMENT: &str = "Intensity_MeanIntensity_FullStack";
const CHANNELS: usize = 4;
const OBJECTS: usize = 500;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Neighbouring channels bleed into each other, the next one the most.
fn sample_spillover() -> Result<SpilloverMatrix> {
    let sm = Array2::from_shape_fn((CHANNELS, CHANNELS), |(i, j)| match j as isize - i as isize {
        0 => 1.0,
        1 => 0.12,
        -1 => 0.03,
        2 => 0.01,
        _ => 0.0,
    });
    Ok(SpilloverMatrix::new(sm)?)
}

fn main() -> Result<()> {
    env_logger::init();

    let out_dir = std::env::args().nth(1).map_or_else(|| PathBuf::from("."), PathBuf::from);
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut rng = SimpleRng::new(42);
    let spillover = sample_spillover()?;

    // Each object is dominated by one marker, with dim background in the rest.
    let truth = Array2::from_shape_fn((OBJECTS, CHANNELS), |(row, channel)| {
        let dominant = row % CHANNELS;
        if channel == dominant {
            rng.next_f64() * 0.8 + 0.1
        } else {
            rng.next_f64() * 0.02
        }
    });
    let mut observed = spillover.apply(truth.view())?;
    observed.mapv_inplace(|v| (v + rng.gauss(0.0, 0.002)).max(0.0));

    let mut table = ObjectTable::new("cell");
    table.push_column(
        "ObjectNumber",
        ColumnData::Integer((1..=OBJECTS as i64).collect()),
    );
    for (k, column) in observed.columns().into_iter().enumerate() {
        table.push_column(&format!("{MEASUREMENT}_c{}", k + 1), ColumnData::Float(column.to_vec()));
    }
    for (k, column) in truth.columns().into_iter().enumerate() {
        table.push_column(&format!("Truth_MeanIntensity_c{}", k + 1), ColumnData::Float(column.to_vec()));
    }

    let table_path = out_dir.join("cell.parquet");
    let matrix_path = out_dir.join("spillover.csv");
    write_table(&table_path, &table)?;
    write_matrix_csv(&matrix_path, &spillover)?;

    println!(
        "Wrote {OBJECTS} objects ({CHANNELS} channels of {MEASUREMENT}) to {} and the matrix to {}",
        table_path.display(),
        matrix_path.display()
    );
    Ok(())
}
