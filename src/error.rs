use thiserror::Error;

/// Fatal conditions raised by the compensation core.
///
/// Invalid (non-finite) observation rows are not errors; they come back as
/// all-NaN rows.
#[derive(Debug, Error)]
pub enum CompensationError {
    /// Observation channel count differs from the matrix input channels.
    #[error("shape mismatch: observations have {actual} channels but the spillover matrix expects {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Upstream channel columns do not match the matrix.
    #[error(
        "measurement {measurement} was measured with {found} channels, \
         which is incompatible with a spillover matrix with {expected} channels"
    )]
    ChannelCountMismatch {
        measurement: String,
        found: usize,
        expected: usize,
    },

    #[error("only square spillover matrices are supported here, got {rows}x{cols}")]
    AsymmetricMatrix { rows: usize, cols: usize },

    #[error("spillover matrix must be at least 1x1, got {rows}x{cols}")]
    EmptyMatrix { rows: usize, cols: usize },

    #[error("spillover matrix row {row} has {found} entries, expected {expected}")]
    RaggedMatrix {
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("spillover coefficient at ({row}, {col}) is not finite")]
    NonFiniteCoefficient { row: usize, col: usize },

    #[error("unknown compensation method: {0:?} (expected LeastSquares or NonNegativeLeastSquares)")]
    UnknownMethod(String),

    #[error("channel {channel} of {measurement} appears more than once")]
    DuplicateChannel { measurement: String, channel: usize },

    #[error("channel c{missing} of {measurement} is missing (highest channel found: c{highest})")]
    ChannelGap {
        measurement: String,
        missing: usize,
        highest: usize,
    },

    #[error("column {column} of {object} is not numeric")]
    NonNumericColumn { object: String, column: String },

    #[error("column {column} of {object} is missing")]
    MissingColumn { object: String, column: String },

    #[error("column {column} of {object} has {found} values, expected {expected}")]
    ColumnLengthMismatch {
        object: String,
        column: String,
        found: usize,
        expected: usize,
    },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error("linear solve failed: {0}")]
    Solver(&'static str),

    /// Another error annotated with the image or measurement it concerns.
    #[error("{name}: {source}")]
    Context {
        name: String,
        #[source]
        source: Box<CompensationError>,
    },
}

impl CompensationError {
    /// Attach the name of the image or measurement being compensated.
    pub fn within(self, name: impl Into<String>) -> Self {
        CompensationError::Context {
            name: name.into(),
            source: Box::new(self),
        }
    }

    /// The error without any name annotations.
    pub fn root(&self) -> &CompensationError {
        match self {
            CompensationError::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type for compensation operations
pub type CompensationResult<T> = Result<T, CompensationError>;
