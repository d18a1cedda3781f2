use thiserror::Error;

/// Configuration problems detected before any worker is launched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// A sweep was requested with nothing to run.
    #[error("epoch count must be positive when a sweep is requested")]
    ZeroEpochs,
    /// Mode name did not match any known study mode.
    #[error("mode {0} cannot be resolved")]
    UnknownMode(String),
    /// Simplex size is even or below 3.
    #[error("simplex size {0} must be odd and at least 3")]
    InvalidSimplexSize(usize),
    /// No workers requested.
    #[error("worker count must be positive")]
    ZeroWorkers,
    /// A probability parameter fell outside its allowed range.
    #[error("{name} = {value} is outside [{low}, {high}]")]
    ProbabilityOutOfRange {
        /// Parameter name.
        name: &'static str,
        /// Offending value.
        value: f64,
        /// Inclusive lower bound.
        low: f64,
        /// Inclusive upper bound.
        high: f64,
    },
    /// Caller-supplied simplex values were rejected.
    #[error("invalid simplex: {0}")]
    InvalidSimplex(String),
    /// Entry-count sweep range contains no values.
    #[error("entry count range {min}..{max} is empty")]
    EmptyEntryRange {
        /// First entry count (inclusive).
        min: u64,
        /// Last entry count (exclusive).
        max: u64,
    },
    /// Declared columns do not match the row layout.
    #[error("row layout {layout} expects {expected} columns, got {actual}")]
    ColumnCount {
        /// Layout label.
        layout: &'static str,
        /// Columns required by the layout.
        expected: usize,
        /// Columns declared.
        actual: usize,
    },
    /// Declared column kind differs from the field it stores.
    #[error("column {name} must hold {required} values")]
    ColumnKind {
        /// Column name.
        name: String,
        /// Kind required by the layout.
        required: &'static str,
    },
    /// Two columns share a name.
    #[error("duplicate column name {0}")]
    DuplicateColumn(String),
    /// Histogram configured without bins or with an empty range.
    #[error("histogram needs at least one bin over a positive range")]
    EmptyHistogram,
    /// Zero entries per draw.
    #[error("entry count must be positive")]
    ZeroEntries,
    /// Zero draws per epoch.
    #[error("loop count must be positive")]
    ZeroLoops,
}

/// Failures raised by sinks while accepting or persisting results.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Single-slot sink persisted before any record arrived.
    #[error("no result retained for {0}")]
    NothingRetained(String),
    /// Cell kind did not match its column.
    #[error("column {0} received a value of the wrong kind")]
    CellKind(String),
    /// Row width did not match the column count.
    #[error("row has {actual} cells, table has {expected} columns")]
    RowWidth {
        /// Columns in the table.
        expected: usize,
        /// Cells supplied.
        actual: usize,
    },
    /// Renderer collaborator failed.
    #[error("renderer failed: {0}")]
    Render(String),
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Invalid configuration.
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    /// Boundary extraction on an outcome with fewer than 3 categories.
    #[error("center boundary needs at least 3 categories, got {0}")]
    SampleSize(usize),
    /// Random engine rejected its inputs.
    #[error("multinomial sampling failed: {0}")]
    Sampling(String),
    /// Sink failure.
    #[error(transparent)]
    Sink(#[from] SinkError),
    /// A launched worker returned an error.
    #[error("worker {worker} failed: {source}")]
    Worker {
        /// Worker label.
        worker: String,
        /// Underlying failure.
        #[source]
        source: Box<SimulationError>,
    },
    /// A launched worker panicked or was aborted.
    #[error("worker {worker} panicked: {message}")]
    WorkerPanicked {
        /// Worker label.
        worker: String,
        /// Panic payload or join failure description.
        message: String,
    },
    /// Launch attempted outside a tokio runtime.
    #[error("no tokio runtime available to launch workers")]
    NoRuntime,
}

/// Result alias used across the engine.
pub type SimResult<T> = Result<T, SimulationError>;
