use std::{
    fmt,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    epoch::ResultRecord,
    error::{ConfigError, SinkError},
};

/// Scalar type stored by a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Non-negative integers.
    Unsigned,
    /// Doubles.
    Float,
}

impl ColumnKind {
    const fn label(self) -> &'static str {
        match self {
            Self::Unsigned => "unsigned",
            Self::Float => "float",
        }
    }
}

/// Declared column: name plus scalar kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Header text.
    pub name: String,
    /// Scalar kind.
    pub kind: ColumnKind,
}

impl ColumnSpec {
    /// Float column.
    #[must_use]
    pub fn float(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Float,
        }
    }

    /// Unsigned column.
    #[must_use]
    pub fn unsigned(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Unsigned,
        }
    }
}

/// One cell of a row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    /// Unsigned value.
    Unsigned(u64),
    /// Float value.
    Float(f64),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone)]
enum ColumnData {
    Unsigned(Vec<u64>),
    Float(Vec<f64>),
}

impl ColumnData {
    const fn new(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Unsigned => Self::Unsigned(Vec::new()),
            ColumnKind::Float => Self::Float(Vec::new()),
        }
    }

    fn accepts(&self, cell: Cell) -> bool {
        matches!(
            (self, cell),
            (Self::Unsigned(_), Cell::Unsigned(_)) | (Self::Float(_), Cell::Float(_))
        )
    }

    fn push(&mut self, cell: Cell) {
        match (self, cell) {
            (Self::Unsigned(values), Cell::Unsigned(value)) => values.push(value),
            (Self::Float(values), Cell::Float(value)) => values.push(value),
            _ => unreachable!("cell kind checked before push"),
        }
    }

    fn cell(&self, row: usize) -> Cell {
        match self {
            Self::Unsigned(values) => Cell::Unsigned(values[row]),
            Self::Float(values) => Cell::Float(values[row]),
        }
    }
}

/// Which record fields a row holds, in column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowLayout {
    /// `pre, mid, post, mean, error`.
    Simplex,
    /// `pre, mean, error`.
    PreProbability,
    /// `entry count, mean, error`.
    EntryCount,
}

impl RowLayout {
    /// Layout name used in errors and logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Simplex => "simplex",
            Self::PreProbability => "pre_probability",
            Self::EntryCount => "entry_count",
        }
    }

    const fn kinds(self) -> &'static [ColumnKind] {
        match self {
            Self::Simplex => &[ColumnKind::Float; 5],
            Self::PreProbability => &[ColumnKind::Float; 3],
            Self::EntryCount => &[ColumnKind::Unsigned, ColumnKind::Float, ColumnKind::Float],
        }
    }

    /// Conventional column headers for this layout.
    #[must_use]
    pub fn default_columns(self) -> Vec<ColumnSpec> {
        match self {
            Self::Simplex => vec![
                ColumnSpec::float("pre_prob"),
                ColumnSpec::float("mid_prob"),
                ColumnSpec::float("post_prob"),
                ColumnSpec::float("mean"),
                ColumnSpec::float("stderr"),
            ],
            Self::PreProbability => vec![
                ColumnSpec::float("pa"),
                ColumnSpec::float("mean"),
                ColumnSpec::float("stderr"),
            ],
            Self::EntryCount => vec![
                ColumnSpec::unsigned("entryN"),
                ColumnSpec::float("mean"),
                ColumnSpec::float("stderr"),
            ],
        }
    }

    /// Extracts this layout's cells from a record.
    #[must_use]
    pub fn cells(self, record: &ResultRecord) -> Vec<Cell> {
        let mean = Cell::Float(record.estimate.mean);
        let error = Cell::Float(record.estimate.error);
        match self {
            Self::Simplex => vec![
                Cell::Float(record.pre),
                Cell::Float(record.mid),
                Cell::Float(record.post),
                mean,
                error,
            ],
            Self::PreProbability => vec![Cell::Float(record.pre), mean, error],
            Self::EntryCount => vec![Cell::Unsigned(record.entry_count), mean, error],
        }
    }
}

/// Column-oriented table persisted as comma-space separated text.
#[derive(Debug, Clone)]
pub struct TabularSink {
    path: PathBuf,
    layout: RowLayout,
    columns: IndexMap<String, ColumnData>,
    rows: usize,
}

impl TabularSink {
    /// Creates a table whose columns must match `layout` in count and kind.
    pub fn new(
        path: impl Into<PathBuf>,
        layout: RowLayout,
        columns: Vec<ColumnSpec>,
    ) -> Result<Self, ConfigError> {
        let kinds = layout.kinds();
        if columns.len() != kinds.len() {
            return Err(ConfigError::ColumnCount {
                layout: layout.label(),
                expected: kinds.len(),
                actual: columns.len(),
            });
        }
        let mut storage = IndexMap::with_capacity(columns.len());
        for (spec, required) in columns.into_iter().zip(kinds) {
            if spec.kind != *required {
                return Err(ConfigError::ColumnKind {
                    name: spec.name,
                    required: required.label(),
                });
            }
            if storage.contains_key(&spec.name) {
                return Err(ConfigError::DuplicateColumn(spec.name));
            }
            let _ = storage.insert(spec.name, ColumnData::new(spec.kind));
        }
        Ok(Self {
            path: path.into(),
            layout,
            columns: storage,
            rows: 0,
        })
    }

    /// Table with the layout's conventional headers.
    #[must_use]
    pub fn with_default_columns(path: impl Into<PathBuf>, layout: RowLayout) -> Self {
        let columns = layout
            .default_columns()
            .into_iter()
            .map(|spec| (spec.name, ColumnData::new(spec.kind)))
            .collect();
        Self {
            path: path.into(),
            layout,
            columns,
            rows: 0,
        }
    }

    /// Appends the record as one row.
    pub fn accept(&mut self, record: &ResultRecord) -> Result<(), SinkError> {
        let cells = self.layout.cells(record);
        self.push_row(&cells)
    }

    /// Appends one row of cells in column order.
    pub fn push_row(&mut self, cells: &[Cell]) -> Result<(), SinkError> {
        if cells.len() != self.columns.len() {
            return Err(SinkError::RowWidth {
                expected: self.columns.len(),
                actual: cells.len(),
            });
        }
        if let Some((name, _)) = self
            .columns
            .iter()
            .zip(cells)
            .find(|((_, column), cell)| !column.accepts(**cell))
            .map(|(column, _)| column)
        {
            return Err(SinkError::CellKind(name.clone()));
        }
        for (column, cell) in self.columns.values_mut().zip(cells) {
            column.push(*cell);
        }
        self.rows += 1;
        Ok(())
    }

    /// Rows appended so far.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Header names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Output file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Row layout.
    #[must_use]
    pub const fn layout(&self) -> RowLayout {
        self.layout
    }

    /// Writes header and rows.
    pub fn write_to<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        let header: Vec<&str> = self.column_names().collect();
        writeln!(out, "{}", header.join(", "))?;
        for row in 0..self.rows {
            let line: Vec<String> = self
                .columns
                .values()
                .map(|column| column.cell(row).to_string())
                .collect();
            writeln!(out, "{}", line.join(", "))?;
        }
        out.flush()
    }

    /// Truncates the output file and writes the whole table.
    pub fn persist(&self) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&self.path)?;
        self.write_to(BufWriter::new(file))?;
        Ok(())
    }
}
