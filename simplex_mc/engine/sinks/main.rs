//! Result sinks: tabular persistence or single-slot retention for rendering.

/// Shared, lock-guarded recorder.
pub mod recorder;
/// Latest-result sink feeding a renderer.
pub mod single_slot;
/// Column-oriented CSV sink.
pub mod tabular;

pub use recorder::SharedRecorder;
pub use single_slot::{RenderFrame, Renderer, SingleSlotSink};
pub use tabular::{Cell, ColumnKind, ColumnSpec, RowLayout, TabularSink};

use crate::{epoch::ResultRecord, error::SinkError};

/// Every sink kind behind one `accept`/`persist` interface.
#[derive(Debug)]
pub enum Sink {
    /// Appends rows, writes a CSV file.
    Tabular(TabularSink),
    /// Retains the latest record for a renderer.
    SingleSlot(SingleSlotSink),
}

impl Sink {
    /// Takes ownership of one epoch's record.
    pub fn accept(&mut self, record: ResultRecord) -> Result<(), SinkError> {
        match self {
            Self::Tabular(table) => table.accept(&record),
            Self::SingleSlot(slot) => {
                slot.accept(record);
                Ok(())
            }
        }
    }

    /// Writes or renders whatever was accepted.
    pub fn persist(&self) -> Result<(), SinkError> {
        match self {
            Self::Tabular(table) => table.persist(),
            Self::SingleSlot(slot) => slot.persist(),
        }
    }

    /// Output location, for logs.
    #[must_use]
    pub fn target(&self) -> String {
        match self {
            Self::Tabular(table) => table.path().display().to_string(),
            Self::SingleSlot(slot) => slot.target().display().to_string(),
        }
    }

    /// Records held: table rows, or 0/1 for the single slot.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Tabular(table) => table.rows(),
            Self::SingleSlot(slot) => usize::from(slot.retained().is_some()),
        }
    }

    /// True before the first record arrives.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<TabularSink> for Sink {
    fn from(table: TabularSink) -> Self {
        Self::Tabular(table)
    }
}

impl From<SingleSlotSink> for Sink {
    fn from(slot: SingleSlotSink) -> Self {
        Self::SingleSlot(slot)
    }
}
