use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    consumer::{Estimate, Histogram},
    epoch::ResultRecord,
    error::SinkError,
};

/// Everything a renderer needs to draw the retained epoch.
#[derive(Debug, Clone, Copy)]
pub struct RenderFrame<'a> {
    /// Epoch statistic.
    pub estimate: Estimate,
    /// Center interval edges `(pre * N, (1 - post) * N)`.
    pub boundaries: (f64, f64),
    /// Recorded positions, if captured.
    pub histogram: Option<&'a Histogram>,
    /// Where the renderer should write its output.
    pub target: &'a Path,
}

/// Rendering collaborator for the single-slot sink.
pub trait Renderer: Send {
    /// Draws one frame.
    fn render(&self, frame: &RenderFrame<'_>) -> Result<(), SinkError>;
}

impl<R: Renderer + Sync + ?Sized> Renderer for Arc<R> {
    fn render(&self, frame: &RenderFrame<'_>) -> Result<(), SinkError> {
        (**self).render(frame)
    }
}

/// Keeps only the latest record plus its center interval edges.
pub struct SingleSlotSink {
    target: PathBuf,
    retained: Option<ResultRecord>,
    boundaries: Option<(f64, f64)>,
    renderer: Option<Box<dyn Renderer>>,
}

impl fmt::Debug for SingleSlotSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleSlotSink")
            .field("target", &self.target)
            .field("retained", &self.retained.is_some())
            .field("boundaries", &self.boundaries)
            .field("renderer", &self.renderer.is_some())
            .finish()
    }
}

impl SingleSlotSink {
    /// Creates an empty slot whose renders go to `target`.
    #[must_use]
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            retained: None,
            boundaries: None,
            renderer: None,
        }
    }

    /// Attaches a renderer invoked on `persist`.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Replaces the retained record.
    pub fn accept(&mut self, record: ResultRecord) {
        self.boundaries = Some(record.boundaries());
        self.retained = Some(record);
    }

    /// Latest record.
    #[must_use]
    pub const fn retained(&self) -> Option<&ResultRecord> {
        self.retained.as_ref()
    }

    /// Edges of the latest record's center interval.
    #[must_use]
    pub const fn boundaries(&self) -> Option<(f64, f64)> {
        self.boundaries
    }

    /// Render target.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Frame for the retained record.
    pub fn frame(&self) -> Result<RenderFrame<'_>, SinkError> {
        match (&self.retained, self.boundaries) {
            (Some(record), Some(boundaries)) => Ok(RenderFrame {
                estimate: record.estimate,
                boundaries,
                histogram: record.histogram.as_ref(),
                target: &self.target,
            }),
            _ => Err(SinkError::NothingRetained(self.target.display().to_string())),
        }
    }

    /// Hands the retained record to the renderer, if one is attached.
    pub fn persist(&self) -> Result<(), SinkError> {
        let frame = self.frame()?;
        if let Some(renderer) = &self.renderer {
            renderer.render(&frame)?;
        }
        Ok(())
    }
}
