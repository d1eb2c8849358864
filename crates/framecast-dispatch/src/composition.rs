//! Compositions: sources, a renderer and a sink bound to one run.

use framecast_core::Frame;
use framecast_gpu::Renderer;
use framecast_media::StreamSource;
use std::fmt;
use uuid::Uuid;

/// Unique identifier of a registered composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompositionId(Uuid);

impl CompositionId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CompositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Frame delivery callback. The frame is borrowed for the duration of
/// the call; retaining it requires an explicit `Frame::create_copy`.
pub type SinkCallback = Box<dyn FnMut(&Frame) + Send>;

/// Completion callback, invoked exactly once per started composition.
pub type CompletionCallback = Box<dyn FnOnce(&CompositionOutcome) + Send>;

/// Terminal state of a started composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositionOutcome {
    /// Every pulled frame reached the sink and the sources are
    /// exhausted (or the composition was stopped cleanly).
    Finished,
    /// The pipeline halted on an unrecoverable error. Every frame
    /// delivered before the failure reached the sink in order.
    Failed(String),
}

impl CompositionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for CompositionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished => f.write_str("finished"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// A registered composition: one or more stream sources, a renderer
/// (ownership transferred in) and a sink callback.
///
/// Sources are drained sequentially: source 0 until exhaustion, then
/// source 1, and so on; the composition completes when the last source
/// is exhausted.
pub struct StreamComposition {
    pub(crate) name: String,
    pub(crate) sources: Vec<Box<dyn StreamSource>>,
    pub(crate) renderer: Box<dyn Renderer>,
    pub(crate) sink: SinkCallback,
}

impl StreamComposition {
    pub(crate) fn new(
        name: String,
        sources: Vec<Box<dyn StreamSource>>,
        renderer: Box<dyn Renderer>,
        sink: SinkCallback,
    ) -> Self {
        Self {
            name,
            sources,
            renderer,
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total frames across all sources, including looping.
    pub fn num_frames(&self) -> usize {
        self.sources.iter().map(|s| s.num_frames()).sum()
    }
}
