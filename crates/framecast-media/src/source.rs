//! The stream source contract.

use framecast_core::{Frame, Result};
use std::fmt;

/// Lifecycle state of a stream source.
///
/// Transitions are one-way: `Initialized → ReadyToRead → EndOfStream`.
/// I/O failures surface as errors from the constructor or from
/// `pop_frame`, not as a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Constructed, but no frames are available yet.
    Initialized,
    /// Frames are available to be read.
    ReadyToRead,
    /// Fully consumed. Nothing more will come.
    EndOfStream,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialized => "INITIALIZED",
            Self::ReadyToRead => "READY_TO_READ",
            Self::EndOfStream => "END_OF_STREAM",
        };
        f.write_str(name)
    }
}

/// Pull-based frame producer.
///
/// Frames come in strictly increasing time order, starting at frame
/// index 0 at the source's configured rate. End of stream is marked only
/// after the last frame has been popped.
pub trait StreamSource: Send {
    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> SourceState;

    /// Total number of frames this source will produce, including any
    /// configured looping.
    fn num_frames(&self) -> usize;

    /// Pop the next frame into `out`, returning whether a frame was
    /// written. Valid only in `ReadyToRead`; calling past end of stream
    /// fails with `StreamExhausted` — a source never hands out a stale
    /// or default frame silently.
    fn pop_frame(&mut self, out: &mut Frame) -> Result<bool>;
}
