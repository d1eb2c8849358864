//! The pluggable conversion stage contract.

use crate::context::ContextToken;
use framecast_core::{Frame, Result};

/// A GPU conversion/compute stage, invoked per frame pair by the
/// dispatch convert thread under an execution token.
///
/// Implementations own whatever device resources they need; the token
/// carries the execution context they run under. A renderer failure is
/// fatal to the composition it serves.
pub trait Renderer: Send {
    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;

    /// Convert `input` into `output`. The output frame is pre-allocated
    /// by the caller with the target format; the renderer fills its
    /// buffer and must not change its time or markers.
    fn convert(&mut self, ctx: &mut ContextToken, input: &Frame, output: &mut Frame)
        -> Result<()>;
}
