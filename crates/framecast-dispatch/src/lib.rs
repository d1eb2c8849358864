//! Framecast dispatch - composition orchestration.
//!
//! A [`StreamDispatch`] owns the GPU context token(s) and executes
//! registered compositions: pull frames from sources, convert them under
//! the configured thread topology, and deliver them to a sink in source
//! order, with exactly one completion event per started composition.

pub mod composition;
pub mod dispatch;
pub mod flags;
pub mod handle;

pub use composition::{CompositionId, CompositionOutcome, StreamComposition};
pub use dispatch::{DispatchConfig, StreamDispatch};
pub use flags::OptimizationFlags;
pub use handle::CompositionHandle;
