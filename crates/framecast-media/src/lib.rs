//! Frame stream sources.
//!
//! A [`StreamSource`] is a pull-based frame producer with an explicit
//! state machine. This crate ships the prefetched on-disk sequence used
//! by production pipelines and a procedural source for tests and
//! benchmarks.

pub mod generated;
pub mod prefetched;
pub mod source;

pub use generated::{FillPattern, GeneratedConfig, GeneratedSequence};
pub use prefetched::{PrefetchedSequence, SequenceConfig};
pub use source::{SourceState, StreamSource};
