//! Framecast GPU - device contexts, capability probing, and the format
//! conversion stage.
//!
//! The conversion stage runs either as a wgpu compute kernel or as a
//! host scalar path; both decode the packed 10-bit format identically.

pub mod context;
pub mod convert;
pub mod renderer;

pub use context::{Capabilities, ContextToken, GpuContext};
pub use convert::{ChromaFilter, ConversionMode, ConverterConfig, FormatConverter};
pub use renderer::Renderer;
