//! Shared helpers for the integration tests.

use framecast_core::{Chromaticity, ImageFormat, Origin, PixelFormat, Transfer};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Install a test-writer tracing subscriber. Repeated calls are no-ops,
/// so every test can call this first.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn v210(width: u32, height: u32) -> ImageFormat {
    ImageFormat::new(
        width,
        height,
        Transfer::Bt709,
        Chromaticity::Bt709,
        PixelFormat::Yuv10Bit422,
        Origin::UpperLeft,
    )
    .unwrap()
}

pub fn rgb(width: u32, height: u32, pixel_format: PixelFormat) -> ImageFormat {
    ImageFormat::new(
        width,
        height,
        Transfer::Bt709,
        Chromaticity::Bt709,
        pixel_format,
        Origin::UpperLeft,
    )
    .unwrap()
}

/// A process-unique temp directory for on-disk sequence fixtures.
pub fn temp_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("framecast-it-{}-{}", tag, std::process::id()))
}
