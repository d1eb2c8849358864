//! The frame buffer type.

use crate::error::{FramecastError, Result};
use crate::format::ImageFormat;
use crate::time::FrameTime;
use std::fs;
use std::path::Path;
use tracing::debug;

/// A video frame: exclusive ownership of a byte buffer sized by its
/// [`ImageFormat`], a timestamp, and a validity flag.
///
/// `Frame` deliberately does not implement `Clone`; copying a frame is
/// always explicit through [`Frame::create_copy`], so unintended deep
/// copies cannot hide in user code. A frame handed to a sink callback is
/// borrowed for the duration of the call only — retaining it requires
/// `create_copy`.
#[derive(Debug)]
pub struct Frame {
    format: ImageFormat,
    time: FrameTime,
    valid: bool,
    end_of_sequence: bool,
    data: Vec<u8>,
}

impl Frame {
    /// Allocate a zeroed frame for the given format.
    pub fn new(format: ImageFormat, time: FrameTime) -> Self {
        Self {
            format,
            time,
            valid: true,
            end_of_sequence: false,
            data: vec![0u8; format.byte_size()],
        }
    }

    /// A placeholder without image data. Used as the target of
    /// out-parameter style pops before a real frame is written.
    pub fn placeholder(format: ImageFormat) -> Self {
        Self {
            format,
            time: FrameTime::ZERO,
            valid: false,
            end_of_sequence: false,
            data: Vec::new(),
        }
    }

    /// Explicit deep copy. This is the only copy path.
    pub fn create_copy(&self) -> Self {
        Self {
            format: self.format,
            time: self.time,
            valid: self.valid,
            end_of_sequence: self.end_of_sequence,
            data: self.data.clone(),
        }
    }

    pub fn format(&self) -> &ImageFormat {
        &self.format
    }

    pub fn time(&self) -> FrameTime {
        self.time
    }

    pub fn set_time(&mut self, time: FrameTime) {
        self.time = time;
    }

    /// Whether this frame carries image data.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Whether this frame is the last one of its sequence. A frame
    /// carrying this marker is still a valid frame.
    pub fn marks_end_of_sequence(&self) -> bool {
        self.end_of_sequence
    }

    pub fn set_marks_end_of_sequence(&mut self, end: bool) {
        self.end_of_sequence = end;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    /// Overwrite the buffer from a slice of exactly the right length.
    pub fn copy_from_slice(&mut self, src: &[u8]) -> Result<()> {
        if src.len() != self.data.len() {
            return Err(FramecastError::DataValidation(format!(
                "buffer length mismatch: frame holds {} bytes, source has {}",
                self.data.len(),
                src.len()
            )));
        }
        self.data.copy_from_slice(src);
        self.valid = true;
        Ok(())
    }

    /// Dump the raw buffer bytes to a file (headerless, exactly the
    /// layout described by the format).
    pub fn write_raw<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if !self.valid {
            return Err(FramecastError::DataValidation(
                "refusing to dump an invalid frame".to_string(),
            ));
        }
        fs::write(path.as_ref(), &self.data)?;
        debug!(
            "dumped {} bytes ({}) to {}",
            self.data.len(),
            self.format,
            path.as_ref().display()
        );
        Ok(())
    }

    /// Load a raw headerless frame file. The file size must match the
    /// format's byte size exactly.
    pub fn read_raw<P: AsRef<Path>>(format: ImageFormat, time: FrameTime, path: P) -> Result<Self> {
        let data = fs::read(path.as_ref())?;
        if data.len() != format.byte_size() {
            return Err(FramecastError::DataValidation(format!(
                "raw frame {} holds {} bytes but format [{}] requires {}",
                path.as_ref().display(),
                data.len(),
                format,
                format.byte_size()
            )));
        }
        Ok(Self {
            format,
            time,
            valid: true,
            end_of_sequence: false,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Chromaticity, Origin, PixelFormat, Transfer};

    fn small_rgb() -> ImageFormat {
        ImageFormat::new(
            4,
            2,
            Transfer::Srgb,
            Chromaticity::Srgb,
            PixelFormat::Rgb8,
            Origin::UpperLeft,
        )
        .unwrap()
    }

    #[test]
    fn test_allocation_is_zeroed_and_sized() {
        let f = Frame::new(small_rgb(), FrameTime::ZERO);
        assert!(f.is_valid());
        assert_eq!(f.byte_size(), 4 * 2 * 3);
        assert!(f.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_create_copy_is_deep() {
        let mut a = Frame::new(small_rgb(), FrameTime::new(1, 25));
        a.data_mut()[0] = 0xAA;
        let b = a.create_copy();
        a.data_mut()[0] = 0xBB;
        assert_eq!(b.data()[0], 0xAA);
        assert_eq!(b.time(), FrameTime::new(1, 25));
    }

    #[test]
    fn test_copy_from_slice_length_check() {
        let mut f = Frame::new(small_rgb(), FrameTime::ZERO);
        let err = f.copy_from_slice(&[0u8; 3]);
        assert!(matches!(err, Err(FramecastError::DataValidation(_))));
    }

    #[test]
    fn test_placeholder_is_invalid() {
        let f = Frame::placeholder(small_rgb());
        assert!(!f.is_valid());
        assert_eq!(f.byte_size(), 0);
    }

    #[test]
    fn test_raw_round_trip() {
        let dir = std::env::temp_dir().join(format!("framecast-frame-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("frame0.raw");

        let mut f = Frame::new(small_rgb(), FrameTime::ZERO);
        for (i, b) in f.data_mut().iter_mut().enumerate() {
            *b = i as u8;
        }
        f.write_raw(&path).unwrap();

        let loaded = Frame::read_raw(small_rgb(), FrameTime::ZERO, &path).unwrap();
        assert_eq!(loaded.data(), f.data());

        fs::remove_dir_all(&dir).unwrap();
    }
}
