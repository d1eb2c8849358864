//! Procedurally generated frame sequences.
//!
//! Deterministic in-memory sources for tests and benchmarks: no disk,
//! same contract as any other stream source.

use crate::source::{SourceState, StreamSource};
use framecast_core::packed10::{self, SampleGroup};
use framecast_core::{Frame, FramecastError, FrameTime, ImageFormat, PixelFormat, Result};
use serde::{Deserialize, Serialize};

/// Frame content pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillPattern {
    /// Every byte of every frame set to the given value.
    ConstantByte(u8),
    /// Per-frame varying content. For the packed 10-bit format the ramp
    /// stays within the nominal luma/chroma ranges, so generated frames
    /// always decode to legal sample values.
    Ramp,
}

/// Configuration for a [`GeneratedSequence`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedConfig {
    pub format: ImageFormat,
    pub frame_duration: FrameTime,
    pub num_frames: usize,
    pub pattern: FillPattern,
}

/// A stream source producing procedural frames.
pub struct GeneratedSequence {
    name: String,
    config: GeneratedConfig,
    cursor: usize,
    state: SourceState,
}

impl GeneratedSequence {
    pub fn new(config: GeneratedConfig) -> Result<Self> {
        if config.num_frames == 0 {
            return Err(FramecastError::Configuration(
                "generated sequence must have at least 1 frame".to_string(),
            ));
        }
        Ok(Self {
            name: format!("Generated ({:?}, {} frames)", config.pattern, config.num_frames),
            config,
            cursor: 0,
            state: SourceState::ReadyToRead,
        })
    }

    fn fill(&self, frame: &mut Frame, index: usize) {
        match self.config.pattern {
            FillPattern::ConstantByte(value) => {
                frame.data_mut().fill(value);
            }
            FillPattern::Ramp => match self.config.format.pixel_format() {
                PixelFormat::Yuv10Bit422 => fill_packed10_ramp(frame, index),
                _ => {
                    for (k, b) in frame.data_mut().iter_mut().enumerate() {
                        *b = (index.wrapping_mul(31).wrapping_add(k)) as u8;
                    }
                }
            },
        }
    }
}

/// Fill a packed 10-bit frame with a deterministic ramp of legal
/// samples: luma sweeps the nominal [64, 940] range, chroma sweeps
/// [64, 960], both keyed on frame index and pixel position.
fn fill_packed10_ramp(frame: &mut Frame, index: usize) {
    let (luma_lo, luma_hi) = packed10::LUMA_RANGE;
    let (chroma_lo, chroma_hi) = packed10::CHROMA_RANGE;
    let luma_span = (luma_hi - luma_lo + 1) as usize;
    let chroma_span = (chroma_hi - chroma_lo + 1) as usize;

    let groups_per_row = packed10::groups_per_row(frame.format().width());
    let height = frame.format().height() as usize;
    let data = frame.data_mut();

    for row in 0..height {
        for g in 0..groups_per_row {
            let pixel0 = (row * groups_per_row + g) * packed10::SAMPLES_PER_GROUP;
            let mut samples = SampleGroup {
                luma: [0; 6],
                cb: [0; 3],
                cr: [0; 3],
            };
            for k in 0..6 {
                let seed = index * 6007 + pixel0 + k;
                samples.luma[k] = luma_lo + (seed % luma_span) as u16;
            }
            for k in 0..3 {
                let seed = index * 6007 + pixel0 + 2 * k;
                samples.cb[k] = chroma_lo + (seed % chroma_span) as u16;
                samples.cr[k] = chroma_lo + ((seed * 7) % chroma_span) as u16;
            }
            let bytes = packed10::encode_group(&samples);
            let offset = (row * groups_per_row + g) * packed10::GROUP_BYTES;
            data[offset..offset + packed10::GROUP_BYTES].copy_from_slice(&bytes);
        }
    }
}

impl StreamSource for GeneratedSequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> SourceState {
        self.state
    }

    fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    fn pop_frame(&mut self, out: &mut Frame) -> Result<bool> {
        if self.state != SourceState::ReadyToRead {
            return Err(FramecastError::StreamExhausted(format!(
                "pop_frame on '{}' in state {}",
                self.name, self.state
            )));
        }

        let time = self.config.frame_duration * self.cursor as i64;
        let mut frame = Frame::new(self.config.format, time);
        self.fill(&mut frame, self.cursor);
        frame.set_marks_end_of_sequence(self.cursor + 1 == self.config.num_frames);

        self.cursor += 1;
        if self.cursor == self.config.num_frames {
            self.state = SourceState::EndOfStream;
        }

        *out = frame;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framecast_core::{Chromaticity, Origin, Transfer};

    fn v210(width: u32, height: u32) -> ImageFormat {
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

    fn ramp_config(num_frames: usize) -> GeneratedConfig {
        GeneratedConfig {
            format: v210(12, 4),
            frame_duration: FrameTime::new(1, 50),
            num_frames,
            pattern: FillPattern::Ramp,
        }
    }

    #[test]
    fn test_two_instances_are_byte_identical() {
        let mut a = GeneratedSequence::new(ramp_config(5)).unwrap();
        let mut b = GeneratedSequence::new(ramp_config(5)).unwrap();
        let mut fa = Frame::placeholder(v210(12, 4));
        let mut fb = Frame::placeholder(v210(12, 4));
        for i in 0..5 {
            a.pop_frame(&mut fa).unwrap();
            b.pop_frame(&mut fb).unwrap();
            assert_eq!(fa.time(), FrameTime::new(1, 50) * i);
            assert_eq!(fa.data(), fb.data());
        }
    }

    #[test]
    fn test_ramp_samples_are_legal() {
        let mut source = GeneratedSequence::new(ramp_config(3)).unwrap();
        let mut out = Frame::placeholder(v210(12, 4));
        while source.state() == SourceState::ReadyToRead {
            source.pop_frame(&mut out).unwrap();
            for chunk in out.data().chunks_exact(packed10::GROUP_BYTES) {
                let group: &[u8; 16] = chunk.try_into().unwrap();
                let samples = packed10::decode_group(group);
                for s in samples
                    .luma
                    .iter()
                    .chain(samples.cb.iter())
                    .chain(samples.cr.iter())
                {
                    assert!(packed10::in_valid_range(*s), "sample {} out of range", s);
                }
            }
        }
    }

    #[test]
    fn test_frames_differ_between_indices() {
        let mut source = GeneratedSequence::new(ramp_config(2)).unwrap();
        let mut first = Frame::placeholder(v210(12, 4));
        let mut second = Frame::placeholder(v210(12, 4));
        source.pop_frame(&mut first).unwrap();
        source.pop_frame(&mut second).unwrap();
        assert_ne!(first.data(), second.data());
    }

    #[test]
    fn test_exhaustion_error() {
        let mut source = GeneratedSequence::new(ramp_config(1)).unwrap();
        let mut out = Frame::placeholder(v210(12, 4));
        source.pop_frame(&mut out).unwrap();
        assert_eq!(source.state(), SourceState::EndOfStream);
        assert!(matches!(
            source.pop_frame(&mut out),
            Err(FramecastError::StreamExhausted(_))
        ));
    }
}
