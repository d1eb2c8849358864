//! In-memory prefetched frame sequences.

use crate::source::{SourceState, StreamSource};
use framecast_core::{Frame, FramecastError, FrameTime, ImageFormat, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Configuration for a [`PrefetchedSequence`].
///
/// Two sources built from identical configurations yield identical frame
/// counts, identical timestamps and byte-identical buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// Directory holding the raw frame files.
    pub directory: PathBuf,
    /// Filename suffix filter, e.g. `".v210"`. Matching files are taken
    /// in lexicographic order. An empty suffix matches every file.
    pub file_suffix: String,
    /// Format of every frame in the sequence. Each file must be exactly
    /// `format.byte_size()` bytes.
    pub format: ImageFormat,
    /// Duration of one frame.
    pub frame_duration: FrameTime,
    /// How many times the sequence is played. Timestamps continue
    /// monotonically across loop boundaries: frame `j` of loop `i`
    /// carries index `i * n + j`.
    pub loop_count: usize,
}

/// A stream source that preloads an entire raw frame sequence into
/// memory, for pipelines that must not be bounded by disk latency.
pub struct PrefetchedSequence {
    name: String,
    frames: Vec<Frame>,
    frame_duration: FrameTime,
    loop_count: usize,
    cursor: usize,
    state: SourceState,
}

impl PrefetchedSequence {
    /// Scan the configured directory, validate and load every matching
    /// frame file. Fails if no file matches, or if any file's size
    /// disagrees with the configured format.
    pub fn new(config: &SequenceConfig) -> Result<Self> {
        if config.loop_count == 0 {
            return Err(FramecastError::Configuration(
                "loop count must be at least 1".to_string(),
            ));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&config.directory)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(&config.file_suffix))
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(FramecastError::Configuration(format!(
                "no files matching '*{}' in {}",
                config.file_suffix,
                config.directory.display()
            )));
        }

        let name = format!(
            "Prefetch ('{}/*{}')",
            config.directory.display(),
            config.file_suffix
        );

        info!(
            "prefetching {} frames from {} ({} loops)",
            paths.len(),
            config.directory.display(),
            config.loop_count
        );

        let mut frames = Vec::with_capacity(paths.len());
        for (index, path) in paths.iter().enumerate() {
            let time = config.frame_duration * index as i64;
            frames.push(Frame::read_raw(config.format, time, path)?);
        }

        let total_bytes: usize = frames.iter().map(Frame::byte_size).sum();
        info!(
            "prefetched {:.1} MB, first '{}', last '{}'",
            total_bytes as f64 / 1e6,
            paths.first().map(|p| p.display().to_string()).unwrap_or_default(),
            paths.last().map(|p| p.display().to_string()).unwrap_or_default()
        );

        Ok(Self {
            name,
            frames,
            frame_duration: config.frame_duration,
            loop_count: config.loop_count,
            cursor: 0,
            state: SourceState::ReadyToRead,
        })
    }
}

impl StreamSource for PrefetchedSequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> SourceState {
        self.state
    }

    fn num_frames(&self) -> usize {
        self.frames.len() * self.loop_count
    }

    fn pop_frame(&mut self, out: &mut Frame) -> Result<bool> {
        if self.state != SourceState::ReadyToRead {
            return Err(FramecastError::StreamExhausted(format!(
                "pop_frame on '{}' in state {}",
                self.name, self.state
            )));
        }

        let total = self.num_frames();
        let mut frame = self.frames[self.cursor % self.frames.len()].create_copy();
        frame.set_time(self.frame_duration * self.cursor as i64);
        frame.set_marks_end_of_sequence(self.cursor + 1 == total);

        self.cursor += 1;
        if self.cursor == total {
            self.state = SourceState::EndOfStream;
        }

        *out = frame;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framecast_core::{Chromaticity, Origin, PixelFormat, Transfer};

    fn tiny_v210() -> ImageFormat {
        ImageFormat::new(
            6,
            2,
            Transfer::Bt709,
            Chromaticity::Bt709,
            PixelFormat::Yuv10Bit422,
            Origin::UpperLeft,
        )
        .unwrap()
    }

    fn write_sequence(dir: &std::path::Path, count: usize) {
        fs::create_dir_all(dir).unwrap();
        let format = tiny_v210();
        for i in 0..count {
            let mut frame = Frame::new(format, FrameTime::ZERO);
            for (k, b) in frame.data_mut().iter_mut().enumerate() {
                *b = (i * 31 + k) as u8;
            }
            frame
                .write_raw(dir.join(format!("frame_{:04}.v210", i)))
                .unwrap();
        }
    }

    fn temp_sequence_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("framecast-seq-{}-{}", tag, std::process::id()))
    }

    fn config(dir: PathBuf, loop_count: usize) -> SequenceConfig {
        SequenceConfig {
            directory: dir,
            file_suffix: ".v210".to_string(),
            format: tiny_v210(),
            frame_duration: FrameTime::new(1, 25),
            loop_count,
        }
    }

    #[test]
    fn test_deterministic_reconstruction() {
        let dir = temp_sequence_dir("det");
        write_sequence(&dir, 4);

        let cfg = config(dir.clone(), 1);
        let mut a = PrefetchedSequence::new(&cfg).unwrap();
        let mut b = PrefetchedSequence::new(&cfg).unwrap();
        assert_eq!(a.num_frames(), b.num_frames());

        let mut fa = Frame::placeholder(tiny_v210());
        let mut fb = Frame::placeholder(tiny_v210());
        for _ in 0..a.num_frames() {
            assert!(a.pop_frame(&mut fa).unwrap());
            assert!(b.pop_frame(&mut fb).unwrap());
            assert_eq!(fa.time(), fb.time());
            assert_eq!(fa.data(), fb.data());
        }

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_loop_times_continue_monotonically() {
        let dir = temp_sequence_dir("loop");
        write_sequence(&dir, 3);

        let cfg = config(dir.clone(), 2);
        let mut source = PrefetchedSequence::new(&cfg).unwrap();
        assert_eq!(source.num_frames(), 6);

        let mut out = Frame::placeholder(tiny_v210());
        let mut prev = None;
        for i in 0..6 {
            source.pop_frame(&mut out).unwrap();
            assert_eq!(out.time(), FrameTime::new(1, 25) * i);
            if let Some(p) = prev {
                assert!(out.time() > p);
            }
            prev = Some(out.time());
            assert_eq!(out.marks_end_of_sequence(), i == 5);
        }
        assert_eq!(source.state(), SourceState::EndOfStream);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_pop_past_end_is_an_error() {
        let dir = temp_sequence_dir("end");
        write_sequence(&dir, 2);

        let cfg = config(dir.clone(), 1);
        let mut source = PrefetchedSequence::new(&cfg).unwrap();
        let mut out = Frame::placeholder(tiny_v210());
        source.pop_frame(&mut out).unwrap();
        source.pop_frame(&mut out).unwrap();
        let err = source.pop_frame(&mut out);
        assert!(matches!(err, Err(FramecastError::StreamExhausted(_))));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let dir = temp_sequence_dir("size");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("bad.v210"), [0u8; 7]).unwrap();

        let cfg = config(dir.clone(), 1);
        let err = PrefetchedSequence::new(&cfg);
        assert!(matches!(err, Err(FramecastError::DataValidation(_))));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_directory_rejected() {
        let dir = temp_sequence_dir("empty");
        fs::create_dir_all(&dir).unwrap();

        let cfg = config(dir.clone(), 1);
        let err = PrefetchedSequence::new(&cfg);
        assert!(matches!(err, Err(FramecastError::Configuration(_))));

        fs::remove_dir_all(&dir).unwrap();
    }
}
