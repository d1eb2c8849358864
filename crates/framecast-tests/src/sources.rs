//! Integration tests for the stream source contract.
//!
//! Every source implementation must honour the same state machine,
//! exhaustion behavior and determinism guarantees, so the assertions
//! here run against boxed trait objects.

use crate::support::{init_tracing, temp_dir, v210};
use framecast_core::{Frame, FramecastError, FrameTime, ImageFormat};
use framecast_media::{
    FillPattern, GeneratedConfig, GeneratedSequence, PrefetchedSequence, SequenceConfig,
    SourceState, StreamSource,
};
use std::fs;
use std::path::Path;

fn write_raw_sequence(dir: &Path, format: ImageFormat, count: usize) {
    fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        let mut frame = Frame::new(format, FrameTime::ZERO);
        for (k, b) in frame.data_mut().iter_mut().enumerate() {
            *b = (i * 131 + k * 7) as u8;
        }
        frame
            .write_raw(dir.join(format!("seq_{:04}.v210", i)))
            .unwrap();
    }
}

/// Pops a source dry and checks the shared contract: ReadyToRead until
/// the last frame, strictly increasing times from index 0, the
/// end-of-sequence marker on the final frame only, and a
/// StreamExhausted error past the end.
fn assert_source_contract(mut source: Box<dyn StreamSource>, format: ImageFormat) {
    let total = source.num_frames();
    assert!(total > 0);

    let mut out = Frame::placeholder(format);
    let mut previous: Option<FrameTime> = None;
    for i in 0..total {
        assert_eq!(source.state(), SourceState::ReadyToRead);
        assert!(source.pop_frame(&mut out).unwrap());
        assert!(out.is_valid());
        if let Some(prev) = previous {
            assert!(out.time() > prev, "time must strictly increase");
        }
        previous = Some(out.time());
        assert_eq!(out.marks_end_of_sequence(), i + 1 == total);
    }

    assert_eq!(source.state(), SourceState::EndOfStream);
    assert!(matches!(
        source.pop_frame(&mut out),
        Err(FramecastError::StreamExhausted(_))
    ));
}

#[test]
fn generated_source_honours_the_contract() {
    init_tracing();
    let format = v210(12, 4);
    let source = GeneratedSequence::new(GeneratedConfig {
        format,
        frame_duration: FrameTime::new(1, 50),
        num_frames: 7,
        pattern: FillPattern::Ramp,
    })
    .unwrap();
    assert_source_contract(Box::new(source), format);
}

#[test]
fn prefetched_source_honours_the_contract_including_loops() {
    init_tracing();
    let format = v210(6, 2);
    let dir = temp_dir("contract");
    write_raw_sequence(&dir, format, 3);

    let source = PrefetchedSequence::new(&SequenceConfig {
        directory: dir.clone(),
        file_suffix: ".v210".to_string(),
        format,
        frame_duration: FrameTime::new(1, 25),
        loop_count: 3,
    })
    .unwrap();
    assert_eq!(source.num_frames(), 9);
    assert_source_contract(Box::new(source), format);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn identically_configured_sources_are_byte_identical() {
    init_tracing();
    let format = v210(6, 2);
    let dir = temp_dir("determinism");
    write_raw_sequence(&dir, format, 5);

    let config = SequenceConfig {
        directory: dir.clone(),
        file_suffix: ".v210".to_string(),
        format,
        frame_duration: FrameTime::new(1001, 30000),
        loop_count: 2,
    };
    let mut first = PrefetchedSequence::new(&config).unwrap();
    let mut second = PrefetchedSequence::new(&config).unwrap();
    assert_eq!(first.num_frames(), second.num_frames());

    let mut a = Frame::placeholder(format);
    let mut b = Frame::placeholder(format);
    for i in 0..first.num_frames() {
        first.pop_frame(&mut a).unwrap();
        second.pop_frame(&mut b).unwrap();
        assert_eq!(a.time(), FrameTime::new(1001, 30000) * i as i64);
        assert_eq!(a.time(), b.time());
        assert_eq!(a.data(), b.data());
    }

    fs::remove_dir_all(&dir).unwrap();
}
