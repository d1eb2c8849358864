//! Integration tests for composition dispatch.
//!
//! Exercises ordering, completion, backpressure and failure scoping
//! across the thread topologies, all on the host conversion path.

use crate::support::{init_tracing, v210};
use framecast_core::{Frame, FramecastError, FrameTime, Result};
use framecast_dispatch::{CompositionOutcome, DispatchConfig, OptimizationFlags, StreamDispatch};
use framecast_gpu::{ContextToken, ConversionMode, ConverterConfig, FormatConverter, Renderer};
use framecast_media::{
    FillPattern, GeneratedConfig, GeneratedSequence, SourceState, StreamSource,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn frame_duration() -> FrameTime {
    FrameTime::new(1, 25)
}

fn dispatch_config(flags: OptimizationFlags, queue_capacity: usize) -> DispatchConfig {
    DispatchConfig {
        name: "it".to_string(),
        input_format: v210(12, 2),
        output_format: v210(12, 2),
        queue_capacity,
        flags,
    }
}

fn ramp_source(num_frames: usize) -> Box<dyn StreamSource> {
    Box::new(
        GeneratedSequence::new(GeneratedConfig {
            format: v210(12, 2),
            frame_duration: frame_duration(),
            num_frames,
            pattern: FillPattern::Ramp,
        })
        .unwrap(),
    )
}

fn passthrough() -> Box<dyn Renderer> {
    Box::new(
        FormatConverter::new(
            v210(12, 2),
            v210(12, 2),
            ConverterConfig {
                mode: ConversionMode::HostScalar,
                ..Default::default()
            },
        )
        .unwrap(),
    )
}

/// The eight thread/context topologies a host token can run.
fn host_topologies() -> Vec<OptimizationFlags> {
    (0..8u8)
        .map(|bits| OptimizationFlags {
            async_input: bits & 1 != 0,
            async_output: bits & 2 != 0,
            multiple_contexts: bits & 4 != 0,
            persistent_mapping: false,
        })
        .collect()
}

/// Counts frames the wrapped source hands out, to measure how many are
/// in flight while the sink is stalled.
struct CountingSource {
    inner: Box<dyn StreamSource>,
    popped: Arc<AtomicUsize>,
}

impl StreamSource for CountingSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn state(&self) -> SourceState {
        self.inner.state()
    }

    fn num_frames(&self) -> usize {
        self.inner.num_frames()
    }

    fn pop_frame(&mut self, out: &mut Frame) -> Result<bool> {
        let result = self.inner.pop_frame(out);
        if matches!(result, Ok(true)) {
            self.popped.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}

/// A renderer whose conversion always fails like a lost device.
struct FailingRenderer;

impl Renderer for FailingRenderer {
    fn name(&self) -> &str {
        "FailingRenderer"
    }

    fn convert(
        &mut self,
        _ctx: &mut ContextToken,
        _input: &Frame,
        _output: &mut Frame,
    ) -> Result<()> {
        Err(FramecastError::GpuExecution(
            "injected compute failure".to_string(),
        ))
    }
}

#[test]
fn delivery_stays_in_pop_order_with_one_completion_per_topology() {
    init_tracing();
    const FRAMES: usize = 30;

    for flags in host_topologies() {
        let mut dispatch =
            StreamDispatch::new(dispatch_config(flags, 2), ContextToken::host("primary"))
                .unwrap();

        let times = Arc::new(Mutex::new(Vec::new()));
        let times_sink = Arc::clone(&times);
        let id = dispatch
            .create_composition("order", vec![ramp_source(FRAMES)], passthrough(), move |f| {
                times_sink.lock().unwrap().push(f.time());
            })
            .unwrap();

        let completions = Arc::new(AtomicUsize::new(0));
        let completions_cb = Arc::clone(&completions);
        let handle = dispatch
            .start_composition(id, move |outcome| {
                assert!(!outcome.is_failure());
                completions_cb.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(handle.wait().unwrap(), CompositionOutcome::Finished);
        assert_eq!(
            completions.load(Ordering::SeqCst),
            1,
            "one completion under flags {}",
            flags
        );

        let times = times.lock().unwrap();
        assert_eq!(times.len(), FRAMES, "all frames delivered under {}", flags);
        for (i, time) in times.iter().enumerate() {
            assert_eq!(
                *time,
                frame_duration() * i as i64,
                "delivery order equals pop order under {}",
                flags
            );
        }
    }
}

#[test]
fn persistent_mapping_is_refused_not_downgraded() {
    init_tracing();
    // Host tokens lack the mappable-buffer capability, so every flag
    // combination requesting persistent mapping must fail construction.
    for bits in 0..8u8 {
        let flags = OptimizationFlags {
            async_input: bits & 1 != 0,
            async_output: bits & 2 != 0,
            multiple_contexts: bits & 4 != 0,
            persistent_mapping: true,
        };
        let err = StreamDispatch::new(dispatch_config(flags, 2), ContextToken::host("primary"));
        assert!(
            matches!(err, Err(FramecastError::Configuration(_))),
            "flags {} must be rejected",
            flags
        );
    }
}

#[test]
fn backpressure_caps_in_flight_frames_when_the_sink_stalls() {
    init_tracing();
    const QUEUE_CAPACITY: usize = 2;
    const FRAMES: usize = 24;

    let flags = OptimizationFlags {
        async_input: true,
        async_output: true,
        ..OptimizationFlags::NONE
    };
    let mut dispatch = StreamDispatch::new(
        dispatch_config(flags, QUEUE_CAPACITY),
        ContextToken::host("primary"),
    )
    .unwrap();

    let popped = Arc::new(AtomicUsize::new(0));
    let delivered = Arc::new(AtomicUsize::new(0));
    let (permit_tx, permit_rx) = crossbeam_channel::unbounded::<()>();

    let source = Box::new(CountingSource {
        inner: ramp_source(FRAMES),
        popped: Arc::clone(&popped),
    });
    let delivered_sink = Arc::clone(&delivered);
    let id = dispatch
        .create_composition("stall", vec![source], passthrough(), move |_frame| {
            delivered_sink.fetch_add(1, Ordering::SeqCst);
            let _ = permit_rx.recv();
        })
        .unwrap();
    let handle = dispatch.start_composition(id, |_| {}).unwrap();

    // With the sink stalled on its first frame, the pipeline can hold at
    // most one frame per queue slot plus one in each stage's hands.
    thread::sleep(Duration::from_millis(300));
    let in_flight = popped.load(Ordering::SeqCst);
    assert!(
        in_flight <= 2 * QUEUE_CAPACITY + 3,
        "sink stalled but {} frames were pulled",
        in_flight
    );
    assert!(in_flight < FRAMES);

    for _ in 0..FRAMES {
        permit_tx.send(()).unwrap();
    }
    assert_eq!(handle.wait().unwrap(), CompositionOutcome::Finished);
    assert_eq!(delivered.load(Ordering::SeqCst), FRAMES);
}

#[test]
fn stop_halts_delivery_and_still_completes_once() {
    init_tracing();
    const FRAMES: usize = 2000;

    let flags = OptimizationFlags {
        async_input: true,
        async_output: true,
        ..OptimizationFlags::NONE
    };
    let mut dispatch =
        StreamDispatch::new(dispatch_config(flags, 2), ContextToken::host("primary")).unwrap();

    let delivered = Arc::new(AtomicUsize::new(0));
    let delivered_sink = Arc::clone(&delivered);
    let id = dispatch
        .create_composition("stopme", vec![ramp_source(FRAMES)], passthrough(), move |_| {
            delivered_sink.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
        })
        .unwrap();

    let completions = Arc::new(AtomicUsize::new(0));
    let completions_cb = Arc::clone(&completions);
    let handle = dispatch
        .start_composition(id, move |_| {
            completions_cb.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    thread::sleep(Duration::from_millis(30));
    dispatch.stop_composition(id).unwrap();

    assert_eq!(handle.wait().unwrap(), CompositionOutcome::Finished);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert!(delivered.load(Ordering::SeqCst) < FRAMES);
}

#[test]
fn gpu_failure_poisons_a_single_context_dispatch() {
    init_tracing();
    let mut dispatch = StreamDispatch::new(
        dispatch_config(OptimizationFlags::NONE, 2),
        ContextToken::host("primary"),
    )
    .unwrap();

    let id = dispatch
        .create_composition("fail", vec![ramp_source(4)], Box::new(FailingRenderer), |_| {})
        .unwrap();
    let handle = dispatch
        .start_composition(id, |outcome| assert!(outcome.is_failure()))
        .unwrap();
    assert!(handle.wait().unwrap().is_failure());

    // The shared context must be assumed corrupt: further starts refused.
    let next = dispatch
        .create_composition("after", vec![ramp_source(2)], passthrough(), |_| {})
        .unwrap();
    let err = dispatch.start_composition(next, |_| {});
    assert!(matches!(err, Err(FramecastError::Configuration(_))));
}

#[test]
fn gpu_failure_is_scoped_under_multiple_contexts() {
    init_tracing();
    let flags = OptimizationFlags {
        multiple_contexts: true,
        ..OptimizationFlags::NONE
    };
    let mut dispatch =
        StreamDispatch::new(dispatch_config(flags, 2), ContextToken::host("primary")).unwrap();

    let id = dispatch
        .create_composition("fail", vec![ramp_source(4)], Box::new(FailingRenderer), |_| {})
        .unwrap();
    let handle = dispatch
        .start_composition(id, |outcome| assert!(outcome.is_failure()))
        .unwrap();
    assert!(handle.wait().unwrap().is_failure());

    // The failing composition is finished-with-error; the dispatch is
    // still healthy and runs the next composition.
    let delivered = Arc::new(AtomicUsize::new(0));
    let delivered_sink = Arc::clone(&delivered);
    let next = dispatch
        .create_composition("after", vec![ramp_source(3)], passthrough(), move |_| {
            delivered_sink.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let handle = dispatch.start_composition(next, |_| {}).unwrap();
    assert_eq!(handle.wait().unwrap(), CompositionOutcome::Finished);
    assert_eq!(delivered.load(Ordering::SeqCst), 3);
}

#[test]
fn teardown_mid_run_fires_completion_exactly_once() {
    init_tracing();
    let completions = Arc::new(AtomicUsize::new(0));
    {
        let flags = OptimizationFlags {
            async_input: true,
            async_output: true,
            ..OptimizationFlags::NONE
        };
        let mut dispatch =
            StreamDispatch::new(dispatch_config(flags, 2), ContextToken::host("primary"))
                .unwrap();
        let id = dispatch
            .create_composition("dropme", vec![ramp_source(2000)], passthrough(), |_| {
                thread::sleep(Duration::from_millis(1));
            })
            .unwrap();
        let completions_cb = Arc::clone(&completions);
        let _handle = dispatch
            .start_composition(id, move |_| {
                completions_cb.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        thread::sleep(Duration::from_millis(30));
        // Dispatch goes out of scope here: workers are signalled and
        // joined before drop returns.
    }
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[test]
fn multiple_sources_are_drained_sequentially() {
    init_tracing();
    let mut dispatch = StreamDispatch::new(
        dispatch_config(OptimizationFlags::NONE, 2),
        ContextToken::host("primary"),
    )
    .unwrap();

    let delivered = Arc::new(AtomicUsize::new(0));
    let delivered_sink = Arc::clone(&delivered);
    let id = dispatch
        .create_composition(
            "concat",
            vec![ramp_source(4), ramp_source(3)],
            passthrough(),
            move |_| {
                delivered_sink.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
    let handle = dispatch.start_composition(id, |_| {}).unwrap();
    assert_eq!(handle.wait().unwrap(), CompositionOutcome::Finished);
    assert_eq!(delivered.load(Ordering::SeqCst), 7);
}
