//! The stream dispatch: context ownership, composition registry and the
//! per-frame pipeline.
//!
//! Per started composition the dispatch runs pull → stage → convert →
//! deliver under the configured flag topology. All inter-stage queues
//! are bounded, so in-flight memory is capped by queue capacity × frame
//! size regardless of sink speed. Stages are rejoined through FIFO
//! channels owned by a single convert thread, so sink delivery order
//! always equals source pop order.

use crate::composition::{
    CompositionId, CompositionOutcome, SinkCallback, StreamComposition,
};
use crate::flags::OptimizationFlags;
use crate::handle::{CompletionCell, CompositionHandle};
use crossbeam_channel::{bounded, Receiver, Sender};
use framecast_core::{Frame, FramecastError, ImageFormat, Result};
use framecast_gpu::{ContextToken, FormatConverter, Renderer};
use framecast_media::{SourceState, StreamSource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Dispatch construction parameters.
///
/// Failure-scope contract: a GPU execution failure during conversion is
/// always fatal to the owning composition. With `multiple_contexts` off
/// the shared context state must be assumed corrupt and the failure
/// poisons the whole dispatch (subsequent starts are refused); with it
/// on, the failure stays scoped to the failing composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub name: String,
    pub input_format: ImageFormat,
    pub output_format: ImageFormat,
    /// Capacity of each bounded inter-stage queue. Must be at least 1.
    pub queue_capacity: usize,
    pub flags: OptimizationFlags,
}

enum Slot {
    Registered(StreamComposition),
    Running(String),
    Finished(String),
}

struct ActivePipeline {
    id: CompositionId,
    stop: Arc<AtomicBool>,
    completion: Arc<CompletionCell>,
    input_thread: Option<JoinHandle<()>>,
    output_thread: Option<JoinHandle<()>>,
    convert_thread: Option<JoinHandle<ContextToken>>,
}

/// Orchestrates compositions over one owned context token.
///
/// One composition runs at a time; the primary token moves into the
/// convert thread for the duration of a run and is recovered when the
/// finished pipeline is joined. Going out of scope tears the pipeline
/// down: workers are signalled, in-flight frames are drained or
/// discarded, and every thread is joined before `drop` returns.
pub struct StreamDispatch {
    config: DispatchConfig,
    token: Option<ContextToken>,
    compositions: HashMap<CompositionId, Slot>,
    active: Option<ActivePipeline>,
    poisoned: Arc<AtomicBool>,
}

impl StreamDispatch {
    /// Create a dispatch owning `token`.
    ///
    /// Fails with a configuration error when the requested flags exceed
    /// the token's probed capabilities, when a frame of either format
    /// would not fit a device buffer, or when the queue capacity is
    /// zero.
    pub fn new(config: DispatchConfig, token: ContextToken) -> Result<Self> {
        if config.queue_capacity == 0 {
            return Err(FramecastError::Configuration(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        let capabilities = token.capabilities();
        config.flags.validate(&capabilities)?;
        if !FormatConverter::supports(
            config.input_format.pixel_format(),
            config.output_format.pixel_format(),
        ) {
            return Err(FramecastError::Configuration(format!(
                "no conversion available from {} to {}",
                config.input_format.pixel_format(),
                config.output_format.pixel_format()
            )));
        }
        for (side, format) in [
            ("input", &config.input_format),
            ("output", &config.output_format),
        ] {
            if format.byte_size() as u64 > capabilities.max_buffer_size {
                return Err(FramecastError::Configuration(format!(
                    "{} format [{}] exceeds the device buffer limit of {} bytes",
                    side, format, capabilities.max_buffer_size
                )));
            }
        }

        info!(
            "dispatch '{}' ready on context '{}' with flags {}",
            config.name,
            token.label(),
            config.flags
        );

        Ok(Self {
            config,
            token: Some(token),
            compositions: HashMap::new(),
            active: None,
            poisoned: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Register a composition. Multiple compositions may be registered
    /// before any starts.
    pub fn create_composition(
        &mut self,
        name: impl Into<String>,
        sources: Vec<Box<dyn StreamSource>>,
        renderer: Box<dyn Renderer>,
        sink: impl FnMut(&Frame) + Send + 'static,
    ) -> Result<CompositionId> {
        if sources.is_empty() {
            return Err(FramecastError::Configuration(
                "composition needs at least one source".to_string(),
            ));
        }
        let name = name.into();
        let id = CompositionId::generate();
        debug!("registering composition '{}' as {}", name, id);
        self.compositions.insert(
            id,
            Slot::Registered(StreamComposition::new(
                name,
                sources,
                renderer,
                Box::new(sink),
            )),
        );
        Ok(id)
    }

    pub fn is_composition(&self, id: CompositionId) -> bool {
        self.compositions.contains_key(&id)
    }

    pub fn is_composition_running(&self, id: CompositionId) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.id == id && !active.completion.is_finished())
    }

    /// Unregister a composition that is not running.
    pub fn remove_composition(&mut self, id: CompositionId) -> Result<()> {
        if self.is_composition_running(id) {
            return Err(FramecastError::Configuration(format!(
                "composition {} is still running",
                id
            )));
        }
        self.reap_finished();
        self.compositions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| {
                FramecastError::Configuration(format!("unknown composition id {}", id))
            })
    }

    /// Start a registered composition. Returns immediately; the
    /// pipeline runs on background threads per the flag topology. The
    /// completion callback fires exactly once — after every pulled
    /// frame has reached the sink — on source exhaustion, stop, or an
    /// unrecoverable pipeline error.
    pub fn start_composition(
        &mut self,
        id: CompositionId,
        on_complete: impl FnOnce(&CompositionOutcome) + Send + 'static,
    ) -> Result<CompositionHandle> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(FramecastError::Configuration(format!(
                "dispatch '{}' was poisoned by an earlier GPU failure",
                self.config.name
            )));
        }
        self.reap_finished();
        if self.active.is_some() {
            return Err(FramecastError::Configuration(
                "another composition is still running on this dispatch".to_string(),
            ));
        }

        let composition = match self.compositions.get_mut(&id) {
            None => {
                return Err(FramecastError::Configuration(format!(
                    "unknown composition id {}",
                    id
                )))
            }
            Some(slot @ Slot::Registered(_)) => {
                let name = match &*slot {
                    Slot::Registered(c) => c.name.clone(),
                    _ => unreachable!(),
                };
                match std::mem::replace(slot, Slot::Running(name)) {
                    Slot::Registered(c) => c,
                    _ => unreachable!(),
                }
            }
            Some(_) => {
                return Err(FramecastError::Configuration(format!(
                    "composition {} was already started",
                    id
                )))
            }
        };

        let token = self.token.take().ok_or_else(|| {
            FramecastError::Internal("context token unavailable".to_string())
        })?;

        let flags = self.config.flags;
        info!(
            "starting composition '{}' ({}) with flags {}",
            composition.name, id, flags
        );

        let StreamComposition {
            name,
            sources,
            renderer,
            sink,
        } = composition;

        let (outcome_tx, outcome_rx) = bounded(1);
        let completion = Arc::new(CompletionCell::new(Box::new(on_complete), outcome_tx));
        let stop = Arc::new(AtomicBool::new(false));

        let puller = FramePuller {
            sources,
            index: 0,
            staging_format: self.config.input_format,
        };

        let (input_end, input_thread) = if flags.async_input {
            let (tx, rx) = bounded::<Result<Frame>>(self.config.queue_capacity);
            let stop_in = Arc::clone(&stop);
            let mut puller = puller;
            let handle = thread::Builder::new()
                .name(format!("fc-input-{}", name))
                .spawn(move || {
                    while let Some(item) = puller.next(&stop_in) {
                        let failed = item.is_err();
                        if tx.send(item).is_err() || failed {
                            break;
                        }
                    }
                })
                .map_err(|e| {
                    FramecastError::Internal(format!("failed to spawn input thread: {}", e))
                })?;
            (InputEnd::Channel(rx), Some(handle))
        } else {
            (InputEnd::Inline(puller), None)
        };

        let (output_end, output_thread) = if flags.async_output {
            let (tx, rx) = bounded::<OutputItem>(self.config.queue_capacity);
            let stop_out = Arc::clone(&stop);
            let completion_out = Arc::clone(&completion);
            let mut sink = sink;
            let handle = thread::Builder::new()
                .name(format!("fc-output-{}", name))
                .spawn(move || {
                    let mut fired = false;
                    while let Ok(item) = rx.recv() {
                        match item {
                            OutputItem::Deliver(frame) => {
                                if !stop_out.load(Ordering::Acquire) {
                                    sink(&frame);
                                }
                            }
                            OutputItem::Done(outcome) => {
                                completion_out.fire(outcome);
                                fired = true;
                            }
                        }
                    }
                    if !fired {
                        completion_out.fire(CompositionOutcome::Failed(
                            "convert stage ended without an outcome".to_string(),
                        ));
                    }
                })
                .map_err(|e| {
                    FramecastError::Internal(format!("failed to spawn output thread: {}", e))
                })?;
            (OutputEnd::Channel(tx), Some(handle))
        } else {
            (OutputEnd::Inline(sink), None)
        };

        let stage = ConvertStage {
            token,
            renderer,
            input: input_end,
            output: output_end,
            output_format: self.config.output_format,
            stop: Arc::clone(&stop),
            poisoned: Arc::clone(&self.poisoned),
            failure_scoped: flags.multiple_contexts,
            completion: Arc::clone(&completion),
        };
        let convert_thread = thread::Builder::new()
            .name(format!("fc-convert-{}", name))
            .spawn(move || stage.run())
            .map_err(|e| {
                FramecastError::Internal(format!("failed to spawn convert thread: {}", e))
            })?;

        self.active = Some(ActivePipeline {
            id,
            stop,
            completion,
            input_thread,
            output_thread,
            convert_thread: Some(convert_thread),
        });

        Ok(CompositionHandle::new(id, outcome_rx))
    }

    /// Cooperatively stop a running composition. Frames already in
    /// flight are discarded; the completion event still fires exactly
    /// once.
    pub fn stop_composition(&mut self, id: CompositionId) -> Result<()> {
        match &self.active {
            Some(active) if active.id == id => {
                debug!("stopping composition {}", id);
                active.stop.store(true, Ordering::Release);
                Ok(())
            }
            _ => Err(FramecastError::Configuration(format!(
                "composition {} is not running",
                id
            ))),
        }
    }

    /// Join a pipeline whose completion has fired, recovering the
    /// context token for the next start.
    fn reap_finished(&mut self) {
        let finished = self
            .active
            .as_ref()
            .is_some_and(|active| active.completion.is_finished());
        if finished {
            if let Some(active) = self.active.take() {
                self.join_pipeline(active);
            }
        }
    }

    fn join_pipeline(&mut self, mut active: ActivePipeline) {
        if let Some(handle) = active.input_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = active.convert_thread.take() {
            match handle.join() {
                Ok(token) => self.token = Some(token),
                Err(_) => {
                    error!("convert thread panicked; poisoning dispatch");
                    self.poisoned.store(true, Ordering::Release);
                }
            }
        }
        if let Some(handle) = active.output_thread.take() {
            let _ = handle.join();
        }
        if let Some(slot) = self.compositions.get_mut(&active.id) {
            if let Slot::Running(name) = slot {
                let name = std::mem::take(name);
                *slot = Slot::Finished(name);
            }
        }
        debug!("composition {} joined", active.id);
    }
}

impl Drop for StreamDispatch {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.stop.store(true, Ordering::Release);
            self.join_pipeline(active);
        }
        debug!("dispatch '{}' torn down", self.config.name);
    }
}

/// Sequentially drains the composition's sources.
struct FramePuller {
    sources: Vec<Box<dyn StreamSource>>,
    index: usize,
    staging_format: ImageFormat,
}

impl FramePuller {
    /// Next frame across the source concatenation, or `None` when every
    /// source is exhausted or a stop was requested. A source answering
    /// "no frame" without an error is treated as drained.
    fn next(&mut self, stop: &AtomicBool) -> Option<Result<Frame>> {
        while self.index < self.sources.len() {
            if stop.load(Ordering::Acquire) {
                return None;
            }
            let source = &mut self.sources[self.index];
            if source.state() == SourceState::EndOfStream {
                self.index += 1;
                continue;
            }
            let mut frame = Frame::placeholder(self.staging_format);
            match source.pop_frame(&mut frame) {
                Ok(true) => return Some(Ok(frame)),
                Ok(false) => self.index += 1,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

enum InputEnd {
    Channel(Receiver<Result<Frame>>),
    Inline(FramePuller),
}

enum OutputItem {
    Deliver(Frame),
    Done(CompositionOutcome),
}

enum OutputEnd {
    Channel(Sender<OutputItem>),
    Inline(SinkCallback),
}

/// The convert stage body. Owns the context token for the duration of
/// the run and returns it when done, so token ownership round-trips
/// through the thread's join handle.
struct ConvertStage {
    token: ContextToken,
    renderer: Box<dyn Renderer>,
    input: InputEnd,
    output: OutputEnd,
    output_format: ImageFormat,
    stop: Arc<AtomicBool>,
    poisoned: Arc<AtomicBool>,
    failure_scoped: bool,
    completion: Arc<CompletionCell>,
}

impl ConvertStage {
    fn run(mut self) -> ContextToken {
        let mut outcome = CompositionOutcome::Finished;

        loop {
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            let item = match &mut self.input {
                InputEnd::Channel(rx) => rx.recv().ok(),
                InputEnd::Inline(puller) => puller.next(&self.stop),
            };
            let Some(item) = item else {
                break; // sources exhausted
            };
            let frame = match item {
                Ok(frame) => frame,
                Err(e) => {
                    error!("source pull failed: {}", e);
                    outcome = CompositionOutcome::Failed(e.to_string());
                    break;
                }
            };

            let mut converted = Frame::new(self.output_format, frame.time());
            converted.set_marks_end_of_sequence(frame.marks_end_of_sequence());
            if let Err(e) = self
                .renderer
                .convert(&mut self.token, &frame, &mut converted)
            {
                error!("renderer '{}' failed: {}", self.renderer.name(), e);
                if matches!(e, FramecastError::GpuExecution(_)) && !self.failure_scoped {
                    self.poisoned.store(true, Ordering::Release);
                }
                outcome = CompositionOutcome::Failed(e.to_string());
                break;
            }

            let delivered = match &mut self.output {
                OutputEnd::Channel(tx) => tx.send(OutputItem::Deliver(converted)).is_ok(),
                OutputEnd::Inline(sink) => {
                    if !self.stop.load(Ordering::Acquire) {
                        sink(&converted);
                    }
                    true
                }
            };
            if !delivered {
                break; // delivery stage is gone; its exit fires completion
            }
        }

        match self.output {
            OutputEnd::Channel(tx) => {
                if tx.send(OutputItem::Done(outcome.clone())).is_err() {
                    self.completion.fire(outcome);
                }
            }
            OutputEnd::Inline(_) => self.completion.fire(outcome),
        }

        self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framecast_core::{Chromaticity, FrameTime, Origin, PixelFormat, Transfer};
    use framecast_gpu::{ConversionMode, ConverterConfig, FormatConverter};
    use framecast_media::{FillPattern, GeneratedConfig, GeneratedSequence};
    use std::sync::atomic::AtomicUsize;

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

    fn dispatch_config(flags: OptimizationFlags) -> DispatchConfig {
        DispatchConfig {
            name: "test".to_string(),
            input_format: v210(12, 2),
            output_format: v210(12, 2),
            queue_capacity: 2,
            flags,
        }
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

    fn source(frames: usize) -> Box<dyn StreamSource> {
        Box::new(
            GeneratedSequence::new(GeneratedConfig {
                format: v210(12, 2),
                frame_duration: FrameTime::new(1, 25),
                num_frames: frames,
                pattern: FillPattern::Ramp,
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let mut config = dispatch_config(OptimizationFlags::NONE);
        config.queue_capacity = 0;
        let err = StreamDispatch::new(config, ContextToken::host("test"));
        assert!(matches!(err, Err(FramecastError::Configuration(_))));
    }

    #[test]
    fn test_unsupported_conversion_pair_rejected() {
        let rgb = |pf| {
            ImageFormat::new(12, 2, Transfer::Srgb, Chromaticity::Srgb, pf, Origin::UpperLeft)
                .unwrap()
        };
        let mut config = dispatch_config(OptimizationFlags::NONE);
        config.input_format = rgb(PixelFormat::Rgb8);
        config.output_format = rgb(PixelFormat::Rgba8);
        let err = StreamDispatch::new(config, ContextToken::host("test"));
        assert!(matches!(err, Err(FramecastError::Configuration(_))));
    }

    #[test]
    fn test_unsupported_flags_rejected() {
        let config = dispatch_config(OptimizationFlags {
            persistent_mapping: true,
            ..OptimizationFlags::NONE
        });
        // Host tokens have no mappable-buffer capability.
        let err = StreamDispatch::new(config, ContextToken::host("test"));
        assert!(matches!(err, Err(FramecastError::Configuration(_))));
    }

    #[test]
    fn test_composition_registry() {
        let mut dispatch = StreamDispatch::new(
            dispatch_config(OptimizationFlags::NONE),
            ContextToken::host("test"),
        )
        .unwrap();
        let id = dispatch
            .create_composition("reg", vec![source(2)], passthrough(), |_| {})
            .unwrap();
        assert!(dispatch.is_composition(id));
        assert!(!dispatch.is_composition_running(id));
        dispatch.remove_composition(id).unwrap();
        assert!(!dispatch.is_composition(id));
    }

    #[test]
    fn test_empty_sources_rejected() {
        let mut dispatch = StreamDispatch::new(
            dispatch_config(OptimizationFlags::NONE),
            ContextToken::host("test"),
        )
        .unwrap();
        let err = dispatch.create_composition("empty", Vec::new(), passthrough(), |_| {});
        assert!(matches!(err, Err(FramecastError::Configuration(_))));
    }

    #[test]
    fn test_sync_pipeline_smoke() {
        let mut dispatch = StreamDispatch::new(
            dispatch_config(OptimizationFlags::NONE),
            ContextToken::host("test"),
        )
        .unwrap();

        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_sink = Arc::clone(&delivered);
        let id = dispatch
            .create_composition(
                "smoke",
                vec![source(5)],
                passthrough(),
                move |_frame| {
                    delivered_sink.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();

        let completions = Arc::new(AtomicUsize::new(0));
        let completions_cb = Arc::clone(&completions);
        let handle = dispatch
            .start_composition(id, move |_| {
                completions_cb.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let outcome = handle.wait().unwrap();
        assert_eq!(outcome, CompositionOutcome::Finished);
        assert_eq!(delivered.load(Ordering::SeqCst), 5);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut dispatch = StreamDispatch::new(
            dispatch_config(OptimizationFlags::NONE),
            ContextToken::host("test"),
        )
        .unwrap();
        let id = dispatch
            .create_composition("once", vec![source(2)], passthrough(), |_| {})
            .unwrap();
        let handle = dispatch.start_composition(id, |_| {}).unwrap();
        handle.wait().unwrap();
        let err = dispatch.start_composition(id, |_| {});
        assert!(matches!(err, Err(FramecastError::Configuration(_))));
    }
}
