//! Completion signalling.
//!
//! A started composition resolves exactly once, through two coupled
//! surfaces: the caller's completion callback and a waitable handle.
//! Both are driven by one internal cell so neither can fire twice.

use crate::composition::{CompletionCallback, CompositionId, CompositionOutcome};
use crossbeam_channel::{Receiver, Sender};
use framecast_core::{FramecastError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Waitable handle to a started composition.
pub struct CompositionHandle {
    id: CompositionId,
    receiver: Receiver<CompositionOutcome>,
}

impl CompositionHandle {
    pub(crate) fn new(id: CompositionId, receiver: Receiver<CompositionOutcome>) -> Self {
        Self { id, receiver }
    }

    pub fn id(&self) -> CompositionId {
        self.id
    }

    /// Block until the composition finishes and return its outcome.
    pub fn wait(&self) -> Result<CompositionOutcome> {
        self.receiver.recv().map_err(|_| {
            FramecastError::Internal(
                "completion channel closed without an outcome".to_string(),
            )
        })
    }

    /// The outcome, if the composition already finished.
    pub fn try_outcome(&self) -> Option<CompositionOutcome> {
        self.receiver.try_recv().ok()
    }
}

/// Exactly-once completion cell shared by the pipeline stages. The
/// first `fire` wins; later calls are no-ops, so defensive firing from
/// more than one stage never produces a second completion event.
pub(crate) struct CompletionCell {
    parts: Mutex<Option<(CompletionCallback, Sender<CompositionOutcome>)>>,
    finished: AtomicBool,
}

impl CompletionCell {
    pub(crate) fn new(callback: CompletionCallback, sender: Sender<CompositionOutcome>) -> Self {
        Self {
            parts: Mutex::new(Some((callback, sender))),
            finished: AtomicBool::new(false),
        }
    }

    pub(crate) fn fire(&self, outcome: CompositionOutcome) {
        if let Some((callback, sender)) = self.parts.lock().take() {
            callback(&outcome);
            let _ = sender.send(outcome);
            self.finished.store(true, Ordering::Release);
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_cell_fires_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_cb = Arc::clone(&calls);
        let (tx, rx) = crossbeam_channel::bounded(1);
        let cell = CompletionCell::new(
            Box::new(move |_| {
                calls_in_cb.fetch_add(1, Ordering::SeqCst);
            }),
            tx,
        );

        cell.fire(CompositionOutcome::Finished);
        cell.fire(CompositionOutcome::Failed("late".to_string()));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().unwrap(), CompositionOutcome::Finished);
        assert!(rx.try_recv().is_err());
        assert!(cell.is_finished());
    }
}
