use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use quiz_core::model::QuestionId;
use tokio::time::Instant;

/// Progress of a restore run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestorePhase {
    #[default]
    Idle,
    /// Resolving the session and reading its records.
    Locating,
    /// Waiting for inputs to render and applying saved selections.
    Polling,
    /// Submitting restored answers and refreshing progress.
    Applying,
    Done,
}

/// Mutable flags shared by the engines of one controller.
#[derive(Debug, Default)]
pub struct PersistState {
    suppressed_until: Mutex<Option<Instant>>,
    restore_in_flight: AtomicBool,
    phase: Mutex<RestorePhase>,
    /// Question ids the polling restore has not applied yet.
    restore_pending: Mutex<Option<BTreeSet<String>>>,
    capture_deferred: AtomicBool,
    deferred_answers: Mutex<Vec<DeferredAnswer>>,
}

/// A `save_answer` call held back until the restore releases its question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeferredAnswer {
    pub question_id: QuestionId,
    pub selected: Vec<String>,
    pub index: Option<usize>,
}

impl PersistState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable capture until `window` has elapsed.
    pub fn suppress_for(&self, window: Duration) {
        let until = Instant::now() + window;
        *self
            .suppressed_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(until);
    }

    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        self.suppressed_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|until| Instant::now() < until)
    }

    #[must_use]
    pub fn restore_in_flight(&self) -> bool {
        self.restore_in_flight.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn phase(&self) -> RestorePhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_phase(&self, phase: RestorePhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// Questions a running restore still owns.
    ///
    /// `None` while no restore is polling, including the window in which a
    /// claimed restore is still reading its records.
    #[must_use]
    pub fn restore_pending(&self) -> Option<BTreeSet<String>> {
        self.restore_pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn publish_pending(&self, pending: &BTreeSet<String>) {
        *self
            .restore_pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(pending.clone());
    }

    pub(crate) fn defer_capture(&self) {
        self.capture_deferred.store(true, Ordering::Release);
    }

    pub(crate) fn take_deferred_capture(&self) -> bool {
        self.capture_deferred.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn defer_answer(&self, answer: DeferredAnswer) {
        self.deferred_answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(answer);
    }

    pub(crate) fn take_deferred_answers(&self) -> Vec<DeferredAnswer> {
        std::mem::take(
            &mut *self
                .deferred_answers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Claim the restore slot. `None` if a restore is already running.
    pub(crate) fn try_begin_restore(self: &Arc<Self>) -> Option<RestoreGuard> {
        self.restore_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RestoreGuard {
                state: Arc::clone(self),
            })
    }
}

/// Releases the restore slot when dropped.
pub(crate) struct RestoreGuard {
    state: Arc<PersistState>,
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        *self
            .state
            .restore_pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.state.restore_in_flight.store(false, Ordering::Release);
    }
}
