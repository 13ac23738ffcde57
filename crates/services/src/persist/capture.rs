use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use quiz_core::model::{CompanionItem, QuestionId, SnapshotLocation};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::host::{AnswerSurface, QuizRuntime};
use super::resolver::{Resolution, SessionResolver};
use super::snapshot_store::SnapshotStore;
use super::state::{DeferredAnswer, PersistState};

/// Result of a capture attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Records were written (best-effort) for `location`.
    Saved {
        location: SnapshotLocation,
        items: Vec<CompanionItem>,
    },
    /// Capture is disabled after a full clear.
    Suppressed,
    /// Held back until the running restore releases the inputs, then
    /// written by the restore itself.
    Deferred,
    /// The quiz runtime has no current quiz.
    NoQuiz,
}

impl CaptureOutcome {
    #[must_use]
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }
}

/// Reads the page's answer inputs and persists them.
#[derive(Clone)]
pub struct CaptureEngine {
    store: SnapshotStore,
    resolver: SessionResolver,
    runtime: Arc<dyn QuizRuntime>,
    surface: Arc<dyn AnswerSurface>,
    state: Arc<PersistState>,
}

impl CaptureEngine {
    #[must_use]
    pub fn new(
        store: SnapshotStore,
        resolver: SessionResolver,
        runtime: Arc<dyn QuizRuntime>,
        surface: Arc<dyn AnswerSurface>,
        state: Arc<PersistState>,
    ) -> Self {
        Self {
            store,
            resolver,
            runtime,
            surface,
            state,
        }
    }

    /// Snapshot every question of the current quiz.
    ///
    /// While a restore polls, questions it has not applied yet are left out
    /// so their saved selections survive. Before the restore knows which
    /// questions it owns, the capture is deferred to the end of the restore.
    pub async fn capture_now(&self) -> CaptureOutcome {
        if self.state.is_suppressed() {
            debug!("capture suppressed");
            return CaptureOutcome::Suppressed;
        }
        let Some(owned) = self.restore_owned() else {
            debug!("capture deferred: restore is locating its records");
            self.state.defer_capture();
            return CaptureOutcome::Deferred;
        };
        self.capture_except(&owned).await
    }

    async fn capture_except(&self, owned: &BTreeSet<String>) -> CaptureOutcome {
        let Some(quiz) = self.runtime.current_quiz() else {
            debug!("capture skipped: no current quiz");
            return CaptureOutcome::NoQuiz;
        };

        let items: Vec<CompanionItem> = quiz
            .into_iter()
            .enumerate()
            .filter(|(_, question)| !owned.contains(&question.id.as_key()))
            .map(|(index, question)| {
                let selected = self.surface.checked_values(&question.id.input_name());
                CompanionItem::new(question.id, index, selected)
            })
            .collect();
        if !owned.is_empty() {
            debug!(kept = owned.len(), "capture left restoring questions alone");
        }

        let resolution = self.resolver.resolve().await;
        self.persist(&resolution, &items).await;
        CaptureOutcome::Saved {
            location: resolution.into_location(),
            items,
        }
    }

    /// Save one question's selection immediately.
    ///
    /// Without an explicit `index` an already saved item keeps its index and
    /// a new one is appended at the end of the companion record. An answer
    /// for a question the running restore still owns is queued and saved
    /// once the restore finishes.
    pub async fn save_answer(
        &self,
        question_id: QuestionId,
        selected: Vec<String>,
        index: Option<usize>,
    ) -> CaptureOutcome {
        if self.state.is_suppressed() {
            debug!("save_answer suppressed");
            return CaptureOutcome::Suppressed;
        }
        let free = self
            .restore_owned()
            .is_some_and(|owned| !owned.contains(&question_id.as_key()));
        if !free {
            debug!(question = %question_id, "save_answer deferred: restore in flight");
            self.state.defer_answer(DeferredAnswer {
                question_id,
                selected,
                index,
            });
            return CaptureOutcome::Deferred;
        }

        let resolution = self.resolver.resolve().await;
        let index = match index {
            Some(index) => index,
            None => {
                let companion = self.store.read(resolution.location()).await;
                companion.map_or(0, |snapshot| {
                    snapshot
                        .item(&question_id)
                        .map_or(snapshot.items.len(), |item| item.index)
                })
            }
        };

        let items = vec![CompanionItem::new(question_id, index, selected)];
        self.persist(&resolution, &items).await;
        CaptureOutcome::Saved {
            location: resolution.into_location(),
            items,
        }
    }

    /// Write what was held back while a restore ran. Call after the restore
    /// slot is released; `unresolved` questions keep their saved selections.
    pub(crate) async fn flush_deferred(&self, unresolved: &BTreeSet<String>) {
        if self.state.take_deferred_capture() {
            if self.state.is_suppressed() {
                debug!("deferred capture dropped: suppressed");
            } else {
                let outcome = self.capture_except(unresolved).await;
                debug!(saved = outcome.is_saved(), "deferred capture written");
            }
        }
        for answer in self.state.take_deferred_answers() {
            self.save_answer(answer.question_id, answer.selected, answer.index)
                .await;
        }
    }

    /// Question ids a restore still owns, empty when none runs. `None` while
    /// a claimed restore has not published them yet.
    fn restore_owned(&self) -> Option<BTreeSet<String>> {
        if !self.state.restore_in_flight() {
            return Some(BTreeSet::new());
        }
        self.state.restore_pending()
    }

    // The companion write completes before the main list is touched.
    async fn persist(&self, resolution: &Resolution, items: &[CompanionItem]) {
        self.store.write_companion(resolution.location(), items).await;
        if let (Some(namespace), Some(session)) = (resolution.namespace(), resolution.session_key())
        {
            self.store.write_main_list(namespace, session, items).await;
        }
    }
}

/// Trailing-edge debounce: only the last scheduled job runs, `wait` after it
/// was scheduled.
pub(crate) struct Debouncer {
    wait: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub(crate) fn new(wait: Duration) -> Self {
        Self {
            wait,
            pending: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace any waiting job with `job`.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn schedule<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let wait = self.wait;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            // Detached so a later reschedule cannot interrupt a running write.
            if let Err(err) = tokio::spawn(job).await {
                warn!(error = %err, "debounced job failed");
            }
        });
        if let Some(previous) = self.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Drop the waiting job, if any. Returns true if one was still waiting.
    pub(crate) fn cancel(&self) -> bool {
        match self.lock().take() {
            Some(handle) => {
                let waiting = !handle.is_finished();
                handle.abort();
                waiting
            }
            None => false,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(handle) = self.lock().take() {
            handle.abort();
        }
    }
}
