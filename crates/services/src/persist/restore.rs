use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use quiz_core::model::{CompanionItem, PersistSettings};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::capture::CaptureEngine;
use super::host::{AnswerSurface, QuizQuestion, QuizRuntime};
use super::resolver::{Resolution, SessionResolver};
use super::snapshot_store::SnapshotStore;
use super::state::{PersistState, RestorePhase};

/// Record a restore read its selections from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSource {
    Companion,
    MainList,
}

/// Summary of a finished restore run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Polling ticks performed, at most the configured cap.
    pub attempts: u32,
    /// Questions that had at least one saved value re-applied.
    pub applied: usize,
    /// Question ids still waiting for inputs when polling stopped.
    pub unresolved: Vec<String>,
    /// Questions handed to the runtime's single-question submit.
    pub submitted: usize,
    pub cancelled: bool,
    pub source: RestoreSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Neither record of the session holds any item.
    NothingToRestore,
    /// The quiz runtime has not created its question list yet.
    QuizUnavailable,
    /// Another restore holds the slot.
    AlreadyRunning,
    Completed(RestoreReport),
}

impl RestoreOutcome {
    /// Whether a restore is running or ran for this page.
    #[must_use]
    pub fn started(&self) -> bool {
        matches!(self, Self::AlreadyRunning | Self::Completed(_))
    }

    #[must_use]
    pub fn report(&self) -> Option<&RestoreReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Re-applies saved selections to answer inputs that may render late.
#[derive(Clone)]
pub struct RestoreEngine {
    store: SnapshotStore,
    resolver: SessionResolver,
    runtime: Arc<dyn QuizRuntime>,
    surface: Arc<dyn AnswerSurface>,
    state: Arc<PersistState>,
    settings: PersistSettings,
    /// Writes captures and answers held back while this engine ran.
    capture: CaptureEngine,
}

impl RestoreEngine {
    #[must_use]
    pub fn new(
        store: SnapshotStore,
        resolver: SessionResolver,
        runtime: Arc<dyn QuizRuntime>,
        surface: Arc<dyn AnswerSurface>,
        state: Arc<PersistState>,
        settings: PersistSettings,
        capture: CaptureEngine,
    ) -> Self {
        Self {
            store,
            resolver,
            runtime,
            surface,
            state,
            settings,
            capture,
        }
    }

    /// Run one restore to completion.
    ///
    /// Polls every `poll_interval` for at most `max_restore_attempts` ticks.
    /// Cancelling `cancel` stops polling and skips submission. Captures
    /// deferred during the run are written after the slot is released.
    pub async fn run(&self, cancel: CancellationToken) -> RestoreOutcome {
        let Some(guard) = self.state.try_begin_restore() else {
            info!("restore already in progress");
            return RestoreOutcome::AlreadyRunning;
        };
        let outcome = self.run_claimed(&cancel).await;
        drop(guard);

        let unresolved: BTreeSet<String> = outcome
            .report()
            .map(|report| report.unresolved.iter().cloned().collect())
            .unwrap_or_default();
        self.capture.flush_deferred(&unresolved).await;
        outcome
    }

    async fn run_claimed(&self, cancel: &CancellationToken) -> RestoreOutcome {
        self.state.set_phase(RestorePhase::Locating);
        let resolution = self.resolver.resolve().await;
        let Some((source, items)) = self.load(&resolution).await else {
            debug!(location = %resolution.location(), "no snapshot found");
            self.state.set_phase(RestorePhase::Done);
            return RestoreOutcome::NothingToRestore;
        };
        let Some(quiz) = self.runtime.current_quiz() else {
            self.state.set_phase(RestorePhase::Idle);
            return RestoreOutcome::QuizUnavailable;
        };

        info!(
            location = %resolution.location(),
            items = items.len(),
            ?source,
            budget = ?self.settings.restore_budget(),
            "restoring saved answers"
        );
        self.state.set_phase(RestorePhase::Polling);

        // Later items win when ids repeat.
        let saved: BTreeMap<String, Vec<String>> = items
            .into_iter()
            .map(|item| (item.question_id.as_key(), item.selected))
            .collect();
        let mut pending: BTreeSet<String> = saved.keys().cloned().collect();
        self.state.publish_pending(&pending);
        let mut applied = 0;
        let mut attempts = 0;
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            attempts += 1;
            applied += self.apply_pending(&saved, &mut pending);
            self.state.publish_pending(&pending);
            debug!(attempt = attempts, pending = pending.len(), "restore tick");
            if pending.is_empty() || attempts >= self.settings.max_restore_attempts() {
                break;
            }
            tokio::select! {
                () = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                () = tokio::time::sleep(self.settings.poll_interval()) => {}
            }
        }

        let submitted = if cancelled {
            0
        } else {
            self.state.set_phase(RestorePhase::Applying);
            self.submit_answered(&quiz)
        };
        self.state.set_phase(RestorePhase::Done);

        let report = RestoreReport {
            attempts,
            applied,
            unresolved: pending.into_iter().collect(),
            submitted,
            cancelled,
            source,
        };
        info!(
            attempts = report.attempts,
            applied = report.applied,
            unresolved = report.unresolved.len(),
            submitted = report.submitted,
            cancelled = report.cancelled,
            "restore finished"
        );
        RestoreOutcome::Completed(report)
    }

    /// Retry `run` until a restore starts, waiting `poll_interval` between
    /// tries, at most `max_restore_attempts` times. Returns the last outcome.
    pub async fn run_until_started(&self, cancel: CancellationToken) -> RestoreOutcome {
        let mut tries = 0;
        loop {
            tries += 1;
            let outcome = self.run(cancel.clone()).await;
            if outcome.started() || tries >= self.settings.max_restore_attempts() {
                return outcome;
            }
            tokio::select! {
                () = cancel.cancelled() => return outcome,
                () = tokio::time::sleep(self.settings.poll_interval()) => {}
            }
        }
    }

    /// Run on a background task.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(&self) -> RestoreTask {
        let cancel = CancellationToken::new();
        let engine = self.clone();
        let token = cancel.clone();
        RestoreTask::new(tokio::spawn(async move { engine.run(token).await }), cancel)
    }

    /// `run_until_started` on a background task.
    #[must_use]
    pub fn spawn_until_started(&self) -> RestoreTask {
        let cancel = CancellationToken::new();
        let engine = self.clone();
        let token = cancel.clone();
        RestoreTask::new(
            tokio::spawn(async move { engine.run_until_started(token).await }),
            cancel,
        )
    }

    /// Saved selections keyed by question id string.
    pub async fn snapshot_map(&self) -> BTreeMap<String, Vec<String>> {
        let resolution = self.resolver.resolve().await;
        if let Some(companion) = self.store.read(resolution.location()).await {
            return companion.selection_map();
        }
        match (resolution.namespace(), resolution.session_key()) {
            (Some(namespace), Some(session)) => self
                .store
                .read_main_list(namespace, session)
                .await
                .map(|list| list.selection_map())
                .unwrap_or_default(),
            _ => BTreeMap::new(),
        }
    }

    async fn load(&self, resolution: &Resolution) -> Option<(RestoreSource, Vec<CompanionItem>)> {
        let companion = self.store.read(resolution.location()).await;
        if let Some(companion) = companion.filter(|snapshot| !snapshot.is_empty()) {
            return Some((RestoreSource::Companion, companion.items));
        }
        let namespace = resolution.namespace()?;
        let session = resolution.session_key()?;
        let list = self.store.read_main_list(namespace, session).await?;
        if list.is_empty() {
            return None;
        }
        Some((RestoreSource::MainList, list.to_companion_items()))
    }

    /// One polling tick. Returns how many questions had a value applied.
    fn apply_pending(
        &self,
        saved: &BTreeMap<String, Vec<String>>,
        pending: &mut BTreeSet<String>,
    ) -> usize {
        let mut applied = 0;
        pending.retain(|question| {
            let name = format!("q{question}");
            let inputs = self.surface.inputs(&name);
            if inputs.is_empty() {
                return true;
            }
            for position in 0..inputs.len() {
                self.surface.set_input(&name, position, false, false);
            }

            let values = saved.get(question).map(Vec::as_slice).unwrap_or_default();
            if values.is_empty() {
                return false;
            }
            let mut matched = false;
            for (position, input) in inputs.iter().enumerate() {
                if values.contains(&input.value) {
                    self.surface.set_input(&name, position, true, true);
                    debug!(question = %question, value = %input.value, "applied selection");
                    matched = true;
                }
            }
            if matched {
                applied += 1;
            }
            !matched
        });
        applied
    }

    fn submit_answered(&self, quiz: &[QuizQuestion]) -> usize {
        let mut submitted = 0;
        for (index, question) in quiz.iter().enumerate() {
            let answered = self
                .surface
                .inputs(&question.id.input_name())
                .iter()
                .any(|input| input.checked);
            if answered {
                self.runtime.submit_single_question(index, &question.id);
                submitted += 1;
            }
        }
        self.runtime.update_progress();
        submitted
    }
}

/// Handle to a restore running in the background.
pub struct RestoreTask {
    handle: JoinHandle<RestoreOutcome>,
    cancel: CancellationToken,
}

impl RestoreTask {
    fn new(handle: JoinHandle<RestoreOutcome>, cancel: CancellationToken) -> Self {
        Self { handle, cancel }
    }

    /// Stop polling. Saved selections already applied stay on the page.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to end.
    ///
    /// # Errors
    ///
    /// Returns the `JoinError` if the restore task panicked or was aborted.
    pub async fn join(self) -> Result<RestoreOutcome, JoinError> {
        self.handle.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::memory_page::MemoryPage;
    use quiz_core::model::{Namespace, QuestionId, QuizParams, SessionKey, SnapshotLocation};
    use std::time::Duration;
    use storage::repository::{InMemoryStore, KeyValueStore};

    struct Fixture {
        kv: InMemoryStore,
        page: MemoryPage,
        state: Arc<PersistState>,
        engine: RestoreEngine,
    }

    fn fixture(query: &str) -> Fixture {
        let kv = InMemoryStore::new();
        let page = MemoryPage::new();
        let store = SnapshotStore::new(Arc::new(kv.clone()));
        let runtime: Arc<dyn QuizRuntime> = Arc::new(page.clone());
        let resolver = SessionResolver::new(
            QuizParams::from_query(query),
            Arc::clone(&runtime),
            store.clone(),
        );
        let state = Arc::new(PersistState::new());
        let surface: Arc<dyn AnswerSurface> = Arc::new(page.clone());
        let capture = CaptureEngine::new(
            store.clone(),
            resolver.clone(),
            Arc::clone(&runtime),
            Arc::clone(&surface),
            Arc::clone(&state),
        );
        let engine = RestoreEngine::new(
            store,
            resolver,
            runtime,
            surface,
            Arc::clone(&state),
            PersistSettings::default(),
            capture,
        );
        Fixture {
            kv,
            page,
            state,
            engine,
        }
    }

    fn session_location(key: &str) -> SnapshotLocation {
        SnapshotLocation::Session {
            namespace: Namespace::Random,
            key: SessionKey::new(key).unwrap(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn applies_companion_selection_and_submits() {
        let fx = fixture("mode=random&key=abc");
        let q1 = QuestionId::number(1);
        let q2 = QuestionId::number(2);
        SnapshotStore::new(Arc::new(fx.kv.clone()))
            .write_companion(
                &session_location("abc"),
                &[
                    CompanionItem::new(q1.clone(), 0, vec!["B".into()]),
                    CompanionItem::new(q2.clone(), 1, Vec::new()),
                ],
            )
            .await;
        fx.page.set_quiz([q1.clone(), q2.clone()]);
        fx.page.render_quiz(&["A", "B"]);
        fx.page.check(&q2, "A");

        let outcome = fx.engine.run(CancellationToken::new()).await;
        let report = outcome.report().unwrap();
        assert_eq!(report.attempts, 1);
        assert_eq!(report.applied, 1);
        assert!(report.unresolved.is_empty());
        assert_eq!(report.submitted, 1);
        assert_eq!(report.source, RestoreSource::Companion);

        let states = fx.page.input_states(&q1);
        assert!(!states[0].checked);
        assert!(states[1].checked && states[1].disabled);
        // Empty selection clears the stale tick.
        assert!(fx.page.input_states(&q2).iter().all(|input| !input.checked));
        assert_eq!(fx.page.submissions(), vec![(0, q1)]);
        assert_eq!(fx.page.progress_refreshes(), 1);
        assert_eq!(fx.state.phase(), RestorePhase::Done);
        assert!(!fx.state.restore_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_main_list() {
        let fx = fixture("mode=random&key=abc");
        fx.kv
            .set(
                "quiz_random_v2::abc",
                r#"[{"id":3,"answered":true,"selected":["C"]},4]"#,
            )
            .await
            .unwrap();
        fx.page.set_quiz([QuestionId::number(3), QuestionId::number(4)]);
        fx.page.render_quiz(&["C", "D"]);

        let outcome = fx.engine.run(CancellationToken::new()).await;
        let report = outcome.report().unwrap();
        assert_eq!(report.source, RestoreSource::MainList);
        assert_eq!(report.applied, 1);
        assert_eq!(fx.page.submissions(), vec![(0, QuestionId::number(3))]);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_attempt_cap() {
        let fx = fixture("mode=random&key=abc");
        SnapshotStore::new(Arc::new(fx.kv.clone()))
            .write_companion(
                &session_location("abc"),
                &[CompanionItem::new(QuestionId::number(9), 0, vec!["A".into()])],
            )
            .await;
        fx.page.set_quiz([QuestionId::number(9)]);

        let started = tokio::time::Instant::now();
        let outcome = fx.engine.run(CancellationToken::new()).await;
        let report = outcome.report().unwrap();
        assert_eq!(report.attempts, 30);
        assert_eq!(report.unresolved, vec!["9".to_string()]);
        assert_eq!(report.submitted, 0);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(29 * 200));
        assert!(elapsed < Duration::from_millis(30 * 200));
        assert_eq!(fx.page.progress_refreshes(), 1);
    }

    #[tokio::test]
    async fn reports_missing_snapshot_and_quiz() {
        let fx = fixture("mode=random&key=abc");
        assert_eq!(
            fx.engine.run(CancellationToken::new()).await,
            RestoreOutcome::NothingToRestore
        );

        SnapshotStore::new(Arc::new(fx.kv.clone()))
            .write_companion(
                &session_location("abc"),
                &[CompanionItem::new(QuestionId::number(1), 0, vec!["A".into()])],
            )
            .await;
        assert_eq!(
            fx.engine.run(CancellationToken::new()).await,
            RestoreOutcome::QuizUnavailable
        );
        assert_eq!(fx.state.phase(), RestorePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_skips_submission() {
        let fx = fixture("mode=random&key=abc");
        SnapshotStore::new(Arc::new(fx.kv.clone()))
            .write_companion(
                &session_location("abc"),
                &[CompanionItem::new(QuestionId::number(1), 0, vec!["A".into()])],
            )
            .await;
        fx.page.set_quiz([QuestionId::number(1)]);

        let task = fx.engine.spawn();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(fx.state.restore_in_flight());
        assert_eq!(
            fx.engine.run(CancellationToken::new()).await,
            RestoreOutcome::AlreadyRunning
        );

        task.cancel();
        let outcome = task.join().await.unwrap();
        let report = outcome.report().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.attempts, 3);
        assert_eq!(fx.page.progress_refreshes(), 0);
        assert!(!fx.state.restore_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_retry_waits_for_late_quiz() {
        let fx = fixture("mode=random&key=abc");
        SnapshotStore::new(Arc::new(fx.kv.clone()))
            .write_companion(
                &session_location("abc"),
                &[CompanionItem::new(QuestionId::number(1), 0, vec!["A".into()])],
            )
            .await;

        let page = fx.page.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            page.set_quiz([QuestionId::number(1)]);
            page.render_quiz(&["A"]);
        });

        let outcome = fx.engine.run_until_started(CancellationToken::new()).await;
        assert_eq!(outcome.report().unwrap().submitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_capture_runs_after_the_slot_is_released() {
        let fx = fixture("mode=random&key=abc");
        let store = SnapshotStore::new(Arc::new(fx.kv.clone()));
        let (q1, q2, q9) = (
            QuestionId::number(1),
            QuestionId::number(2),
            QuestionId::number(9),
        );
        store
            .write_companion(
                &session_location("abc"),
                &[
                    CompanionItem::new(q1.clone(), 0, vec!["A".into()]),
                    CompanionItem::new(q9.clone(), 2, vec!["B".into()]),
                ],
            )
            .await;
        fx.page.set_quiz([q1.clone(), q2.clone(), q9.clone()]);
        fx.page.render_question(&q1, &["A", "B"]);
        fx.page.render_question(&q2, &["A", "B"]);
        fx.page.check(&q2, "B");
        // A capture that arrived before the restore published its questions.
        fx.state.defer_capture();

        let outcome = fx.engine.run(CancellationToken::new()).await;
        assert_eq!(outcome.report().unwrap().unresolved, vec!["9".to_string()]);

        let snapshot = store.read(&session_location("abc")).await.unwrap();
        assert_eq!(snapshot.item(&q1).unwrap().selected, vec!["A".to_string()]);
        assert_eq!(snapshot.item(&q2).unwrap().selected, vec!["B".to_string()]);
        assert_eq!(snapshot.item(&q9).unwrap().selected, vec!["B".to_string()]);
        assert_eq!(fx.state.restore_pending(), None);
    }

    #[tokio::test]
    async fn snapshot_map_prefers_companion() {
        let fx = fixture("mode=random&key=abc");
        fx.kv
            .set("quiz_random_v2::abc", r#"[{"id":1,"selected":["Z"]}]"#)
            .await
            .unwrap();
        assert_eq!(fx.engine.snapshot_map().await["1"], vec!["Z".to_string()]);

        fx.kv
            .set(
                "quiz_random_v2::abc::state",
                r#"{"items":[{"questionId":1,"index":0,"selected":["A"]}]}"#,
            )
            .await
            .unwrap();
        assert_eq!(fx.engine.snapshot_map().await["1"], vec!["A".to_string()]);
    }
}
