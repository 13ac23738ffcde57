use std::collections::BTreeMap;
use std::sync::Arc;

use quiz_core::Clock;
use quiz_core::model::{PersistSettings, QuestionId, QuizParams};
use storage::repository::KeyValueStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::capture::{CaptureEngine, CaptureOutcome, Debouncer};
use super::clearing::SnapshotClearing;
use super::host::{AnswerSurface, PageEvent, QuizRuntime, is_answer_input};
use super::resolver::{Resolution, SessionResolver};
use super::restore::{RestoreEngine, RestoreOutcome, RestoreTask};
use super::snapshot_store::SnapshotStore;
use super::state::{PersistState, RestorePhase};

/// Quiz progress persistence for one page.
///
/// Owns the shared flags (suppression window, restore slot) and wires the
/// resolver, capture, restore and clearing engines to the same store and
/// host page. Nothing here returns an error: persistence failures are logged
/// and the quiz keeps working.
pub struct PersistenceController {
    store: SnapshotStore,
    resolver: SessionResolver,
    capture: CaptureEngine,
    restore: RestoreEngine,
    clearing: SnapshotClearing,
    runtime: Arc<dyn QuizRuntime>,
    state: Arc<PersistState>,
    debouncer: Debouncer,
}

impl PersistenceController {
    #[must_use]
    pub fn new(
        params: QuizParams,
        kv: Arc<dyn KeyValueStore>,
        runtime: Arc<dyn QuizRuntime>,
        surface: Arc<dyn AnswerSurface>,
    ) -> Self {
        Self::with_settings(
            params,
            kv,
            runtime,
            surface,
            PersistSettings::default(),
            Clock::default_clock(),
        )
    }

    #[must_use]
    pub fn with_settings(
        params: QuizParams,
        kv: Arc<dyn KeyValueStore>,
        runtime: Arc<dyn QuizRuntime>,
        surface: Arc<dyn AnswerSurface>,
        settings: PersistSettings,
        clock: Clock,
    ) -> Self {
        let store = SnapshotStore::new(kv).with_clock(clock);
        let state = Arc::new(PersistState::new());
        let resolver = SessionResolver::new(params, Arc::clone(&runtime), store.clone());
        let capture = CaptureEngine::new(
            store.clone(),
            resolver.clone(),
            Arc::clone(&runtime),
            Arc::clone(&surface),
            Arc::clone(&state),
        );
        let restore = RestoreEngine::new(
            store.clone(),
            resolver.clone(),
            Arc::clone(&runtime),
            surface,
            Arc::clone(&state),
            settings.clone(),
            capture.clone(),
        );
        let clearing =
            SnapshotClearing::new(store.clone(), Arc::clone(&state), settings.suppress_window());
        Self {
            store,
            resolver,
            capture,
            restore,
            clearing,
            runtime,
            state,
            debouncer: Debouncer::new(settings.debounce()),
        }
    }

    //
    // ─── SESSION ───────────────────────────────────────────────────────────────
    //

    pub async fn resolve(&self) -> Resolution {
        self.resolver.resolve().await
    }

    #[must_use]
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    //
    // ─── CAPTURE ───────────────────────────────────────────────────────────────
    //

    pub async fn capture_now(&self) -> CaptureOutcome {
        self.capture.capture_now().await
    }

    pub async fn save_answer(
        &self,
        question_id: QuestionId,
        selected: Vec<String>,
        index: Option<usize>,
    ) -> CaptureOutcome {
        self.capture.save_answer(question_id, selected, index).await
    }

    /// Submit one question through the runtime, then capture.
    pub async fn submit_single_question(
        &self,
        index: usize,
        question_id: &QuestionId,
    ) -> CaptureOutcome {
        self.runtime.submit_single_question(index, question_id);
        self.capture.capture_now().await
    }

    /// React to a host page event.
    ///
    /// Answer input changes schedule a debounced capture and return `None`.
    /// Page hide and unload events capture immediately, replacing any
    /// pending debounced capture. Must be called from within a Tokio runtime.
    pub async fn handle_event(&self, event: PageEvent) -> Option<CaptureOutcome> {
        match event {
            PageEvent::InputChanged { name } => {
                if is_answer_input(&name) {
                    let capture = self.capture.clone();
                    self.debouncer.schedule(async move {
                        capture.capture_now().await;
                    });
                }
                None
            }
            PageEvent::VisibilityHidden | PageEvent::PageHide | PageEvent::BeforeUnload => {
                self.debouncer.cancel();
                Some(self.capture.capture_now().await)
            }
            PageEvent::VisibilityVisible => None,
        }
    }

    /// Whether a debounced capture is still waiting to fire.
    #[must_use]
    pub fn capture_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    //
    // ─── RESTORE ───────────────────────────────────────────────────────────────
    //

    pub async fn restore(&self) -> RestoreOutcome {
        self.restore.run(CancellationToken::new()).await
    }

    #[must_use]
    pub fn spawn_restore(&self) -> RestoreTask {
        self.restore.spawn()
    }

    /// Page-load routine: drop retired records, then retry restore until the
    /// quiz runtime is ready.
    pub async fn bootstrap(&self) -> RestoreOutcome {
        self.purge_legacy().await;
        self.restore
            .run_until_started(CancellationToken::new())
            .await
    }

    /// `bootstrap` on a background task.
    pub async fn spawn_bootstrap(&self) -> RestoreTask {
        self.purge_legacy().await;
        self.restore.spawn_until_started()
    }

    pub async fn snapshot_map(&self) -> BTreeMap<String, Vec<String>> {
        self.restore.snapshot_map().await
    }

    #[must_use]
    pub fn restore_phase(&self) -> RestorePhase {
        self.state.phase()
    }

    async fn purge_legacy(&self) {
        let purged = self.store.purge_legacy().await;
        if purged > 0 {
            info!(purged, "removed legacy progress records");
        }
    }

    //
    // ─── CLEARING ──────────────────────────────────────────────────────────────
    //

    /// Remove every quiz snapshot and suppress capture for a short window.
    pub async fn clear_all(&self) -> usize {
        if self.debouncer.cancel() {
            debug!("pending capture dropped by clear");
        }
        self.clearing.clear_all().await
    }

    /// Remove the records of the resolved session, if there is one.
    ///
    /// Returns false when only the parameter fallback key applies.
    pub async fn clear_session(&self) -> bool {
        let resolution = self.resolver.resolve().await;
        match resolution.session_key() {
            Some(session) => {
                self.store.clear(session).await;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        self.state.is_suppressed()
    }
}
