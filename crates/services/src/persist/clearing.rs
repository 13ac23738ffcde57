use std::sync::Arc;
use std::time::Duration;

use quiz_core::model::namespace::is_quiz_key;
use tracing::info;

use super::snapshot_store::SnapshotStore;
use super::state::PersistState;

/// Full sweep of every quiz snapshot layout.
#[derive(Clone)]
pub struct SnapshotClearing {
    store: SnapshotStore,
    state: Arc<PersistState>,
    suppress_window: Duration,
}

impl SnapshotClearing {
    #[must_use]
    pub fn new(store: SnapshotStore, state: Arc<PersistState>, suppress_window: Duration) -> Self {
        Self {
            store,
            state,
            suppress_window,
        }
    }

    /// Remove every quiz key, current or legacy, and hold off capture for
    /// the suppression window so a late save cannot recreate them.
    ///
    /// Returns the number of removed keys.
    pub async fn clear_all(&self) -> usize {
        // Suppress first: captures racing the sweep must already see it.
        self.state.suppress_for(self.suppress_window);
        let removed = self.store.remove_matching(is_quiz_key).await;
        info!(
            removed,
            suppress_ms = self.suppress_window.as_millis(),
            "cleared quiz snapshots"
        );
        removed
    }
}
