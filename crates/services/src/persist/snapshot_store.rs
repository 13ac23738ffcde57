use std::sync::Arc;

use quiz_core::Clock;
use quiz_core::model::namespace::{LEGACY_PROGRESS_PREFIX, is_quiz_key};
use quiz_core::model::{
    CompanionItem, CompanionSnapshot, MainList, Namespace, QuestionId, SessionKey,
    SnapshotLocation,
};
use storage::repository::KeyValueStore;
use tracing::{debug, warn};

use crate::error::SnapshotError;

/// Reads and writes the companion and main list records of a session.
///
/// Every access is best-effort: storage failures and corrupt records are
/// logged and degrade to "absent" or "not written", never to an error.
#[derive(Clone)]
pub struct SnapshotStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Clock,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            clock: Clock::default_clock(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    //
    // ─── RAW ACCESS ────────────────────────────────────────────────────────────
    //

    /// Raw value stored under `key`, if readable.
    pub async fn read_raw(&self, key: &str) -> Option<String> {
        match self.kv.get(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "storage read failed");
                None
            }
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.read_raw(key).await.is_some()
    }

    /// Every stored key; empty if storage cannot be enumerated.
    pub async fn keys(&self) -> Vec<String> {
        self.kv.keys().await.unwrap_or_else(|err| {
            warn!(error = %err, "storage scan failed");
            Vec::new()
        })
    }

    /// Stored keys belonging to any quiz layout, current or legacy.
    pub async fn quiz_keys(&self) -> Vec<String> {
        self.keys()
            .await
            .into_iter()
            .filter(|key| is_quiz_key(key))
            .collect()
    }

    /// Remove every key accepted by `matches`. Returns how many were removed.
    pub async fn remove_matching(&self, matches: impl Fn(&str) -> bool) -> usize {
        let mut removed = 0;
        for key in self.keys().await {
            if !matches(&key) {
                continue;
            }
            match self.kv.remove(&key).await {
                Ok(()) => {
                    debug!(key, "removed snapshot key");
                    removed += 1;
                }
                Err(err) => warn!(key, error = %err, "storage remove failed"),
            }
        }
        removed
    }

    //
    // ─── COMPANION SNAPSHOT ────────────────────────────────────────────────────
    //

    /// Merge `items` into the companion record at `location`.
    pub async fn write_companion(&self, location: &SnapshotLocation, items: &[CompanionItem]) {
        if let Err(err) = self.try_write_companion(location, items).await {
            warn!(key = %location.companion_key(), error = %err, "companion write skipped");
        }
    }

    async fn try_write_companion(
        &self,
        location: &SnapshotLocation,
        items: &[CompanionItem],
    ) -> Result<(), SnapshotError> {
        let key = location.companion_key();
        let mut snapshot = self.read(location).await.unwrap_or_default();
        snapshot.merge(items, self.clock.now());
        self.kv.set(&key, &snapshot.to_json()?).await?;
        debug!(key, items = snapshot.items.len(), "companion saved");
        Ok(())
    }

    /// Companion record at `location`; `None` if missing or corrupt.
    pub async fn read(&self, location: &SnapshotLocation) -> Option<CompanionSnapshot> {
        let key = location.companion_key();
        let raw = self.read_raw(&key).await?;
        let parsed = CompanionSnapshot::from_json(&raw);
        if parsed.is_none() {
            debug!(key, "ignoring corrupt companion record");
        }
        parsed
    }

    //
    // ─── MAIN LIST ─────────────────────────────────────────────────────────────
    //

    /// Merge `items` into the main list of a session.
    pub async fn write_main_list(
        &self,
        namespace: Namespace,
        session: &SessionKey,
        items: &[CompanionItem],
    ) {
        if let Err(err) = self.try_write_main_list(namespace, session, items).await {
            warn!(
                key = %namespace.main_key(session),
                error = %err,
                "main list write skipped"
            );
        }
    }

    async fn try_write_main_list(
        &self,
        namespace: Namespace,
        session: &SessionKey,
        items: &[CompanionItem],
    ) -> Result<(), SnapshotError> {
        let key = namespace.main_key(session);
        let mut list = self
            .read_main_list(namespace, session)
            .await
            .unwrap_or_default();
        list.merge(items);
        self.kv.set(&key, &list.to_json()?).await?;
        debug!(key, entries = list.len(), "main list saved");
        Ok(())
    }

    /// Main list of a session; `None` if missing or corrupt.
    pub async fn read_main_list(
        &self,
        namespace: Namespace,
        session: &SessionKey,
    ) -> Option<MainList> {
        let key = namespace.main_key(session);
        let raw = self.read_raw(&key).await?;
        let parsed = MainList::from_json(&raw);
        if parsed.is_none() {
            debug!(key, "ignoring corrupt main list");
        }
        parsed
    }

    /// Write the launcher's bare id list for a fresh session.
    ///
    /// Returns false, leaving storage untouched, if the session already has a
    /// main list or the write fails.
    pub async fn initialize_main_list(
        &self,
        namespace: Namespace,
        session: &SessionKey,
        ids: &[QuestionId],
    ) -> bool {
        let key = namespace.main_key(session);
        if self.contains(&key).await {
            return false;
        }
        let result = match serde_json::to_string(ids) {
            Ok(raw) => self.kv.set(&key, &raw).await.map_err(SnapshotError::from),
            Err(err) => Err(SnapshotError::from(err)),
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(key, error = %err, "main list initialization skipped");
                false
            }
        }
    }

    //
    // ─── CLEARING ──────────────────────────────────────────────────────────────
    //

    /// Remove both records of `session` from both namespaces.
    pub async fn clear(&self, session: &SessionKey) {
        for namespace in Namespace::ALL {
            for key in [namespace.companion_key(session), namespace.main_key(session)] {
                if let Err(err) = self.kv.remove(&key).await {
                    warn!(key, error = %err, "storage remove failed");
                }
            }
        }
    }

    /// Remove records of the retired single-record layout.
    pub async fn purge_legacy(&self) -> usize {
        self.remove_matching(|key| key.starts_with(LEGACY_PROGRESS_PREFIX))
            .await
    }
}
