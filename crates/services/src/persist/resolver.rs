use std::collections::BTreeSet;
use std::sync::Arc;

use quiz_core::model::{Namespace, QuizParams, SessionKey, SnapshotLocation};
use tracing::debug;

use super::host::QuizRuntime;
use super::snapshot_store::SnapshotStore;

/// Which quiz session the page shows and where its records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    location: SnapshotLocation,
}

impl Resolution {
    #[must_use]
    pub fn location(&self) -> &SnapshotLocation {
        &self.location
    }

    #[must_use]
    pub fn into_location(self) -> SnapshotLocation {
        self.location
    }

    #[must_use]
    pub fn session_key(&self) -> Option<&SessionKey> {
        match &self.location {
            SnapshotLocation::Session { key, .. } => Some(key),
            SnapshotLocation::Params(_) => None,
        }
    }

    #[must_use]
    pub fn namespace(&self) -> Option<Namespace> {
        match &self.location {
            SnapshotLocation::Session { namespace, .. } => Some(*namespace),
            SnapshotLocation::Params(_) => None,
        }
    }

    /// Parameter-based key, set only when no session key could be found.
    #[must_use]
    pub fn fallback_param_key(&self) -> Option<&str> {
        match &self.location {
            SnapshotLocation::Session { .. } => None,
            SnapshotLocation::Params(key) => Some(key),
        }
    }
}

/// Derives the session identity of the current page.
///
/// Resolution order:
/// 1. the `key` (or legacy `session`) URL parameter, then a key held by the
///    quiz runtime;
/// 2. a storage scan, accepted only when exactly one distinct session key
///    exists across both namespaces;
/// 3. the parameter-based fallback key.
#[derive(Clone)]
pub struct SessionResolver {
    params: QuizParams,
    runtime: Arc<dyn QuizRuntime>,
    store: SnapshotStore,
}

impl SessionResolver {
    #[must_use]
    pub fn new(params: QuizParams, runtime: Arc<dyn QuizRuntime>, store: SnapshotStore) -> Self {
        Self {
            params,
            runtime,
            store,
        }
    }

    #[must_use]
    pub fn params(&self) -> &QuizParams {
        &self.params
    }

    pub async fn resolve(&self) -> Resolution {
        let key = match self.explicit_session_key() {
            Some(key) => Some(key),
            None => self.discover_from_storage().await,
        };

        let location = match key {
            Some(key) => SnapshotLocation::Session {
                namespace: self.namespace_for(&key).await,
                key,
            },
            None => SnapshotLocation::Params(self.params.fallback_key()),
        };
        debug!(location = %location, "resolved quiz session");
        Resolution { location }
    }

    /// Session key named by the URL or the runtime, without scanning storage.
    #[must_use]
    pub fn explicit_session_key(&self) -> Option<SessionKey> {
        self.params
            .key
            .clone()
            .or_else(|| self.runtime.session_key())
    }

    /// The single session key present in storage, if unambiguous.
    pub async fn discover_from_storage(&self) -> Option<SessionKey> {
        let candidates: BTreeSet<SessionKey> = self
            .store
            .keys()
            .await
            .iter()
            .filter_map(|key| {
                Namespace::ALL
                    .iter()
                    .find_map(|namespace| namespace.session_from_main_key(key))
            })
            .collect();

        if candidates.len() > 1 {
            debug!(candidates = candidates.len(), "ambiguous stored sessions");
            return None;
        }
        candidates.into_iter().next()
    }

    /// Namespace holding the records of `key`.
    ///
    /// An explicit `mode` parameter decides on its own so that theme and
    /// random sessions sharing a literal key stay isolated. Otherwise storage
    /// is probed: random companion, theme companion, random main list, theme
    /// main list. Nothing found means random.
    pub async fn namespace_for(&self, key: &SessionKey) -> Namespace {
        if let Some(mode) = self.params.quiz_mode() {
            return mode.namespace();
        }

        let probes = Namespace::ALL
            .iter()
            .map(|namespace| (*namespace, namespace.companion_key(key)))
            .chain(
                Namespace::ALL
                    .iter()
                    .map(|namespace| (*namespace, namespace.main_key(key))),
            );
        for (namespace, storage_key) in probes {
            if self.store.contains(&storage_key).await {
                return namespace;
            }
        }
        self.params.default_namespace()
    }
}
