use std::sync::Arc;

use quiz_core::model::{PersistSettings, PersistSettingsDraft, QuizParams};
use storage::repository::Storage;

use crate::Clock;
use crate::error::AppServicesError;
use crate::persist::{AnswerSurface, PersistenceController, QuizRuntime, SnapshotStore};

/// Storage, settings and clock shared by every page controller.
#[derive(Clone)]
pub struct AppServices {
    storage: Storage,
    settings: PersistSettings,
    clock: Clock,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the settings are invalid or storage
    /// initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        settings: PersistSettingsDraft,
        clock: Clock,
    ) -> Result<Self, AppServicesError> {
        let settings = settings.validate()?;
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self {
            storage,
            settings,
            clock,
        })
    }

    /// Services over a process-local store.
    #[must_use]
    pub fn in_memory(settings: PersistSettings, clock: Clock) -> Self {
        Self {
            storage: Storage::in_memory(),
            settings,
            clock,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &PersistSettings {
        &self.settings
    }

    #[must_use]
    pub fn store(&self) -> SnapshotStore {
        SnapshotStore::new(Arc::clone(&self.storage.kv)).with_clock(self.clock)
    }

    /// Persistence controller for a page opened with `params`.
    #[must_use]
    pub fn controller(
        &self,
        params: QuizParams,
        runtime: Arc<dyn QuizRuntime>,
        surface: Arc<dyn AnswerSurface>,
    ) -> PersistenceController {
        PersistenceController::with_settings(
            params,
            Arc::clone(&self.storage.kv),
            runtime,
            surface,
            self.settings.clone(),
            self.clock,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryPage;
    use quiz_core::model::{QuestionId, SettingsError};
    use quiz_core::time::fixed_clock;

    #[tokio::test]
    async fn rejects_invalid_settings_before_opening_storage() {
        let draft = PersistSettingsDraft {
            poll_interval_ms: Some(0),
            ..PersistSettingsDraft::default()
        };
        let err = AppServices::new_sqlite("sqlite::memory:", draft, fixed_clock())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            AppServicesError::Settings(SettingsError::ZeroPollInterval)
        ));
    }

    #[tokio::test]
    async fn controllers_share_one_store() {
        let services = AppServices::in_memory(PersistSettings::default(), fixed_clock());
        let page = MemoryPage::new();
        page.set_quiz([QuestionId::number(1)]);

        let first = services.controller(
            QuizParams::from_query("key=shared"),
            Arc::new(page.clone()),
            Arc::new(page.clone()),
        );
        assert!(first.capture_now().await.is_saved());

        assert_eq!(services.store().quiz_keys().await.len(), 2);
    }
}
