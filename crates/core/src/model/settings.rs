use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_DEBOUNCE_MS: u64 = 200;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
pub const DEFAULT_MAX_RESTORE_ATTEMPTS: u32 = 30;
pub const DEFAULT_SUPPRESS_WINDOW_MS: u64 = 2_000;

/// Timing knobs for capture, restore and clearing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistSettings {
    debounce: Duration,
    poll_interval: Duration,
    max_restore_attempts: u32,
    suppress_window: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct PersistSettingsDraft {
    pub debounce_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub max_restore_attempts: Option<u32>,
    pub suppress_window_ms: Option<u64>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("restore poll interval must be positive")]
    ZeroPollInterval,

    #[error("restore needs at least one attempt")]
    ZeroRestoreAttempts,
}

impl PersistSettingsDraft {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the draft, filling unset knobs with defaults.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the poll interval or attempt cap is zero.
    pub fn validate(self) -> Result<PersistSettings, SettingsError> {
        let poll_interval_ms = self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        if poll_interval_ms == 0 {
            return Err(SettingsError::ZeroPollInterval);
        }
        let max_restore_attempts = self
            .max_restore_attempts
            .unwrap_or(DEFAULT_MAX_RESTORE_ATTEMPTS);
        if max_restore_attempts == 0 {
            return Err(SettingsError::ZeroRestoreAttempts);
        }

        Ok(PersistSettings {
            debounce: Duration::from_millis(self.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)),
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_restore_attempts,
            suppress_window: Duration::from_millis(
                self.suppress_window_ms.unwrap_or(DEFAULT_SUPPRESS_WINDOW_MS),
            ),
        })
    }
}

impl PersistSettings {
    /// Delay between the last qualifying input change and the capture it triggers.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn max_restore_attempts(&self) -> u32 {
        self.max_restore_attempts
    }

    /// How long capture stays disabled after a full clear.
    #[must_use]
    pub fn suppress_window(&self) -> Duration {
        self.suppress_window
    }

    /// Upper bound on how long a restore keeps polling.
    #[must_use]
    pub fn restore_budget(&self) -> Duration {
        self.poll_interval * self.max_restore_attempts
    }
}

impl Default for PersistSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_restore_attempts: DEFAULT_MAX_RESTORE_ATTEMPTS,
            suppress_window: Duration::from_millis(DEFAULT_SUPPRESS_WINDOW_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_draft_matches_defaults() {
        let settings = PersistSettingsDraft::new().validate().unwrap();
        assert_eq!(settings, PersistSettings::default());
        assert_eq!(settings.restore_budget(), Duration::from_secs(6));
    }

    #[test]
    fn rejects_zero_attempts_and_interval() {
        let draft = PersistSettingsDraft {
            max_restore_attempts: Some(0),
            ..PersistSettingsDraft::default()
        };
        assert_eq!(draft.validate(), Err(SettingsError::ZeroRestoreAttempts));

        let draft = PersistSettingsDraft {
            poll_interval_ms: Some(0),
            ..PersistSettingsDraft::default()
        };
        assert_eq!(draft.validate(), Err(SettingsError::ZeroPollInterval));
    }

    #[test]
    fn zero_debounce_is_allowed() {
        let draft = PersistSettingsDraft {
            debounce_ms: Some(0),
            ..PersistSettingsDraft::default()
        };
        assert_eq!(draft.validate().unwrap().debounce(), Duration::ZERO);
    }
}
