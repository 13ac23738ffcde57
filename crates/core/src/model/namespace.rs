//! Storage key layout for persisted quiz progress.
//!
//! | Key | Contents |
//! |---|---|
//! | `quiz_random_v2::<key>` | main list, random exams |
//! | `quiz_random_v2::<key>::state` | companion snapshot, random exams |
//! | `quiz_theme_v1::<key>` | main list, themed quizzes |
//! | `quiz_theme_v1::<key>::state` | companion snapshot, themed quizzes |
//! | `quiz_snapshot::mode=..::themeId=..::count=..::from=..` | companion snapshot without a session key |

use std::fmt;

use crate::model::SessionKey;

pub const RANDOM_PREFIX: &str = "quiz_random_v2::";
pub const THEME_PREFIX: &str = "quiz_theme_v1::";
pub const COMPANION_SUFFIX: &str = "::state";
pub const PARAMS_SNAPSHOT_PREFIX: &str = "quiz_snapshot::";

/// Prefixes of retired layouts. They are purged, never read or written.
pub const LEGACY_RANDOM_PREFIX: &str = "quiz_random_v1::";
pub const LEGACY_PROGRESS_PREFIX: &str = "quiz_progress_v1::";

/// Every prefix swept when the user leaves the quiz.
pub const SWEPT_PREFIXES: [&str; 5] = [
    PARAMS_SNAPSHOT_PREFIX,
    THEME_PREFIX,
    RANDOM_PREFIX,
    LEGACY_RANDOM_PREFIX,
    LEGACY_PROGRESS_PREFIX,
];

/// One of the two independent storage namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Random,
    Theme,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Random, Namespace::Theme];

    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Random => RANDOM_PREFIX,
            Self::Theme => THEME_PREFIX,
        }
    }

    #[must_use]
    pub fn main_key(self, session: &SessionKey) -> String {
        format!("{}{}", self.prefix(), session.as_str())
    }

    #[must_use]
    pub fn companion_key(self, session: &SessionKey) -> String {
        format!("{}{}{COMPANION_SUFFIX}", self.prefix(), session.as_str())
    }

    /// Extract the session key from a main-list storage key.
    ///
    /// Companion keys and keys outside this namespace yield `None`.
    #[must_use]
    pub fn session_from_main_key(self, storage_key: &str) -> Option<SessionKey> {
        if storage_key.ends_with(COMPANION_SUFFIX) {
            return None;
        }
        storage_key
            .strip_prefix(self.prefix())
            .and_then(|rest| SessionKey::new(rest).ok())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => f.write_str("random"),
            Self::Theme => f.write_str("theme"),
        }
    }
}

/// Where a quiz's snapshot lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotLocation {
    /// Companion and main list records for a session key.
    Session {
        namespace: Namespace,
        key: SessionKey,
    },
    /// Companion record only, keyed by the page parameters.
    Params(String),
}

impl SnapshotLocation {
    #[must_use]
    pub fn companion_key(&self) -> String {
        match self {
            Self::Session { namespace, key } => namespace.companion_key(key),
            Self::Params(key) => key.clone(),
        }
    }

    /// Main list key; parameter-keyed snapshots have no main list.
    #[must_use]
    pub fn main_key(&self) -> Option<String> {
        match self {
            Self::Session { namespace, key } => Some(namespace.main_key(key)),
            Self::Params(_) => None,
        }
    }
}

impl fmt::Display for SnapshotLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.companion_key())
    }
}

/// True when `storage_key` belongs to any quiz layout, current or legacy.
#[must_use]
pub fn is_quiz_key(storage_key: &str) -> bool {
    SWEPT_PREFIXES
        .iter()
        .any(|prefix| storage_key.starts_with(prefix))
}
