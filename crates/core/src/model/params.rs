use std::fmt;

use thiserror::Error;
use url::Url;

use crate::model::SessionKey;
use crate::model::namespace::{Namespace, PARAMS_SNAPSHOT_PREFIX};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParamsError {
    #[error("invalid page URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// How the quiz on the current page was launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuizMode {
    /// A quiz over the questions of one theme.
    Theme,
    /// A randomized exam.
    Random,
}

impl QuizMode {
    #[must_use]
    pub fn from_param(raw: &str) -> Option<Self> {
        match raw {
            "theme" => Some(Self::Theme),
            "random" => Some(Self::Random),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Theme => "theme",
            Self::Random => "random",
        }
    }

    /// Storage namespace used by sessions launched in this mode.
    #[must_use]
    pub fn namespace(self) -> Namespace {
        match self {
            Self::Theme => Namespace::Theme,
            Self::Random => Namespace::Random,
        }
    }
}

impl fmt::Display for QuizMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query parameters identifying the quiz shown on a page.
///
/// Values are kept verbatim; empty values count as absent. The raw `mode`
/// is retained because the fallback snapshot key embeds it as written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuizParams {
    pub mode: Option<String>,
    pub from: Option<String>,
    pub theme_id: Option<String>,
    pub count: Option<String>,
    pub key: Option<SessionKey>,
}

impl QuizParams {
    /// Parse the query parameters of a full page URL.
    ///
    /// # Errors
    ///
    /// Returns `ParamsError::InvalidUrl` if `url` cannot be parsed.
    pub fn from_url(url: &str) -> Result<Self, ParamsError> {
        let parsed = Url::parse(url)?;
        Ok(Self::from_pairs(
            parsed.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())),
        ))
    }

    /// Parse a raw query string, with or without the leading `?`.
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self::from_pairs(
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        )
    }

    fn from_pairs(pairs: impl Iterator<Item = (String, String)>) -> Self {
        let mut params = Self::default();
        let mut session = None;
        // First occurrence wins, matching URLSearchParams::get.
        for (name, value) in pairs {
            if value.is_empty() {
                continue;
            }
            match name.as_str() {
                "mode" => {
                    params.mode.get_or_insert(value);
                }
                "from" => {
                    params.from.get_or_insert(value);
                }
                "themeId" => {
                    params.theme_id.get_or_insert(value);
                }
                "count" => {
                    params.count.get_or_insert(value);
                }
                "key" => {
                    if params.key.is_none() {
                        params.key = SessionKey::new(value).ok();
                    }
                }
                "session" => {
                    if session.is_none() {
                        session = SessionKey::new(value).ok();
                    }
                }
                _ => {}
            }
        }
        if params.key.is_none() {
            params.key = session;
        }
        params
    }

    #[must_use]
    pub fn with_key(mut self, key: SessionKey) -> Self {
        self.key = Some(key);
        self
    }

    /// The recognised quiz mode, if any.
    #[must_use]
    pub fn quiz_mode(&self) -> Option<QuizMode> {
        self.mode.as_deref().and_then(QuizMode::from_param)
    }

    /// Namespace implied by the `mode` parameter alone (`theme` or random).
    #[must_use]
    pub fn default_namespace(&self) -> Namespace {
        match self.quiz_mode() {
            Some(QuizMode::Theme) => Namespace::Theme,
            _ => Namespace::Random,
        }
    }

    /// Snapshot key used when no session key can be resolved.
    ///
    /// Field order is fixed; missing fields render as empty strings.
    #[must_use]
    pub fn fallback_key(&self) -> String {
        format!(
            "{PARAMS_SNAPSHOT_PREFIX}mode={}::themeId={}::count={}::from={}",
            self.mode.as_deref().unwrap_or_default(),
            self.theme_id.as_deref().unwrap_or_default(),
            self.count.as_deref().unwrap_or_default(),
            self.from.as_deref().unwrap_or_default(),
        )
    }

    /// Render the parameters back into a query string (without `?`).
    #[must_use]
    pub fn to_query(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        if let Some(mode) = &self.mode {
            serializer.append_pair("mode", mode);
        }
        if let Some(theme_id) = &self.theme_id {
            serializer.append_pair("themeId", theme_id);
        }
        if let Some(count) = &self.count {
            serializer.append_pair("count", count);
        }
        if let Some(from) = &self.from {
            serializer.append_pair("from", from);
        }
        if let Some(key) = &self.key {
            serializer.append_pair("key", key.as_str());
        }
        serializer.finish()
    }
}
