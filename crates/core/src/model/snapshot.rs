use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::model::QuestionId;

//
// ─── COMPANION SNAPSHOT ────────────────────────────────────────────────────────
//

/// Saved selection for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanionItem {
    pub question_id: QuestionId,
    pub index: usize,
    pub selected: Vec<String>,
}

impl CompanionItem {
    #[must_use]
    pub fn new(question_id: QuestionId, index: usize, selected: Vec<String>) -> Self {
        Self {
            question_id,
            index,
            selected,
        }
    }

    #[must_use]
    pub fn is_answered(&self) -> bool {
        !self.selected.is_empty()
    }

    fn from_json_value(value: &Value, fallback_index: usize) -> Option<Self> {
        let object = value.as_object()?;
        let question_id = object.get("questionId").and_then(QuestionId::from_json_value)?;
        let index = object
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|raw| usize::try_from(raw).ok())
            .unwrap_or(fallback_index);
        Some(Self {
            question_id,
            index,
            selected: selected_from_json(object.get("selected")),
        })
    }
}

/// Compact per-session record of answered selections.
///
/// Parsing is lenient: a malformed item is dropped on its own and the rest
/// of the record survives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompanionSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub items: Vec<CompanionItem>,
}

impl CompanionSnapshot {
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, items: Vec<CompanionItem>) -> Self {
        Self {
            timestamp: Some(timestamp),
            items,
        }
    }

    /// Parse a persisted companion record. Returns `None` for corrupt JSON or
    /// a value that is not an object.
    #[must_use]
    pub fn from_json(raw: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(raw).ok()?;
        let object = value.as_object()?;
        let timestamp = object
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|at| at.with_timezone(&Utc));
        let items = object
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .enumerate()
                    .filter_map(|(pos, item)| CompanionItem::from_json_value(item, pos))
                    .collect()
            })
            .unwrap_or_default();
        Some(Self { timestamp, items })
    }

    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn item(&self, question_id: &QuestionId) -> Option<&CompanionItem> {
        self.items.iter().find(|item| &item.question_id == question_id)
    }

    /// Merge `items` by question id: matches are replaced in place, the rest
    /// appended. Entries absent from `items` are kept.
    pub fn merge(&mut self, items: &[CompanionItem], now: DateTime<Utc>) {
        for incoming in items {
            match self
                .items
                .iter_mut()
                .find(|existing| existing.question_id == incoming.question_id)
            {
                Some(existing) => *existing = incoming.clone(),
                None => self.items.push(incoming.clone()),
            }
        }
        self.timestamp = Some(now);
    }

    /// Selected values keyed by the string form of the question id.
    #[must_use]
    pub fn selection_map(&self) -> BTreeMap<String, Vec<String>> {
        selection_map(&self.items)
    }
}

//
// ─── MAIN LIST ─────────────────────────────────────────────────────────────────
//

/// One question of the main list record.
///
/// Fields other than `id`, `answered` and `selected` are preserved as-is so
/// a rewrite never loses data added by the quiz launcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MainListEntry {
    pub id: QuestionId,
    pub answered: bool,
    pub selected: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MainListEntry {
    #[must_use]
    pub fn unanswered(id: QuestionId) -> Self {
        Self {
            id,
            answered: false,
            selected: Vec::new(),
            extra: Map::new(),
        }
    }

    fn from_json_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(object) => {
                let id = object.get("id").and_then(QuestionId::from_json_value)?;
                let answered = object
                    .get("answered")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let selected = selected_from_json(object.get("selected"));
                let extra = object
                    .iter()
                    .filter(|(name, _)| !matches!(name.as_str(), "id" | "answered" | "selected"))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                Some(Self {
                    id,
                    answered,
                    selected,
                    extra,
                })
            }
            // Launchers write a bare array of question ids.
            other => QuestionId::from_json_value(other).map(Self::unanswered),
        }
    }
}

/// Per-session record mirroring the quiz order, annotated with answer state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MainList {
    entries: Vec<MainListEntry>,
}

impl MainList {
    #[must_use]
    pub fn new(entries: Vec<MainListEntry>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn from_ids(ids: impl IntoIterator<Item = QuestionId>) -> Self {
        Self::new(ids.into_iter().map(MainListEntry::unanswered).collect())
    }

    /// Parse a persisted main list, normalizing bare ids into entries.
    /// Returns `None` for corrupt JSON or a value that is not an array.
    #[must_use]
    pub fn from_json(raw: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(raw).ok()?;
        let entries = value
            .as_array()?
            .iter()
            .filter_map(MainListEntry::from_json_value)
            .collect();
        Some(Self { entries })
    }

    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    #[must_use]
    pub fn entries(&self) -> &[MainListEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entry(&self, id: &QuestionId) -> Option<&MainListEntry> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    /// Merge companion items by id, replacing matches in place and appending
    /// unknown questions. Existing order is never changed.
    pub fn merge(&mut self, items: &[CompanionItem]) {
        for item in items {
            match self
                .entries
                .iter_mut()
                .find(|entry| entry.id == item.question_id)
            {
                Some(entry) => {
                    entry.id = item.question_id.clone();
                    entry.answered = item.is_answered();
                    entry.selected = item.selected.clone();
                }
                None => self.entries.push(MainListEntry {
                    id: item.question_id.clone(),
                    answered: item.is_answered(),
                    selected: item.selected.clone(),
                    extra: Map::new(),
                }),
            }
        }
    }

    /// Companion-shaped items, using each entry's position as its index.
    #[must_use]
    pub fn to_companion_items(&self) -> Vec<CompanionItem> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                CompanionItem::new(entry.id.clone(), index, entry.selected.clone())
            })
            .collect()
    }

    #[must_use]
    pub fn selection_map(&self) -> BTreeMap<String, Vec<String>> {
        selection_map(&self.to_companion_items())
    }
}

fn selection_map(items: &[CompanionItem]) -> BTreeMap<String, Vec<String>> {
    items
        .iter()
        .map(|item| (item.question_id.as_key(), item.selected.clone()))
        .collect()
}

fn selected_from_json(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(values)) => values.iter().filter_map(scalar_to_string).collect(),
        _ => Vec::new(),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
