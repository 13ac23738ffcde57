//! Contracts the host page provides to the persistence subsystem.

use quiz_core::model::{QuestionId, SessionKey};

/// Descriptor of one question in the quiz currently on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizQuestion {
    pub id: QuestionId,
}

impl QuizQuestion {
    #[must_use]
    pub fn new(id: impl Into<QuestionId>) -> Self {
        Self { id: id.into() }
    }
}

/// The quiz runtime that owns scoring and progress display.
pub trait QuizRuntime: Send + Sync {
    /// Questions of the quiz on screen, in display order.
    ///
    /// `None` until the quiz has finished initializing.
    fn current_quiz(&self) -> Option<Vec<QuizQuestion>>;

    /// Record the answer currently selected for one question. Idempotent.
    fn submit_single_question(&self, index: usize, question_id: &QuestionId);

    /// Recompute the progress indicator.
    fn update_progress(&self);

    /// Session key known to the runtime even when the URL lost it.
    fn session_key(&self) -> Option<SessionKey> {
        None
    }
}

/// State of one rendered answer input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerInput {
    pub value: String,
    pub checked: bool,
    pub disabled: bool,
}

impl AnswerInput {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            checked: false,
            disabled: false,
        }
    }
}

/// The answer inputs rendered by the page, grouped by input name (`q<id>`).
pub trait AnswerSurface: Send + Sync {
    /// Inputs currently rendered under `name`, in document order.
    fn inputs(&self, name: &str) -> Vec<AnswerInput>;

    /// Set the flags of the input at `position` among those named `name`.
    /// Positions that no longer exist are ignored.
    fn set_input(&self, name: &str, position: usize, checked: bool, disabled: bool);

    /// Values of the checked inputs named `name`.
    fn checked_values(&self, name: &str) -> Vec<String> {
        self.inputs(name)
            .into_iter()
            .filter(|input| input.checked)
            .map(|input| input.value)
            .collect()
    }
}

/// Page lifecycle and input notifications relevant to persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    /// A `change` event fired on an input.
    InputChanged { name: String },
    VisibilityHidden,
    VisibilityVisible,
    PageHide,
    BeforeUnload,
}

impl PageEvent {
    #[must_use]
    pub fn input_changed(name: impl Into<String>) -> Self {
        Self::InputChanged { name: name.into() }
    }
}

/// Answer inputs follow the `q<id>` naming convention.
#[must_use]
pub fn is_answer_input(name: &str) -> bool {
    name.starts_with('q')
}
