use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use quiz_core::model::{QuestionId, SessionKey};

use super::host::{AnswerInput, AnswerSurface, QuizQuestion, QuizRuntime};

#[derive(Default)]
struct PageInner {
    quiz: Option<Vec<QuizQuestion>>,
    inputs: BTreeMap<String, Vec<AnswerInput>>,
    submissions: Vec<(usize, QuestionId)>,
    progress_refreshes: usize,
    session_key: Option<SessionKey>,
}

/// In-memory host page: a quiz runtime plus its rendered answer inputs.
///
/// Used by tests and by the command line tool to drive the persistence
/// subsystem without a browser.
#[derive(Clone, Default)]
pub struct MemoryPage {
    inner: Arc<Mutex<PageInner>>,
}

impl MemoryPage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PageInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize the quiz with the given question ids.
    pub fn set_quiz(&self, ids: impl IntoIterator<Item = QuestionId>) {
        self.lock().quiz = Some(ids.into_iter().map(|id| QuizQuestion { id }).collect());
    }

    pub fn set_session_key(&self, key: Option<SessionKey>) {
        self.lock().session_key = key;
    }

    /// Render unchecked inputs for one question.
    pub fn render_question(&self, id: &QuestionId, values: &[&str]) {
        self.lock().inputs.insert(
            id.input_name(),
            values.iter().map(|value| AnswerInput::new(*value)).collect(),
        );
    }

    /// Render the same answer options for every question of the quiz.
    pub fn render_quiz(&self, values: &[&str]) {
        let ids: Vec<QuestionId> = self
            .lock()
            .quiz
            .iter()
            .flatten()
            .map(|question| question.id.clone())
            .collect();
        for id in &ids {
            self.render_question(id, values);
        }
    }

    /// Simulate the user ticking the input carrying `value`.
    ///
    /// Returns false if no such input is rendered.
    pub fn check(&self, id: &QuestionId, value: &str) -> bool {
        let mut inner = self.lock();
        let Some(inputs) = inner.inputs.get_mut(&id.input_name()) else {
            return false;
        };
        let mut found = false;
        for input in inputs.iter_mut().filter(|input| input.value == value) {
            input.checked = true;
            found = true;
        }
        found
    }

    pub fn uncheck_all(&self, id: &QuestionId) {
        if let Some(inputs) = self.lock().inputs.get_mut(&id.input_name()) {
            for input in inputs {
                input.checked = false;
            }
        }
    }

    #[must_use]
    pub fn input_states(&self, id: &QuestionId) -> Vec<AnswerInput> {
        self.lock()
            .inputs
            .get(&id.input_name())
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn submissions(&self) -> Vec<(usize, QuestionId)> {
        self.lock().submissions.clone()
    }

    #[must_use]
    pub fn progress_refreshes(&self) -> usize {
        self.lock().progress_refreshes
    }
}

impl QuizRuntime for MemoryPage {
    fn current_quiz(&self) -> Option<Vec<QuizQuestion>> {
        self.lock().quiz.clone()
    }

    fn submit_single_question(&self, index: usize, question_id: &QuestionId) {
        self.lock().submissions.push((index, question_id.clone()));
    }

    fn update_progress(&self) {
        self.lock().progress_refreshes += 1;
    }

    fn session_key(&self) -> Option<SessionKey> {
        self.lock().session_key.clone()
    }
}

impl AnswerSurface for MemoryPage {
    fn inputs(&self, name: &str) -> Vec<AnswerInput> {
        self.lock().inputs.get(name).cloned().unwrap_or_default()
    }

    fn set_input(&self, name: &str, position: usize, checked: bool, disabled: bool) {
        if let Some(input) = self
            .lock()
            .inputs
            .get_mut(name)
            .and_then(|inputs| inputs.get_mut(position))
        {
            input.checked = checked;
            input.disabled = disabled;
        }
    }
}
