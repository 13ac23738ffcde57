use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use quiz_core::model::{PersistSettings, PersistSettingsDraft, QuestionId, QuizParams};
use quiz_core::time::fixed_clock;
use serde_json::{Value, json};
use services::persist::{RestorePhase, RestoreSource};
use services::{AppServices, CaptureOutcome, MemoryPage, PageEvent, PersistenceController};
use storage::repository::{InMemoryStore, KeyValueStore, StorageError};

fn controller(url: &str, kv: Arc<dyn KeyValueStore>, page: &MemoryPage) -> PersistenceController {
    PersistenceController::with_settings(
        QuizParams::from_url(url).unwrap(),
        kv,
        Arc::new(page.clone()),
        Arc::new(page.clone()),
        PersistSettings::default(),
        fixed_clock(),
    )
}

fn quiz_page(ids: &[i64]) -> MemoryPage {
    let page = MemoryPage::new();
    page.set_quiz(ids.iter().copied().map(QuestionId::number));
    page.render_quiz(&["A", "B", "C"]);
    page
}

fn record(kv: &InMemoryStore, key: &str) -> Value {
    serde_json::from_str(&kv.dump()[key]).unwrap()
}

fn companion_selection(companion: &Value, id: i64) -> Option<Value> {
    companion["items"]
        .as_array()?
        .iter()
        .find(|item| item["questionId"] == json!(id))
        .map(|item| item["selected"].clone())
}

/// Counts writes and optionally rejects writes to main list keys.
#[derive(Clone, Default)]
struct ObservedStore {
    inner: InMemoryStore,
    writes: Arc<AtomicUsize>,
    reject_main_lists: bool,
}

#[async_trait]
impl KeyValueStore for ObservedStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.reject_main_lists && !key.ends_with("::state") {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                needed: value.len(),
                limit: 0,
            });
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.inner.keys().await
    }
}

#[tokio::test(start_paused = true)]
async fn checked_answer_survives_reload() {
    let url = "http://localhost:3000/quiz?mode=random&key=abc123";
    let kv = InMemoryStore::new();
    let q42 = QuestionId::number(42);

    let page = quiz_page(&[41, 42]);
    let first = controller(url, Arc::new(kv.clone()), &page);
    page.check(&q42, "B");
    first.handle_event(PageEvent::input_changed("q42")).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let companion = record(&kv, "quiz_random_v2::abc123::state");
    assert_eq!(
        companion["items"][1],
        json!({"questionId": 42, "index": 1, "selected": ["B"]})
    );
    let main = record(&kv, "quiz_random_v2::abc123");
    assert_eq!(main[1], json!({"id": 42, "answered": true, "selected": ["B"]}));

    // The quiz runtime of the reloaded page initializes late.
    let reloaded = MemoryPage::new();
    let second = controller(url, Arc::new(kv.clone()), &reloaded);
    let task = second.spawn_bootstrap().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    reloaded.set_quiz([QuestionId::number(41), q42.clone()]);
    reloaded.render_quiz(&["A", "B", "C"]);

    let outcome = task.join().await.unwrap();
    assert_eq!(outcome.report().unwrap().source, RestoreSource::Companion);
    let restored = reloaded.input_states(&q42);
    assert!(restored[1].checked && restored[1].disabled);
    assert!(!restored[0].checked && !restored[2].checked);
    assert_eq!(reloaded.submissions(), vec![(1, q42)]);
    assert_eq!(second.restore_phase(), RestorePhase::Done);
}

#[tokio::test(start_paused = true)]
async fn answers_submitted_during_a_long_restore_are_saved() {
    let url = "http://h/q?mode=random&key=abc";
    let kv = InMemoryStore::new();
    kv.set(
        "quiz_random_v2::abc::state",
        r#"{"items":[{"questionId":1,"index":0,"selected":["A"]},{"questionId":99,"index":1,"selected":["B"]}]}"#,
    )
    .await
    .unwrap();
    // q99 never renders, so the restore polls until its attempt cap.
    let page = quiz_page(&[1, 2]);
    let q2 = QuestionId::number(2);
    let controller = controller(url, Arc::new(kv.clone()), &page);

    let task = controller.spawn_restore();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(controller.restore_phase(), RestorePhase::Polling);

    page.check(&q2, "B");
    assert!(controller.submit_single_question(1, &q2).await.is_saved());
    assert!(
        controller
            .handle_event(PageEvent::PageHide)
            .await
            .is_some_and(|outcome| outcome.is_saved())
    );
    let companion = record(&kv, "quiz_random_v2::abc::state");
    assert_eq!(companion_selection(&companion, 2), Some(json!(["B"])));
    assert_eq!(companion_selection(&companion, 99), Some(json!(["B"])));

    let outcome = task.join().await.unwrap();
    assert_eq!(outcome.report().unwrap().unresolved, vec!["99".to_string()]);
    let companion = record(&kv, "quiz_random_v2::abc::state");
    assert_eq!(companion_selection(&companion, 1), Some(json!(["A"])));
    assert_eq!(companion_selection(&companion, 2), Some(json!(["B"])));
    assert_eq!(companion_selection(&companion, 99), Some(json!(["B"])));
    assert!(page.submissions().contains(&(1, q2)));
}

#[tokio::test]
async fn repeated_capture_is_idempotent() {
    let kv = InMemoryStore::new();
    let page = quiz_page(&[1, 2, 3]);
    page.check(&QuestionId::number(2), "C");
    let controller = controller("http://h/q?mode=theme&key=t1", Arc::new(kv.clone()), &page);

    controller.capture_now().await;
    let once = kv.dump();
    controller.capture_now().await;
    assert_eq!(kv.dump(), once);
    assert_eq!(
        controller.snapshot_map().await["2"],
        vec!["C".to_string()]
    );
}

#[tokio::test]
async fn capture_merges_into_launcher_list() {
    let kv = InMemoryStore::new();
    kv.set(
        "quiz_random_v2::s",
        r#"[1,{"id":2,"answered":false,"selected":[],"text":"kept"},3]"#,
    )
    .await
    .unwrap();
    let page = quiz_page(&[2]);
    page.check(&QuestionId::number(2), "A");
    let controller = controller("http://h/q?mode=random&key=s", Arc::new(kv.clone()), &page);

    controller.capture_now().await;
    let main = record(&kv, "quiz_random_v2::s");
    assert_eq!(main.as_array().unwrap().len(), 3);
    assert_eq!(main[0], json!({"id": 1, "answered": false, "selected": []}));
    assert_eq!(
        main[1],
        json!({"id": 2, "answered": true, "selected": ["A"], "text": "kept"})
    );
}

#[tokio::test]
async fn theme_and_random_sessions_stay_isolated() {
    let kv = InMemoryStore::new();
    let random_page = quiz_page(&[1]);
    random_page.check(&QuestionId::number(1), "A");
    let theme_page = quiz_page(&[1]);
    theme_page.check(&QuestionId::number(1), "C");

    let random = controller("http://h/q?mode=random&key=k", Arc::new(kv.clone()), &random_page);
    let theme = controller("http://h/q?mode=theme&key=k", Arc::new(kv.clone()), &theme_page);
    random.capture_now().await;
    theme.capture_now().await;

    assert_eq!(random.snapshot_map().await["1"], vec!["A".to_string()]);
    assert_eq!(theme.snapshot_map().await["1"], vec!["C".to_string()]);
    assert_eq!(
        kv.dump().into_keys().collect::<Vec<_>>(),
        vec![
            "quiz_random_v2::k",
            "quiz_random_v2::k::state",
            "quiz_theme_v1::k",
            "quiz_theme_v1::k::state",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn clear_all_sweeps_and_blocks_late_saves() {
    let kv = InMemoryStore::new();
    for key in [
        "quiz_snapshot::mode=::themeId=::count=::from=",
        "quiz_random_v1::old",
        "quiz_progress_v1::older",
        "theme",
    ] {
        kv.set(key, "x").await.unwrap();
    }
    let page = quiz_page(&[1]);
    let controller = controller("http://h/q?mode=random&key=k", Arc::new(kv.clone()), &page);
    controller.capture_now().await;

    assert_eq!(controller.clear_all().await, 5);
    assert_eq!(kv.dump().into_keys().collect::<Vec<_>>(), vec!["theme"]);

    assert_eq!(
        controller.handle_event(PageEvent::BeforeUnload).await,
        Some(CaptureOutcome::Suppressed)
    );
    assert_eq!(
        controller
            .save_answer(QuestionId::number(1), vec!["A".into()], Some(0))
            .await,
        CaptureOutcome::Suppressed
    );
    assert_eq!(kv.dump().len(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!controller.is_suppressed());
    assert!(controller.capture_now().await.is_saved());
}

#[tokio::test(start_paused = true)]
async fn input_bursts_coalesce_into_one_save() {
    let store = ObservedStore::default();
    let page = quiz_page(&[1]);
    let controller = controller("http://h/q?mode=random&key=k", Arc::new(store.clone()), &page);

    for value in ["A", "B", "C", "A"] {
        page.uncheck_all(&QuestionId::number(1));
        page.check(&QuestionId::number(1), value);
        controller.handle_event(PageEvent::input_changed("q1")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    // One companion write plus one main list write.
    assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    assert_eq!(
        controller.snapshot_map().await["1"],
        vec!["A".to_string()]
    );
}

#[tokio::test]
async fn main_list_failure_keeps_companion() {
    let store = ObservedStore {
        reject_main_lists: true,
        ..ObservedStore::default()
    };
    let page = quiz_page(&[7]);
    page.check(&QuestionId::number(7), "B");
    let controller = controller("http://h/q?mode=random&key=k", Arc::new(store.clone()), &page);

    assert!(controller.capture_now().await.is_saved());
    let keys = store.inner.dump().into_keys().collect::<Vec<_>>();
    assert_eq!(keys, vec!["quiz_random_v2::k::state"]);

    page.uncheck_all(&QuestionId::number(7));
    let outcome = controller.restore().await;
    assert_eq!(outcome.report().unwrap().applied, 1);
    assert!(page.input_states(&QuestionId::number(7))[1].checked);
}

#[tokio::test]
async fn companion_wins_over_disagreeing_main_list() {
    let kv = InMemoryStore::new();
    kv.set(
        "quiz_random_v2::k",
        r#"[{"id":1,"answered":true,"selected":["C"]}]"#,
    )
    .await
    .unwrap();
    kv.set(
        "quiz_random_v2::k::state",
        r#"{"items":[{"questionId":1,"index":0,"selected":["A"]}]}"#,
    )
    .await
    .unwrap();
    let page = quiz_page(&[1]);
    let controller = controller("http://h/q?key=k", Arc::new(kv.clone()), &page);

    controller.restore().await;
    let states = page.input_states(&QuestionId::number(1));
    assert!(states[0].checked);
    assert!(!states[2].checked);
}

#[tokio::test]
async fn sqlite_backed_services_persist_progress() {
    let services = AppServices::new_sqlite(
        "sqlite:file:persistence_flow?mode=memory&cache=shared",
        PersistSettingsDraft::default(),
        fixed_clock(),
    )
    .await
    .unwrap();

    let page = quiz_page(&[5]);
    page.check(&QuestionId::number(5), "C");
    let params = QuizParams::from_query("mode=theme&key=db");
    let writer = services.controller(params.clone(), Arc::new(page.clone()), Arc::new(page.clone()));
    assert!(writer.capture_now().await.is_saved());

    let fresh = quiz_page(&[5]);
    let reader = services.controller(params, Arc::new(fresh.clone()), Arc::new(fresh.clone()));
    let outcome = reader.restore().await;
    assert_eq!(outcome.report().unwrap().submitted, 1);
    assert!(fresh.input_states(&QuestionId::number(5))[2].checked);
}
