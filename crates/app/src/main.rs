use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use quiz_core::model::{PersistSettingsDraft, QuestionId, QuizParams, SessionKey};
use services::persist::{MemoryPage, RestoreOutcome, RestoreReport};
use services::{AppServices, CaptureOutcome, Clock};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidNumber { name: &'static str, raw: String },
    InvalidQuestionId { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNumber { name, raw } => write!(f, "invalid {name} value: {raw}"),
            ArgsError::InvalidQuestionId { raw } => write!(f, "invalid question id: {raw:?}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  quiz-persist inspect [--db <sqlite_url>]");
    eprintln!("  quiz-persist clear   [--db <sqlite_url>]");
    eprintln!("  quiz-persist start   --questions <id,..> [--mode random|theme] [--theme-id <id>]");
    eprintln!("                       [--count <n>] [--from <origin>] [--db <sqlite_url>]");
    eprintln!("  quiz-persist show    --url <quiz_url> [--db <sqlite_url>]");
    eprintln!("  quiz-persist answer  --url <quiz_url> --question <id> --value <v>... [--index <n>]");
    eprintln!("  quiz-persist restore --url <quiz_url> --questions <id,..> --options <v,..>");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:quiz-progress.sqlite3");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUIZ_DB_URL, QUIZ_DEBOUNCE_MS, QUIZ_POLL_MS, QUIZ_RESTORE_ATTEMPTS,");
    eprintln!("  QUIZ_SUPPRESS_MS, QUIET=false for debug logs, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Inspect,
    Clear,
    Start,
    Show,
    Answer,
    Restore,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "inspect" => Some(Self::Inspect),
            "clear" => Some(Self::Clear),
            "start" => Some(Self::Start),
            "show" => Some(Self::Show),
            "answer" => Some(Self::Answer),
            "restore" => Some(Self::Restore),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Args {
    db_url: String,
    settings: PersistSettingsDraft,
    url: Option<String>,
    mode: Option<String>,
    theme_id: Option<String>,
    count: Option<String>,
    from: Option<String>,
    question: Option<QuestionId>,
    questions: Vec<QuestionId>,
    values: Vec<String>,
    options: Vec<String>,
    index: Option<usize>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            db_url: std::env::var("QUIZ_DB_URL").ok().map_or_else(
                || normalize_sqlite_url("sqlite:quiz-progress.sqlite3".into()),
                normalize_sqlite_url,
            ),
            settings: settings_from_env()?,
            ..Self::default()
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = normalize_sqlite_url(value);
                }
                "--url" => parsed.url = Some(require_value(args, "--url")?),
                "--mode" => parsed.mode = Some(require_value(args, "--mode")?),
                "--theme-id" => parsed.theme_id = Some(require_value(args, "--theme-id")?),
                "--count" => parsed.count = Some(require_value(args, "--count")?),
                "--from" => parsed.from = Some(require_value(args, "--from")?),
                "--question" => {
                    parsed.question = Some(parse_question_id(&require_value(args, "--question")?)?);
                }
                "--questions" => {
                    parsed.questions = split_list(&require_value(args, "--questions")?)
                        .iter()
                        .map(|raw| parse_question_id(raw))
                        .collect::<Result<_, _>>()?;
                }
                "--value" => parsed.values.push(require_value(args, "--value")?),
                "--options" => parsed.options = split_list(&require_value(args, "--options")?),
                "--index" => {
                    let value = require_value(args, "--index")?;
                    let index = value.parse().map_err(|_| ArgsError::InvalidNumber {
                        name: "--index",
                        raw: value.clone(),
                    })?;
                    parsed.index = Some(index);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(parsed)
    }

    fn quiz_params(&self) -> Result<QuizParams, Box<dyn std::error::Error>> {
        let url = self
            .url
            .as_deref()
            .ok_or(ArgsError::MissingFlag { flag: "--url" })?;
        if url.contains("://") {
            Ok(QuizParams::from_url(url)?)
        } else {
            Ok(QuizParams::from_query(url.split_once('?').map_or(url, |(_, q)| q)))
        }
    }
}

fn settings_from_env() -> Result<PersistSettingsDraft, ArgsError> {
    Ok(PersistSettingsDraft {
        debounce_ms: env_number("QUIZ_DEBOUNCE_MS")?,
        poll_interval_ms: env_number("QUIZ_POLL_MS")?,
        max_restore_attempts: env_number("QUIZ_RESTORE_ATTEMPTS")?,
        suppress_window_ms: env_number("QUIZ_SUPPRESS_MS")?,
    })
}

fn env_number<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ArgsError> {
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ArgsError::InvalidNumber { name, raw }),
        Err(_) => Ok(None),
    }
}

fn parse_question_id(raw: &str) -> Result<QuestionId, ArgsError> {
    raw.trim()
        .parse()
        .map_err(|_| ArgsError::InvalidQuestionId { raw: raw.to_string() })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim();
    let path = std::path::Path::new(trimmed.strip_prefix("sqlite:").unwrap_or(trimmed));
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn init_tracing() {
    // Quiet unless asked otherwise, matching the browser console behaviour.
    let verbose = std::env::var("QUIET").is_ok_and(|value| value == "false");
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let args = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    // Open + migrate SQLite here so the library crates stay storage-agnostic.
    prepare_sqlite_file(&args.db_url)?;
    let clock = Clock::default_clock();
    let services = AppServices::new_sqlite(&args.db_url, args.settings.clone(), clock).await?;
    info!(db = %args.db_url, command = ?cmd, "quiz-persist ready");

    match cmd {
        Command::Inspect => inspect(&services, clock).await,
        Command::Clear => {
            let controller = services.controller(
                QuizParams::default(),
                Arc::new(MemoryPage::new()),
                Arc::new(MemoryPage::new()),
            );
            let removed = controller.clear_all().await;
            println!("removed {removed} quiz snapshot key(s)");
            Ok(())
        }
        Command::Start => start(&services, &args).await,
        Command::Show => {
            let page = MemoryPage::new();
            let controller =
                services.controller(args.quiz_params()?, Arc::new(page.clone()), Arc::new(page));
            let resolution = controller.resolve().await;
            println!("location: {}", resolution.location());
            for (question, selected) in controller.snapshot_map().await {
                println!("q{question}: [{}]", selected.join(", "));
            }
            Ok(())
        }
        Command::Answer => {
            let question = args
                .question
                .clone()
                .ok_or(ArgsError::MissingFlag { flag: "--question" })?;
            let page = MemoryPage::new();
            let controller =
                services.controller(args.quiz_params()?, Arc::new(page.clone()), Arc::new(page));
            match controller
                .save_answer(question, args.values.clone(), args.index)
                .await
            {
                CaptureOutcome::Saved { location, items } => {
                    println!("saved {} item(s) at {location}", items.len());
                }
                other => println!("not saved: {other:?}"),
            }
            Ok(())
        }
        Command::Restore => restore(&services, &args).await,
    }
}

async fn inspect(services: &AppServices, clock: Clock) -> Result<(), Box<dyn std::error::Error>> {
    let store = services.store();
    let keys = store.quiz_keys().await;
    println!("{} quiz key(s) at {}", keys.len(), clock.now_iso());
    for key in keys {
        let value = store.read_raw(&key).await.unwrap_or_default();
        println!("{key} = {value}");
    }
    Ok(())
}

/// Launch a fresh session the way the quiz launcher does: new key, bare id
/// list, then the URL that opens it.
async fn start(services: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.questions.is_empty() {
        return Err(ArgsError::MissingFlag { flag: "--questions" }.into());
    }
    let key = SessionKey::generate();
    let params = QuizParams {
        mode: args.mode.clone().or_else(|| Some("random".into())),
        from: args.from.clone(),
        theme_id: args.theme_id.clone(),
        count: args.count.clone(),
        key: None,
    }
    .with_key(key.clone());

    let created = services
        .store()
        .initialize_main_list(params.default_namespace(), &key, &args.questions)
        .await;
    if !created {
        return Err(format!("could not create session {key}").into());
    }
    println!("quiz?{}", params.to_query());
    Ok(())
}

/// Replay a page load against stored progress and print the restored inputs.
async fn restore(services: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.questions.is_empty() {
        return Err(ArgsError::MissingFlag { flag: "--questions" }.into());
    }
    let page = MemoryPage::new();
    page.set_quiz(args.questions.iter().cloned());
    let options: Vec<&str> = args.options.iter().map(String::as_str).collect();
    page.render_quiz(&options);

    let controller = services.controller(
        args.quiz_params()?,
        Arc::new(page.clone()),
        Arc::new(page.clone()),
    );
    match controller.bootstrap().await {
        RestoreOutcome::Completed(report) => {
            println!(
                "{}",
                describe_report(&report, services.settings().restore_budget())
            );
            for question in &args.questions {
                let checked: Vec<String> = page
                    .input_states(question)
                    .into_iter()
                    .filter(|input| input.checked)
                    .map(|input| input.value)
                    .collect();
                println!("q{question}: [{}]", checked.join(", "));
            }
        }
        other => println!("nothing restored: {other:?}"),
    }
    Ok(())
}

fn describe_report(report: &RestoreReport, budget: Duration) -> String {
    format!(
        "restored from {:?}: {} applied, {} unresolved, {} submitted after {} attempt(s) of a {}ms budget",
        report.source,
        report.applied,
        report.unresolved.len(),
        report.submitted,
        report.attempts,
        budget.as_millis()
    )
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
