use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use exam_core::model::{
    AnswerDraft, AnswerPayload, AttemptStatus, OptionId, Question, QuestionId, TestId,
};
use exam_core::time::format_countdown;
use services::attempts::{AttemptController, ControllerOptions, SubmitOutcome};
use services::config::EngineConfig;
use services::gateway::{HttpGateway, InMemoryGateway, RemoteGateway, TestFixture};
use storage::{AttemptStore, Storage};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    MissingTestId,
    MissingAnswer,
    MissingApiUrl,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::MissingTestId => write!(f, "--test-id (or EXAM_TEST_ID) is required"),
            ArgsError::MissingAnswer => write!(f, "answer needs --option or --text"),
            ArgsError::MissingApiUrl => write!(f, "EXAM_API_URL is not set"),
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

fn require_number(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<u64, ArgsError> {
    let value = require_value(args, flag)?;
    value
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw: value })
}

const DEFAULT_DB_URL: &str = "sqlite://exam-session.sqlite3";

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  exam start  [--db <sqlite_url>] --test-id <id>");
    eprintln!("  exam status [--db <sqlite_url>] --test-id <id>");
    eprintln!("  exam answer [--db <sqlite_url>] --test-id <id> --question <n> (--option <id>)... | --text <s>");
    eprintln!("  exam submit [--db <sqlite_url>] --test-id <id>");
    eprintln!("  exam demo   [--test-id <id>] [--questions <n>] [--duration <secs>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db {DEFAULT_DB_URL}");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  EXAM_API_URL, EXAM_API_TOKEN, EXAM_REQUEST_TIMEOUT_SECS,");
    eprintln!("  EXAM_RESYNC_SECS, EXAM_AUTOSAVE_SECS, EXAM_STORE_URL, EXAM_TEST_ID, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Status,
    Answer,
    Submit,
    Demo,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "start" => Some(Self::Start),
            "status" => Some(Self::Status),
            "answer" => Some(Self::Answer),
            "submit" => Some(Self::Submit),
            "demo" => Some(Self::Demo),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Args {
    db_url: String,
    test_id: Option<TestId>,
    question: Option<u32>,
    options: Vec<OptionId>,
    text: Option<String>,
    questions: Option<u32>,
    duration: Option<u32>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            db_url: std::env::var("EXAM_STORE_URL")
                .ok()
                .map_or_else(|| DEFAULT_DB_URL.into(), normalize_sqlite_url),
            test_id: std::env::var("EXAM_TEST_ID")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .map(TestId::new),
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
                "--test-id" => {
                    parsed.test_id = Some(TestId::new(require_number(args, "--test-id")?));
                }
                "--question" => parsed.question = Some(small_number(args, "--question")?),
                "--option" => {
                    parsed
                        .options
                        .push(OptionId::new(require_number(args, "--option")?));
                }
                "--text" => parsed.text = Some(require_value(args, "--text")?),
                "--questions" => parsed.questions = Some(small_number(args, "--questions")?),
                "--duration" => parsed.duration = Some(small_number(args, "--duration")?),
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(parsed)
    }

    fn draft(&self) -> Result<AnswerDraft, ArgsError> {
        match (&self.text, self.options.is_empty()) {
            (Some(text), _) => Ok(AnswerDraft::Text(text.clone())),
            (None, false) => Ok(AnswerDraft::Options(self.options.clone())),
            (None, true) => Err(ArgsError::MissingAnswer),
        }
    }
}

fn small_number(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<u32, ArgsError> {
    let value = require_value(args, flag)?;
    value
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw: value })
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
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

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn print_question(question: &Question) {
    println!("Q{}: {}", question.ordinal(), question.text());
    for option in question.options() {
        println!("  [{}] {}", option.id, option.text);
    }
}

fn print_attempt(controller: &AttemptController) {
    let Some(attempt) = controller.attempt() else {
        println!("no attempt");
        return;
    };
    println!(
        "attempt {} for test {}: {}",
        attempt.id, attempt.test_id, attempt.status
    );
    if attempt.status == AttemptStatus::Active {
        println!("time left: {}", format_countdown(attempt.remaining_seconds));
    }
    if let Some(notice) = controller.last_notice() {
        println!("{}", notice.message);
    }
}

fn print_outcome(outcome: &SubmitOutcome) {
    match outcome {
        SubmitOutcome::Submitted(done) | SubmitOutcome::AlreadyFinished(done) => match done.score
        {
            Some(score) => println!("score: {} / {}", score.score, score.total_score),
            None => println!("attempt {} was already submitted", done.attempt_id),
        },
        SubmitOutcome::AlreadySubmitting => println!("a submission is already in flight"),
    }
}

/// Every other question is keyed to its first option.
fn demo_fixture(
    test_id: TestId,
    count: u32,
    duration_seconds: u32,
) -> Result<TestFixture, exam_core::Error> {
    let mut fixture = TestFixture::single_choice(test_id, count, duration_seconds)?;
    for ordinal in (1..=count).step_by(2) {
        fixture = fixture.with_answer(
            QuestionId::new(u64::from(ordinal)),
            AnswerPayload::choice([OptionId::new(1)]),
        );
    }
    Ok(fixture)
}

async fn run_demo(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let test_id = args.test_id.unwrap_or(TestId::new(1));
    let fixture = demo_fixture(
        test_id,
        args.questions.unwrap_or(5),
        args.duration.unwrap_or(600),
    )?;
    let gateway = InMemoryGateway::new()
        .with_fixture(fixture)
        .with_latency(Duration::from_millis(50));
    let storage = Storage::in_memory();
    let controller = AttemptController::new(
        Arc::new(gateway),
        Arc::clone(&storage.attempts),
        ControllerOptions::default(),
    );

    controller.start(test_id).await?;
    print_attempt(&controller);
    let total = controller.attempt().map_or(0, |attempt| attempt.total_questions);
    for ordinal in 1..=total {
        let question = controller.navigate_to(ordinal).await?;
        print_question(&question);
        if let Some(first) = question.options().first() {
            controller.answer(AnswerDraft::Options(vec![first.id]))?;
        }
    }

    let outcome = controller.submit().await?;
    print_outcome(&outcome);
    Ok(())
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

    let parsed = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    if cmd == Command::Demo {
        return run_demo(&parsed).await;
    }

    let test_id = parsed.test_id.ok_or(ArgsError::MissingTestId)?;
    let config = EngineConfig::from_env()?.ok_or(ArgsError::MissingApiUrl)?;

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&parsed.db_url)?;
    let storage = Storage::sqlite(&parsed.db_url).await?;
    let gateway: Arc<dyn RemoteGateway> = Arc::new(HttpGateway::new(&config.gateway)?);
    let controller = AttemptController::new(
        gateway,
        Arc::clone(&storage.attempts),
        ControllerOptions::from(&config),
    );

    match cmd {
        Command::Start => {
            controller.start(test_id).await?;
            print_attempt(&controller);
            if let Some(question) = controller.current_question() {
                print_question(&question);
            }
        }
        Command::Status => {
            if storage.attempts.get(test_id).await?.is_none() {
                println!("no stored attempt for test {test_id}");
                return Ok(());
            }
            controller.start(test_id).await?;
            print_attempt(&controller);
            if let Some(answered) = controller.server_answered_count() {
                println!("answered on server: {answered}");
            }
        }
        Command::Answer => {
            let draft = parsed.draft()?;
            controller.start(test_id).await?;
            if let Some(ordinal) = parsed.question {
                controller.navigate_to(ordinal).await?;
            }
            controller.answer(draft)?;
            controller.flush().await?;
            println!("answer saved");
        }
        Command::Submit => {
            controller.start(test_id).await?;
            let outcome = controller.submit().await?;
            print_outcome(&outcome);
        }
        Command::Demo => {}
    }
    controller.teardown();
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
