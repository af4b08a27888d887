use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use trainer_core::logging::init_tracing;
use trainer_core::persistence::FileProfileStore;
use trainer_core::{SessionInput, Trainer, TrainerConfig, TrainerError};

const DEFAULT_CONFIG_PATH: &str = "trainer.toml";
const DEFAULT_LESSON_WORDS: usize = 10;
const DEFAULT_LESSON_LINES: usize = 5;

// Config path: first argument, then $TRAINER_CONFIG, then ./trainer.toml.
fn get_config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TRAINER_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn main() -> io::Result<()> {
    let config = match TrainerConfig::from_file_or_default(&get_config_path()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[ERROR] {e}");
            std::process::exit(2);
        }
    };
    init_tracing(&config.log_level);
    info!(profile_dir = %config.profile_dir.display(), "trainer engine starting");

    let trainer = match Trainer::from_config(config) {
        Ok(trainer) => trainer,
        Err(e) => {
            error!(error = %e, "could not start trainer");
            std::process::exit(2);
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let input = line?;
        debug!(command = %input, "<-");
        let parts: Vec<&str> = input.split_whitespace().collect();
        let command = parts.first().copied().unwrap_or("");

        let reply = match command {
            "" => continue,
            "EXIT" => break,
            "GRADE" => grade(&trainer, &parts[1..]),
            "LESSON" => lesson(&trainer, &parts[1..]),
            "PROFILE" => profile(&trainer, &parts[1..]),
            "DICTIONARY" => dictionary(&trainer, &parts[1..]),
            other => Err(format!("unknown command '{other}'")),
        };

        let out = match reply {
            Ok(body) => json!({ "status": "ok", "body": body }),
            Err(message) => json!({ "status": "error", "message": message }),
        };
        writeln!(stdout, "{out}")?;
        stdout.flush()?;
    }
    info!("trainer engine shutting down");
    Ok(())
}

fn describe(e: TrainerError) -> String {
    if e.is_retryable() {
        format!("{e} (retry)")
    } else {
        e.to_string()
    }
}

fn user_arg<'a>(args: &[&'a str]) -> Result<&'a str, String> {
    args.first().copied().ok_or_else(|| "missing user id".to_string())
}

fn count_arg(args: &[&str], index: usize, default: usize) -> Result<usize, String> {
    match args.get(index) {
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("'{raw}' is not a non-negative count")),
        None => Ok(default),
    }
}

// GRADE <user_id> <session.json>
fn grade(trainer: &Trainer<FileProfileStore>, args: &[&str]) -> Result<Value, String> {
    let user_id = user_arg(args)?;
    let path = args.get(1).ok_or_else(|| "missing session file".to_string())?;
    let session = SessionInput::from_path(Path::new(path)).map_err(describe)?;
    let submission = trainer
        .submit(user_id, &session.reference, &session.attempt)
        .map_err(describe)?;

    let mut body = serde_json::to_value(submission.result.payload()).map_err(|e| e.to_string())?;
    body["persisted"] = json!(submission.is_persisted());
    if let Some(e) = submission.persist_error {
        body["persist_error"] = json!(describe(e));
    }
    Ok(body)
}

// LESSON <user_id> [num_words] [num_lines]
fn lesson(trainer: &Trainer<FileProfileStore>, args: &[&str]) -> Result<Value, String> {
    let user_id = user_arg(args)?;
    let num_words = count_arg(args, 1, DEFAULT_LESSON_WORDS)?;
    let num_lines = count_arg(args, 2, DEFAULT_LESSON_LINES)?;
    let payload = trainer.lesson(user_id, num_words, num_lines).map_err(describe)?;
    serde_json::to_value(payload).map_err(|e| e.to_string())
}

// PROFILE <user_id>
fn profile(trainer: &Trainer<FileProfileStore>, args: &[&str]) -> Result<Value, String> {
    let profile = trainer.profile(user_arg(args)?).map_err(describe)?;
    serde_json::to_value(profile).map_err(|e| e.to_string())
}

// DICTIONARY <user_id> [min_errors]
fn dictionary(trainer: &Trainer<FileProfileStore>, args: &[&str]) -> Result<Value, String> {
    let user_id = user_arg(args)?;
    let min_errors = count_arg(args, 1, 1)? as u64;
    let dict = trainer.error_dictionary(user_id, min_errors).map_err(describe)?;
    serde_json::to_value(dict).map_err(|e| e.to_string())
}
