use crossterm::{
    queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{self, Stdout, Write};
use std::path::{Path, PathBuf};
use trainer_core::logging::init_tracing;
use trainer_core::{SessionInput, SessionResult, Trainer, TrainerConfig};

const WEAK_PHONEME_THRESHOLD: f64 = 0.3;
const LESSON_WORDS: usize = 5;
const LESSON_LINES: usize = 3;

fn usage() -> ! {
    eprintln!("usage: simulator <session.json> [user_id] [config.toml]");
    std::process::exit(2);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let session_path = args.first().map(PathBuf::from).unwrap_or_else(|| usage());
    let user_id = args.get(1).cloned();
    let config_path = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("trainer.toml"));

    let config = TrainerConfig::from_file_or_default(&config_path)?;
    init_tracing(&config.log_level);
    let trainer = Trainer::from_config(config)?;
    let session = SessionInput::from_path(Path::new(&session_path))?;

    let mut out = io::stdout();
    let result = match &user_id {
        Some(user) => {
            let submission = trainer.submit(user, &session.reference, &session.attempt)?;
            if let Some(err) = &submission.persist_error {
                colored(&mut out, Color::Red, &format!("Profile not updated: {err}\n"))?;
            }
            submission.result
        }
        None => trainer.score(&session.reference, &session.attempt)?,
    };

    header(&mut out, "Singing Pronunciation Report")?;
    colored(
        &mut out,
        grade_color(result.overall_accuracy),
        &format!("Overall accuracy:   {:>6.1}%\n", result.overall_accuracy * 100.0),
    )?;
    queue!(
        out,
        Print(format!("Weighted score:     {:>6.1}%\n", result.weighted_score * 100.0)),
        Print(format!("Average line score: {:>6.1}%\n", result.avg_line_accuracy * 100.0))
    )?;

    print_words(&mut out, &result)?;
    print_lines(&mut out, &trainer, &result)?;

    if let Some(user) = &user_id {
        let profile = trainer.profile(user)?;
        header(&mut out, "Weak phonemes")?;
        let weak = profile.weak_phoneme_list(WEAK_PHONEME_THRESHOLD);
        if weak.is_empty() {
            queue!(out, Print("  none yet\n"))?;
        }
        for p in weak {
            let sub = p.most_common_substitution().unwrap_or("-");
            queue!(
                out,
                Print(format!(
                    "  /{}/  {:>5.1}% of {}  usually heard as {}\n",
                    p.phoneme,
                    p.error_rate * 100.0,
                    p.total_count,
                    sub
                ))
            )?;
        }

        header(&mut out, "Next lesson")?;
        let lesson = trainer.lesson(user, LESSON_WORDS, LESSON_LINES)?;
        for (i, c) in lesson.conversations.iter().enumerate() {
            colored(&mut out, Color::Cyan, &format!("  {}. {}\n", i + 1, c.question))?;
            queue!(out, Print(format!("     {}\n", c.response)))?;
        }
    }

    queue!(out, ResetColor)?;
    out.flush()?;
    Ok(())
}

fn grade_color(accuracy: f64) -> Color {
    if accuracy >= 0.9 {
        Color::Green
    } else if accuracy >= 0.6 {
        Color::Yellow
    } else {
        Color::Red
    }
}

fn header(out: &mut Stdout, title: &str) -> io::Result<()> {
    colored(out, Color::Cyan, &format!("\n{title}\n{}\n", "-".repeat(title.len())))
}

fn colored(out: &mut Stdout, color: Color, text: &str) -> io::Result<()> {
    queue!(out, SetForegroundColor(color), Print(text), ResetColor)
}

fn print_words(out: &mut Stdout, result: &SessionResult) -> io::Result<()> {
    header(out, "Struggling words")?;
    let mut errors: Vec<_> = result.words().filter(|w| w.is_error).collect();
    errors.sort_by(|a, b| a.accuracy.total_cmp(&b.accuracy));
    if errors.is_empty() {
        return colored(out, Color::Green, "  every word was clean\n");
    }
    for w in errors {
        let heard = if w.user_phonemes.is_empty() {
            "(not detected)".to_string()
        } else {
            w.user_phonemes.to_string()
        };
        colored(
            out,
            grade_color(w.accuracy),
            &format!("  {:<16} {:>5.1}%", w.word, w.accuracy * 100.0),
        )?;
        queue!(out, Print(format!("  expected {}  heard {}\n", w.ref_phonemes, heard)))?;
    }
    Ok(())
}

fn print_lines<S: trainer_core::ProfileStore>(
    out: &mut Stdout,
    trainer: &Trainer<S>,
    result: &SessionResult,
) -> io::Result<()> {
    header(out, "Lines to practice")?;
    let struggling = trainer.struggling_lines(result);
    if struggling.is_empty() {
        queue!(out, Print("  none\n"))?;
    }
    for line in &struggling {
        colored(
            out,
            grade_color(line.accuracy),
            &format!(
                "  {:>3}. {:>5.1}%  {}\n",
                line.line_index + 1,
                line.accuracy * 100.0,
                line.text
            ),
        )?;
    }

    header(out, "Lines sung well")?;
    for line in result
        .lines
        .iter()
        .filter(|l| !l.words.is_empty() && !struggling.iter().any(|s| s.line_index == l.line_index))
    {
        colored(
            out,
            Color::Green,
            &format!(
                "  {:>3}. {:>5.1}%  {}\n",
                line.line_index + 1,
                line.accuracy * 100.0,
                line.text
            ),
        )?;
    }
    Ok(())
}
