// src/core/types.rs
use crate::core::aligner::EditOp;
use crate::error::TrainerError;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// An ordered run of opaque phoneme symbols. Empty means the word was not
/// detected in the attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PhonemeSequence(Vec<String>);

impl PhonemeSequence {
    pub fn new(symbols: Vec<String>) -> Self {
        Self(symbols)
    }

    /// Splits a whitespace separated phonemizer output, e.g. `"k a t"`.
    pub fn parse(spaced: &str) -> Self {
        Self(spaced.split_whitespace().map(str::to_string).collect())
    }

    pub fn symbols(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for PhonemeSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

impl From<&str> for PhonemeSequence {
    fn from(spaced: &str) -> Self {
        Self::parse(spaced)
    }
}

// Phonemizers hand us either a list of symbols or one spaced string.
impl<'de> Deserialize<'de> for PhonemeSequence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Spaced(String),
            Symbols(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Spaced(s) => Self::parse(&s),
            Raw::Symbols(symbols) => Self(symbols),
        })
    }
}

/// Canonical key for a word: diacritics folded, lowercased, surrounding
/// punctuation removed. "Café!" and "cafe" land on the same profile entry.
pub fn normalize_word(word: &str) -> String {
    word.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_string()
}

/// Canonical key for a lyric line, built from its normalized words.
pub fn normalize_line(text: &str) -> String {
    text.split_whitespace()
        .map(normalize_word)
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// --- Input contract: phonemized lyric and attempt ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpokenWord {
    pub word: String,
    #[serde(default)]
    pub phonemes: PhonemeSequence,
}

impl SpokenWord {
    pub fn new(word: &str, phonemes: &str) -> Self {
        Self {
            word: word.to_string(),
            phonemes: PhonemeSequence::parse(phonemes),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLine {
    /// Display text. When absent the words are joined with spaces.
    #[serde(default)]
    pub text: String,
    pub words: Vec<SpokenWord>,
}

impl TranscriptLine {
    pub fn new(words: Vec<SpokenWord>) -> Self {
        let text = words
            .iter()
            .map(|w| w.word.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Self { text, words }
    }

    pub fn display_text(&self) -> String {
        if self.text.trim().is_empty() {
            self.words
                .iter()
                .map(|w| w.word.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            self.text.clone()
        }
    }
}

/// A word-segmented, phonemized song: the reference lyric or the learner's
/// attempt at it. Both sides share this shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub lines: Vec<TranscriptLine>,
}

impl Transcript {
    pub fn new(lines: Vec<TranscriptLine>) -> Self {
        Self { lines }
    }

    pub fn word_count(&self) -> usize {
        self.lines.iter().map(|l| l.words.len()).sum()
    }
}

/// One grading request as handed over by the speech collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInput {
    pub reference: Transcript,
    pub attempt: Transcript,
}

impl SessionInput {
    pub fn from_path(path: &Path) -> crate::error::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TrainerError::io("reading session file", e))?;
        serde_json::from_str(&raw).map_err(|e| TrainerError::json("parsing session file", e))
    }
}

// --- Scoring output ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordResult {
    pub word: String,
    pub ref_phonemes: PhonemeSequence,
    pub user_phonemes: PhonemeSequence,
    pub accuracy: f64,
    pub is_error: bool,
    /// Phoneme-level edit script from reference to attempt.
    #[serde(default)]
    pub alignment: Vec<EditOp<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineResult {
    pub line_index: usize,
    pub text: String,
    pub accuracy: f64,
    pub words: Vec<WordResult>,
}

/// Outcome of one scored attempt at one song. Never mutated after scoring,
/// apart from the weighted score which is settled against the profile the
/// attempt is merged into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    pub overall_accuracy: f64,
    pub weighted_score: f64,
    pub avg_line_accuracy: f64,
    pub lines: Vec<LineResult>,
    pub worst_lines: Vec<LineResult>,
}

impl SessionResult {
    pub fn words(&self) -> impl Iterator<Item = &WordResult> {
        self.lines.iter().flat_map(|l| l.words.iter())
    }

    pub fn error_count(&self) -> usize {
        self.words().filter(|w| w.is_error).count()
    }

    /// The shape the web layer renders.
    pub fn payload(&self) -> SessionPayload {
        SessionPayload {
            accuracy: self.overall_accuracy,
            weighted_score: self.weighted_score,
            avg_line_accuracy: self.avg_line_accuracy,
            worst_lines: self
                .worst_lines
                .iter()
                .map(|l| WorstLine {
                    line: l.line_index + 1,
                    text: l.text.clone(),
                    accuracy: l.accuracy,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorstLine {
    /// 1-based, as shown to the learner.
    pub line: usize,
    pub text: String,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub accuracy: f64,
    pub weighted_score: f64,
    pub avg_line_accuracy: f64,
    pub worst_lines: Vec<WorstLine>,
}
