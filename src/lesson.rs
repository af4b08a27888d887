// File: src/lesson.rs
//! Practice items projected from the current error profile.
use crate::learning::{ErrorProfile, WeakLineEntry, WeakWordEntry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub question: String,
    pub response: String,
    /// The word (or line, for line lessons) being practiced.
    pub target_word: String,
    pub error_rate: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LessonPayload {
    pub conversations: Vec<Conversation>,
}

/// Builds template conversations for the learner's weakest words and lines.
/// Output depends only on the profile snapshot and the arguments, so an
/// unchanged profile always yields the same lesson.
#[derive(Debug, Clone)]
pub struct LessonGenerator {
    language: String,
}

impl LessonGenerator {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Word conversations first, then line conversations.
    pub fn generate(
        &self,
        profile: &ErrorProfile,
        num_words: usize,
        num_lines: usize,
    ) -> Vec<Conversation> {
        let mut conversations = self.generate_words(profile, num_words);
        conversations.extend(self.generate_lines(profile, num_lines));
        conversations
    }

    pub fn payload(
        &self,
        profile: &ErrorProfile,
        num_words: usize,
        num_lines: usize,
    ) -> LessonPayload {
        LessonPayload {
            conversations: self.generate(profile, num_words, num_lines),
        }
    }

    pub fn generate_words(&self, profile: &ErrorProfile, num_words: usize) -> Vec<Conversation> {
        ranked_words(profile)
            .into_iter()
            .take(num_words)
            .map(|entry| self.word_conversation(entry))
            .collect()
    }

    pub fn generate_lines(&self, profile: &ErrorProfile, num_lines: usize) -> Vec<Conversation> {
        ranked_lines(profile)
            .into_iter()
            .take(num_lines)
            .map(|entry| self.line_conversation(entry))
            .collect()
    }

    fn word_conversation(&self, entry: &WeakWordEntry) -> Conversation {
        Conversation {
            question: format!(
                "In {}, can you use the word '{}' in a sentence?",
                self.language, entry.word
            ),
            response: format!("Here's an example with '{0}' in it: {0}.", entry.word),
            target_word: entry.word.clone(),
            error_rate: entry.error_rate,
            count: entry.count,
        }
    }

    fn line_conversation(&self, entry: &WeakLineEntry) -> Conversation {
        Conversation {
            question: format!("In {}, can you sing this line back to me?", self.language),
            response: entry.text.clone(),
            target_word: entry.text.clone(),
            error_rate: entry.error_rate(),
            count: entry.attempts,
        }
    }
}

/// Words ever mispronounced, worst first.
pub fn ranked_words(profile: &ErrorProfile) -> Vec<&WeakWordEntry> {
    let mut words: Vec<_> = profile
        .weak_words
        .values()
        .filter(|w| w.error_rate > 0.0)
        .collect();
    words.sort_by(|a, b| a.ranking_cmp(b));
    words
}

/// Lines with any accuracy shortfall, worst first.
pub fn ranked_lines(profile: &ErrorProfile) -> Vec<&WeakLineEntry> {
    let mut lines: Vec<_> = profile
        .weak_lines
        .values()
        .filter(|l| l.error_rate() > 0.0)
        .collect();
    lines.sort_by(|a, b| a.ranking_cmp(b));
    lines
}
