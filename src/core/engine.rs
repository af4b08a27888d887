use crate::config::TrainerConfig;
use crate::core::scorer::Scorer;
use crate::core::types::{LineResult, SessionResult, Transcript};
use crate::error::{Result, TrainerError};
use crate::learning::{ErrorDictionary, ErrorProfile};
use crate::lesson::{LessonGenerator, LessonPayload};
use crate::persistence::{validate_user_id, FileProfileStore, ProfileStore};
use tracing::{info, warn};

/// A scored session plus the fate of its profile merge. A failed merge never
/// costs the learner their score.
#[derive(Debug)]
pub struct Submission {
    pub result: SessionResult,
    pub persist_error: Option<TrainerError>,
}

impl Submission {
    pub fn is_persisted(&self) -> bool {
        self.persist_error.is_none()
    }
}

// Scoring, profile accumulation and lesson generation over one profile store.
pub struct Trainer<S: ProfileStore> {
    config: TrainerConfig,
    scorer: Scorer,
    lessons: LessonGenerator,
    store: S,
}

impl Trainer<FileProfileStore> {
    /// File-backed trainer rooted at `config.profile_dir`.
    pub fn from_config(config: TrainerConfig) -> Result<Self> {
        let store = FileProfileStore::new(config.profile_dir.clone(), config.lock_timeout());
        Self::with_store(config, store)
    }
}

impl<S: ProfileStore> Trainer<S> {
    pub fn with_store(config: TrainerConfig, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scorer: Scorer::new(&config),
            lessons: LessonGenerator::new(config.lesson_language.clone()),
            config,
            store,
        })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Scores without touching any profile.
    pub fn score(&self, reference: &Transcript, attempt: &Transcript) -> Result<SessionResult> {
        self.scorer.score(reference, attempt)
    }

    /// Scores an attempt and folds it into the user's profile.
    ///
    /// Scoring failures fail the call. The weighted score is settled and the
    /// merge applied while holding the user's exclusive lock; if that part
    /// fails the result is still returned, with the error attached.
    pub fn submit(
        &self,
        user_id: &str,
        reference: &Transcript,
        attempt: &Transcript,
    ) -> Result<Submission> {
        validate_user_id(user_id)?;
        let mut result = self.scorer.score(reference, attempt)?;

        let merged = self.store.update(user_id, |profile| {
            self.scorer.reweight(&mut result, profile);
            profile.merge_session(&result);
        });

        let persist_error = match merged {
            Ok(()) => {
                info!(
                    user_id,
                    accuracy = result.overall_accuracy,
                    weighted = result.weighted_score,
                    "session recorded"
                );
                None
            }
            Err(err) => {
                warn!(
                    user_id,
                    error = %err,
                    retryable = err.is_retryable(),
                    "session scored but not recorded"
                );
                Some(err)
            }
        };
        Ok(Submission {
            result,
            persist_error,
        })
    }

    pub fn lesson(
        &self,
        user_id: &str,
        num_words: usize,
        num_lines: usize,
    ) -> Result<LessonPayload> {
        self.store.inspect(user_id, |profile| {
            self.lessons.payload(profile, num_words, num_lines)
        })
    }

    pub fn profile(&self, user_id: &str) -> Result<ErrorProfile> {
        self.store.inspect(user_id, ErrorProfile::clone)
    }

    pub fn error_dictionary(&self, user_id: &str, min_errors: u64) -> Result<ErrorDictionary> {
        self.store
            .inspect(user_id, |profile| profile.error_dictionary(min_errors))
    }

    /// Lines of a result under the configured struggling threshold, worst first.
    pub fn struggling_lines<'a>(&self, result: &'a SessionResult) -> Vec<&'a LineResult> {
        let mut lines: Vec<_> = result
            .lines
            .iter()
            .filter(|l| !l.words.is_empty() && l.accuracy < self.config.struggling_line_threshold)
            .collect();
        lines.sort_by(|a, b| {
            a.accuracy
                .total_cmp(&b.accuracy)
                .then_with(|| a.line_index.cmp(&b.line_index))
        });
        lines
    }
}
