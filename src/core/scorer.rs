// File: src/core/scorer.rs
use crate::config::{TrainerConfig, WeightingPolicy};
use crate::core::aligner::{align, align_indices, script_cost, Step};
use crate::core::types::{
    normalize_word, LineResult, PhonemeSequence, SessionResult, Transcript, TranscriptLine,
    WordResult,
};
use crate::error::{Result, TrainerError};
use crate::learning::ErrorProfile;
use tracing::debug;

/// `1 - distance / max(len(reference), 1)`, clamped to [0, 1].
///
/// Nothing expected and nothing sung is vacuously correct; anything sung
/// against an empty reference scores 0.
pub fn word_accuracy<T: PartialEq>(reference: &[T], observed: &[T]) -> f64 {
    let distance = crate::core::aligner::edit_distance(reference, observed);
    accuracy_from_distance(distance, reference.len())
}

fn accuracy_from_distance(distance: usize, reference_len: usize) -> f64 {
    (1.0 - distance as f64 / reference_len.max(1) as f64).clamp(0.0, 1.0)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Unweighted mean of the words' accuracies. A line without words has
/// nothing to get wrong and scores 1.
pub fn line_accuracy(words: &[WordResult]) -> f64 {
    mean(words.iter().map(|w| w.accuracy)).unwrap_or(1.0)
}

/// Flat mean over every word of the song, so longer lines weigh more.
pub fn overall_accuracy(lines: &[LineResult]) -> f64 {
    mean(lines.iter().flat_map(|l| l.words.iter()).map(|w| w.accuracy)).unwrap_or(0.0)
}

/// The `n` lowest-scoring lines that contain words, ascending, earlier lines
/// first on ties.
pub fn worst_lines(lines: &[LineResult], n: usize) -> Vec<LineResult> {
    let mut scored: Vec<&LineResult> = lines.iter().filter(|l| !l.words.is_empty()).collect();
    scored.sort_by(|a, b| {
        a.accuracy
            .total_cmp(&b.accuracy)
            .then_with(|| a.line_index.cmp(&b.line_index))
    });
    scored.into_iter().take(n).cloned().collect()
}

/// Turns a reference lyric and a phonemized attempt into a [`SessionResult`].
/// Pure: the profile is only read, and only for weighting.
#[derive(Debug, Clone)]
pub struct Scorer {
    error_threshold: f64,
    weighting: WeightingPolicy,
    worst_line_count: usize,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new(&TrainerConfig::default())
    }
}

impl Scorer {
    pub fn new(config: &TrainerConfig) -> Self {
        Self {
            error_threshold: config.error_threshold,
            weighting: config.weighting.clone(),
            worst_line_count: config.worst_line_count,
        }
    }

    pub fn weighting(&self) -> &WeightingPolicy {
        &self.weighting
    }

    pub fn score_word(
        &self,
        word: &str,
        ref_phonemes: &PhonemeSequence,
        user_phonemes: &PhonemeSequence,
    ) -> WordResult {
        let alignment = align(ref_phonemes.symbols(), user_phonemes.symbols());
        let accuracy = accuracy_from_distance(script_cost(&alignment), ref_phonemes.len());
        WordResult {
            word: word.to_string(),
            ref_phonemes: ref_phonemes.clone(),
            user_phonemes: user_phonemes.clone(),
            accuracy,
            is_error: accuracy < self.error_threshold,
            alignment,
        }
    }

    /// Scores one line. Words are paired by aligning the normalized word
    /// texts; a reference word left without a partner is scored against
    /// silence and extra sung words are ignored.
    pub fn score_line(
        &self,
        line_index: usize,
        reference: &TranscriptLine,
        attempt: &TranscriptLine,
    ) -> LineResult {
        let ref_keys: Vec<String> = reference
            .words
            .iter()
            .map(|w| normalize_word(&w.word))
            .collect();
        let user_keys: Vec<String> = attempt
            .words
            .iter()
            .map(|w| normalize_word(&w.word))
            .collect();
        let silence = PhonemeSequence::default();

        let words: Vec<WordResult> = align_indices(&ref_keys, &user_keys)
            .into_iter()
            .filter_map(|step| {
                let (i, sung) = match step {
                    Step::Match(i, j) | Step::Substitute(i, j) => (i, &attempt.words[j].phonemes),
                    Step::Delete(i) => (i, &silence),
                    Step::Insert(_) => return None,
                };
                let target = &reference.words[i];
                Some(self.score_word(&target.word, &target.phonemes, sung))
            })
            .collect();

        LineResult {
            line_index,
            text: reference.display_text(),
            accuracy: line_accuracy(&words),
            words,
        }
    }

    pub fn score(&self, reference: &Transcript, attempt: &Transcript) -> Result<SessionResult> {
        if reference.lines.is_empty() {
            return Err(TrainerError::EmptyReference { what: "lines" });
        }
        if reference.word_count() == 0 {
            return Err(TrainerError::EmptyReference { what: "words" });
        }
        if reference.lines.len() != attempt.lines.len() {
            return Err(TrainerError::input_shape(format!(
                "reference has {} lines but the attempt has {}",
                reference.lines.len(),
                attempt.lines.len()
            )));
        }

        let lines: Vec<LineResult> = reference
            .lines
            .iter()
            .zip(&attempt.lines)
            .enumerate()
            .map(|(i, (r, a))| self.score_line(i, r, a))
            .collect();

        let overall = overall_accuracy(&lines);
        let avg_line_accuracy = mean(
            lines
                .iter()
                .filter(|l| !l.words.is_empty())
                .map(|l| l.accuracy),
        )
        .unwrap_or(overall);

        let mut result = SessionResult {
            overall_accuracy: overall,
            weighted_score: overall,
            avg_line_accuracy,
            worst_lines: worst_lines(&lines, self.worst_line_count),
            lines,
        };
        result.weighted_score = self.weighted_score(&result, None);
        debug!(
            lines = result.lines.len(),
            accuracy = result.overall_accuracy,
            errors = result.error_count(),
            "session scored"
        );
        Ok(result)
    }

    fn word_weight(&self, word: &WordResult, profile: Option<&ErrorProfile>) -> f64 {
        match (&self.weighting, profile) {
            (WeightingPolicy::Uniform, _) => 1.0,
            (WeightingPolicy::PhonemeLength, _) => word.ref_phonemes.len().max(1) as f64,
            (WeightingPolicy::WeakPhonemes { .. }, None) => 1.0,
            (WeightingPolicy::WeakPhonemes { weight, threshold }, Some(profile)) => {
                let symbols = word.ref_phonemes.symbols();
                if symbols.is_empty() {
                    return 1.0;
                }
                let weak = symbols
                    .iter()
                    .filter(|p| {
                        profile
                            .phoneme(p)
                            .map_or(false, |entry| entry.error_rate > *threshold)
                    })
                    .count();
                1.0 + (weight - 1.0) * weak as f64 / symbols.len() as f64
            }
        }
    }

    /// Weighted mean of word accuracies under the configured policy. With no
    /// profile the weak-phoneme policy has nothing to go on and counts every
    /// word once.
    pub fn weighted_score(&self, result: &SessionResult, profile: Option<&ErrorProfile>) -> f64 {
        let (num, den) = result.words().fold((0.0, 0.0), |(num, den), w| {
            let weight = self.word_weight(w, profile);
            (num + weight * w.accuracy, den + weight)
        });
        if den > 0.0 {
            num / den
        } else {
            result.overall_accuracy
        }
    }

    /// Settles the weighted score against the learner's profile as it stood
    /// before this session is merged.
    pub fn reweight(&self, result: &mut SessionResult, profile: &ErrorProfile) {
        result.weighted_score = self.weighted_score(result, Some(profile));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SpokenWord;

    fn line(words: &[(&str, &str)]) -> TranscriptLine {
        TranscriptLine::new(words.iter().map(|(w, p)| SpokenWord::new(w, p)).collect())
    }

    fn song(lines: Vec<TranscriptLine>) -> Transcript {
        Transcript::new(lines)
    }

    fn seq(s: &str) -> PhonemeSequence {
        PhonemeSequence::parse(s)
    }

    #[test]
    fn exact_word_is_perfect() {
        let scorer = Scorer::default();
        let w = scorer.score_word("cat", &seq("k a t"), &seq("k a t"));
        assert_eq!(w.accuracy, 1.0);
        assert!(!w.is_error);
    }

    #[test]
    fn rest_sung_as_kje_scores_zero() {
        let scorer = Scorer::default();
        let w = scorer.score_word("rest", &seq("r e s t"), &seq("k j e"));
        assert_eq!(w.accuracy, 0.0);
        assert!(w.is_error);
    }

    #[test]
    fn empty_reference_edge_cases() {
        let empty: [&str; 0] = [];
        assert_eq!(word_accuracy(&empty, &empty), 1.0);
        assert_eq!(word_accuracy(&empty, &["a"]), 0.0);
        assert_eq!(word_accuracy(&["a", "b"], &empty), 0.0);
    }

    #[test]
    fn single_deletion_approaches_one_as_words_grow() {
        let mut last = 0.0;
        for n in 1..8 {
            let reference: Vec<usize> = (0..n).collect();
            let acc = word_accuracy(&reference, &reference[..n - 1]);
            assert!(acc < 1.0 && acc >= 0.0);
            assert!(acc >= last);
            assert_eq!(acc, 1.0 - 1.0 / n as f64);
            last = acc;
        }
    }

    #[test]
    fn threshold_is_policy() {
        let config = TrainerConfig {
            error_threshold: 0.7,
            ..TrainerConfig::default()
        };
        let scorer = Scorer::new(&config);
        // one deletion out of four: 0.75
        assert!(!scorer.score_word("rest", &seq("r e s t"), &seq("r e s")).is_error);
        assert!(Scorer::default().score_word("rest", &seq("r e s t"), &seq("r e s")).is_error);
    }

    #[test]
    fn missing_word_contributes_zero() {
        let scorer = Scorer::default();
        let reference = song(vec![line(&[
            ("hello", "h e l o"),
            ("my", "m a i"),
            ("friend", "f r e n d"),
        ])]);
        let attempt = song(vec![line(&[("hello", "h e l o"), ("friend", "f r e n d")])]);
        let result = scorer.score(&reference, &attempt).unwrap();
        let words = &result.lines[0].words;
        assert_eq!(words.len(), 3);
        assert_eq!(words[1].word, "my");
        assert!(words[1].user_phonemes.is_empty());
        assert_eq!(words[1].accuracy, 0.0);
        assert!((result.lines[0].accuracy - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn extra_sung_words_are_ignored() {
        let scorer = Scorer::default();
        let reference = song(vec![line(&[("la", "l a")])]);
        let attempt = song(vec![line(&[("oh", "o"), ("la", "l a")])]);
        let result = scorer.score(&reference, &attempt).unwrap();
        assert_eq!(result.lines[0].words.len(), 1);
        assert_eq!(result.overall_accuracy, 1.0);
    }

    #[test]
    fn overall_is_flat_over_words() {
        let scorer = Scorer::default();
        let reference = song(vec![
            line(&[("a", "a")]),
            line(&[("b", "b"), ("c", "c"), ("d", "d")]),
        ]);
        let attempt = song(vec![
            line(&[("a", "x")]),
            line(&[("b", "b"), ("c", "c"), ("d", "d")]),
        ]);
        let result = scorer.score(&reference, &attempt).unwrap();
        assert_eq!(result.overall_accuracy, 0.75);
        assert_eq!(result.avg_line_accuracy, 0.5);
        assert_eq!(result.weighted_score, result.overall_accuracy);
    }

    #[test]
    fn worst_lines_are_three_lowest_ascending() {
        let scorer = Scorer::default();
        let reference = song(vec![
            line(&[("a", "a b")]),
            line(&[("b", "a b")]),
            line(&[("c", "a b")]),
            line(&[("d", "a b")]),
            line(&[("e", "a b")]),
        ]);
        let attempt = song(vec![
            line(&[("a", "a b")]),
            line(&[("b", "a")]),
            line(&[("c", "x y")]),
            line(&[("d", "a")]),
            line(&[("e", "a b")]),
        ]);
        let result = scorer.score(&reference, &attempt).unwrap();
        let order: Vec<usize> = result.worst_lines.iter().map(|l| l.line_index).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn empty_and_mismatched_inputs_fail() {
        let scorer = Scorer::default();
        assert!(matches!(
            scorer.score(&song(vec![]), &song(vec![])),
            Err(TrainerError::EmptyReference { what: "lines" })
        ));
        assert!(matches!(
            scorer.score(&song(vec![line(&[])]), &song(vec![line(&[])])),
            Err(TrainerError::EmptyReference { what: "words" })
        ));
        let reference = song(vec![line(&[("a", "a")]), line(&[("b", "b")])]);
        let attempt = song(vec![line(&[("a", "a")])]);
        assert!(matches!(
            scorer.score(&reference, &attempt),
            Err(TrainerError::InputShape { .. })
        ));
    }

    #[test]
    fn phoneme_length_weighting_favours_long_words() {
        let config = TrainerConfig {
            weighting: WeightingPolicy::PhonemeLength,
            ..TrainerConfig::default()
        };
        let scorer = Scorer::new(&config);
        let reference = song(vec![line(&[("a", "a"), ("rest", "r e s t")])]);
        let attempt = song(vec![line(&[("a", "x"), ("rest", "r e s t")])]);
        let result = scorer.score(&reference, &attempt).unwrap();
        assert_eq!(result.overall_accuracy, 0.5);
        assert_eq!(result.weighted_score, 0.8);
    }

    #[test]
    fn weak_phoneme_weighting_uses_profile() {
        let config = TrainerConfig {
            weighting: WeightingPolicy::WeakPhonemes {
                weight: 3.0,
                threshold: 0.4,
            },
            ..TrainerConfig::default()
        };
        let scorer = Scorer::new(&config);
        let reference = song(vec![line(&[("ra", "r a"), ("ma", "m a")])]);
        let attempt = song(vec![line(&[("ra", "l a"), ("ma", "m a")])]);
        let mut result = scorer.score(&reference, &attempt).unwrap();
        assert_eq!(result.weighted_score, result.overall_accuracy);

        let mut profile = ErrorProfile::new();
        profile.merge_session(&result);
        scorer.reweight(&mut result, &profile);
        // "r" is weak (1/1), "a" and "m" are not: ra weighs 2, ma weighs 1.
        assert!((result.weighted_score - (2.0 * 0.5 + 1.0) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn wordless_lines_score_vacuously() {
        let scorer = Scorer::default();
        let reference = song(vec![
            TranscriptLine {
                text: "[Chorus]".into(),
                words: vec![],
            },
            line(&[("la", "l a")]),
        ]);
        let attempt = song(vec![TranscriptLine::default(), line(&[("la", "l")])]);
        let result = scorer.score(&reference, &attempt).unwrap();
        assert_eq!(result.lines[0].accuracy, 1.0);
        assert_eq!(result.avg_line_accuracy, 0.5);
        assert_eq!(result.worst_lines.len(), 1);
        assert_eq!(result.worst_lines[0].line_index, 1);
    }

    mod properties {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn singing_the_reference_is_perfect(
                symbols in prop::collection::vec("[a-z]{1,2}", 0..12)
            ) {
                prop_assert_eq!(word_accuracy(&symbols, &symbols), 1.0);
            }

            #[test]
            fn accuracy_stays_in_unit_range(
                a in prop::collection::vec(0u8..5, 0..10),
                b in prop::collection::vec(0u8..5, 0..10),
            ) {
                let acc = word_accuracy(&a, &b);
                prop_assert!((0.0..=1.0).contains(&acc));
            }
        }
    }
}
