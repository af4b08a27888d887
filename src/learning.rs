// File: src/learning.rs
//! The learner's accumulated error profile and the session merge.
use crate::core::aligner::{align, EditOp};
use crate::core::types::{
    normalize_line, normalize_word, PhonemeSequence, SessionResult, WordResult,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Histogram key recorded when a reference phoneme was not sung at all.
pub const DELETION_SENTINEL: &str = "<del>";

pub const SCHEMA_VERSION: u32 = 1;

fn rate(errors: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        errors as f64 / count as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeakWordEntry {
    pub word: String,
    pub count: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub ref_phonemes: PhonemeSequence,
    /// Phonemes of the most recent mispronunciation.
    pub common_user_phonemes: PhonemeSequence,
}

impl WeakWordEntry {
    fn new(word: String) -> Self {
        Self {
            word,
            count: 0,
            errors: 0,
            error_rate: 0.0,
            ref_phonemes: PhonemeSequence::default(),
            common_user_phonemes: PhonemeSequence::default(),
        }
    }

    fn record(&mut self, result: &WordResult) {
        self.count += 1;
        if result.is_error {
            self.errors += 1;
            self.ref_phonemes = result.ref_phonemes.clone();
            self.common_user_phonemes = result.user_phonemes.clone();
        } else if self.ref_phonemes.is_empty() {
            self.ref_phonemes = result.ref_phonemes.clone();
        }
        self.error_rate = rate(self.errors, self.count);
    }

    /// Worst first: higher error rate, then more evidence, then alphabetical.
    pub fn ranking_cmp(&self, other: &Self) -> Ordering {
        other
            .error_rate
            .total_cmp(&self.error_rate)
            .then_with(|| other.count.cmp(&self.count))
            .then_with(|| self.word.cmp(&other.word))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeakPhonemeEntry {
    pub phoneme: String,
    pub total_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    /// Observed phoneme (or [`DELETION_SENTINEL`]) -> occurrences.
    pub substitutions: BTreeMap<String, u64>,
}

impl WeakPhonemeEntry {
    fn new(phoneme: String) -> Self {
        Self {
            phoneme,
            total_count: 0,
            error_count: 0,
            error_rate: 0.0,
            substitutions: BTreeMap::new(),
        }
    }

    fn record(&mut self, observed: Option<&str>) {
        self.total_count += 1;
        if let Some(observed) = observed {
            self.error_count += 1;
            *self.substitutions.entry(observed.to_string()).or_insert(0) += 1;
        }
        self.error_rate = rate(self.error_count, self.total_count);
    }

    /// Most frequent replacement, ties going to the smaller symbol.
    pub fn most_common_substitution(&self) -> Option<&str> {
        self.substitutions
            .iter()
            .min_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)))
            .map(|(symbol, _)| symbol.as_str())
    }
}

/// Accuracy history of one lyric line across sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeakLineEntry {
    pub text: String,
    pub attempts: u64,
    pub total_accuracy: f64,
    pub mean_accuracy: f64,
    pub last_accuracy: f64,
}

impl WeakLineEntry {
    fn new(text: String) -> Self {
        Self {
            text,
            attempts: 0,
            total_accuracy: 0.0,
            mean_accuracy: 0.0,
            last_accuracy: 0.0,
        }
    }

    fn record(&mut self, text: &str, accuracy: f64) {
        self.text = text.to_string();
        self.attempts += 1;
        self.total_accuracy += accuracy;
        self.last_accuracy = accuracy;
        self.mean_accuracy = self.total_accuracy / self.attempts as f64;
    }

    pub fn error_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            (1.0 - self.mean_accuracy).clamp(0.0, 1.0)
        }
    }

    /// Same ordering policy as words: worst first, more attempts, then text.
    pub fn ranking_cmp(&self, other: &Self) -> Ordering {
        other
            .error_rate()
            .total_cmp(&self.error_rate())
            .then_with(|| other.attempts.cmp(&self.attempts))
            .then_with(|| self.text.cmp(&other.text))
    }
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Per-user pronunciation weaknesses, accumulated over every merged session.
///
/// Maps are ordered so that the serialized document is byte-stable across
/// load/save cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorProfile {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub weak_words: BTreeMap<String, WeakWordEntry>,
    #[serde(default)]
    pub weak_phonemes: BTreeMap<String, WeakPhonemeEntry>,
    #[serde(default)]
    pub weak_lines: BTreeMap<String, WeakLineEntry>,
}

impl Default for ErrorProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorProfile {
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            weak_words: BTreeMap::new(),
            weak_phonemes: BTreeMap::new(),
            weak_lines: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.weak_words.is_empty() && self.weak_phonemes.is_empty() && self.weak_lines.is_empty()
    }

    pub fn word(&self, word: &str) -> Option<&WeakWordEntry> {
        self.weak_words.get(&normalize_word(word))
    }

    pub fn phoneme(&self, phoneme: &str) -> Option<&WeakPhonemeEntry> {
        self.weak_phonemes.get(phoneme)
    }

    /// Folds one scored session into the profile.
    pub fn merge_session(&mut self, result: &SessionResult) {
        for line in &result.lines {
            if line.words.is_empty() {
                continue;
            }
            let key = normalize_line(&line.text);
            if !key.is_empty() {
                self.weak_lines
                    .entry(key.clone())
                    .or_insert_with(|| WeakLineEntry::new(key))
                    .record(&line.text, line.accuracy);
            }
            for word in &line.words {
                self.merge_word(word);
            }
        }
        debug!(
            words = self.weak_words.len(),
            phonemes = self.weak_phonemes.len(),
            errors = result.error_count(),
            "merged session into error profile"
        );
    }

    fn merge_word(&mut self, word: &WordResult) {
        let key = normalize_word(&word.word);
        if !key.is_empty() {
            self.weak_words
                .entry(key.clone())
                .or_insert_with(|| WeakWordEntry::new(key))
                .record(word);
        }

        // Results read back from JSON may lack the script.
        let recomputed;
        let script: &[EditOp<String>] = if word.alignment.is_empty()
            && !(word.ref_phonemes.is_empty() && word.user_phonemes.is_empty())
        {
            recomputed = align(word.ref_phonemes.symbols(), word.user_phonemes.symbols());
            &recomputed
        } else {
            &word.alignment
        };

        for op in script {
            let (reference, observed) = match op {
                EditOp::Match { reference } => (reference, None),
                EditOp::Substitute { reference, observed } => (reference, Some(observed.as_str())),
                EditOp::Delete { reference } => (reference, Some(DELETION_SENTINEL)),
                // Nothing in the reference to charge an insertion to.
                EditOp::Insert { .. } => continue,
            };
            self.weak_phonemes
                .entry(reference.clone())
                .or_insert_with(|| WeakPhonemeEntry::new(reference.clone()))
                .record(observed);
        }
    }

    /// Recomputes every derived rate from its counters. Applied after loading
    /// so a hand-edited or older document can never carry a stale rate.
    pub fn normalize(&mut self) {
        for entry in self.weak_words.values_mut() {
            if entry.errors > entry.count {
                warn!(
                    word = %entry.word,
                    errors = entry.errors,
                    count = entry.count,
                    "clamping word errors to count"
                );
                entry.errors = entry.count;
            }
            entry.error_rate = rate(entry.errors, entry.count);
        }
        for entry in self.weak_phonemes.values_mut() {
            if entry.error_count > entry.total_count {
                warn!(phoneme = %entry.phoneme, "clamping phoneme errors to total");
                entry.error_count = entry.total_count;
            }
            entry.error_rate = rate(entry.error_count, entry.total_count);
        }
        for entry in self.weak_lines.values_mut() {
            entry.mean_accuracy = if entry.attempts == 0 {
                0.0
            } else {
                entry.total_accuracy / entry.attempts as f64
            };
        }
        if self.schema_version == 0 {
            self.schema_version = SCHEMA_VERSION;
        }
    }

    /// Phonemes with an error rate above `threshold`, worst first.
    pub fn weak_phoneme_list(&self, threshold: f64) -> Vec<&WeakPhonemeEntry> {
        let mut weak: Vec<_> = self
            .weak_phonemes
            .values()
            .filter(|p| p.total_count > 0 && p.error_rate > threshold)
            .collect();
        weak.sort_by(|a, b| {
            b.error_rate
                .total_cmp(&a.error_rate)
                .then_with(|| a.phoneme.cmp(&b.phoneme))
        });
        weak
    }

    /// Words at or above `threshold` seen at least `min_count` times, worst first.
    pub fn weak_word_list(&self, threshold: f64, min_count: u64) -> Vec<&WeakWordEntry> {
        let mut weak: Vec<_> = self
            .weak_words
            .values()
            .filter(|w| w.count >= min_count && w.error_rate >= threshold)
            .collect();
        weak.sort_by(|a, b| a.ranking_cmp(b));
        weak
    }

    pub fn most_common_substitution(&self, phoneme: &str) -> Option<&str> {
        self.weak_phonemes
            .get(phoneme)
            .and_then(WeakPhonemeEntry::most_common_substitution)
    }

    /// Flattened view of the learner's mistakes for downstream relearning.
    pub fn error_dictionary(&self, min_errors: u64) -> ErrorDictionary {
        let mut weak_phonemes: Vec<PhonemeSummary> = self
            .weak_phonemes
            .values()
            .filter(|p| p.total_count > 0 && p.error_count >= min_errors.max(1))
            .map(|p| PhonemeSummary {
                phoneme: p.phoneme.clone(),
                error_rate: p.error_rate,
                total_count: p.total_count,
                error_count: p.error_count,
                most_common_substitution: p.most_common_substitution().map(str::to_string),
            })
            .collect();
        weak_phonemes.sort_by(|a, b| {
            b.error_rate
                .total_cmp(&a.error_rate)
                .then_with(|| a.phoneme.cmp(&b.phoneme))
        });

        ErrorDictionary {
            weak_phonemes,
            weak_words: self
                .weak_word_list(ErrorDictionary::WORD_THRESHOLD, min_errors)
                .into_iter()
                .cloned()
                .collect(),
            phoneme_substitutions: self
                .weak_phonemes
                .iter()
                .filter(|(_, p)| !p.substitutions.is_empty())
                .map(|(k, p)| (k.clone(), p.substitutions.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhonemeSummary {
    pub phoneme: String,
    pub error_rate: f64,
    pub total_count: u64,
    pub error_count: u64,
    pub most_common_substitution: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDictionary {
    pub weak_phonemes: Vec<PhonemeSummary>,
    pub weak_words: Vec<WeakWordEntry>,
    pub phoneme_substitutions: BTreeMap<String, BTreeMap<String, u64>>,
}

impl ErrorDictionary {
    pub const WORD_THRESHOLD: f64 = 0.2;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::LineResult;

    fn word_result(word: &str, reference: &str, user: &str, is_error: bool) -> WordResult {
        let ref_phonemes = PhonemeSequence::parse(reference);
        let user_phonemes = PhonemeSequence::parse(user);
        WordResult {
            word: word.to_string(),
            alignment: align(ref_phonemes.symbols(), user_phonemes.symbols()),
            accuracy: if is_error { 0.0 } else { 1.0 },
            ref_phonemes,
            user_phonemes,
            is_error,
        }
    }

    fn session(words: Vec<WordResult>) -> SessionResult {
        let line = LineResult {
            line_index: 0,
            text: words.iter().map(|w| w.word.clone()).collect::<Vec<_>>().join(" "),
            accuracy: 0.5,
            words,
        };
        SessionResult {
            overall_accuracy: 0.5,
            weighted_score: 0.5,
            avg_line_accuracy: 0.5,
            lines: vec![line.clone()],
            worst_lines: vec![line],
        }
    }

    #[test]
    fn rest_mispronounced_once() {
        let mut profile = ErrorProfile::new();
        profile.merge_session(&session(vec![word_result("rest", "r e s t", "k j e", true)]));

        let entry = profile.word("rest").unwrap();
        assert_eq!(entry.count, 1);
        assert_eq!(entry.errors, 1);
        assert_eq!(entry.error_rate, 1.0);
        assert_eq!(entry.common_user_phonemes, PhonemeSequence::parse("k j e"));
    }

    #[test]
    fn replaying_a_session_doubles_counts() {
        let result = session(vec![
            word_result("rest", "r e s t", "k j e", true),
            word_result("cat", "k a t", "k a t", false),
        ]);
        let mut profile = ErrorProfile::new();
        profile.merge_session(&result);
        profile.merge_session(&result);

        let rest = profile.word("rest").unwrap();
        assert_eq!((rest.count, rest.errors), (2, 2));
        let cat = profile.word("cat").unwrap();
        assert_eq!((cat.count, cat.errors), (2, 0));
        assert_eq!(cat.error_rate, 0.0);
        assert_eq!(profile.weak_lines.len(), 1);
        assert_eq!(profile.weak_lines["rest cat"].attempts, 2);
    }

    #[test]
    fn word_keys_merge_across_casing() {
        let mut profile = ErrorProfile::new();
        profile.merge_session(&session(vec![word_result("Rest,", "r e s t", "r e s t", false)]));
        profile.merge_session(&session(vec![word_result("rest", "r e s t", "r e", true)]));
        assert_eq!(profile.weak_words.len(), 1);
        let entry = profile.word("REST").unwrap();
        assert_eq!(entry.count, 2);
        assert_eq!(entry.error_rate, 0.5);
    }

    #[test]
    fn most_recent_mismatch_wins() {
        let mut profile = ErrorProfile::new();
        profile.merge_session(&session(vec![word_result("rest", "r e s t", "k j e", true)]));
        profile.merge_session(&session(vec![word_result("rest", "r e s t", "r e s", true)]));
        profile.merge_session(&session(vec![word_result("rest", "r e s t", "r e s t", false)]));
        assert_eq!(
            profile.word("rest").unwrap().common_user_phonemes,
            PhonemeSequence::parse("r e s")
        );
    }

    #[test]
    fn phoneme_substitutions_and_deletions_are_histogrammed() {
        let mut profile = ErrorProfile::new();
        // r->k, e->j, s->e, t deleted
        profile.merge_session(&session(vec![word_result("rest", "r e s t", "k j e", true)]));
        let r = profile.phoneme("r").unwrap();
        assert_eq!((r.total_count, r.error_count), (1, 1));
        assert_eq!(r.substitutions.get("k"), Some(&1));
        let t = profile.phoneme("t").unwrap();
        assert_eq!(t.substitutions.get(DELETION_SENTINEL), Some(&1));
    }

    #[test]
    fn insertions_do_not_touch_phoneme_entries() {
        let mut profile = ErrorProfile::new();
        profile.merge_session(&session(vec![word_result("kt", "k t", "k a t", true)]));
        assert!(profile.phoneme("a").is_none());
        assert_eq!(profile.phoneme("k").unwrap().error_count, 0);
        assert_eq!(profile.phoneme("t").unwrap().error_count, 0);
    }

    #[test]
    fn missing_script_is_recomputed() {
        let mut word = word_result("rest", "r e s t", "r e s", true);
        word.alignment.clear();
        let mut profile = ErrorProfile::new();
        profile.merge_session(&session(vec![word]));
        assert_eq!(profile.phoneme("t").unwrap().error_count, 1);
        assert_eq!(profile.phoneme("r").unwrap().error_count, 0);
    }

    #[test]
    fn rates_always_match_counters() {
        let mut profile = ErrorProfile::new();
        for user in ["k a t", "k a", "g a t", "k a t"] {
            let is_error = user != "k a t";
            profile.merge_session(&session(vec![word_result("cat", "k a t", user, is_error)]));
        }
        for w in profile.weak_words.values() {
            assert!(w.errors <= w.count);
            assert_eq!(w.error_rate, w.errors as f64 / w.count as f64);
        }
        for p in profile.weak_phonemes.values() {
            assert!(p.error_count <= p.total_count);
            assert_eq!(p.error_rate, p.error_count as f64 / p.total_count as f64);
        }
    }

    #[test]
    fn normalize_repairs_stale_rates() {
        let mut profile = ErrorProfile::new();
        profile.merge_session(&session(vec![word_result("rest", "r e s t", "k j e", true)]));
        profile.weak_words.get_mut("rest").unwrap().error_rate = 0.1;
        profile.weak_phonemes.get_mut("r").unwrap().error_rate = 0.3;
        profile.normalize();
        assert_eq!(profile.word("rest").unwrap().error_rate, 1.0);
        assert_eq!(profile.phoneme("r").unwrap().error_rate, 1.0);
    }

    #[test]
    fn substitution_ties_go_to_smaller_symbol() {
        let mut entry = WeakPhonemeEntry::new("r".into());
        entry.record(Some("l"));
        entry.record(Some("k"));
        entry.record(Some("w"));
        entry.record(Some("w"));
        assert_eq!(entry.most_common_substitution(), Some("w"));
        entry.record(Some("k"));
        assert_eq!(entry.most_common_substitution(), Some("k"));
    }

    #[test]
    fn weak_lists_are_filtered_and_ranked() {
        let mut profile = ErrorProfile::new();
        profile.merge_session(&session(vec![
            word_result("rest", "r e s t", "k j e", true),
            word_result("cat", "k a t", "k a t", false),
        ]));
        let words: Vec<_> = profile
            .weak_word_list(0.3, 1)
            .iter()
            .map(|w| w.word.as_str())
            .collect();
        assert_eq!(words, vec!["rest"]);

        let phonemes: Vec<_> = profile
            .weak_phoneme_list(0.4)
            .iter()
            .map(|p| p.phoneme.as_str())
            .collect();
        // "k", "a" and the cat "t" are clean; "t" in rest was deleted -> 1/2.
        assert_eq!(phonemes, vec!["e", "r", "s", "t"]);
    }

    #[test]
    fn error_dictionary_exports_substitutions() {
        let mut profile = ErrorProfile::new();
        profile.merge_session(&session(vec![word_result("rest", "r e s t", "k j e", true)]));
        let dict = profile.error_dictionary(1);
        assert_eq!(dict.weak_words.len(), 1);
        assert_eq!(dict.weak_phonemes.len(), 4);
        assert_eq!(dict.phoneme_substitutions["r"]["k"], 1);
        let r = dict.weak_phonemes.iter().find(|p| p.phoneme == "r").unwrap();
        assert_eq!(r.most_common_substitution.as_deref(), Some("k"));
    }

    #[test]
    fn older_documents_without_lines_still_load() {
        let raw = r#"{"weak_words":{},"weak_phonemes":{}}"#;
        let profile: ErrorProfile = serde_json::from_str(raw).unwrap();
        assert_eq!(profile.schema_version, SCHEMA_VERSION);
        assert!(profile.weak_lines.is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_word() -> impl Strategy<Value = WordResult> {
            (
                prop::sample::select(vec!["rest", "cat", "night", "la"]),
                prop::collection::vec(prop::sample::select(vec!["a", "e", "k", "t"]), 0..5),
                prop::collection::vec(prop::sample::select(vec!["a", "e", "k", "t"]), 0..5),
            )
                .prop_map(|(word, reference, user)| {
                    let is_error = reference != user;
                    word_result(word, &reference.join(" "), &user.join(" "), is_error)
                })
        }

        proptest! {
            #[test]
            fn rates_always_match_counters(
                sessions in prop::collection::vec(prop::collection::vec(arb_word(), 1..4), 1..6)
            ) {
                let mut profile = ErrorProfile::new();
                for words in sessions {
                    profile.merge_session(&session(words));
                }
                for w in profile.weak_words.values() {
                    prop_assert!(w.errors <= w.count);
                    prop_assert_eq!(w.error_rate, w.errors as f64 / w.count as f64);
                }
                for p in profile.weak_phonemes.values() {
                    prop_assert!(p.error_count <= p.total_count);
                    prop_assert_eq!(p.error_rate, p.error_count as f64 / p.total_count as f64);
                    prop_assert_eq!(p.substitutions.values().sum::<u64>(), p.error_count);
                }
            }
        }
    }
}
