use crate::models::question_set::TranscriptScore;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

const COMMON_WORDS: &str = include_str!("common_words.txt");

const READABILITY_BAND: (f64, f64) = (55.0, 90.0);
const READABILITY_FALLOFF: f64 = 40.0;
const VOCABULARY_TARGET: f64 = 0.6;
const SIMILARITY_BAND: (f64, f64) = (0.15, 0.60);

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z]+(?:'[A-Za-z]+)?").expect("static regex"))
}

fn speaker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[A-Z][A-Za-z .'-]{0,30}:\s*").expect("static regex"))
}

fn common_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| COMMON_WORDS.split_whitespace().collect())
}

/// Transcript text with `Speaker:` labels removed from each line.
pub fn spoken_text(transcript: &str) -> String {
    transcript
        .lines()
        .map(|line| speaker_regex().replace(line, "").into_owned())
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn words(text: &str) -> Vec<String> {
    word_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn sentence_count(text: &str) -> usize {
    text.split(|c| matches!(c, '.' | '!' | '?' | '\n'))
        .filter(|s| s.chars().any(|c| c.is_alphabetic()))
        .count()
        .max(1)
}

pub fn syllables(word: &str) -> usize {
    let letters: Vec<char> = word
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if letters.is_empty() {
        return 0;
    }

    let is_vowel = |c: char| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
    let mut count = 0;
    let mut prev_vowel = false;
    for &c in &letters {
        let vowel = is_vowel(c);
        if vowel && !prev_vowel {
            count += 1;
        }
        prev_vowel = vowel;
    }

    // silent trailing e ("make"), but not "-le" ("table")
    let n = letters.len();
    if count > 1 && letters[n - 1] == 'e' && !(n >= 2 && letters[n - 2] == 'l') {
        count -= 1;
    }
    count.max(1)
}

/// Flesch Reading Ease of the spoken text. Higher is easier.
pub fn readability(text: &str) -> f64 {
    let spoken = spoken_text(text);
    let tokens = words(&spoken);
    if tokens.is_empty() {
        return 0.0;
    }
    let word_count = tokens.len() as f64;
    let sentences = sentence_count(&spoken) as f64;
    let syllable_count: usize = tokens.iter().map(|w| syllables(w)).sum();
    206.835 - 1.015 * (word_count / sentences) - 84.6 * (syllable_count as f64 / word_count)
}

/// 1.0 inside `[lo, hi]`, falling linearly to 0.0 at `falloff` outside either bound.
fn band_score(value: f64, lo: f64, hi: f64, falloff: f64) -> f64 {
    let distance = if value < lo {
        lo - value
    } else if value > hi {
        value - hi
    } else {
        0.0
    };
    if falloff <= 0.0 {
        return if distance == 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - distance / falloff).clamp(0.0, 1.0)
}

pub fn readability_score(text: &str) -> f64 {
    if words(text).is_empty() {
        return 0.0;
    }
    band_score(
        readability(text),
        READABILITY_BAND.0,
        READABILITY_BAND.1,
        READABILITY_FALLOFF,
    )
}

/// Expected transcript length for a block of `n` questions.
pub fn word_count_band(number_of_questions: u32) -> (usize, usize) {
    let n = number_of_questions as usize;
    ((35 * n).max(150), (70 * n).max(300))
}

pub fn word_count_score(text: &str, number_of_questions: u32) -> f64 {
    let count = words(&spoken_text(text)).len() as f64;
    let (lo, hi) = word_count_band(number_of_questions);
    let (lo, hi) = (lo as f64, hi as f64);
    let falloff = if count < lo { lo * 0.5 } else { hi * 0.5 };
    band_score(count, lo, hi, falloff)
}

pub fn vocabulary_share(text: &str) -> f64 {
    let tokens = words(&spoken_text(text));
    if tokens.is_empty() {
        return 0.0;
    }
    let common = common_words();
    let hits = tokens.iter().filter(|w| common.contains(w.as_str())).count();
    hits as f64 / tokens.len() as f64
}

pub fn vocabulary_score(text: &str) -> f64 {
    (vocabulary_share(text) / VOCABULARY_TARGET).clamp(0.0, 1.0)
}

/// TF-IDF model fitted on real listening transcripts.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCorpus {
    idf: HashMap<String, f64>,
    documents: Vec<HashMap<String, f64>>,
}

impl ReferenceCorpus {
    pub fn from_documents<S: AsRef<str>>(docs: &[S]) -> Self {
        let tokenized: Vec<Vec<String>> = docs
            .iter()
            .map(|d| words(&spoken_text(d.as_ref())))
            .filter(|t| !t.is_empty())
            .collect();
        if tokenized.is_empty() {
            return Self::default();
        }

        let mut document_frequency: HashMap<&str, usize> = HashMap::new();
        for tokens in &tokenized {
            let unique: HashSet<&str> = tokens.iter().map(|t| t.as_str()).collect();
            for term in unique {
                *document_frequency.entry(term).or_default() += 1;
            }
        }

        // smoothed idf: ln((1 + N) / (1 + df)) + 1
        let n = tokenized.len() as f64;
        let idf: HashMap<String, f64> = document_frequency
            .into_iter()
            .map(|(term, df)| (term.to_string(), ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0))
            .collect();

        let documents = tokenized
            .iter()
            .map(|tokens| weigh(tokens, &idf))
            .collect();
        Self { idf, documents }
    }

    /// Loads every `.txt` file in `dir`. A missing directory yields an empty corpus.
    pub async fn load_dir(dir: impl AsRef<Path>) -> crate::error::Result<Self> {
        let dir = dir.as_ref();
        let mut docs = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Reference corpus {} not found; similarity scoring disabled", dir.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("txt") {
                docs.push(tokio::fs::read_to_string(&path).await?);
            }
        }
        tracing::info!("Loaded {} reference transcripts from {}", docs.len(), dir.display());
        Ok(Self::from_documents(&docs))
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Highest cosine similarity between `text` and any corpus document.
    pub fn max_similarity(&self, text: &str) -> f64 {
        let tokens = words(&spoken_text(text));
        if tokens.is_empty() || self.is_empty() {
            return 0.0;
        }
        let query = weigh(&tokens, &self.idf);
        self.documents
            .iter()
            .map(|doc| {
                query
                    .iter()
                    .filter_map(|(term, w)| doc.get(term).map(|d| w * d))
                    .sum::<f64>()
            })
            .fold(0.0, f64::max)
            .clamp(0.0, 1.0)
    }
}

// L2-normalised tf-idf vector; terms outside the fitted vocabulary are dropped.
fn weigh(tokens: &[String], idf: &HashMap<String, f64>) -> HashMap<String, f64> {
    let mut tf: HashMap<String, f64> = HashMap::new();
    for token in tokens {
        if let Some(weight) = idf.get(token) {
            *tf.entry(token.clone()).or_default() += weight;
        }
    }
    let norm = tf.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in tf.values_mut() {
            *v /= norm;
        }
    }
    tf
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub readability: f64,
    pub word_count: f64,
    pub vocabulary: f64,
    pub similarity: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            readability: 0.25,
            word_count: 0.25,
            vocabulary: 0.25,
            similarity: 0.25,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TranscriptScorer {
    corpus: ReferenceCorpus,
    weights: ScoreWeights,
}

impl TranscriptScorer {
    pub fn new(corpus: ReferenceCorpus, weights: ScoreWeights) -> Self {
        Self { corpus, weights }
    }

    pub fn corpus(&self) -> &ReferenceCorpus {
        &self.corpus
    }

    pub fn similarity_score(&self, text: &str) -> f64 {
        let sim = self.corpus.max_similarity(text);
        let (lo, hi) = SIMILARITY_BAND;
        if sim < lo {
            sim / lo
        } else if sim <= hi {
            1.0
        } else {
            ((1.0 - sim) / (1.0 - hi)).clamp(0.0, 1.0)
        }
    }

    pub fn score(&self, transcript: &str, number_of_questions: u32) -> TranscriptScore {
        let readability = readability_score(transcript);
        let word_count = word_count_score(transcript, number_of_questions);
        let vocabulary = vocabulary_score(transcript);
        let use_similarity = !self.corpus.is_empty();
        let similarity = if use_similarity {
            self.similarity_score(transcript)
        } else {
            0.0
        };

        let w = self.weights;
        let mut weighted = w.readability * readability + w.word_count * word_count + w.vocabulary * vocabulary;
        let mut weight_sum = w.readability + w.word_count + w.vocabulary;
        if use_similarity {
            weighted += w.similarity * similarity;
            weight_sum += w.similarity;
        }
        let total = if weight_sum > 0.0 {
            (weighted / weight_sum).clamp(0.0, 1.0)
        } else {
            0.0
        };

        TranscriptScore {
            readability,
            word_count,
            vocabulary,
            similarity,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONVERSATION: &str = "Narrator: You will hear a woman calling a sports centre.\n\
        Woman: Hello. I would like to ask about the swimming classes for children.\n\
        Man: Of course. We have classes on Monday and Thursday after school.\n\
        Woman: How much does it cost for one term?\n\
        Man: It is forty pounds, and that includes the use of the pool at the weekend.";

    #[test]
    fn syllable_heuristics() {
        assert_eq!(syllables("cat"), 1);
        assert_eq!(syllables("make"), 1);
        assert_eq!(syllables("table"), 2);
        assert_eq!(syllables("library"), 3);
        assert_eq!(syllables("the"), 1);
        assert_eq!(syllables("123"), 0);
    }

    #[test]
    fn speaker_labels_are_not_counted_as_words() {
        let text = spoken_text("Narrator: Part one.\nMrs Smith: Good morning.");
        assert_eq!(words(&text), vec!["part", "one", "good", "morning"]);
    }

    #[test]
    fn plain_conversation_is_readable_and_common() {
        assert!(readability(CONVERSATION) > 60.0);
        assert!(readability_score(CONVERSATION) > 0.75);
        assert!(vocabulary_share(CONVERSATION) > 0.5);
    }

    #[test]
    fn word_count_band_edges() {
        assert_eq!(word_count_band(2), (150, 300));
        assert_eq!(word_count_band(10), (350, 700));

        let inside = "word ".repeat(400);
        assert_eq!(word_count_score(&inside, 10), 1.0);
        let half_short = "word ".repeat(175);
        assert_eq!(word_count_score(&half_short, 10), 0.0);
        let slightly_long = "word ".repeat(770);
        let s = word_count_score(&slightly_long, 10);
        assert!(s > 0.7 && s < 0.9, "got {s}");
    }

    #[test]
    fn empty_transcript_scores_zero() {
        let scorer = TranscriptScorer::default();
        let score = scorer.score("", 10);
        assert_eq!(score.total, 0.0);
        assert_eq!(score.readability, 0.0);
    }

    #[test]
    fn similarity_penalises_copies_and_rewards_style_overlap() {
        let corpus = ReferenceCorpus::from_documents(&[
            CONVERSATION,
            "Lecturer: Today we look at the history of coastal cities and their ports.",
        ]);
        assert_eq!(corpus.len(), 2);
        let scorer = TranscriptScorer::new(corpus, ScoreWeights::default());

        let exact = scorer.corpus().max_similarity(CONVERSATION);
        assert!(exact > 0.99);
        assert!(scorer.similarity_score(CONVERSATION) < 0.05);

        let unrelated = scorer.corpus().max_similarity("zebra quantum xylophone");
        assert_eq!(unrelated, 0.0);
        assert_eq!(scorer.similarity_score("zebra quantum xylophone"), 0.0);
    }

    #[test]
    fn components_and_total_stay_in_unit_range() {
        let corpus = ReferenceCorpus::from_documents(&[CONVERSATION]);
        let scorer = TranscriptScorer::new(corpus, ScoreWeights::default());
        for text in [CONVERSATION, "a", "Supercalifragilistic antidisestablishmentarianism.", ""] {
            let s = scorer.score(text, 5);
            for v in [s.readability, s.word_count, s.vocabulary, s.similarity, s.total] {
                assert!((0.0..=1.0).contains(&v), "{v} out of range for {text:?}");
            }
        }
    }

    #[test]
    fn empty_corpus_drops_similarity_weight() {
        let scorer = TranscriptScorer::default();
        let s = scorer.score(CONVERSATION, 2);
        let expected = (s.readability + s.word_count + s.vocabulary) / 3.0;
        assert!((s.total - expected).abs() < 1e-9);
        assert_eq!(s.similarity, 0.0);
    }
}
