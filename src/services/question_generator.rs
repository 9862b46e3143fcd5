use crate::config::Config;
use crate::dto::generation_dto::{BlockRequest, GenerateSetPayload};
use crate::error::{Error, Result};
use crate::models::catalog::Catalog;
use crate::models::question_block::QuestionBlock;
use crate::models::question_set::{BlockReport, GeneratedSet, TranscriptScore};
use crate::services::ai_service::{parse_single, ContentModel};
use crate::services::scoring_service::{word_count_band, TranscriptScorer};
use crate::utils::time;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

/// Bounds of the best-of-N loop.
#[derive(Debug, Clone)]
pub struct GenerationPolicy {
    pub max_attempts: u32,
    pub accept_score: f64,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            accept_score: 0.8,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl GenerationPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_generation_attempts,
            accept_score: config.accept_score,
            ..Self::default()
        }
    }

    /// `base * 2^(attempt-1)`, capped, plus up to half a base of jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.backoff_max);
        let jitter_ms = (self.backoff_base.as_millis() / 2) as u64;
        if jitter_ms == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

#[derive(Debug, Clone)]
pub struct BlockOutcome {
    pub block: QuestionBlock,
    pub report: BlockReport,
    pub logs: Vec<String>,
}

#[derive(Clone)]
pub struct QuestionGenerator {
    model: Arc<dyn ContentModel>,
    scorer: Arc<TranscriptScorer>,
    catalog: Arc<Catalog>,
    policy: GenerationPolicy,
}

impl QuestionGenerator {
    pub fn new(
        model: Arc<dyn ContentModel>,
        scorer: Arc<TranscriptScorer>,
        catalog: Arc<Catalog>,
        policy: GenerationPolicy,
    ) -> Self {
        Self {
            model,
            scorer,
            catalog,
            policy,
        }
    }

    pub async fn generate_block(&self, request: &BlockRequest) -> BlockOutcome {
        let mut logs = Vec::new();
        let prompt = self.build_prompt(request);
        let mut best: Option<(QuestionBlock, TranscriptScore)> = None;
        let mut attempts = 0;

        for attempt in 1..=self.policy.max_attempts {
            attempts = attempt;

            let raw = match self.model.generate(&prompt).await {
                Ok(raw) => raw,
                Err(e) if e.is_retryable() => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        part = request.part,
                        attempt,
                        "Model rate limited, backing off {:?}: {}",
                        delay,
                        e
                    );
                    logs.push(format!(
                        "Part {} {} attempt {}: rate limited, waited {} ms",
                        request.part,
                        request.type_code,
                        attempt,
                        delay.as_millis()
                    ));
                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(delay).await;
                    }
                    continue;
                }
                Err(e) => {
                    tracing::warn!(part = request.part, attempt, "Model call failed: {}", e);
                    logs.push(format!(
                        "Part {} {} attempt {}: model error: {}",
                        request.part, request.type_code, attempt, e
                    ));
                    continue;
                }
            };

            let mut candidate: QuestionBlock = match parse_single(&raw) {
                Ok(block) => block,
                Err(e) => {
                    tracing::warn!(part = request.part, attempt, "Unparseable candidate: {}", e);
                    logs.push(format!(
                        "Part {} {} attempt {}: unparseable response",
                        request.part, request.type_code, attempt
                    ));
                    continue;
                }
            };
            self.normalise(&mut candidate, request);
            if candidate.transcript.trim().is_empty() {
                logs.push(format!(
                    "Part {} {} attempt {}: candidate has no transcript",
                    request.part, request.type_code, attempt
                ));
                continue;
            }

            let score = self
                .scorer
                .score(&candidate.transcript, request.number_of_questions);
            logs.push(format!(
                "Part {} {} attempt {}: score {:.3} (readability {:.2}, length {:.2}, vocabulary {:.2}, similarity {:.2})",
                request.part,
                request.type_code,
                attempt,
                score.total,
                score.readability,
                score.word_count,
                score.vocabulary,
                score.similarity
            ));

            let improved = best
                .as_ref()
                .map_or(true, |(_, current)| score.total > current.total);
            if improved {
                best = Some((candidate, score));
            }
            if score.total >= self.policy.accept_score {
                break;
            }
        }

        match best {
            Some((block, score)) => {
                tracing::info!(
                    part = request.part,
                    attempts,
                    "Selected candidate for {} with score {:.3}",
                    request.type_code,
                    score.total
                );
                BlockOutcome {
                    block,
                    report: BlockReport {
                        part: request.part,
                        type_code: request.type_code.clone(),
                        attempts,
                        score: Some(score),
                        placeholder: false,
                    },
                    logs,
                }
            }
            None => {
                tracing::error!(
                    part = request.part,
                    attempts,
                    "No usable candidate for {}; using placeholder",
                    request.type_code
                );
                logs.push(format!(
                    "Part {} {}: no usable candidate after {} attempts, placeholder inserted",
                    request.part, request.type_code, attempts
                ));
                BlockOutcome {
                    block: self.placeholder_block(request),
                    report: BlockReport {
                        part: request.part,
                        type_code: request.type_code.clone(),
                        attempts,
                        score: None,
                        placeholder: true,
                    },
                    logs,
                }
            }
        }
    }

    /// Validates the form and generates every block of parts 1 to 4 in order.
    pub async fn generate_full_set(&self, payload: &GenerateSetPayload) -> Result<GeneratedSet> {
        let requests = self.validate_payload(payload)?;

        let mut set = GeneratedSet {
            key: time::date_key(time::now()),
            blocks: Vec::with_capacity(requests.len()),
            requests: requests.clone(),
            reports: Vec::with_capacity(requests.len()),
            logs: vec![format!(
                "Generating {} blocks for theme {}",
                requests.len(),
                payload.theme()
            )],
        };

        for request in &requests {
            let outcome = self.generate_block(request).await;
            set.blocks.push(outcome.block);
            set.reports.push(outcome.report);
            set.logs.extend(outcome.logs);
        }

        tracing::info!(
            blocks = set.blocks.len(),
            placeholders = set.placeholder_count(),
            "Question set generated"
        );
        Ok(set)
    }

    /// Regenerates only the blocks of `part`; other parts are left untouched.
    /// A non-empty `specification` replaces the stored one for those blocks.
    pub async fn regenerate_part(
        &self,
        set: &GeneratedSet,
        part: u8,
        specification: &str,
    ) -> Result<GeneratedSet> {
        let indices: Vec<usize> = set
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.part_number() == Some(part))
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return Err(Error::NotFound(format!("Set has no blocks for Part {}", part)));
        }

        let mut updated = set.clone();
        let aligned_requests = set.requests.len() == set.blocks.len();
        let aligned_reports = set.reports.len() == set.blocks.len();

        for idx in indices {
            let mut request = if aligned_requests {
                set.requests[idx].clone()
            } else {
                request_from_block(&set.blocks[idx], part, first_question_of(set, idx))
            };
            if !specification.trim().is_empty() {
                request.specifications = specification.trim().to_string();
            }

            let outcome = self.generate_block(&request).await;
            updated.blocks[idx] = outcome.block;
            if aligned_reports {
                updated.reports[idx] = outcome.report;
            }
            if aligned_requests {
                updated.requests[idx] = request;
            }
            updated.logs.extend(outcome.logs);
        }

        updated.logs.push(format!("Part {} regenerated", part));
        Ok(updated)
    }

    /// Form validation plus catalogue checks; returns the block requests to generate.
    pub fn validate_payload(&self, payload: &GenerateSetPayload) -> Result<Vec<BlockRequest>> {
        payload.validate()?;
        let requests = payload.block_requests();
        for request in &requests {
            if !self.catalog.has_theme(&request.theme) {
                return Err(Error::BadRequest(format!("Unknown theme: {}", request.theme)));
            }
            if !self.catalog.allows_type(request.part, &request.type_code) {
                return Err(Error::BadRequest(format!(
                    "Question type {} is not available in Part {}",
                    request.type_code, request.part
                )));
            }
        }
        Ok(requests)
    }

    fn type_label(&self, request: &BlockRequest) -> String {
        match self.catalog.type_description(request.part, &request.type_code) {
            Some(description) if !description.is_empty() => {
                format!("{} - {}", request.type_code, description)
            }
            _ => request.type_code.clone(),
        }
    }

    fn normalise(&self, block: &mut QuestionBlock, request: &BlockRequest) {
        block.section = format!("Part {}", request.part);
        if block.type_code() != request.type_code {
            block.question_type = self.type_label(request);
        }
    }

    pub fn placeholder_block(&self, request: &BlockRequest) -> QuestionBlock {
        let numbers = request.first_question..=request.last_question();
        QuestionBlock {
            section: format!("Part {}", request.part),
            question_type: self.type_label(request),
            instructions: "Placeholder instructions".to_string(),
            questions: numbers
                .clone()
                .map(|n| format!("{}. Placeholder question {}", n, n))
                .collect(),
            options: vec![],
            diagram: String::new(),
            answers: numbers.map(|_| "N/A".to_string()).collect(),
            transcript: format!("Placeholder transcript for Part {}", request.part),
        }
    }

    pub fn build_prompt(&self, request: &BlockRequest) -> String {
        let (min_words, max_words) = word_count_band(request.number_of_questions);
        let description = self
            .catalog
            .type_description(request.part, &request.type_code)
            .unwrap_or("as named by the code");
        let specifications = if request.specifications.is_empty() {
            "none".to_string()
        } else {
            request.specifications.clone()
        };

        format!(
            r#"You are an experienced IELTS Listening test writer.

Write one question block for Part {part} of an IELTS Listening test.
Part context: {context}

Theme: {theme}
Topic: {topic}
Question type: {code} ({description})
Number of questions: {count}, numbered {first} to {last}
Additional specifications: {specifications}

Rules:
1. The transcript must be {min_words} to {max_words} words of natural spoken English.
2. Put each utterance on its own line as "Speaker: text". Use "Narrator:" for the introduction.
3. Every answer must be heard in the transcript, in question order.
4. Answers are short (no more than three words or a number) unless the type needs a letter.
5. Use a "Diagram" only for forms, tables, notes, maps or flow-charts; otherwise leave it empty.
6. Return only JSON, with no commentary.

Return a single JSON object with exactly these keys:
{{
  "Section": "Part {part}",
  "Type": "{code}",
  "Instructions": "instructions shown to the candidate",
  "Questions": ["{first}. question text", "..."],
  "Options": ["A option", "B option"],
  "Diagram": "",
  "Answers": ["answer for question {first}", "..."],
  "Transcript": "Narrator: ...\nSpeaker: ..."
}}"#,
            part = request.part,
            context = part_context(request.part),
            theme = request.theme,
            topic = request.topic,
            code = request.type_code,
            description = description,
            count = request.number_of_questions,
            first = request.first_question,
            last = request.last_question(),
            specifications = specifications,
            min_words = min_words,
            max_words = max_words,
        )
    }
}

fn part_context(part: u8) -> &'static str {
    match part {
        1 => "a conversation between two people in an everyday social situation",
        2 => "a monologue set in an everyday social context",
        3 => "a conversation between up to four people in an educational or training context",
        _ => "a monologue on an academic subject, such as a university lecture",
    }
}

fn first_question_of(set: &GeneratedSet, idx: usize) -> u32 {
    1 + set.blocks[..idx]
        .iter()
        .map(|b| b.questions.len() as u32)
        .sum::<u32>()
}

fn request_from_block(block: &QuestionBlock, part: u8, first_question: u32) -> BlockRequest {
    BlockRequest {
        part,
        type_code: block.type_code().to_string(),
        theme: String::new(),
        topic: String::new(),
        specifications: String::new(),
        number_of_questions: block.questions.len().max(1) as u32,
        first_question,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ai_service::MockContentModel;
    use crate::services::scoring_service::{ReferenceCorpus, ScoreWeights};
    use serde_json::json;

    fn good_transcript() -> String {
        let mut lines = vec!["Narrator: Part one.".to_string()];
        for i in 0..40 {
            let speaker = if i % 2 == 0 { "Woman" } else { "Man" };
            lines.push(format!(
                "{}: I think we should meet at the library on Saturday morning.",
                speaker
            ));
        }
        lines.join("\n")
    }

    fn candidate(transcript: &str) -> String {
        json!({
            "Section": "Part 1",
            "Type": "T001 - Note completion",
            "Instructions": "Complete the notes below.",
            "Questions": ["1. Day of meeting ______"],
            "Answers": ["Saturday"],
            "Transcript": transcript
        })
        .to_string()
    }

    fn request() -> BlockRequest {
        BlockRequest {
            part: 1,
            type_code: "T001".to_string(),
            theme: "Education".to_string(),
            topic: "Library services".to_string(),
            specifications: String::new(),
            number_of_questions: 10,
            first_question: 1,
        }
    }

    fn policy(max_attempts: u32, accept_score: f64) -> GenerationPolicy {
        GenerationPolicy {
            max_attempts,
            accept_score,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
        }
    }

    fn generator(model: MockContentModel, policy: GenerationPolicy) -> QuestionGenerator {
        QuestionGenerator::new(
            Arc::new(model),
            Arc::new(TranscriptScorer::new(
                ReferenceCorpus::default(),
                ScoreWeights::default(),
            )),
            Arc::new(Catalog::default()),
            policy,
        )
    }

    #[tokio::test]
    async fn never_exceeds_attempt_ceiling() {
        let mut model = MockContentModel::new();
        model
            .expect_generate()
            .times(3)
            .returning(|_| Ok(candidate("Hello.")));

        let outcome = generator(model, policy(3, 1.1)).generate_block(&request()).await;
        assert_eq!(outcome.report.attempts, 3);
        assert!(!outcome.report.placeholder);
    }

    #[tokio::test]
    async fn keeps_best_candidate_across_attempts() {
        let good = good_transcript();
        let mut calls = 0;
        let mut model = MockContentModel::new();
        model.expect_generate().times(3).returning(move |_| {
            calls += 1;
            if calls == 2 {
                Ok(candidate(&good))
            } else {
                Ok(candidate("Hello."))
            }
        });

        let outcome = generator(model, policy(3, 1.1)).generate_block(&request()).await;
        assert_eq!(outcome.block.transcript, good_transcript());
        let score = outcome.report.score.unwrap();
        assert!(score.total > 0.9);
    }

    #[tokio::test]
    async fn accepts_early_when_threshold_reached() {
        let good = good_transcript();
        let mut model = MockContentModel::new();
        model
            .expect_generate()
            .times(1)
            .returning(move |_| Ok(candidate(&good)));

        let outcome = generator(model, policy(5, 0.8)).generate_block(&request()).await;
        assert_eq!(outcome.report.attempts, 1);
        assert!(!outcome.report.placeholder);
    }

    #[tokio::test]
    async fn placeholder_when_every_attempt_fails() {
        let mut model = MockContentModel::new();
        model
            .expect_generate()
            .times(2)
            .returning(|_| Err(Error::Upstream("boom".to_string())));

        let outcome = generator(model, policy(2, 0.8)).generate_block(&request()).await;
        assert!(outcome.report.placeholder);
        assert_eq!(outcome.block.transcript, "Placeholder transcript for Part 1");
        assert_eq!(outcome.block.questions.len(), 10);
        assert_eq!(outcome.block.questions[0], "1. Placeholder question 1");
        assert!(outcome.block.answers.iter().all(|a| a == "N/A"));
    }

    #[tokio::test]
    async fn rate_limits_consume_attempts() {
        let mut model = MockContentModel::new();
        model
            .expect_generate()
            .times(3)
            .returning(|_| Err(Error::RateLimited("429".to_string())));

        let outcome = generator(model, policy(3, 0.8)).generate_block(&request()).await;
        assert!(outcome.report.placeholder);
        assert_eq!(outcome.report.attempts, 3);
        assert!(outcome.logs.iter().any(|l| l.contains("rate limited")));
    }

    #[tokio::test]
    async fn zero_attempts_returns_placeholder_without_calling_model() {
        let mut model = MockContentModel::new();
        model.expect_generate().never();

        let outcome = generator(model, policy(0, 0.8)).generate_block(&request()).await;
        assert!(outcome.report.placeholder);
        assert_eq!(outcome.report.attempts, 0);
    }

    #[tokio::test]
    async fn unparseable_response_burns_an_attempt_then_recovers() {
        let good = good_transcript();
        let mut calls = 0;
        let mut model = MockContentModel::new();
        model.expect_generate().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok("Sorry, I cannot help with that.".to_string())
            } else {
                Ok(format!("```json\n{}\n```", candidate(&good)))
            }
        });

        let outcome = generator(model, policy(3, 0.8)).generate_block(&request()).await;
        assert_eq!(outcome.report.attempts, 2);
        assert!(!outcome.report.placeholder);
    }

    #[tokio::test]
    async fn candidate_section_and_type_are_forced_to_request() {
        let good = good_transcript();
        let mut model = MockContentModel::new();
        model.expect_generate().returning(move |_| {
            Ok(json!({
                "Section": "Part 9",
                "Type": "T010",
                "Transcript": good.clone()
            })
            .to_string())
        });

        let outcome = generator(model, policy(1, 0.8)).generate_block(&request()).await;
        assert_eq!(outcome.block.section, "Part 1");
        assert_eq!(outcome.block.type_code(), "T001");
    }

    fn full_payload() -> GenerateSetPayload {
        serde_json::from_value(json!({
            "Themes": ["Education"],
            "Part": {
                "1": { "type1": ["T001"], "topic": ["Library"], "number_of_questions": [10] },
                "2": { "type1": ["T005", "T006"], "topic": ["Tour", "Tour"], "number_of_questions": [5, 5] },
                "3": { "type1": ["T007"], "topic": ["Seminar"], "number_of_questions": [10] },
                "4": { "type1": ["T003"], "topic": ["Lecture"], "number_of_questions": [10] }
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn full_set_generates_every_block_in_order() {
        let good = good_transcript();
        let mut model = MockContentModel::new();
        model
            .expect_generate()
            .times(5)
            .returning(move |_| Ok(candidate(&good)));

        let set = generator(model, policy(3, 0.8))
            .generate_full_set(&full_payload())
            .await
            .unwrap();
        assert_eq!(set.blocks.len(), 5);
        assert_eq!(set.requests.len(), 5);
        let sections: Vec<_> = set.blocks.iter().map(|b| b.section.as_str()).collect();
        assert_eq!(sections, ["Part 1", "Part 2", "Part 2", "Part 3", "Part 4"]);
        assert_eq!(set.requests[2].first_question, 16);
        assert_eq!(set.placeholder_count(), 0);
    }

    #[tokio::test]
    async fn full_set_rejects_type_missing_from_catalog() {
        let mut model = MockContentModel::new();
        model.expect_generate().never();
        let catalog: Catalog = serde_json::from_value(json!({
            "Part": { "1": { "type": { "T002": { "description": "Form completion" } } } }
        }))
        .unwrap();
        let generator = QuestionGenerator::new(
            Arc::new(model),
            Arc::new(TranscriptScorer::new(
                ReferenceCorpus::default(),
                ScoreWeights::default(),
            )),
            Arc::new(catalog),
            policy(3, 0.8),
        );

        let err = generator.generate_full_set(&full_payload()).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn regenerate_part_only_touches_that_part() {
        let good = good_transcript();
        let mut model = MockContentModel::new();
        model
            .expect_generate()
            .withf(|prompt| prompt.contains("Additional specifications: harder vocabulary"))
            .times(2)
            .returning(move |_| Ok(candidate(&good)));
        let generator = generator(model, policy(1, 0.8));

        let requests = full_payload().block_requests();
        let original = GeneratedSet {
            key: "2026_01_01_00_00_00".to_string(),
            blocks: requests.iter().map(|r| generator.placeholder_block(r)).collect(),
            requests,
            reports: vec![],
            logs: vec![],
        };

        let updated = generator
            .regenerate_part(&original, 2, "harder vocabulary")
            .await
            .unwrap();
        assert_eq!(updated.blocks[0], original.blocks[0]);
        assert_eq!(updated.blocks[3], original.blocks[3]);
        assert_ne!(updated.blocks[1], original.blocks[1]);
        assert_eq!(updated.blocks[1].section, "Part 2");
        assert_eq!(updated.requests[2].specifications, "harder vocabulary");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = GenerationPolicy {
            max_attempts: 5,
            accept_score: 0.8,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(300),
        };
        let first = policy.backoff(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        let second = policy.backoff(2);
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(250));
        let capped = policy.backoff(6);
        assert!(capped >= Duration::from_millis(300) && capped <= Duration::from_millis(350));
    }
}
