use crate::error::{Error, Result};
use crate::models::marking::MarkingResult;
use crate::models::question_set::GeneratedSet;
use crate::services::ai_service::{parse_list, ContentModel};
use std::fmt::Write as _;
use std::sync::Arc;

const BAND_TABLE: [(u32, &str); 10] = [
    (39, "9.0"),
    (37, "8.5"),
    (35, "8.0"),
    (32, "7.5"),
    (30, "7.0"),
    (26, "6.5"),
    (23, "6.0"),
    (18, "5.5"),
    (16, "5.0"),
    (13, "4.5"),
];

/// `"31/40"` → `"7.0"`. Anything that does not start with a mark is `"N/A"`.
pub fn band_for_mark(mark: &str) -> String {
    let Some(score) = mark
        .split('/')
        .next()
        .and_then(|s| s.trim().parse::<u32>().ok())
    else {
        return "N/A".to_string();
    };
    BAND_TABLE
        .iter()
        .find(|(min, _)| score >= *min)
        .map(|(_, band)| band.to_string())
        .unwrap_or_else(|| "4.0 or below".to_string())
}

/// Text of an uploaded answer sheet. Only `.txt` and `.pdf` are readable.
pub async fn extract_text(filename: &str, bytes: Vec<u8>) -> Result<String> {
    let lower = filename.to_lowercase();
    if lower.ends_with(".txt") {
        return String::from_utf8(bytes)
            .map_err(|_| Error::BadRequest(format!("{} is not valid UTF-8 text", filename)));
    }
    if lower.ends_with(".pdf") {
        let name = filename.to_string();
        return tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| Error::Internal(format!("PDF extraction task failed: {}", e)))?
            .map_err(|e| Error::BadRequest(format!("Cannot read PDF {}: {}", name, e)));
    }
    if [".png", ".jpg", ".jpeg"].iter().any(|ext| lower.ends_with(ext)) {
        return Err(Error::BadRequest(format!(
            "{}: scanned images are not supported, upload a PDF or text file",
            filename
        )));
    }
    Err(Error::BadRequest(format!("Unsupported answer sheet: {}", filename)))
}

/// Questions and answers of a set, numbered 1..=40, as the examiner's reference.
pub fn official_key_text(set: &GeneratedSet) -> String {
    let mut out = String::new();
    let mut number = 1;
    for block in &set.blocks {
        let _ = writeln!(out, "{} ({})", block.section, block.question_type);
        for q in &block.questions {
            let _ = writeln!(out, "  {}", q);
        }
        for answer in &block.answers {
            let _ = writeln!(out, "Answer {}: {}", number, answer);
            number += 1;
        }
        out.push('\n');
    }
    out
}

#[derive(Clone)]
pub struct MarkingService {
    model: Arc<dyn ContentModel>,
}

impl MarkingService {
    pub fn new(model: Arc<dyn ContentModel>) -> Self {
        Self { model }
    }

    fn build_prompt(official_key: &str, students: &[String]) -> String {
        let mut students_input = String::new();
        for (i, text) in students.iter().enumerate() {
            let _ = write!(students_input, "\n--- STUDENT {} ---\n{}\n", i + 1, text);
        }

        format!(
            r#"You are an IELTS Examiner. Use the provided Official Question Set as the absolute source of truth.

OFFICIAL SET (Questions and Answers):
{official_key}

TASK:
Mark the following {count} students.
1. Identify each candidate's name.
2. Mark their answers (1 to 40).
3. Calculate total marks.

STUDENT INPUTS:
{students_input}

OUTPUT FORMAT (Strict JSON Array of Objects):
[
  {{
    "candidate_name": "Full Name",
    "total_marks": "X/40",
    "correct_answers": {{ "1": "val" }},
    "incorrect_answers": {{ "3": {{ "student_answer": "val", "correct_answer": "val" }} }}
  }}
]"#,
            official_key = official_key,
            count = students.len(),
            students_input = students_input,
        )
    }

    /// Marks every answer sheet in one model call and attaches IELTS bands.
    pub async fn mark_batch(
        &self,
        official_key: &str,
        students: &[String],
    ) -> Result<Vec<MarkingResult>> {
        if students.is_empty() {
            return Err(Error::BadRequest("No answer sheets to mark".to_string()));
        }

        let prompt = Self::build_prompt(official_key, students);
        let raw = self.model.generate(&prompt).await?;
        let mut results: Vec<MarkingResult> = parse_list(&raw).map_err(|e| {
            tracing::error!("Marking response could not be parsed: {}", e);
            Error::Upstream("Marking response was not valid JSON".to_string())
        })?;

        for result in &mut results {
            result.band = band_for_mark(&result.total_marks);
        }
        tracing::info!("Marked {} of {} answer sheets", results.len(), students.len());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ai_service::MockContentModel;

    #[test]
    fn band_thresholds() {
        let cases = [
            ("40/40", "9.0"),
            ("39/40", "9.0"),
            ("38/40", "8.5"),
            ("37/40", "8.5"),
            ("35/40", "8.0"),
            ("32/40", "7.5"),
            ("31/40", "7.0"),
            ("30/40", "7.0"),
            ("26/40", "6.5"),
            ("23/40", "6.0"),
            ("18/40", "5.5"),
            ("16/40", "5.0"),
            ("13/40", "4.5"),
            ("12/40", "4.0 or below"),
            ("0/40", "4.0 or below"),
            ("abc", "N/A"),
            ("", "N/A"),
        ];
        for (mark, band) in cases {
            assert_eq!(band_for_mark(mark), band, "mark {}", mark);
        }
    }

    #[tokio::test]
    async fn text_sheets_are_read_and_images_rejected() {
        let text = extract_text("sheet.TXT", b"Name: Jane\n1. library".to_vec())
            .await
            .unwrap();
        assert!(text.contains("Jane"));
        assert!(matches!(
            extract_text("scan.jpg", vec![0xff, 0xd8]).await,
            Err(Error::BadRequest(_))
        ));
        assert!(extract_text("sheet.docx", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn batch_results_get_bands() {
        let mut model = MockContentModel::new();
        model
            .expect_generate()
            .withf(|prompt| prompt.contains("--- STUDENT 2 ---") && prompt.contains("Answer 1: library"))
            .times(1)
            .returning(|_| {
                Ok(r#"```json
[
  {"candidate_name": "Jane", "total_marks": "33/40", "correct_answers": {"1": "library"}, "incorrect_answers": {}},
  {"candidate_name": "Tom", "total_marks": "12/40", "incorrect_answers": {"1": {"student_answer": "park", "correct_answer": "library"}}}
]
```"#
                    .to_string())
            });

        let service = MarkingService::new(Arc::new(model));
        let results = service
            .mark_batch("Answer 1: library", &["Jane ...".to_string(), "Tom ...".to_string()])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].band, "7.5");
        assert_eq!(results[1].band, "4.0 or below");
        assert_eq!(results[1].incorrect_answers["1"].student_answer, "park");
    }

    #[tokio::test]
    async fn numeric_values_from_the_model_are_accepted() {
        let mut model = MockContentModel::new();
        model.expect_generate().times(1).returning(|_| {
            Ok(r#"[{"candidate_name": "Ali", "total_marks": 33, "correct_answers": {"7": 25}}]"#.to_string())
        });

        let service = MarkingService::new(Arc::new(model));
        let results = service
            .mark_batch("Answer 7: 25", &["Ali ...".to_string()])
            .await
            .unwrap();
        assert_eq!(results[0].total_marks, "33/40");
        assert_eq!(results[0].correct_answers["7"], "25");
        assert_eq!(results[0].band, "7.5");
    }

    #[tokio::test]
    async fn empty_batch_is_rejected_without_model_call() {
        let mut model = MockContentModel::new();
        model.expect_generate().never();
        let service = MarkingService::new(Arc::new(model));
        assert!(matches!(
            service.mark_batch("key", &[]).await,
            Err(Error::BadRequest(_))
        ));
    }
}
