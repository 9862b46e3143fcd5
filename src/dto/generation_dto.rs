use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::{Validate, ValidationError};

pub const PART_COUNT: u8 = 4;
pub const QUESTIONS_PER_PART: u32 = 10;
pub const MAX_BLOCKS_PER_PART: usize = 2;

/// Generator form submission. Keys match what the browser form posts.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GenerateSetPayload {
    #[serde(rename = "Themes")]
    #[validate(custom(function = "validate_themes"))]
    pub themes: Vec<String>,
    #[serde(rename = "Part")]
    #[validate(custom(function = "validate_parts"))]
    pub parts: BTreeMap<String, PartSelection>,
    #[serde(rename = "generateWithAudio", default)]
    pub generate_with_audio: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartSelection {
    #[serde(default)]
    pub type1: Vec<String>,
    #[serde(default)]
    pub topic: Vec<String>,
    #[serde(default)]
    pub specifications: Vec<String>,
    #[serde(default)]
    pub number_of_questions: Vec<u32>,
}

/// A single block to generate, with its position in the 40-question paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRequest {
    pub part: u8,
    pub type_code: String,
    pub theme: String,
    pub topic: String,
    pub specifications: String,
    pub number_of_questions: u32,
    pub first_question: u32,
}

impl BlockRequest {
    pub fn last_question(&self) -> u32 {
        self.first_question + self.number_of_questions.saturating_sub(1)
    }
}

impl GenerateSetPayload {
    pub fn theme(&self) -> &str {
        self.themes.first().map(|t| t.trim()).unwrap_or("")
    }

    /// Expands the form into ordered block requests numbered 1..=40.
    /// Call after `validate()`; missing specification entries become empty.
    pub fn block_requests(&self) -> Vec<BlockRequest> {
        let mut out = Vec::new();
        let mut next_question: u32 = 1;
        for part in 1..=PART_COUNT {
            let Some(selection) = self.parts.get(&part.to_string()) else {
                continue;
            };
            for (idx, code) in selection.type1.iter().enumerate() {
                let count = selection.number_of_questions.get(idx).copied().unwrap_or(0);
                out.push(BlockRequest {
                    part,
                    type_code: code.trim().to_string(),
                    theme: self.theme().to_string(),
                    topic: selection.topic.get(idx).map(|t| t.trim().to_string()).unwrap_or_default(),
                    specifications: selection
                        .specifications
                        .get(idx)
                        .map(|s| s.trim().to_string())
                        .unwrap_or_default(),
                    number_of_questions: count,
                    first_question: next_question,
                });
                next_question = next_question.saturating_add(count);
            }
        }
        out
    }
}

fn validate_themes(themes: &Vec<String>) -> Result<(), ValidationError> {
    match themes.first() {
        Some(theme) if !theme.trim().is_empty() => Ok(()),
        _ => Err(invalid("theme_required", "A theme must be selected".to_string())),
    }
}

fn validate_parts(parts: &BTreeMap<String, PartSelection>) -> Result<(), ValidationError> {
    let mut total = 0;
    for part in 1..=PART_COUNT {
        let Some(selection) = parts.get(&part.to_string()) else {
            return Err(invalid("part_missing", format!("Part {} is missing", part)));
        };

        let blocks = selection.type1.len();
        if blocks == 0 || blocks > MAX_BLOCKS_PER_PART {
            return Err(invalid(
                "block_count",
                format!("Part {} must have 1 to {} question types", part, MAX_BLOCKS_PER_PART),
            ));
        }
        if selection.topic.len() != blocks || selection.number_of_questions.len() != blocks {
            return Err(invalid(
                "block_shape",
                format!("Part {} has mismatched type, topic and question counts", part),
            ));
        }
        if selection.type1.iter().any(|t| t.trim().is_empty())
            || selection.topic.iter().any(|t| t.trim().is_empty())
        {
            return Err(invalid(
                "block_incomplete",
                format!("Part {} has a block without a question type or topic", part),
            ));
        }
        if selection.number_of_questions.iter().any(|n| *n == 0) {
            return Err(invalid(
                "block_empty",
                format!("Part {} has a block with no questions", part),
            ));
        }
        if selection
            .number_of_questions
            .iter()
            .any(|n| *n > QUESTIONS_PER_PART)
        {
            return Err(invalid(
                "block_too_large",
                format!(
                    "Part {} has a block with more than {} questions",
                    part, QUESTIONS_PER_PART
                ),
            ));
        }

        let part_total: u32 = selection.number_of_questions.iter().sum();
        if part_total != QUESTIONS_PER_PART {
            return Err(invalid(
                "part_total",
                format!(
                    "Part {} has {} questions, expected {}",
                    part, part_total, QUESTIONS_PER_PART
                ),
            ));
        }
        total += part_total;
    }

    if total != QUESTIONS_PER_PART * PART_COUNT as u32 {
        return Err(invalid("set_total", format!("Set has {} questions, expected 40", total)));
    }
    Ok(())
}

fn invalid(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegeneratePartPayload {
    #[validate(range(min = 1, max = 4, message = "Part must be between 1 and 4"))]
    pub part: u8,
    #[serde(alias = "spec", default)]
    pub specification: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SaveSetPayload {
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct HistoryQuery {
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_payload() -> serde_json::Value {
        json!({
            "Themes": ["Education"],
            "Part": {
                "1": { "type1": ["T002"], "topic": ["Library services"], "specifications": [""], "number_of_questions": [10] },
                "2": { "type1": ["T005", "T006"], "topic": ["City tour", "City tour"], "specifications": ["", "five places"], "number_of_questions": [4, 6] },
                "3": { "type1": ["T007"], "topic": ["Study group project"], "specifications": [""], "number_of_questions": [10] },
                "4": { "type1": ["T003"], "topic": ["Academic lecture"], "specifications": [""], "number_of_questions": [10] }
            },
            "generateWithAudio": true
        })
    }

    #[test]
    fn accepts_complete_form_and_numbers_blocks_continuously() {
        let payload: GenerateSetPayload = serde_json::from_value(valid_payload()).unwrap();
        payload.validate().unwrap();
        assert!(payload.generate_with_audio);

        let blocks = payload.block_requests();
        assert_eq!(blocks.len(), 5);
        assert_eq!(blocks[0].first_question, 1);
        assert_eq!(blocks[1].first_question, 11);
        assert_eq!(blocks[1].last_question(), 14);
        assert_eq!(blocks[2].first_question, 15);
        assert_eq!(blocks[2].specifications, "five places");
        assert_eq!(blocks[4].last_question(), 40);
        assert!(blocks.iter().all(|b| b.theme == "Education"));
    }

    #[test]
    fn rejects_part_not_summing_to_ten() {
        let mut raw = valid_payload();
        raw["Part"]["3"]["number_of_questions"] = json!([9]);
        let payload: GenerateSetPayload = serde_json::from_value(raw).unwrap();
        let err = payload.validate().unwrap_err();
        assert!(err.to_string().contains("Part 3 has 9 questions"));
    }

    #[test]
    fn rejects_oversized_block_counts_without_overflow() {
        let mut raw = valid_payload();
        raw["Part"]["1"] = json!({
            "type1": ["T001", "T002"],
            "topic": ["a", "b"],
            "number_of_questions": [4294967295u32, 11]
        });
        let payload: GenerateSetPayload = serde_json::from_value(raw).unwrap();
        let err = payload.validate().unwrap_err();
        assert!(err.to_string().contains("more than 10 questions"));
    }

    #[test]
    fn rejects_three_blocks_in_a_part() {
        let mut raw = valid_payload();
        raw["Part"]["1"] = json!({
            "type1": ["T001", "T002", "T003"],
            "topic": ["a", "b", "c"],
            "number_of_questions": [3, 3, 4]
        });
        let payload: GenerateSetPayload = serde_json::from_value(raw).unwrap();
        assert!(payload.validate().is_err());
    }

    #[test]
    fn rejects_missing_part_and_blank_theme() {
        let mut raw = valid_payload();
        raw["Part"].as_object_mut().unwrap().remove("4");
        let payload: GenerateSetPayload = serde_json::from_value(raw).unwrap();
        assert!(payload.validate().is_err());

        let mut raw = valid_payload();
        raw["Themes"] = json!([" "]);
        let payload: GenerateSetPayload = serde_json::from_value(raw).unwrap();
        assert!(payload.validate().is_err());
    }

    #[test]
    fn regenerate_payload_accepts_spec_alias() {
        let payload: RegeneratePartPayload =
            serde_json::from_value(json!({ "part": 2, "spec": "make it harder" })).unwrap();
        payload.validate().unwrap();
        assert_eq!(payload.specification, "make it harder");

        let bad: RegeneratePartPayload = serde_json::from_value(json!({ "part": 5 })).unwrap();
        assert!(bad.validate().is_err());
    }
}
