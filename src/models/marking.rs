use super::question_block::{lenient_string, value_to_text};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncorrectAnswer {
    #[serde(default, deserialize_with = "lenient_string")]
    pub student_answer: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub correct_answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkingResult {
    #[serde(default = "unknown_candidate", deserialize_with = "lenient_string")]
    pub candidate_name: String,
    #[serde(default = "zero_marks", deserialize_with = "lenient_marks")]
    pub total_marks: String,
    #[serde(default, deserialize_with = "lenient_answers")]
    pub correct_answers: BTreeMap<String, String>,
    #[serde(default)]
    pub incorrect_answers: BTreeMap<String, IncorrectAnswer>,
    #[serde(default)]
    pub band: String,
}

fn unknown_candidate() -> String {
    "Unknown".to_string()
}

fn zero_marks() -> String {
    "0/40".to_string()
}

// A bare number of marks (`33`) is read as `33/40`.
fn lenient_marks<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<JsonValue> = Option::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(JsonValue::Null) => zero_marks(),
        Some(JsonValue::Number(n)) => format!("{}/40", n),
        Some(other) => value_to_text(&other),
    })
}

fn lenient_answers<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, JsonValue>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .iter()
        .map(|(number, answer)| (number.clone(), value_to_text(answer)))
        .collect())
}
