use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// One generated block of an IELTS listening part. Field names keep the
/// capitalised keys used by stored sets and the generation prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionBlock {
    #[serde(rename = "Section", default)]
    pub section: String,
    #[serde(rename = "Type", default)]
    pub question_type: String,
    #[serde(rename = "Instructions", default)]
    pub instructions: String,
    #[serde(rename = "Questions", default, deserialize_with = "flatten_strings")]
    pub questions: Vec<String>,
    #[serde(rename = "Options", default, deserialize_with = "flatten_strings")]
    pub options: Vec<String>,
    #[serde(rename = "Diagram", default, deserialize_with = "lenient_string")]
    pub diagram: String,
    #[serde(rename = "Answers", default, deserialize_with = "flatten_strings")]
    pub answers: Vec<String>,
    #[serde(rename = "Transcript", default, deserialize_with = "lenient_string")]
    pub transcript: String,
}

impl QuestionBlock {
    /// `"T005 - Multiple choice"` → `"T005"`.
    pub fn type_code(&self) -> &str {
        self.question_type.split_whitespace().next().unwrap_or("")
    }

    pub fn part_number(&self) -> Option<u8> {
        self.section
            .trim()
            .trim_start_matches("Part")
            .trim()
            .parse()
            .ok()
    }

    pub fn render_group(&self) -> RenderGroup {
        RenderGroup::for_code(self.type_code())
    }

    pub fn has_diagram(&self) -> bool {
        !self.diagram.trim().is_empty()
    }
}

/// How a question type is laid out on the question paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderGroup {
    Completion,
    MultipleChoice,
    Matching,
    Plain,
    Form,
    Unknown,
}

impl RenderGroup {
    pub fn for_code(code: &str) -> Self {
        match code {
            "T001" | "T003" | "T004" | "T008" | "T011" => RenderGroup::Completion,
            "T005" | "T007" => RenderGroup::MultipleChoice,
            "T006" => RenderGroup::Matching,
            "T009" | "T010" => RenderGroup::Plain,
            "T002" => RenderGroup::Form,
            _ => RenderGroup::Unknown,
        }
    }
}

// The model sometimes nests option rows (`[["A", "library"], ...]`) or emits
// numbers; everything is flattened to one display string per entry.
fn flatten_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<JsonValue> = Option::deserialize(deserializer)?;
    let items = match raw {
        Some(JsonValue::Array(items)) => items,
        Some(JsonValue::Null) | None => return Ok(vec![]),
        Some(other) => vec![other],
    };
    Ok(items.iter().map(value_to_text).collect())
}

pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<JsonValue> = Option::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::Array(lines)) => lines
            .iter()
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => value_to_text(&other),
    })
}

pub(crate) fn value_to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(parts) => parts
            .iter()
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join(" "),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}
