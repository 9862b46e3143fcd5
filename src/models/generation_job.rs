use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    QuestionSet,
    Audio,
    RegeneratePart,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::QuestionSet => "question_set",
            JobKind::Audio => "audio",
            JobKind::RegeneratePart => "regenerate_part",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "question_set" => Some(JobKind::QuestionSet),
            "audio" => Some(JobKind::Audio),
            "regenerate_part" => Some(JobKind::RegeneratePart),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GenerationJob {
    pub id: Uuid,
    pub kind: String,
    pub status: String,
    pub progress: i32,
    pub task: Option<String>,
    pub payload: JsonValue,
    pub set_name: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
