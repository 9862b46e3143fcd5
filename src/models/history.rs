use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub set_name: String,
    pub username: String,
    pub email: String,
    pub date_key: String,
    pub files: JsonValue,
    pub created_at: DateTime<Utc>,
}
