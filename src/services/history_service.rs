use crate::error::{Error, Result};
use crate::models::history::HistoryRecord;
use crate::utils::time;
use serde_json::Value as JsonValue;
use sqlx::PgPool;

/// `jane.doe@example.com` → `jane.doe`.
pub fn username_from_email(email: &str) -> Result<String> {
    match email.trim().split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(local.to_string()),
        _ => Err(Error::BadRequest(format!("Invalid email: {}", email))),
    }
}

#[derive(Clone)]
pub struct HistoryService {
    pool: PgPool,
}

impl HistoryService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        set_name: &str,
        email: &str,
        files: JsonValue,
    ) -> Result<HistoryRecord> {
        let email = email.trim().to_lowercase();
        let username = username_from_email(&email)?;
        let date_key = time::date_key(time::now());

        let record = sqlx::query_as::<_, HistoryRecord>(
            r#"
            INSERT INTO set_history (set_name, username, email, date_key, files)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, set_name, username, email, date_key, files, created_at
            "#,
        )
        .bind(set_name)
        .bind(&username)
        .bind(&email)
        .bind(&date_key)
        .bind(files)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(set = set_name, user = %username, "Saved set to history");
        Ok(record)
    }

    /// Newest first; all users when `email` is `None`.
    pub async fn list(&self, email: Option<&str>) -> Result<Vec<HistoryRecord>> {
        let records = match email.map(|e| e.trim().to_lowercase()) {
            Some(email) if !email.is_empty() => {
                sqlx::query_as::<_, HistoryRecord>(
                    r#"
                    SELECT id, set_name, username, email, date_key, files, created_at
                    FROM set_history WHERE email = $1
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(email)
                .fetch_all(&self.pool)
                .await?
            }
            _ => {
                sqlx::query_as::<_, HistoryRecord>(
                    r#"
                    SELECT id, set_name, username, email, date_key, files, created_at
                    FROM set_history
                    ORDER BY created_at DESC
                    LIMIT 200
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_is_local_part() {
        assert_eq!(username_from_email("jane.doe@example.com").unwrap(), "jane.doe");
        assert!(username_from_email("nobody").is_err());
        assert!(username_from_email("@example.com").is_err());
    }
}
