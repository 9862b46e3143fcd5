use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// A hosted text model that answers a prompt with (ideally JSON) text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, client: Client) -> Self {
        Self {
            client,
            api_key,
            model,
            temperature: 0.9,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl ContentModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                response_mime_type: "application/json",
            },
        };

        let url = format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model);
        let res = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&request)
            .timeout(Duration::from_secs(120))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(classify_failure(status, &text));
        }

        let body: GeminiResponse = res.json().await?;
        body.candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .find(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Upstream("Gemini returned no candidate text".to_string()))
    }
}

fn classify_failure(status: StatusCode, body: &str) -> Error {
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        Error::RateLimited(format!("Gemini {}: {}", status, truncate(body, 300)))
    } else {
        Error::Upstream(format!("Gemini API error {}: {}", status, truncate(body, 300)))
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Removes a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Parses model output as one `T`. A single-element array is unwrapped.
pub fn parse_single<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let value: JsonValue = serde_json::from_str(strip_code_fences(raw))?;
    let value = match value {
        JsonValue::Array(mut items) if items.len() == 1 => items.remove(0),
        JsonValue::Array(items) => {
            return Err(Error::Upstream(format!(
                "Expected one object, model returned {} items",
                items.len()
            )))
        }
        other => other,
    };
    Ok(serde_json::from_value(value)?)
}

/// Parses model output as a list of `T`. A lone object becomes a one-item list.
pub fn parse_list<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>> {
    let value: JsonValue = serde_json::from_str(strip_code_fences(raw))?;
    match value {
        JsonValue::Array(_) => Ok(serde_json::from_value(value)?),
        other => Ok(vec![serde_json::from_value(other)?]),
    }
}
