use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Themes, topics and per-part question types offered to the generator form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(rename = "Theme", default)]
    pub themes: BTreeMap<String, ThemeEntry>,
    #[serde(rename = "Part", default)]
    pub parts: BTreeMap<String, PartEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThemeEntry {
    #[serde(rename = "Topic", default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartEntry {
    #[serde(rename = "type", default)]
    pub types: BTreeMap<String, TypeEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeEntry {
    #[serde(default)]
    pub description: String,
}

impl Catalog {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("Cannot read catalog {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn type_description(&self, part: u8, code: &str) -> Option<&str> {
        self.parts
            .get(&part.to_string())
            .and_then(|p| p.types.get(code))
            .map(|t| t.description.as_str())
    }

    /// An empty catalogue accepts everything.
    pub fn allows_type(&self, part: u8, code: &str) -> bool {
        self.parts.is_empty() || self.type_description(part, code).is_some()
    }

    pub fn has_theme(&self, theme: &str) -> bool {
        self.themes.is_empty() || self.themes.contains_key(theme)
    }
}
