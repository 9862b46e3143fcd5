use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub tts_api_url: String,
    pub tts_api_key: String,
    pub narrator_voice: String,
    pub speaker_voices: Vec<String>,
    pub sets_dir: String,
    pub corpus_dir: String,
    pub catalog_path: String,
    pub max_generation_attempts: u32,
    pub accept_score: f64,
    pub public_rps: u32,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let speaker_voices = get_env_or("SPEAKER_VOICES", "Andrew Chipper,Daisy Studious")
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>();
        if speaker_voices.is_empty() {
            return Err(Error::Config(
                "SPEAKER_VOICES must name at least one voice".to_string(),
            ));
        }

        let accept_score: f64 = get_env_parse_or("ACCEPT_SCORE", 0.8)?;
        if !(0.0..=1.0).contains(&accept_score) {
            return Err(Error::Config(format!(
                "Invalid value for ACCEPT_SCORE: {} is outside 0.0..=1.0",
                accept_score
            )));
        }

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            gemini_api_key: get_env("GEMINI_API_KEY")?,
            gemini_model: get_env_or("GEMINI_MODEL", "gemini-2.5-flash"),
            tts_api_url: get_env("TTS_API_URL")?,
            tts_api_key: get_env_or("TTS_API_KEY", ""),
            narrator_voice: get_env_or("NARRATOR_VOICE", "Daisy Studious"),
            speaker_voices,
            sets_dir: get_env_or("SETS_DIR", "sets"),
            corpus_dir: get_env_or("CORPUS_DIR", "corpus"),
            catalog_path: get_env_or("CATALOG_PATH", "config/listening_catalog.json"),
            max_generation_attempts: get_env_parse_or("MAX_GENERATION_ATTEMPTS", 3)?,
            accept_score,
            public_rps: get_env_parse_or("PUBLIC_RPS", 20)?,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
