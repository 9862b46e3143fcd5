pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::error::Result;
use crate::models::catalog::Catalog;
use crate::services::{
    ai_service::{ContentModel, GeminiClient},
    audio_service::{AudioService, HostedTtsClient},
    history_service::HistoryService,
    job_service::JobService,
    marking_service::MarkingService,
    question_generator::{GenerationPolicy, QuestionGenerator},
    scoring_service::{ReferenceCorpus, ScoreWeights, TranscriptScorer},
    set_store::SetStore,
};
use reqwest::Client;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub scorer: Arc<TranscriptScorer>,
    pub generator: QuestionGenerator,
    pub audio: AudioService,
    pub marking: MarkingService,
    pub jobs: JobService,
    pub history: HistoryService,
    pub sets: SetStore,
}

impl AppState {
    pub fn new(pool: PgPool, catalog: Catalog, corpus: ReferenceCorpus) -> Result<Self> {
        let config = crate::config::get_config();
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;

        let gemini = GeminiClient::new(
            config.gemini_api_key.clone(),
            config.gemini_model.clone(),
            http_client.clone(),
        );
        let writer: Arc<dyn ContentModel> = Arc::new(gemini.clone());
        let examiner: Arc<dyn ContentModel> = Arc::new(gemini.with_temperature(0.2));

        let catalog = Arc::new(catalog);
        let scorer = Arc::new(TranscriptScorer::new(corpus, ScoreWeights::default()));
        let generator = QuestionGenerator::new(
            writer,
            scorer.clone(),
            catalog.clone(),
            GenerationPolicy::from_config(config),
        );

        let synthesizer = Arc::new(HostedTtsClient::new(
            config.tts_api_url.clone(),
            config.tts_api_key.clone(),
            http_client,
        ));
        let audio = AudioService::new(
            synthesizer,
            config.narrator_voice.clone(),
            config.speaker_voices.clone(),
        );

        Ok(Self {
            jobs: JobService::new(pool.clone()),
            history: HistoryService::new(pool),
            marking: MarkingService::new(examiner),
            sets: SetStore::new(&config.sets_dir),
            catalog,
            scorer,
            generator,
            audio,
        })
    }

    /// Reads the catalogue and reference corpus named in the configuration.
    pub async fn load(pool: PgPool) -> Result<Self> {
        let config = crate::config::get_config();
        let catalog = Catalog::load(&config.catalog_path).await?;
        let corpus = ReferenceCorpus::load_dir(&config.corpus_dir).await?;
        Self::new(pool, catalog, corpus)
    }
}
