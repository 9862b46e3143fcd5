use crate::dto::generation_dto::{GenerateSetPayload, RegeneratePartPayload, PART_COUNT};
use crate::error::{Error, Result};
use crate::models::generation_job::{GenerationJob, JobKind};
use crate::models::question_set::GeneratedSet;
use crate::services::audio_service::AudioClip;
use crate::services::export_service::ExportService;
use crate::services::set_store::{ArtifactKind, SetHandle};
use crate::utils::time;
use crate::AppState;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

const JOB_COLUMNS: &str =
    "id, kind, status, progress, task, payload, set_name, error, created_at, started_at, finished_at";

pub const PROGRESS_GENERATING: i32 = 15;
pub const PROGRESS_EXPORTS: i32 = 35;
pub const PROGRESS_STITCHING: i32 = 95;
pub const PROGRESS_DONE: i32 = 100;

/// Progress reported while part `part` (1-based) is being voiced.
pub fn audio_progress(part: u8) -> i32 {
    PROGRESS_EXPORTS + 12 * part as i32
}

const FINISH_ATTEMPTS: u32 = 3;
const FINISH_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Where a running job reports progress and its final outcome.
#[async_trait]
pub trait JobTracker: Send + Sync {
    async fn progress(&self, id: Uuid, progress: i32, task: &str) -> Result<()>;
    async fn succeed(&self, id: Uuid) -> Result<()>;
    /// Marks the job failed with `error` and resets its progress to 0.
    async fn fail(&self, id: Uuid, error: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct JobService {
    pool: PgPool,
}

impl JobService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(
        &self,
        kind: JobKind,
        payload: JsonValue,
        set_name: Option<&str>,
    ) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO generation_jobs (kind, payload, set_name, task)
            VALUES ($1, $2, $3, 'Queued')
            RETURNING id
            "#,
        )
        .bind(kind.as_str())
        .bind(payload)
        .bind(set_name)
        .fetch_one(&self.pool)
        .await?;
        tracing::info!(job_id = %id, kind = kind.as_str(), "Job enqueued");
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Result<GenerationJob> {
        let job = sqlx::query_as::<_, GenerationJob>(&format!(
            "SELECT {} FROM generation_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Job {} not found", id)))?;
        Ok(job)
    }

    /// Puts jobs left `running` by a previous process back in the queue.
    /// Call once at startup, before the worker begins claiming.
    pub async fn requeue_interrupted(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'pending', progress = 0, task = 'Requeued after restart', started_at = NULL
            WHERE status = 'running'
            "#,
        )
        .execute(&self.pool)
        .await?;
        let count = result.rows_affected();
        if count > 0 {
            tracing::warn!("Requeued {} interrupted jobs", count);
        }
        Ok(count)
    }

    /// Claims and runs the oldest pending job. `Ok(false)` when the queue is empty.
    pub async fn run_once(&self, state: &AppState) -> Result<bool> {
        let claimed = sqlx::query_as::<_, GenerationJob>(&format!(
            r#"
            UPDATE generation_jobs SET status = 'running', started_at = NOW()
            WHERE id = (
                SELECT id FROM generation_jobs WHERE status = 'pending'
                ORDER BY created_at ASC FOR UPDATE SKIP LOCKED LIMIT 1
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;
        let Some(job) = claimed else { return Ok(false) };

        execute(state, self, &job).await?;
        Ok(true)
    }
}

#[async_trait]
impl JobTracker for JobService {
    async fn progress(&self, id: Uuid, progress: i32, task: &str) -> Result<()> {
        sqlx::query("UPDATE generation_jobs SET progress = $1, task = $2 WHERE id = $3")
            .bind(progress)
            .bind(task)
            .bind(id)
            .execute(&self.pool)
            .await?;
        tracing::debug!(job_id = %id, progress, "{}", task);
        Ok(())
    }

    async fn succeed(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"UPDATE generation_jobs SET status = 'succeeded', progress = $1, task = 'Complete', finished_at = NOW() WHERE id = $2"#,
        )
        .bind(PROGRESS_DONE)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"UPDATE generation_jobs SET status = 'failed', progress = 0, task = 'Failed', error = $1, finished_at = NOW() WHERE id = $2"#,
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Runs a claimed job and records how it ended. Only an outcome that could
/// not be recorded is returned as an error.
pub async fn execute(state: &AppState, tracker: &dyn JobTracker, job: &GenerationJob) -> Result<()> {
    tracing::info!(job_id = %job.id, kind = %job.kind, "Job started");
    let outcome = match JobKind::parse(&job.kind) {
        Some(JobKind::QuestionSet) => run_question_set(state, tracker, job).await,
        Some(JobKind::Audio) => run_audio(state, tracker, job).await,
        Some(JobKind::RegeneratePart) => run_regenerate(state, tracker, job).await,
        None => Err(Error::Internal(format!("Unknown job kind: {}", job.kind))),
    };

    match &outcome {
        Ok(()) => tracing::info!(job_id = %job.id, "Job succeeded"),
        Err(e) => tracing::error!(job_id = %job.id, "Job failed: {}", e),
    }
    record_outcome(tracker, job.id, outcome.map_err(|e| e.to_string())).await
}

async fn record_outcome(
    tracker: &dyn JobTracker,
    id: Uuid,
    outcome: std::result::Result<(), String>,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        let recorded = match &outcome {
            Ok(()) => tracker.succeed(id).await,
            Err(message) => tracker.fail(id, message).await,
        };
        match recorded {
            Ok(()) => return Ok(()),
            Err(e) if attempt < FINISH_ATTEMPTS => {
                tracing::warn!(job_id = %id, attempt, "Could not record job outcome: {}", e);
                attempt += 1;
                tokio::time::sleep(FINISH_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn job_set(state: &AppState, job: &GenerationJob) -> Result<SetHandle> {
    let name = job
        .set_name
        .as_deref()
        .ok_or_else(|| Error::Internal(format!("Job {} has no set", job.id)))?;
    state.sets.open(name).await
}

async fn run_question_set(
    state: &AppState,
    tracker: &dyn JobTracker,
    job: &GenerationJob,
) -> Result<()> {
    let payload: GenerateSetPayload = serde_json::from_value(job.payload.clone())?;
    let handle = job_set(state, job).await?;

    tracker
        .progress(job.id, PROGRESS_GENERATING, "Generating questions")
        .await?;
    let set = state.generator.generate_full_set(&payload).await?;
    state.sets.write_set(&handle, &set).await?;

    tracker
        .progress(job.id, PROGRESS_EXPORTS, "Writing question paper, transcript and answers")
        .await?;
    write_exports(state, &handle, &set).await?;

    if payload.generate_with_audio {
        render_audio(state, tracker, job.id, &handle, &set).await?;
    }
    Ok(())
}

async fn run_audio(state: &AppState, tracker: &dyn JobTracker, job: &GenerationJob) -> Result<()> {
    let handle = job_set(state, job).await?;
    if handle.has(ArtifactKind::FullAudio).await {
        return Ok(());
    }
    let set = state.sets.read_set(&handle).await?;
    render_audio(state, tracker, job.id, &handle, &set).await
}

async fn run_regenerate(
    state: &AppState,
    tracker: &dyn JobTracker,
    job: &GenerationJob,
) -> Result<()> {
    let payload: RegeneratePartPayload = serde_json::from_value(job.payload.clone())?;
    let handle = job_set(state, job).await?;
    let set = state.sets.read_set(&handle).await?;

    tracker
        .progress(
            job.id,
            PROGRESS_GENERATING,
            &format!("Regenerating Part {}", payload.part),
        )
        .await?;
    let updated = state
        .generator
        .regenerate_part(&set, payload.part, &payload.specification)
        .await?;
    state.sets.write_set(&handle, &updated).await?;

    tracker.progress(job.id, PROGRESS_EXPORTS, "Rewriting exports").await?;
    write_exports(state, &handle, &updated).await?;

    if handle.has(ArtifactKind::FullAudio).await {
        tracker
            .progress(
                job.id,
                audio_progress(payload.part),
                &format!("Converting Part {} to audio", payload.part),
            )
            .await?;
        let clip = state
            .audio
            .section_audio(&updated.part_transcript(payload.part))
            .await?;
        clip.write_to(handle.path(ArtifactKind::PartAudio(payload.part)))
            .await?;

        tracker
            .progress(job.id, PROGRESS_STITCHING, "Stitching full audio")
            .await?;
        let mut parts = Vec::with_capacity(PART_COUNT as usize);
        for part in 1..=PART_COUNT {
            parts.push(AudioClip::read_from(handle.path(ArtifactKind::PartAudio(part))).await?);
        }
        state
            .audio
            .full_audio(&parts)
            .write_to(handle.path(ArtifactKind::FullAudio))
            .await?;
    }
    Ok(())
}

async fn render_audio(
    state: &AppState,
    tracker: &dyn JobTracker,
    job_id: Uuid,
    handle: &SetHandle,
    set: &GeneratedSet,
) -> Result<()> {
    let mut parts = Vec::with_capacity(PART_COUNT as usize);
    for part in 1..=PART_COUNT {
        tracker
            .progress(
                job_id,
                audio_progress(part),
                &format!("Converting Part {} to audio", part),
            )
            .await?;
        let clip = state.audio.section_audio(&set.part_transcript(part)).await?;
        clip.write_to(handle.path(ArtifactKind::PartAudio(part))).await?;
        parts.push(clip);
    }

    tracker
        .progress(job_id, PROGRESS_STITCHING, "Stitching full audio")
        .await?;
    state
        .audio
        .full_audio(&parts)
        .write_to(handle.path(ArtifactKind::FullAudio))
        .await?;
    Ok(())
}

/// Question paper, transcript and answer key for a stored set.
pub async fn write_exports(state: &AppState, handle: &SetHandle, set: &GeneratedSet) -> Result<()> {
    let date = time::display_date_from_key(&set.key)?;
    state
        .sets
        .write_artifact(
            handle,
            ArtifactKind::Questions,
            ExportService::questions_txt(set, handle.number, &date),
        )
        .await?;
    state
        .sets
        .write_artifact(
            handle,
            ArtifactKind::Transcript,
            ExportService::transcript_txt(set, handle.number, &date),
        )
        .await?;
    state
        .sets
        .write_artifact(
            handle,
            ArtifactKind::Answers,
            ExportService::answer_key_txt(set, handle.number, &date),
        )
        .await?;
    Ok(())
}
