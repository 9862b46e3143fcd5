pub mod generation;
pub mod health;
pub mod history;
pub mod marking;
pub mod sets;

use crate::middleware::rate_limit::{rps_middleware, RateLimiter};
use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};

/// All routes; everything under `/api` shares one rate limiter.
pub fn router(state: AppState, public_rps: u32) -> Router {
    let api = Router::new()
        .route("/api/config", get(generation::get_config))
        .route("/api/generate", post(generation::generate_set))
        .route("/api/jobs/:id", get(generation::get_job))
        .route("/api/sets", get(sets::list_sets))
        .route("/api/sets/:name", get(sets::get_set))
        .route("/api/sets/:name/audio", post(sets::generate_audio))
        .route("/api/sets/:name/regenerate-part", post(sets::regenerate_part))
        .route("/api/sets/:name/audio/:part", get(sets::get_part_audio))
        .route("/api/sets/:name/files/:kind", get(sets::download_file))
        .route("/api/sets/:name/save", post(sets::save_set))
        .route("/api/history", get(history::list_history))
        .route("/api/marking", post(marking::mark_answers))
        .layer(axum::middleware::from_fn_with_state(
            RateLimiter::new(public_rps),
            rps_middleware,
        ));

    Router::new()
        .route("/health", get(health::health))
        .merge(api)
        .with_state(state)
}
