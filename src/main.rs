use axum::extract::DefaultBodyLimit;
use ielts_listening_generator::{
    config::{get_config, init_config},
    database::pool::{create_pool, migrate},
    middleware::cors::permissive_cors,
    routes, AppState,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();
    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    migrate(&pool).await?;

    let app_state = AppState::load(pool).await?;
    info!(
        "Sets in {}, {} reference transcripts, up to {} attempts per block",
        config.sets_dir,
        app_state.scorer.corpus().len(),
        config.max_generation_attempts
    );

    app_state.jobs.requeue_interrupted().await?;

    {
        let state = app_state.clone();
        tokio::spawn(async move {
            let jobs = state.jobs.clone();
            loop {
                match jobs.run_once(&state).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tokio::time::sleep(Duration::from_millis(750)).await;
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "Job worker error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
    }

    let app = routes::router(app_state, config.public_rps)
        .layer(permissive_cors())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024));

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
