use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bluesky_client::BlueskyClient;
use magpie_common::Config;
use magpie_pipeline::processor::{GENERATE_ENDPOINT, POST_ENDPOINT};
use magpie_pipeline::trends::{TrendRepo, TrendResearcher};
use magpie_pipeline::{
    CursorStore, MentionFetcher, MentionProcessor, MentionService, PgStateStore, RateLimiter,
    RetryPolicy, Scheduler, StateStore,
};
use openai_client::OpenAiClient;

mod rest;

/// Expired processed-set entries are reclaimed daily.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub service: Arc<MentionService>,
    pub cursors: Arc<CursorStore>,
    pub trends: TrendRepo,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("magpie=info".parse()?))
        .init();

    let config = Config::from_env();
    config.log_redacted();

    let store: Arc<dyn StateStore> = {
        let pg = PgStateStore::connect(&config.database_url).await?;
        pg.migrate().await?;
        Arc::new(pg)
    };

    let platform = Arc::new(BlueskyClient::new(
        &config.bluesky_service,
        &config.bluesky_handle,
        &config.bluesky_password,
    ));
    platform.login().await?;

    let generator = Arc::new(OpenAiClient::new(
        &config.openai_api_key,
        &config.openai_model,
    ));

    let rate_window = Duration::from_secs(config.rate_window_secs);
    // Writes and generation calls get half the read budget, floored at one.
    let write_budget = (config.rate_max_requests / 2).max(1);
    let limiter = Arc::new(
        RateLimiter::new(config.rate_max_requests, rate_window)
            .with_endpoint_limit(POST_ENDPOINT, write_budget, rate_window)
            .with_endpoint_limit(GENERATE_ENDPOINT, write_budget, rate_window),
    );
    let retry = RetryPolicy::new(
        config.retry_max_attempts,
        Duration::from_millis(config.retry_base_delay_ms),
    );

    let processed_ttl = Duration::from_secs(config.processed_ttl_days * 24 * 60 * 60);
    let cursors = Arc::new(CursorStore::new(store.clone()).with_processed_ttl(processed_ttl));

    let fetcher = MentionFetcher::new(
        platform.clone(),
        cursors.clone(),
        limiter.clone(),
        retry,
        config.notification_page_limit,
    );
    let trend_repo = TrendRepo::new(store);
    let processor = MentionProcessor::new(
        platform.clone(),
        generator,
        cursors.clone(),
        trend_repo.clone(),
        limiter.clone(),
        retry,
    );
    let researcher = TrendResearcher::new(platform, trend_repo.clone(), limiter, retry);
    let service = Arc::new(MentionService::new(fetcher, processor, researcher, cursors.clone()));

    let scheduler = Arc::new(Scheduler::new());
    {
        let service = service.clone();
        scheduler
            .schedule_task(
                "poll_mentions",
                Duration::from_secs(config.poll_interval_secs),
                move || {
                    let service = service.clone();
                    async move {
                        service.check_and_process_mentions().await?;
                        Ok(())
                    }
                },
            )
            .await;
    }
    {
        let service = service.clone();
        scheduler
            .schedule_task(
                "research_trends",
                Duration::from_secs(config.trend_interval_secs),
                move || {
                    let service = service.clone();
                    async move {
                        service.research_trends().await?;
                        Ok(())
                    }
                },
            )
            .await;
    }
    {
        let service = service.clone();
        scheduler
            .schedule_task("expire_processed", MAINTENANCE_INTERVAL, move || {
                let service = service.clone();
                async move {
                    let purged = service.expire_processed().await?;
                    info!(purged, "Expired processed entries purged");
                    Ok(())
                }
            })
            .await;
    }
    scheduler.start();

    let state = Arc::new(AppState {
        scheduler: scheduler.clone(),
        service,
        cursors,
        trends: trend_repo,
    });

    let app = Router::new()
        .route("/", get(rest::health))
        .route("/status", get(rest::status))
        .route("/start", post(rest::start))
        .route("/stop", post(rest::stop))
        .route("/stats", get(rest::stats))
        .route("/jobs/{name}", get(rest::job_detail))
        .route("/cursor", post(rest::set_cursor))
        .with_state(state)
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        );

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("Magpie API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

    Ok(())
}

async fn shutdown_signal(scheduler: Arc<Scheduler>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received, draining scheduler");
    scheduler.shutdown().await;
}
