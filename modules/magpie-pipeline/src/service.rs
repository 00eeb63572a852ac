use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use magpie_common::Result;

use crate::cursor::CursorStore;
use crate::fetcher::MentionFetcher;
use crate::processor::{BatchReport, MentionProcessor};
use crate::trends::{TrendResearcher, TrendSnapshot};

/// Running counters for the operator surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceStats {
    pub mentions_processed: u64,
    pub mentions_failed: u64,
    pub trend_refreshes: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Owns the fetch-and-process pipeline and the trend researcher, exposing
/// the tick bodies the scheduler drives and the stats the api reports.
pub struct MentionService {
    fetcher: MentionFetcher,
    processor: MentionProcessor,
    trends: TrendResearcher,
    cursors: Arc<CursorStore>,
    stats: Mutex<ServiceStats>,
}

impl MentionService {
    pub fn new(
        fetcher: MentionFetcher,
        processor: MentionProcessor,
        trends: TrendResearcher,
        cursors: Arc<CursorStore>,
    ) -> Self {
        Self {
            fetcher,
            processor,
            trends,
            cursors,
            stats: Mutex::new(ServiceStats::default()),
        }
    }

    /// One poll tick: fetch new mentions and process the batch. A fetch
    /// failure is recorded and surfaced; per-event processing failures are
    /// absorbed into the report so the tick itself still completes.
    pub async fn check_and_process_mentions(&self) -> Result<BatchReport> {
        let events = match self.fetcher.fetch_new().await {
            Ok(events) => events,
            Err(e) => {
                self.record_error(&e.to_string());
                return Err(e);
            }
        };

        let report = self.processor.process_batch(&events).await;

        {
            let mut stats = self.stats.lock().expect("stats lock");
            stats.mentions_processed += report.replied;
            stats.mentions_failed += report.failed;
            stats.last_check = Some(Utc::now());
            if let Some(err) = &report.last_error {
                stats.last_error = Some(err.clone());
            }
        }

        if report.failed > 0 {
            warn!(
                replied = report.replied,
                failed = report.failed,
                "Mention check completed with failures"
            );
        } else {
            info!(
                replied = report.replied,
                skipped = report.skipped,
                "Mention check complete"
            );
        }
        Ok(report)
    }

    /// One research tick: refresh the trend snapshot from the timeline.
    pub async fn research_trends(&self) -> Result<TrendSnapshot> {
        match self.trends.research().await {
            Ok(snapshot) => {
                self.stats.lock().expect("stats lock").trend_refreshes += 1;
                Ok(snapshot)
            }
            Err(e) => {
                self.record_error(&e.to_string());
                Err(e)
            }
        }
    }

    /// Periodic store maintenance: drop expired processed-set entries.
    pub async fn expire_processed(&self) -> Result<u64> {
        self.cursors.expire_old().await
    }

    pub fn stats(&self) -> ServiceStats {
        self.stats.lock().expect("stats lock").clone()
    }

    pub async fn cursor_value(&self) -> Result<Option<String>> {
        Ok(self.cursors.cursor().await?.map(|c| c.value))
    }

    fn record_error(&self, message: &str) {
        let mut stats = self.stats.lock().expect("stats lock");
        stats.last_error = Some(message.to_string());
        stats.last_check = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::rate::RateLimiter;
    use crate::retry::RetryPolicy;
    use crate::store::{MemoryStateStore, StateStore};
    use crate::testing::{notification, page, platform_post, MockGenerator, MockPlatform};
    use crate::trends::TrendRepo;
    use magpie_common::{MagpieError, NotificationKind};

    fn service(platform: Arc<MockPlatform>, generator: Arc<MockGenerator>) -> MentionService {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let cursors = Arc::new(CursorStore::new(store.clone()));
        let limiter = Arc::new(RateLimiter::new(100, Duration::from_secs(60)));
        let retry = RetryPolicy::new(3, Duration::from_millis(1));

        let fetcher = MentionFetcher::new(
            platform.clone(),
            cursors.clone(),
            limiter.clone(),
            retry.clone(),
            20,
        );
        let processor = MentionProcessor::new(
            platform.clone(),
            generator,
            cursors.clone(),
            TrendRepo::new(store.clone()),
            limiter.clone(),
            retry.clone(),
        );
        let trends = TrendResearcher::new(platform, TrendRepo::new(store), limiter, retry);
        MentionService::new(fetcher, processor, trends, cursors)
    }

    #[tokio::test]
    async fn check_tick_processes_and_counts_mentions() {
        let platform = Arc::new(MockPlatform::new().on_notifications(page(
            vec![
                notification(NotificationKind::Mention, "m1", "a"),
                notification(NotificationKind::Mention, "m2", "b"),
            ],
            Some("c1"),
        )));
        let generator = Arc::new(MockGenerator::replying("zing"));
        let service = service(platform.clone(), generator);

        let report = service.check_and_process_mentions().await.unwrap();
        assert_eq!(report.replied, 2);
        assert_eq!(platform.posted_replies().await.len(), 2);

        let stats = service.stats();
        assert_eq!(stats.mentions_processed, 2);
        assert!(stats.last_check.is_some());
        assert!(stats.last_error.is_none());
        assert_eq!(service.cursor_value().await.unwrap().as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn fetch_failure_is_recorded_and_surfaced() {
        let platform = Arc::new(
            MockPlatform::new()
                .fail_notifications_times(5, || MagpieError::Transient("503".into())),
        );
        let generator = Arc::new(MockGenerator::replying("x"));
        let service = service(platform, generator);

        let err = service.check_and_process_mentions().await.unwrap_err();
        assert!(matches!(err, MagpieError::RetriesExhausted { .. }));
        let stats = service.stats();
        assert!(stats.last_error.is_some());
        assert_eq!(stats.mentions_processed, 0);
    }

    #[tokio::test]
    async fn per_event_failures_do_not_fail_the_tick() {
        let platform = Arc::new(MockPlatform::new().on_notifications(page(
            vec![
                notification(NotificationKind::Mention, "m1", "a"),
                notification(NotificationKind::Mention, "m2", "b"),
            ],
            Some("c1"),
        )));
        let generator = Arc::new(MockGenerator::failing_then_replying(
            3,
            || MagpieError::Transient("down".into()),
            "ok",
        ));
        let service = service(platform, generator);

        let report = service.check_and_process_mentions().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.replied, 1);

        let stats = service.stats();
        assert_eq!(stats.mentions_processed, 1);
        assert_eq!(stats.mentions_failed, 1);
        assert!(stats.last_error.is_some());
    }

    #[tokio::test]
    async fn trend_tick_bumps_the_refresh_counter() {
        let platform = Arc::new(MockPlatform::new().on_timeline(vec![platform_post(
            "at://a/app.bsky.feed.post/1",
            "all about #weather today",
        )]));
        let generator = Arc::new(MockGenerator::replying("x"));
        let service = service(platform, generator);

        let snapshot = service.research_trends().await.unwrap();
        assert!(snapshot.trends.iter().any(|t| t.topic == "#weather"));
        assert_eq!(service.stats().trend_refreshes, 1);
    }
}
