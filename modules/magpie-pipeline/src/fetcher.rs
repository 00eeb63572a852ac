use std::sync::Arc;

use tracing::{debug, info};

use magpie_common::{MentionEvent, NotificationKind, Result};

use crate::cursor::CursorStore;
use crate::rate::RateLimiter;
use crate::retry::RetryPolicy;
use crate::traits::SocialPlatformClient;

/// Rate-limit key for notification feed reads.
pub const NOTIFICATIONS_ENDPOINT: &str = "notifications";

/// Produces a deduplicated, ordered batch of new mention events per poll.
///
/// Reads the stored cursor, pages the notification feed through the rate
/// limiter and retry policy, filters to mention-kind events, drops ids the
/// processed set already holds, and advances the cursor to the
/// platform-issued token. The platform's cursor is authoritative; a resume
/// point is never derived locally.
pub struct MentionFetcher {
    platform: Arc<dyn SocialPlatformClient>,
    cursors: Arc<CursorStore>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    page_limit: u32,
}

impl MentionFetcher {
    pub fn new(
        platform: Arc<dyn SocialPlatformClient>,
        cursors: Arc<CursorStore>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        page_limit: u32,
    ) -> Self {
        Self {
            platform,
            cursors,
            limiter,
            retry,
            page_limit,
        }
    }

    /// Fetch mention events newer than the stored cursor, oldest first in
    /// platform delivery order.
    pub async fn fetch_new(&self) -> Result<Vec<MentionEvent>> {
        let base = self.cursors.cursor().await?;
        let base_value = base.as_ref().map(|c| c.value.clone());

        let page = self
            .retry
            .run("list_notifications", || async {
                self.limiter.acquire(NOTIFICATIONS_ENDPOINT).await;
                self.platform
                    .list_notifications(base_value.as_deref(), self.page_limit)
                    .await
            })
            .await?;

        if page.events.is_empty() {
            // Quiet poll: leave the resume point alone.
            debug!("No new notifications");
            return Ok(Vec::new());
        }

        let total = page.events.len();
        let mut fresh = Vec::new();
        for notification in page.events {
            if notification.kind != NotificationKind::Mention {
                continue;
            }
            if self.cursors.is_processed(&notification.id).await? {
                debug!(id = notification.id.as_str(), "Mention already processed, skipping");
                continue;
            }
            fresh.push(notification.into_mention());
        }

        if let Some(next) = page.next_cursor.as_deref() {
            self.cursors.advance(base.as_ref(), next).await?;
        }

        info!(
            total,
            mentions = fresh.len(),
            "Notification fetch complete"
        );
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::MemoryStateStore;
    use crate::testing::{notification, page, MockPlatform};
    use magpie_common::MagpieError;

    fn fetcher(platform: MockPlatform) -> (MentionFetcher, Arc<CursorStore>, Arc<MockPlatform>) {
        let platform = Arc::new(platform);
        let cursors = Arc::new(CursorStore::new(Arc::new(MemoryStateStore::new())));
        let fetcher = MentionFetcher::new(
            platform.clone(),
            cursors.clone(),
            Arc::new(RateLimiter::new(100, Duration::from_secs(60))),
            RetryPolicy::new(3, Duration::from_millis(1)),
            20,
        );
        (fetcher, cursors, platform)
    }

    #[tokio::test]
    async fn filters_to_mentions_and_preserves_order() {
        let platform = MockPlatform::new().on_notifications(page(
            vec![
                notification(NotificationKind::Mention, "m1", "roast me"),
                notification(NotificationKind::Like, "l1", ""),
                notification(NotificationKind::Mention, "m2", "and me"),
                notification(NotificationKind::Follow, "f1", ""),
            ],
            Some("c1"),
        ));
        let (fetcher, cursors, _) = fetcher(platform);

        let events = fetcher.fetch_new().await.unwrap();
        assert_eq!(
            events.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["m1", "m2"]
        );
        assert_eq!(cursors.cursor().await.unwrap().unwrap().value, "c1");
    }

    #[tokio::test]
    async fn already_processed_ids_are_skipped() {
        let platform = MockPlatform::new().on_notifications(page(
            vec![
                notification(NotificationKind::Mention, "m1", "again"),
                notification(NotificationKind::Mention, "m2", "new"),
            ],
            Some("c2"),
        ));
        let (fetcher, cursors, _) = fetcher(platform);
        cursors.mark_processed("m1").await.unwrap();

        let events = fetcher.fetch_new().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "m2");
    }

    #[tokio::test]
    async fn empty_page_leaves_cursor_untouched() {
        let platform = MockPlatform::new().on_notifications(page(vec![], Some("c-noise")));
        let (fetcher, cursors, _) = fetcher(platform);
        cursors.force_set("c-keep").await.unwrap();

        let events = fetcher.fetch_new().await.unwrap();
        assert!(events.is_empty());
        assert_eq!(cursors.cursor().await.unwrap().unwrap().value, "c-keep");
    }

    #[tokio::test]
    async fn cursor_follows_platform_token_across_fetches() {
        let platform = MockPlatform::new()
            .on_notifications(page(
                vec![notification(NotificationKind::Mention, "m1", "a")],
                Some("c1"),
            ))
            .on_notifications(page(
                vec![notification(NotificationKind::Mention, "m2", "b")],
                Some("c2"),
            ))
            .on_notifications(page(
                vec![notification(NotificationKind::Mention, "m3", "c")],
                Some("c3"),
            ));
        let (fetcher, cursors, _) = fetcher(platform);

        for _ in 0..3 {
            fetcher.fetch_new().await.unwrap();
        }
        assert_eq!(cursors.cursor().await.unwrap().unwrap().value, "c3");
    }

    #[tokio::test]
    async fn requests_resume_from_stored_cursor() {
        let platform = MockPlatform::new().on_notifications(page(vec![], None));
        let (fetcher, cursors, platform) = fetcher(platform);
        cursors.force_set("c-resume").await.unwrap();

        fetcher.fetch_new().await.unwrap();
        assert_eq!(
            platform.requested_cursors().await,
            vec![Some("c-resume".to_string())]
        );
    }

    #[tokio::test]
    async fn transient_listing_failures_are_retried() {
        let platform = MockPlatform::new()
            .fail_notifications_times(2, || MagpieError::Transient("503".into()))
            .on_notifications(page(
                vec![notification(NotificationKind::Mention, "m1", "a")],
                Some("c1"),
            ));
        let (fetcher, _, _) = fetcher(platform);

        let events = fetcher.fetch_new().await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface() {
        let platform = MockPlatform::new()
            .fail_notifications_times(5, || MagpieError::Transient("503".into()));
        let (fetcher, _, _) = fetcher(platform);

        let err = fetcher.fetch_new().await.unwrap_err();
        assert!(matches!(err, MagpieError::RetriesExhausted { attempts: 3, .. }));
    }
}
