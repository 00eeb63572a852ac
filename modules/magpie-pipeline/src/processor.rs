use std::sync::Arc;

use tracing::{debug, error, info, warn};

use magpie_common::{GenerationContext, MentionEvent, Result};

use crate::cursor::CursorStore;
use crate::rate::RateLimiter;
use crate::retry::RetryPolicy;
use crate::strategy::{pick_strategy, pick_tone, pick_weighted_trend, ContentStrategy, StrategyWeights};
use crate::traits::{ResponseGenerator, SocialPlatformClient};
use crate::trends::TrendRepo;

/// Rate-limit key for post/record reads (parent resolution).
pub const READ_ENDPOINT: &str = "get_post";
/// Rate-limit key for reply posting.
pub const POST_ENDPOINT: &str = "post_reply";
/// Rate-limit key for generation calls.
pub const GENERATE_ENDPOINT: &str = "generate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Reply posted and the event committed to the processed set.
    Replied { post_uri: String },
    /// Event was already committed; nothing done.
    Skipped,
}

/// Outcome of one batch, for the operator stats surface. Per-event errors
/// never abort the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub replied: u64,
    pub skipped: u64,
    pub failed: u64,
    pub last_error: Option<String>,
}

/// Drives one mention through generate-and-reply, committing the event id
/// only after the reply is confirmed posted.
///
/// The commit point is the single durable side effect: a crash or failure
/// anywhere before `mark_processed` leaves the event unmarked, so the next
/// poll retries it. Delivery of the attempt is at-least-once; the commit
/// itself is idempotent.
pub struct MentionProcessor {
    platform: Arc<dyn SocialPlatformClient>,
    generator: Arc<dyn ResponseGenerator>,
    cursors: Arc<CursorStore>,
    trends: TrendRepo,
    weights: StrategyWeights,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl MentionProcessor {
    pub fn new(
        platform: Arc<dyn SocialPlatformClient>,
        generator: Arc<dyn ResponseGenerator>,
        cursors: Arc<CursorStore>,
        trends: TrendRepo,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            platform,
            generator,
            cursors,
            trends,
            weights: StrategyWeights::default(),
            limiter,
            retry,
        }
    }

    pub fn with_strategy_weights(mut self, weights: StrategyWeights) -> Self {
        self.weights = weights;
        self
    }

    pub async fn process(&self, event: &MentionEvent) -> Result<ProcessOutcome> {
        if self.cursors.is_processed(&event.id).await? {
            debug!(id = event.id.as_str(), "Event already committed, skipping");
            return Ok(ProcessOutcome::Skipped);
        }

        let parent_post = match event.parent_uri.as_deref() {
            Some(uri) => self.resolve_parent(uri).await,
            None => None,
        };

        let (strategy, tone) = {
            let mut rng = rand::rng();
            (
                pick_strategy(&self.weights, &mut rng),
                pick_tone(&self.weights, &mut rng),
            )
        };
        let trend_hint = match strategy {
            ContentStrategy::TrendFocus => self.trend_hint().await,
            ContentStrategy::FreeForm => None,
        };

        let context = GenerationContext {
            current_post: event.text.clone(),
            parent_post,
            author: event.author.clone(),
            tone: Some(tone.as_str().to_string()),
            trend_hint,
        };

        let reply = self
            .retry
            .run("generate_reply", || async {
                self.limiter.acquire(GENERATE_ENDPOINT).await;
                self.generator.generate(&context).await
            })
            .await?;

        let post_uri = self
            .retry
            .run("post_reply", || async {
                self.limiter.acquire(POST_ENDPOINT).await;
                self.platform.post_reply(&reply, &event.uri).await
            })
            .await?;

        // Commit only now: marking before the post is confirmed would
        // silently drop the reply on a crash between the two steps.
        self.cursors.mark_processed(&event.id).await?;

        info!(
            id = event.id.as_str(),
            author = event.author.handle.as_str(),
            post_uri = post_uri.as_str(),
            "Mention processed"
        );
        Ok(ProcessOutcome::Replied { post_uri })
    }

    /// Process a batch sequentially. Per-event failures are logged and
    /// counted; the events stay unmarked and are retried on a later poll.
    pub async fn process_batch(&self, events: &[MentionEvent]) -> BatchReport {
        let mut report = BatchReport::default();
        for event in events {
            match self.process(event).await {
                Ok(ProcessOutcome::Replied { .. }) => report.replied += 1,
                Ok(ProcessOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!(id = event.id.as_str(), error = %e, "Failed to process mention");
                    report.failed += 1;
                    report.last_error = Some(e.to_string());
                }
            }
        }
        report
    }

    /// Best-effort trend flavor for the prompt. No snapshot, or a store
    /// hiccup, just means no hint.
    async fn trend_hint(&self) -> Option<String> {
        let snapshot = match self.trends.latest().await {
            Ok(snapshot) => snapshot?,
            Err(e) => {
                warn!(error = %e, "Trend lookup failed, generating without a hint");
                return None;
            }
        };
        let mut rng = rand::rng();
        pick_weighted_trend(&snapshot.trends, &mut rng).map(|t| t.topic.clone())
    }

    /// Best-effort parent context. Resolution failure degrades to no
    /// context instead of aborting the event.
    async fn resolve_parent(&self, uri: &str) -> Option<String> {
        self.limiter.acquire(READ_ENDPOINT).await;
        match self.platform.get_post(uri).await {
            Ok(Some(post)) => Some(post.text),
            Ok(None) => {
                debug!(uri, "Parent post gone");
                None
            }
            Err(e) => {
                warn!(uri, error = %e, "Parent resolution failed, proceeding without context");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cursor::CursorStore;
    use crate::store::MemoryStateStore;
    use crate::testing::{mention, platform_post, FlakyStore, MockGenerator, MockPlatform};
    use magpie_common::MagpieError;

    fn processor(
        platform: Arc<MockPlatform>,
        generator: Arc<MockGenerator>,
        cursors: Arc<CursorStore>,
    ) -> MentionProcessor {
        MentionProcessor::new(
            platform,
            generator,
            cursors,
            TrendRepo::new(Arc::new(MemoryStateStore::new())),
            Arc::new(RateLimiter::new(100, Duration::from_secs(60))),
            RetryPolicy::new(3, Duration::from_millis(1)),
        )
    }

    fn memory_cursors() -> Arc<CursorStore> {
        Arc::new(CursorStore::new(Arc::new(MemoryStateStore::new())))
    }

    #[tokio::test]
    async fn successful_processing_posts_then_commits() {
        let platform = Arc::new(MockPlatform::new());
        let generator = Arc::new(MockGenerator::replying("nice try"));
        let cursors = memory_cursors();
        let processor = processor(platform.clone(), generator.clone(), cursors.clone());

        let event = mention("m1", "roast me");
        let outcome = processor.process(&event).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Replied { .. }));
        assert!(cursors.is_processed("m1").await.unwrap());

        let posted = platform.posted_replies().await;
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].text, "nice try");
        assert_eq!(posted[0].reply_to, event.uri);
    }

    #[tokio::test]
    async fn committed_events_are_skipped() {
        let platform = Arc::new(MockPlatform::new());
        let generator = Arc::new(MockGenerator::replying("x"));
        let cursors = memory_cursors();
        cursors.mark_processed("m1").await.unwrap();
        let processor = processor(platform.clone(), generator, cursors);

        let outcome = processor.process(&mention("m1", "again")).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Skipped);
        assert!(platform.posted_replies().await.is_empty());
    }

    #[tokio::test]
    async fn generation_failure_leaves_event_unmarked() {
        let platform = Arc::new(MockPlatform::new());
        let generator = Arc::new(MockGenerator::failing_times(5, || {
            MagpieError::Transient("generation down".into())
        }));
        let cursors = memory_cursors();
        let processor = processor(platform.clone(), generator, cursors.clone());

        let err = processor.process(&mention("m1", "hi")).await.unwrap_err();
        assert!(matches!(err, MagpieError::RetriesExhausted { attempts: 3, .. }));
        assert!(!cursors.is_processed("m1").await.unwrap());
        assert!(platform.posted_replies().await.is_empty());
    }

    #[tokio::test]
    async fn post_failure_leaves_event_unmarked() {
        let platform = Arc::new(
            MockPlatform::new().fail_posts_times(5, || MagpieError::Transient("503".into())),
        );
        let generator = Arc::new(MockGenerator::replying("zing"));
        let cursors = memory_cursors();
        let processor = processor(platform.clone(), generator, cursors.clone());

        let err = processor.process(&mention("m1", "hi")).await.unwrap_err();
        assert!(matches!(err, MagpieError::RetriesExhausted { .. }));
        assert!(!cursors.is_processed("m1").await.unwrap());
    }

    #[tokio::test]
    async fn parent_resolution_failure_degrades_gracefully() {
        let platform = Arc::new(
            MockPlatform::new().fail_get_post(|| MagpieError::Transient("flaky".into())),
        );
        let generator = Arc::new(MockGenerator::replying("reply"));
        let cursors = memory_cursors();
        let processor = processor(platform.clone(), generator.clone(), cursors.clone());

        let mut event = mention("m1", "who said this?");
        event.parent_uri = Some("at://did:plc:p/app.bsky.feed.post/parent".into());

        let outcome = processor.process(&event).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Replied { .. }));
        // Generated without parent context.
        let contexts = generator.seen_contexts().await;
        assert_eq!(contexts.len(), 1);
        assert!(contexts[0].parent_post.is_none());
    }

    #[tokio::test]
    async fn parent_context_is_passed_when_available() {
        let parent_uri = "at://did:plc:p/app.bsky.feed.post/parent";
        let platform = Arc::new(
            MockPlatform::new().on_post(platform_post(parent_uri, "the original hot take")),
        );
        let generator = Arc::new(MockGenerator::replying("reply"));
        let cursors = memory_cursors();
        let processor = processor(platform, generator.clone(), cursors);

        let mut event = mention("m1", "thoughts?");
        event.parent_uri = Some(parent_uri.to_string());
        processor.process(&event).await.unwrap();

        let contexts = generator.seen_contexts().await;
        assert_eq!(
            contexts[0].parent_post.as_deref(),
            Some("the original hot take")
        );
    }

    #[tokio::test]
    async fn commit_failure_causes_reprocessing_next_run() {
        // Simulates a crash between post-success and commit: the store
        // fails the first mark_processed, the reply is posted twice across
        // runs, and the commit itself stays idempotent.
        let platform = Arc::new(MockPlatform::new());
        let generator = Arc::new(MockGenerator::replying("zing"));
        let flaky = Arc::new(FlakyStore::failing_puts(MemoryStateStore::new(), 1));
        let cursors = Arc::new(CursorStore::new(flaky));
        let processor = processor(platform.clone(), generator, cursors.clone());

        let event = mention("m1", "hi");
        let err = processor.process(&event).await.unwrap_err();
        assert!(matches!(err, MagpieError::Store(_)));
        assert!(!cursors.is_processed("m1").await.unwrap());
        assert_eq!(platform.posted_replies().await.len(), 1);

        // Next run: the event is fetched again and reprocessed.
        let outcome = processor.process(&event).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Replied { .. }));
        assert_eq!(platform.posted_replies().await.len(), 2);
        assert!(cursors.is_processed("m1").await.unwrap());
    }

    #[tokio::test]
    async fn trend_focus_strategy_attaches_a_hint() {
        use crate::trends::{TrendRepo, TrendSnapshot};
        use chrono::Utc;
        use magpie_common::{Trend, TrendKind};

        let store: Arc<MemoryStateStore> = Arc::new(MemoryStateStore::new());
        let trends = TrendRepo::new(store);
        trends
            .save(&TrendSnapshot {
                trends: vec![Trend {
                    topic: "#stormwatch".into(),
                    count: 9,
                    kind: TrendKind::Hashtag,
                }],
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let platform = Arc::new(MockPlatform::new());
        let generator = Arc::new(MockGenerator::replying("zing"));
        let processor = MentionProcessor::new(
            platform,
            generator.clone(),
            memory_cursors(),
            trends,
            Arc::new(RateLimiter::new(100, Duration::from_secs(60))),
            RetryPolicy::new(3, Duration::from_millis(1)),
        )
        .with_strategy_weights(StrategyWeights {
            trend_focus: 1.1, // always trend-focus
            sass_level: 1.1,  // always savage
        });

        processor.process(&mention("m1", "hi")).await.unwrap();
        let contexts = generator.seen_contexts().await;
        assert_eq!(contexts[0].trend_hint.as_deref(), Some("#stormwatch"));
        assert_eq!(contexts[0].tone.as_deref(), Some("savage"));
    }

    #[tokio::test]
    async fn free_form_strategy_generates_without_a_hint() {
        let platform = Arc::new(MockPlatform::new());
        let generator = Arc::new(MockGenerator::replying("zing"));
        let processor = processor(platform, generator.clone(), memory_cursors())
            .with_strategy_weights(StrategyWeights {
                trend_focus: 0.0,
                sass_level: 0.0,
            });

        processor.process(&mention("m1", "hi")).await.unwrap();
        let contexts = generator.seen_contexts().await;
        assert!(contexts[0].trend_hint.is_none());
        assert_eq!(contexts[0].tone.as_deref(), Some("witty"));
    }

    #[tokio::test]
    async fn batch_failures_do_not_abort_the_batch() {
        let platform = Arc::new(MockPlatform::new());
        let generator = Arc::new(MockGenerator::failing_then_replying(
            3, // first event exhausts 3 attempts, the rest succeed
            || MagpieError::Transient("down".into()),
            "ok",
        ));
        let cursors = memory_cursors();
        let processor = processor(platform.clone(), generator, cursors.clone());

        let events = vec![mention("m1", "a"), mention("m2", "b"), mention("m3", "c")];
        let report = processor.process_batch(&events).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.replied, 2);
        assert!(report.last_error.is_some());
        assert!(!cursors.is_processed("m1").await.unwrap());
        assert!(cursors.is_processed("m2").await.unwrap());
        assert!(cursors.is_processed("m3").await.unwrap());
    }
}
