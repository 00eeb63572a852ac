// Test mocks for the mention pipeline.
//
// Three doubles matching the trait boundaries:
// - MockPlatform (SocialPlatformClient) — scripted notification pages,
//   recorded replies, failure injection
// - MockGenerator (ResponseGenerator) — canned replies, failure injection
// - FlakyStore (StateStore) — delegates to an inner store but fails the
//   first N writes, for crash-between-post-and-commit scenarios
//
// Plus small constructors for events, notifications, and pages.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use magpie_common::{
    AuthorRef, GenerationContext, MagpieError, MentionEvent, Notification, NotificationKind,
    NotificationPage, PlatformPost, Result,
};

use crate::store::StateStore;
use crate::traits::{ResponseGenerator, SocialPlatformClient};

type ErrorFactory = Box<dyn Fn() -> MagpieError + Send + Sync>;

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

pub fn author(handle: &str) -> AuthorRef {
    AuthorRef {
        platform_id: format!("did:plc:{handle}"),
        handle: format!("{handle}.bsky.social"),
        display_name: None,
        avatar_url: None,
    }
}

pub fn mention(id: &str, text: &str) -> MentionEvent {
    MentionEvent {
        id: id.to_string(),
        author: author("heckler"),
        text: text.to_string(),
        uri: format!("at://did:plc:heckler/app.bsky.feed.post/{id}"),
        parent_uri: None,
        root_uri: None,
        observed_at: Utc::now(),
    }
}

pub fn notification(kind: NotificationKind, id: &str, text: &str) -> Notification {
    Notification {
        kind,
        id: id.to_string(),
        author: author("heckler"),
        text: text.to_string(),
        uri: format!("at://did:plc:heckler/app.bsky.feed.post/{id}"),
        parent_uri: None,
        root_uri: None,
        observed_at: Utc::now(),
    }
}

pub fn page(events: Vec<Notification>, next_cursor: Option<&str>) -> NotificationPage {
    NotificationPage {
        events,
        next_cursor: next_cursor.map(str::to_string),
    }
}

pub fn platform_post(uri: &str, text: &str) -> PlatformPost {
    PlatformPost {
        uri: uri.to_string(),
        cid: "bafy-test".to_string(),
        author_id: "did:plc:someone".to_string(),
        text: text.to_string(),
        parent_uri: None,
        root_uri: None,
        created_at: Some(Utc::now()),
    }
}

// ---------------------------------------------------------------------------
// MockPlatform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedReply {
    pub text: String,
    pub reply_to: String,
}

/// Scripted SocialPlatformClient. Notification pages are served in the
/// order registered; once exhausted, further polls see an empty feed.
#[derive(Default)]
pub struct MockPlatform {
    pages: Mutex<VecDeque<NotificationPage>>,
    posts: Mutex<HashMap<String, PlatformPost>>,
    timeline: Mutex<Vec<PlatformPost>>,
    replies: Mutex<Vec<PostedReply>>,
    requested_cursors: Mutex<Vec<Option<String>>>,
    notification_failures: Mutex<Option<(u32, ErrorFactory)>>,
    post_failures: Mutex<Option<(u32, ErrorFactory)>>,
    get_post_failure: Mutex<Option<ErrorFactory>>,
    reply_seq: AtomicU64,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_notifications(self, page: NotificationPage) -> Self {
        self.pages.lock().unwrap().push_back(page);
        self
    }

    pub fn on_post(self, post: PlatformPost) -> Self {
        self.posts.lock().unwrap().insert(post.uri.clone(), post);
        self
    }

    pub fn on_timeline(self, posts: Vec<PlatformPost>) -> Self {
        *self.timeline.lock().unwrap() = posts;
        self
    }

    /// Fail the next `n` list_notifications calls.
    pub fn fail_notifications_times(
        self,
        n: u32,
        factory: impl Fn() -> MagpieError + Send + Sync + 'static,
    ) -> Self {
        *self.notification_failures.lock().unwrap() = Some((n, Box::new(factory)));
        self
    }

    /// Fail the next `n` post_reply calls.
    pub fn fail_posts_times(
        self,
        n: u32,
        factory: impl Fn() -> MagpieError + Send + Sync + 'static,
    ) -> Self {
        *self.post_failures.lock().unwrap() = Some((n, Box::new(factory)));
        self
    }

    /// Fail every get_post call.
    pub fn fail_get_post(
        self,
        factory: impl Fn() -> MagpieError + Send + Sync + 'static,
    ) -> Self {
        *self.get_post_failure.lock().unwrap() = Some(Box::new(factory));
        self
    }

    pub async fn posted_replies(&self) -> Vec<PostedReply> {
        self.replies.lock().unwrap().clone()
    }

    pub async fn requested_cursors(&self) -> Vec<Option<String>> {
        self.requested_cursors.lock().unwrap().clone()
    }
}

#[async_trait]
impl SocialPlatformClient for MockPlatform {
    async fn list_notifications(
        &self,
        cursor: Option<&str>,
        _limit: u32,
    ) -> Result<NotificationPage> {
        self.requested_cursors
            .lock()
            .unwrap()
            .push(cursor.map(str::to_string));

        if let Some((remaining, factory)) = self.notification_failures.lock().unwrap().as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(factory());
            }
        }

        Ok(self
            .pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(NotificationPage {
                events: Vec::new(),
                next_cursor: None,
            }))
    }

    async fn get_post(&self, uri: &str) -> Result<Option<PlatformPost>> {
        if let Some(factory) = self.get_post_failure.lock().unwrap().as_ref() {
            return Err(factory());
        }
        Ok(self.posts.lock().unwrap().get(uri).cloned())
    }

    async fn post_reply(&self, text: &str, reply_to_uri: &str) -> Result<String> {
        if let Some((remaining, factory)) = self.post_failures.lock().unwrap().as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(factory());
            }
        }
        self.replies.lock().unwrap().push(PostedReply {
            text: text.to_string(),
            reply_to: reply_to_uri.to_string(),
        });
        let n = self.reply_seq.fetch_add(1, Ordering::SeqCst);
        Ok(format!("at://did:plc:bot/app.bsky.feed.post/r{n}"))
    }

    async fn list_timeline(&self, _limit: u32) -> Result<Vec<PlatformPost>> {
        Ok(self.timeline.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// MockGenerator
// ---------------------------------------------------------------------------

/// Canned ResponseGenerator. Optionally fails the first `n` calls before
/// serving the fixed reply.
pub struct MockGenerator {
    reply: String,
    failures: Mutex<Option<(u32, ErrorFactory)>>,
    contexts: Mutex<Vec<GenerationContext>>,
}

impl MockGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            failures: Mutex::new(None),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_times(
        n: u32,
        factory: impl Fn() -> MagpieError + Send + Sync + 'static,
    ) -> Self {
        Self::failing_then_replying(n, factory, "ok")
    }

    pub fn failing_then_replying(
        n: u32,
        factory: impl Fn() -> MagpieError + Send + Sync + 'static,
        reply: &str,
    ) -> Self {
        Self {
            reply: reply.to_string(),
            failures: Mutex::new(Some((n, Box::new(factory)))),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub async fn seen_contexts(&self) -> Vec<GenerationContext> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseGenerator for MockGenerator {
    async fn generate(&self, context: &GenerationContext) -> Result<String> {
        if let Some((remaining, factory)) = self.failures.lock().unwrap().as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(factory());
            }
        }
        self.contexts.lock().unwrap().push(context.clone());
        Ok(self.reply.clone())
    }
}

// ---------------------------------------------------------------------------
// FlakyStore
// ---------------------------------------------------------------------------

/// Delegating StateStore that fails the first `n` `put` calls. Simulates a
/// crash between a confirmed post and the processed-set commit.
pub struct FlakyStore<S> {
    inner: S,
    failing_puts: Mutex<u32>,
}

impl<S: StateStore> FlakyStore<S> {
    pub fn failing_puts(inner: S, n: u32) -> Self {
        Self {
            inner,
            failing_puts: Mutex::new(n),
        }
    }
}

#[async_trait]
impl<S: StateStore> StateStore for FlakyStore<S> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        {
            let mut remaining = self.failing_puts.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(MagpieError::Store("injected write failure".to_string()));
            }
        }
        self.inner.put(key, value, ttl).await
    }

    async fn put_if_equals(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool> {
        self.inner.put_if_equals(key, expected, value).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn purge_expired(&self) -> Result<u64> {
        self.inner.purge_expired().await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.keys_with_prefix(prefix).await
    }
}
