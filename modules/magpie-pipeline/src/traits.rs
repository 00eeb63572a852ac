// Trait abstractions for the pipeline's collaborators.
//
// SocialPlatformClient — notification feed, post lookup, reply posting.
// ResponseGenerator — persona reply text for one mention.
//
// Concrete impls adapt the thin client crates; mocks in `testing` make the
// whole pipeline testable with no network.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use magpie_common::{
    AuthorRef, GenerationContext, MagpieError, Notification, NotificationKind, NotificationPage,
    PlatformPost, Result,
};

#[async_trait]
pub trait SocialPlatformClient: Send + Sync {
    /// One page of the notification feed, in platform delivery order.
    /// `cursor = None` starts from the newest.
    async fn list_notifications(&self, cursor: Option<&str>, limit: u32)
        -> Result<NotificationPage>;

    /// Fetch a post by uri. `Ok(None)` when the post is gone.
    async fn get_post(&self, uri: &str) -> Result<Option<PlatformPost>>;

    /// Post a reply; returns the new post's uri.
    async fn post_reply(&self, text: &str, reply_to_uri: &str) -> Result<String>;

    /// Recent timeline posts, for trend research.
    async fn list_timeline(&self, limit: u32) -> Result<Vec<PlatformPost>>;
}

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, context: &GenerationContext) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Bluesky adapter
// ---------------------------------------------------------------------------

#[async_trait]
impl SocialPlatformClient for bluesky_client::BlueskyClient {
    async fn list_notifications(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<NotificationPage> {
        let page = self
            .list_notifications(cursor, limit)
            .await
            .map_err(platform_err)?;
        let events = page
            .notifications
            .into_iter()
            .map(notification_from_view)
            .collect();
        Ok(NotificationPage {
            events,
            next_cursor: page.cursor,
        })
    }

    async fn get_post(&self, uri: &str) -> Result<Option<PlatformPost>> {
        let record = self.get_post(uri).await.map_err(platform_err)?;
        Ok(record.map(|r| {
            let (did, _) = bluesky_client::parse_at_uri(&r.uri)
                .map(|(did, rkey)| (did.to_string(), rkey.to_string()))
                .unwrap_or_default();
            PlatformPost {
                uri: r.uri,
                cid: r.cid.unwrap_or_default(),
                author_id: did,
                text: r.value.text.unwrap_or_default(),
                parent_uri: r.value.reply.as_ref().map(|refs| refs.parent.uri.clone()),
                root_uri: r.value.reply.as_ref().map(|refs| refs.root.uri.clone()),
                created_at: r.value.created_at.as_deref().and_then(parse_timestamp),
            }
        }))
    }

    async fn post_reply(&self, text: &str, reply_to_uri: &str) -> Result<String> {
        self.post_reply(text, Some(reply_to_uri))
            .await
            .map_err(platform_err)
    }

    async fn list_timeline(&self, limit: u32) -> Result<Vec<PlatformPost>> {
        let posts = self.get_timeline(limit).await.map_err(platform_err)?;
        Ok(posts
            .into_iter()
            .map(|p| PlatformPost {
                author_id: p.author.did,
                text: p.record.text.unwrap_or_default(),
                parent_uri: p.record.reply.as_ref().map(|refs| refs.parent.uri.clone()),
                root_uri: p.record.reply.as_ref().map(|refs| refs.root.uri.clone()),
                created_at: p.record.created_at.as_deref().and_then(parse_timestamp),
                uri: p.uri,
                cid: p.cid,
            })
            .collect())
    }
}

fn notification_from_view(view: bluesky_client::NotificationView) -> Notification {
    Notification {
        kind: kind_from_reason(&view.reason),
        id: view.uri.clone(),
        author: AuthorRef {
            platform_id: view.author.did,
            handle: view.author.handle,
            display_name: view.author.display_name,
            avatar_url: view.author.avatar,
        },
        text: view.record.text.unwrap_or_default(),
        uri: view.uri,
        parent_uri: view
            .record
            .reply
            .as_ref()
            .map(|refs| refs.parent.uri.clone()),
        root_uri: view.record.reply.as_ref().map(|refs| refs.root.uri.clone()),
        observed_at: parse_timestamp(&view.indexed_at).unwrap_or_else(Utc::now),
    }
}

fn kind_from_reason(reason: &str) -> NotificationKind {
    match reason {
        "mention" => NotificationKind::Mention,
        "reply" => NotificationKind::Reply,
        "like" => NotificationKind::Like,
        "repost" => NotificationKind::Repost,
        "follow" => NotificationKind::Follow,
        "quote" => NotificationKind::Quote,
        _ => NotificationKind::Other,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn platform_err(e: bluesky_client::BskyError) -> MagpieError {
    use bluesky_client::BskyError;
    match e {
        BskyError::Auth(msg) => MagpieError::Auth(msg),
        e if e.is_transient() => MagpieError::Transient(e.to_string()),
        e => MagpieError::Api(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// OpenAI adapter
// ---------------------------------------------------------------------------

#[async_trait]
impl ResponseGenerator for openai_client::OpenAiClient {
    async fn generate(&self, context: &GenerationContext) -> Result<String> {
        self.generate_reply(&openai_client::ReplyPrompt {
            current_post: &context.current_post,
            parent_post: context.parent_post.as_deref(),
            author_handle: &context.author.handle,
            tone: context.tone.as_deref(),
            trend_hint: context.trend_hint.as_deref(),
        })
        .await
        .map_err(generation_err)
    }
}

fn generation_err(e: openai_client::OpenAiError) -> MagpieError {
    use openai_client::OpenAiError;
    match e {
        OpenAiError::Timeout(secs) => MagpieError::GenerationTimeout(format!("{secs}s")),
        OpenAiError::Api { status: 401, message } | OpenAiError::Api { status: 403, message } => {
            MagpieError::Auth(message)
        }
        e => MagpieError::Generation(e.to_string()),
    }
}
