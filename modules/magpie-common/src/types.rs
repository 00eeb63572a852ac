use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Authors and mentions ---

/// Platform identity of a post author. Value type, no independent lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRef {
    pub platform_id: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// A mention of this account, extracted from the notification feed.
/// Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionEvent {
    /// Platform-assigned unique id (the notification's post uri).
    pub id: String,
    pub author: AuthorRef,
    pub text: String,
    pub uri: String,
    /// Uri of the post this mention replies to, if any.
    pub parent_uri: Option<String>,
    /// Uri of the thread root, if the mention is part of a thread.
    pub root_uri: Option<String>,
    pub observed_at: DateTime<Utc>,
}

// --- Notifications (raw feed items, pre-filter) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Mention,
    Reply,
    Like,
    Repost,
    Follow,
    Quote,
    Other,
}

/// One raw notification as delivered by the platform. The fetcher filters
/// these down to mention-kind events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub id: String,
    pub author: AuthorRef,
    pub text: String,
    pub uri: String,
    pub parent_uri: Option<String>,
    pub root_uri: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl Notification {
    pub fn into_mention(self) -> MentionEvent {
        MentionEvent {
            id: self.id,
            author: self.author,
            text: self.text,
            uri: self.uri,
            parent_uri: self.parent_uri,
            root_uri: self.root_uri,
            observed_at: self.observed_at,
        }
    }
}

/// One page of the notification feed, in platform delivery order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPage {
    pub events: Vec<Notification>,
    /// Server-issued pagination token for the next fetch. Authoritative:
    /// the client never derives its own resume point.
    pub next_cursor: Option<String>,
}

// --- Cursor ---

/// Opaque pagination token marking fetch progress. Owned exclusively by
/// the cursor store; advanced forward only, never rewound except by
/// explicit operator override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

// --- Posts ---

/// A post fetched from the platform (parent-context resolution, timeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformPost {
    pub uri: String,
    pub cid: String,
    pub author_id: String,
    pub text: String,
    pub parent_uri: Option<String>,
    pub root_uri: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

// --- Generation ---

/// Everything the response generator gets to see for one mention.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationContext {
    pub current_post: String,
    pub parent_post: Option<String>,
    pub author: AuthorRef,
    /// Tone drawn by the content strategy ("savage" or "witty").
    pub tone: Option<String>,
    /// Trending topic to riff on, when the strategy draw favors trends.
    pub trend_hint: Option<String>,
}

// --- Trends ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendKind {
    Hashtag,
    Topic,
    Keyword,
}

/// One trending term extracted from the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub topic: String,
    pub count: u32,
    pub kind: TrendKind,
}
