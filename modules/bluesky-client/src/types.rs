use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Session ---

#[derive(Debug, Serialize)]
pub struct CreateSessionRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_jwt: String,
    #[serde(default)]
    pub refresh_jwt: String,
    pub handle: String,
    pub did: String,
}

// --- Notifications ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotificationsResponse {
    #[serde(default)]
    pub cursor: Option<String>,
    pub notifications: Vec<NotificationView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub uri: String,
    pub cid: String,
    pub author: ProfileView,
    /// "mention", "reply", "like", "repost", "follow", "quote".
    pub reason: String,
    /// Record shape varies by reason; post fields are optional.
    #[serde(default)]
    pub record: PostRecord,
    #[serde(default)]
    pub is_read: bool,
    pub indexed_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub did: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

// --- Post records ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub reply: Option<ReplyRefs>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyRefs {
    pub root: PostRef,
    pub parent: PostRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRef {
    pub uri: String,
    pub cid: String,
}

// --- Repo records ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordRequest {
    pub repo: String,
    pub collection: String,
    pub record: Value,
}

#[derive(Debug, Deserialize)]
pub struct CreateRecordResponse {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Deserialize)]
pub struct GetRecordResponse {
    pub uri: String,
    #[serde(default)]
    pub cid: Option<String>,
    pub value: PostRecord,
}

// --- Timeline ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTimelineResponse {
    #[serde(default)]
    pub cursor: Option<String>,
    pub feed: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
pub struct FeedItem {
    pub post: PostView,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: ProfileView,
    #[serde(default)]
    pub record: PostRecord,
    #[serde(default)]
    pub indexed_at: Option<String>,
}
