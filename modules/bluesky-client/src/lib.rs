pub mod error;
pub mod types;

pub use error::{BskyError, Result};
pub use types::{
    ListNotificationsResponse, NotificationView, PostRecord, PostRef, PostView, ProfileView,
    ReplyRefs, Session,
};

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use types::{
    CreateRecordRequest, CreateRecordResponse, CreateSessionRequest, GetRecordResponse,
    GetTimelineResponse,
};

const POST_COLLECTION: &str = "app.bsky.feed.post";

pub struct BlueskyClient {
    client: reqwest::Client,
    service: String,
    handle: String,
    password: String,
    session: RwLock<Option<Session>>,
}

impl BlueskyClient {
    pub fn new(service: impl Into<String>, handle: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            service: service.into(),
            handle: handle.into(),
            password: password.into(),
            session: RwLock::new(None),
        }
    }

    /// Authenticate and cache the session. Must be called before any other
    /// method; credential failures are fatal, not retryable.
    pub async fn login(&self) -> Result<Session> {
        let url = self.xrpc("com.atproto.server.createSession");
        let resp = self
            .client
            .post(&url)
            .json(&CreateSessionRequest {
                identifier: self.handle.clone(),
                password: self.password.clone(),
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BskyError::Auth(format!("createSession {status}: {body}")));
        }

        let session: Session = resp.json().await?;
        info!(handle = session.handle.as_str(), did = session.did.as_str(), "Logged in to Bluesky");
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    /// One page of the notification feed, in platform delivery order.
    pub async fn list_notifications(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<ListNotificationsResponse> {
        let session = self.current_session().await?;
        let url = self.xrpc("app.bsky.notification.listNotifications");
        let mut req = self
            .client
            .get(&url)
            .bearer_auth(&session.access_jwt)
            .query(&[("limit", limit.to_string())]);
        if let Some(cursor) = cursor {
            req = req.query(&[("cursor", cursor)]);
        }

        let page: ListNotificationsResponse = self.checked_json(req.send().await?).await?;
        debug!(count = page.notifications.len(), cursor = ?page.cursor, "Listed notifications");
        Ok(page)
    }

    /// Fetch a post record by AT URI. `Ok(None)` when the record is gone
    /// (deleted posts are a normal case, not an error).
    pub async fn get_post(&self, uri: &str) -> Result<Option<GetRecordResponse>> {
        let session = self.current_session().await?;
        let (did, rkey) = parse_at_uri(uri)?;
        let url = self.xrpc("com.atproto.repo.getRecord");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&session.access_jwt)
            .query(&[("repo", did), ("collection", POST_COLLECTION), ("rkey", rkey)])
            .send()
            .await?;

        if resp.status().as_u16() == 400 || resp.status().as_u16() == 404 {
            debug!(uri, "Post record not found");
            return Ok(None);
        }
        Ok(Some(self.checked_json(resp).await?))
    }

    /// Create a post, optionally as a reply. Returns the new post's AT URI.
    ///
    /// When replying, the parent record is fetched to build the reply refs:
    /// if the parent is itself a reply its own root is the thread root,
    /// otherwise the parent is the root.
    pub async fn post_reply(&self, text: &str, reply_to: Option<&str>) -> Result<String> {
        let session = self.current_session().await?;

        let mut record = json!({
            "$type": POST_COLLECTION,
            "text": text,
            "createdAt": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });

        if let Some(parent_uri) = reply_to {
            let parent = self
                .get_post(parent_uri)
                .await?
                .ok_or_else(|| BskyError::InvalidUri(format!("reply target gone: {parent_uri}")))?;
            let parent_cid = parent
                .cid
                .ok_or_else(|| BskyError::Parse(format!("record without cid: {parent_uri}")))?;
            let parent_ref = PostRef {
                uri: parent.uri.clone(),
                cid: parent_cid,
            };
            let root_ref = match &parent.value.reply {
                Some(refs) => refs.root.clone(),
                None => parent_ref.clone(),
            };
            record["reply"] = serde_json::to_value(ReplyRefs {
                root: root_ref,
                parent: parent_ref,
            })?;
        }

        let url = self.xrpc("com.atproto.repo.createRecord");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&session.access_jwt)
            .json(&CreateRecordRequest {
                repo: session.did.clone(),
                collection: POST_COLLECTION.to_string(),
                record,
            })
            .send()
            .await?;

        let created: CreateRecordResponse = self.checked_json(resp).await?;
        info!(uri = created.uri.as_str(), "Posted to Bluesky");
        Ok(created.uri)
    }

    /// Recent posts from the home timeline, for trend research.
    pub async fn get_timeline(&self, limit: u32) -> Result<Vec<PostView>> {
        let session = self.current_session().await?;
        let url = self.xrpc("app.bsky.feed.getTimeline");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&session.access_jwt)
            .query(&[("limit", limit.to_string())])
            .send()
            .await?;

        let timeline: GetTimelineResponse = self.checked_json(resp).await?;
        Ok(timeline.feed.into_iter().map(|item| item.post).collect())
    }

    fn xrpc(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.service.trim_end_matches('/'), method)
    }

    async fn current_session(&self) -> Result<Session> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| BskyError::Auth("not logged in".to_string()))
    }

    async fn checked_json<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body = resp.text().await.unwrap_or_default();
            return Err(BskyError::Auth(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BskyError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp.json().await?)
    }
}

/// Split `at://did:plc:xxx/app.bsky.feed.post/rkey` into (did, rkey).
pub fn parse_at_uri(uri: &str) -> Result<(&str, &str)> {
    let rest = uri
        .strip_prefix("at://")
        .ok_or_else(|| BskyError::InvalidUri(uri.to_string()))?;
    let mut parts = rest.split('/');
    let did = parts.next().filter(|s| !s.is_empty());
    let _collection = parts.next();
    let rkey = parts.next().filter(|s| !s.is_empty());
    match (did, rkey) {
        (Some(did), Some(rkey)) => Ok((did, rkey)),
        _ => Err(BskyError::InvalidUri(uri.to_string())),
    }
}
