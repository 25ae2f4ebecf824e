use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;
use wall_api::POSTS_TABLE;

use crate::error::{WallError, WallResult};
use crate::model::{Attachment, NewPost, Post, PostId};
use crate::realtime::{websocket_url, RealtimeClient};
use crate::remote::{FeedSource, MediaStore, Role, RoleDirectory, Subscription};

pub const MEDIA_BUCKET: &str = "wall-media";
pub const WALL_CHANNEL: &str = "wall-posts";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Wall backend reached over the hosted REST, storage and realtime APIs.
#[derive(Clone)]
pub struct RestBackend {
    http: Client,
    base: Url,
    anon_key: String,
    access_token: Option<String>,
    table: String,
    bucket: String,
    channel: String,
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base", &self.base.as_str())
            .field("table", &self.table)
            .field("bucket", &self.bucket)
            .field("signed_in", &self.access_token.is_some())
            .finish()
    }
}

impl RestBackend {
    pub fn new(base: Url, anon_key: impl Into<String>, access_token: Option<String>) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building http client")?;
        Ok(Self {
            http,
            base,
            anon_key: anon_key.into(),
            access_token,
            table: POSTS_TABLE.into(),
            bucket: MEDIA_BUCKET.into(),
            channel: WALL_CHANNEL.into(),
        })
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base.as_str().trim_end_matches('/'), path)
    }

    fn table_url(&self) -> String {
        self.url(&format!("rest/v1/{}", self.table))
    }

    /// Public URL of a stored object.
    pub fn public_url(&self, path: &str) -> String {
        self.url(&format!("storage/v1/object/public/{}/{}", self.bucket, path))
    }

    fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.anon_key)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
    }

    pub fn realtime(&self) -> WallResult<RealtimeClient> {
        let endpoint = websocket_url(&self.base, &self.anon_key)
            .map_err(|e| WallError::Subscribe(e.to_string()))?;
        Ok(RealtimeClient::new(endpoint, &self.channel, &self.table, self.bearer()))
    }
}

/// Non-success responses become an error string carrying the status and
/// the server's message.
async fn check(resp: Response) -> Result<Response, String> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or(body);
    Err(format!("{status}: {message}"))
}

/// Total row count from a `Content-Range` header such as `0-24/57` or `*/57`.
pub fn parse_content_range(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

#[async_trait]
impl FeedSource for RestBackend {
    async fn fetch_recent(&self, limit: usize) -> WallResult<Vec<Post>> {
        let limit = limit.to_string();
        let resp = self
            .request(Method::GET, self.table_url())
            .query(&[("select", "*"), ("order", "created_at.desc"), ("limit", limit.as_str())])
            .send()
            .await
            .map_err(|e| WallError::Fetch(e.to_string()))?;
        let resp = check(resp).await.map_err(WallError::Fetch)?;
        let posts: Vec<Post> = resp.json().await.map_err(|e| WallError::Fetch(e.to_string()))?;
        debug!(count = posts.len(), "fetched recent posts");
        Ok(posts)
    }

    async fn create_post(&self, post: NewPost) -> WallResult<Post> {
        let resp = self
            .request(Method::POST, self.table_url())
            .header("Prefer", "return=representation")
            .json(&post)
            .send()
            .await
            .map_err(|e| WallError::Submit(e.to_string()))?;
        let resp = check(resp).await.map_err(WallError::Submit)?;
        let rows: Vec<Post> = resp.json().await.map_err(|e| WallError::Submit(e.to_string()))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| WallError::Submit("insert returned no row".into()))
    }

    async fn delete_post(&self, id: PostId) -> WallResult<()> {
        let fail = |reason: String| WallError::Delete { id, reason };
        let filter = format!("eq.{id}");
        let resp = self
            .request(Method::DELETE, self.table_url())
            .header("Prefer", "return=representation")
            .query(&[("id", filter.as_str())])
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        let resp = check(resp).await.map_err(fail)?;
        let rows: Vec<Value> = resp.json().await.map_err(|e| fail(e.to_string()))?;
        if rows.is_empty() {
            // row-level security hides rows the caller may not delete
            return Err(fail("no row deleted".into()));
        }
        Ok(())
    }

    async fn subscribe(&self) -> WallResult<Subscription> {
        self.realtime()?.subscribe().await
    }

    async fn count_posts(&self) -> WallResult<u64> {
        let resp = self
            .request(Method::HEAD, self.table_url())
            .header("Prefer", "count=exact")
            .query(&[("select", "id")])
            .send()
            .await
            .map_err(|e| WallError::Fetch(e.to_string()))?;
        let resp = check(resp).await.map_err(WallError::Fetch)?;
        resp.headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| WallError::Fetch("missing row count".into()))
    }
}

#[async_trait]
impl MediaStore for RestBackend {
    async fn upload(&self, path: &str, attachment: &Attachment) -> WallResult<String> {
        let fail = |reason: String| WallError::Upload {
            path: path.to_string(),
            reason,
        };
        let url = self.url(&format!("storage/v1/object/{}/{}", self.bucket, path));
        let resp = self
            .request(Method::POST, url)
            .header(header::CONTENT_TYPE, &attachment.content_type)
            .header(header::CACHE_CONTROL, "max-age=3600")
            .body(attachment.bytes.clone())
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        check(resp).await.map_err(fail)?;
        info!(%path, bytes = attachment.len(), "attachment uploaded");
        Ok(self.public_url(path))
    }
}

#[async_trait]
impl RoleDirectory for RestBackend {
    async fn check_role(&self, user_id: Uuid, role: Role) -> WallResult<bool> {
        let resp = self
            .request(Method::POST, self.url("rest/v1/rpc/has_role"))
            .json(&json!({"_user_id": user_id, "_role": role.as_str()}))
            .send()
            .await
            .map_err(|e| WallError::RoleCheck(e.to_string()))?;
        let resp = check(resp).await.map_err(WallError::RoleCheck)?;
        resp.json::<bool>()
            .await
            .map_err(|e| WallError::RoleCheck(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(token: Option<&str>) -> RestBackend {
        RestBackend::new(
            Url::parse("https://demo.example.org/").unwrap(),
            "anon-key",
            token.map(str::to_owned),
        )
        .unwrap()
    }

    #[test]
    fn content_range() {
        assert_eq!(parse_content_range("0-24/57"), Some(57));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("*/*"), None);
        assert_eq!(parse_content_range("garbage"), None);
    }

    #[test]
    fn endpoints() {
        let b = backend(None);
        assert_eq!(b.table_url(), "https://demo.example.org/rest/v1/wall_posts");
        assert_eq!(
            b.public_url("u/1-abc.jpg"),
            "https://demo.example.org/storage/v1/object/public/wall-media/u/1-abc.jpg"
        );
        assert_eq!(
            b.with_bucket("other").public_url("x.png"),
            "https://demo.example.org/storage/v1/object/public/other/x.png"
        );
    }

    #[test]
    fn bearer_prefers_session_token() {
        assert_eq!(backend(None).bearer(), "anon-key");
        assert_eq!(backend(Some("jwt")).bearer(), "jwt");
        assert!(!format!("{:?}", backend(Some("jwt"))).contains("jwt"));
    }

    #[test]
    fn realtime_topic() {
        let rt = backend(None).with_channel("mur").realtime().unwrap();
        assert_eq!(rt.topic(), "realtime:mur");
    }
}
