use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::{WallError, WallResult};
use crate::model::{Attachment, NewPost, Post, PostId};
use crate::remote::{FeedEvent, FeedSource, MediaStore, Role, RoleDirectory, Subscription};

/// Public URL prefix of objects held by [`MemoryBackend`].
pub const MEMORY_MEDIA_BASE: &str = "memory://wall-media";

type PathFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Number of calls each backend operation has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub fetch: usize,
    pub create: usize,
    pub delete: usize,
    pub subscribe: usize,
    pub upload: usize,
    pub role: usize,
    pub count: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.fetch + self.create + self.delete + self.subscribe + self.upload + self.role + self.count
    }
}

#[derive(Default)]
struct State {
    posts: Vec<Post>,
    subscribers: Vec<UnboundedSender<FeedEvent>>,
    paused: Option<Vec<FeedEvent>>,
    objects: HashMap<String, (Bytes, String)>,
    roles: HashSet<(Uuid, Role)>,
    last_created: Option<OffsetDateTime>,
    calls: CallCounts,
    fail_upload: Option<PathFilter>,
    fail_upload_calls: HashSet<usize>,
    fail_create: bool,
    fail_delete: bool,
    fail_fetch: bool,
    fail_roles: bool,
    fetch_gate: Option<Arc<Semaphore>>,
}

impl State {
    /// Deliver an event to every live subscriber, dropping closed ones.
    fn publish(&mut self, event: FeedEvent) {
        if let Some(buffer) = self.paused.as_mut() {
            buffer.push(event);
            return;
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn next_timestamp(&mut self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        let ts = match self.last_created {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        self.last_created = Some(ts);
        ts
    }
}

/// In-process wall backend: posts, change stream, media objects and roles.
///
/// Every operation can be made to fail, and fetches can be held back, so
/// the client side can be exercised without a network.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store posts directly, newest first, without emitting events.
    pub fn seed(&self, posts: Vec<Post>) {
        let mut state = self.state.lock();
        state.last_created = posts.iter().map(|p| p.created_at).max();
        state.posts = posts;
    }

    pub fn grant(&self, user_id: Uuid, role: Role) {
        self.state.lock().roles.insert((user_id, role));
    }

    pub fn revoke(&self, user_id: Uuid, role: Role) {
        self.state.lock().roles.remove(&(user_id, role));
    }

    pub fn posts(&self) -> Vec<Post> {
        self.state.lock().posts.clone()
    }

    pub fn object(&self, path: &str) -> Option<Bytes> {
        self.state.lock().objects.get(path).map(|(b, _)| b.clone())
    }

    pub fn object_paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.state.lock().objects.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    /// Subscribers whose receiving side is still open.
    pub fn live_subscribers(&self) -> usize {
        let state = self.state.lock();
        state.subscribers.iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Fail every upload whose object path matches `filter`.
    pub fn fail_uploads_where<F>(&self, filter: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.state.lock().fail_upload = Some(Box::new(filter));
    }

    /// Fail the `n`th upload call, counting from zero.
    pub fn fail_upload_at(&self, n: usize) {
        self.state.lock().fail_upload_calls.insert(n);
    }

    pub fn fail_creates(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().fail_delete = fail;
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.state.lock().fail_fetch = fail;
    }

    pub fn fail_role_checks(&self, fail: bool) {
        self.state.lock().fail_roles = fail;
    }

    /// Hold every fetch after it has read its snapshot, until released.
    pub fn hold_fetches(&self) {
        self.state.lock().fetch_gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_fetches(&self) {
        if let Some(gate) = self.state.lock().fetch_gate.take() {
            gate.close();
        }
    }

    /// Buffer change events instead of delivering them.
    pub fn pause_events(&self) {
        let mut state = self.state.lock();
        if state.paused.is_none() {
            state.paused = Some(Vec::new());
        }
    }

    /// Deliver buffered events in commit order and resume live delivery.
    pub fn resume_events(&self) {
        let mut state = self.state.lock();
        if let Some(buffered) = state.paused.take() {
            for event in buffered {
                state.publish(event);
            }
        }
    }

    /// End every live subscription, as a dropped connection would.
    pub fn disconnect_subscribers(&self) {
        self.state.lock().subscribers.clear();
    }

    /// Create a post as if another client had written it.
    pub fn insert_remote(&self, user_id: Uuid, user_name: &str, content: &str) -> Post {
        let mut state = self.state.lock();
        let post = Post {
            id: Uuid::new_v4(),
            user_id,
            user_name: user_name.into(),
            content: Some(content.into()),
            media_urls: vec![],
            created_at: state.next_timestamp(),
        };
        state.posts.insert(0, post.clone());
        state.publish(FeedEvent::Insert(post.clone()));
        post
    }

    /// Delete a post as if another client had removed it.
    pub fn delete_remote(&self, id: PostId) -> bool {
        let mut state = self.state.lock();
        let before = state.posts.len();
        state.posts.retain(|p| p.id != id);
        let removed = state.posts.len() != before;
        if removed {
            state.publish(FeedEvent::Delete(id));
        }
        removed
    }
}

#[async_trait]
impl FeedSource for MemoryBackend {
    async fn fetch_recent(&self, limit: usize) -> WallResult<Vec<Post>> {
        let (snapshot, gate) = {
            let mut state = self.state.lock();
            state.calls.fetch += 1;
            if state.fail_fetch {
                return Err(WallError::Fetch("backend unavailable".into()));
            }
            let snapshot: Vec<Post> = state.posts.iter().take(limit).cloned().collect();
            (snapshot, state.fetch_gate.clone())
        };
        if let Some(gate) = gate {
            debug!("fetch held");
            let _ = gate.acquire().await;
        }
        Ok(snapshot)
    }

    async fn create_post(&self, post: NewPost) -> WallResult<Post> {
        let mut state = self.state.lock();
        state.calls.create += 1;
        if state.fail_create {
            return Err(WallError::Submit("insert rejected".into()));
        }
        let created = Post {
            id: Uuid::new_v4(),
            user_id: post.user_id,
            user_name: post.user_name,
            content: post.content,
            media_urls: post.media_urls,
            created_at: state.next_timestamp(),
        };
        state.posts.insert(0, created.clone());
        state.publish(FeedEvent::Insert(created.clone()));
        Ok(created)
    }

    async fn delete_post(&self, id: PostId) -> WallResult<()> {
        let mut state = self.state.lock();
        state.calls.delete += 1;
        if state.fail_delete {
            return Err(WallError::Delete {
                id,
                reason: "permission denied".into(),
            });
        }
        let before = state.posts.len();
        state.posts.retain(|p| p.id != id);
        if state.posts.len() == before {
            return Err(WallError::Delete {
                id,
                reason: "not_found".into(),
            });
        }
        state.publish(FeedEvent::Delete(id));
        Ok(())
    }

    async fn subscribe(&self) -> WallResult<Subscription> {
        let (tx, rx) = unbounded_channel();
        let mut state = self.state.lock();
        state.calls.subscribe += 1;
        state.subscribers.push(tx);
        Ok(Subscription::new(rx, CancellationToken::new()))
    }

    async fn count_posts(&self) -> WallResult<u64> {
        let mut state = self.state.lock();
        state.calls.count += 1;
        if state.fail_fetch {
            return Err(WallError::Fetch("backend unavailable".into()));
        }
        Ok(state.posts.len() as u64)
    }
}

#[async_trait]
impl MediaStore for MemoryBackend {
    async fn upload(&self, path: &str, attachment: &Attachment) -> WallResult<String> {
        let mut state = self.state.lock();
        let index = state.calls.upload;
        state.calls.upload += 1;
        if state.fail_upload_calls.contains(&index)
            || state.fail_upload.as_ref().map_or(false, |f| f(path))
        {
            return Err(WallError::Upload {
                path: path.into(),
                reason: "storage rejected object".into(),
            });
        }
        state.objects.insert(
            path.to_string(),
            (attachment.bytes.clone(), attachment.content_type.clone()),
        );
        Ok(format!("{MEMORY_MEDIA_BASE}/{path}"))
    }
}

#[async_trait]
impl RoleDirectory for MemoryBackend {
    async fn check_role(&self, user_id: Uuid, role: Role) -> WallResult<bool> {
        let mut state = self.state.lock();
        state.calls.role += 1;
        if state.fail_roles {
            return Err(WallError::RoleCheck("rpc failed".into()));
        }
        Ok(state.roles.contains(&(user_id, role)))
    }
}
