use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::WallResult;
use crate::model::{Attachment, NewPost, Post, PostId};

/// Change pushed by the backend for the posts collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Insert(Post),
    Delete(PostId),
}

/// Roles known to the backend's role table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
        }
    }
}

/// Live feed of post changes, in the order the backend committed them.
///
/// Dropping the subscription releases the underlying channel.
pub struct Subscription {
    events: UnboundedReceiver<FeedEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(events: UnboundedReceiver<FeedEvent>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Next event, or `None` once the channel is closed.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn unsubscribe(self) {
        drop(self)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.events.close();
    }
}

/// Backend holding the wall posts.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Most recent posts, newest first.
    async fn fetch_recent(&self, limit: usize) -> WallResult<Vec<Post>>;

    async fn create_post(&self, post: NewPost) -> WallResult<Post>;

    async fn delete_post(&self, id: PostId) -> WallResult<()>;

    async fn subscribe(&self) -> WallResult<Subscription>;

    async fn count_posts(&self) -> WallResult<u64>;
}

/// Object storage for post media.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store the attachment under `path` and return its public URL.
    async fn upload(&self, path: &str, attachment: &Attachment) -> WallResult<String>;
}

/// Role lookups answered by the backend.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn check_role(&self, user_id: Uuid, role: Role) -> WallResult<bool>;
}
