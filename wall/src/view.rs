use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{WallError, WallResult};
use crate::model::{Post, PostId, FEED_LIMIT};
use crate::remote::{FeedSource, Role, RoleDirectory, Subscription};
use crate::session::Session;
use crate::store::FeedStore;

/// Whether `current_user` may delete `post`: admins may delete anything,
/// members only their own posts.
pub fn can_delete(post: &Post, current_user: Option<Uuid>, is_admin: bool) -> bool {
    is_admin || current_user == Some(post.user_id)
}

/// The live wall as seen by one signed-in member.
///
/// Opening a view subscribes to the change stream before anything is
/// fetched, so no event between the fetch and the subscription is lost.
/// Posts enter and leave the window only through [`FeedView::load`] and
/// the stream; deletes issued here wait for their delete event. If the
/// stream ends on its own, [`FeedView::stream_lost`] reports it and waiters
/// are released.
pub struct FeedView {
    store: Arc<Mutex<FeedStore>>,
    source: Arc<dyn FeedSource>,
    session: Option<Session>,
    is_admin: bool,
    deleting: Mutex<HashSet<PostId>>,
    cancel: CancellationToken,
    lost: CancellationToken,
    changes: Arc<watch::Sender<u64>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl FeedView {
    /// Subscribe to the wall and resolve the member's admin role. Call
    /// [`FeedView::load`] afterwards to fill the window.
    pub async fn open(
        source: Arc<dyn FeedSource>,
        roles: &dyn RoleDirectory,
        session: Option<Session>,
    ) -> WallResult<Self> {
        let subscription = source.subscribe().await?;
        let is_admin = match &session {
            Some(s) => match roles.check_role(s.user_id, Role::Admin).await {
                Ok(admin) => admin,
                Err(err) => {
                    warn!(user_id = %s.user_id, error = %err, "role check failed, treating as member");
                    false
                }
            },
            None => false,
        };
        let (changes, _) = watch::channel(0);
        let view = Self {
            store: Arc::new(Mutex::new(FeedStore::new())),
            source,
            session,
            is_admin,
            deleting: Mutex::new(HashSet::new()),
            cancel: CancellationToken::new(),
            lost: CancellationToken::new(),
            changes: Arc::new(changes),
            pump: Mutex::new(None),
        };
        let handle = view.spawn_pump(subscription);
        *view.pump.lock() = Some(handle);
        debug!(is_admin, "feed view opened");
        Ok(view)
    }

    fn spawn_pump(&self, mut subscription: Subscription) -> JoinHandle<()> {
        let store = self.store.clone();
        let cancel = self.cancel.clone();
        let lost = self.lost.clone();
        let changes = self.changes.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = subscription.next() => {
                        let Some(event) = event else {
                            warn!("feed subscription ended");
                            lost.cancel();
                            break;
                        };
                        let mut store = store.lock();
                        if cancel.is_cancelled() {
                            break;
                        }
                        if store.apply(event) {
                            changes.send_replace(store.revision());
                        }
                    }
                }
            }
            subscription.unsubscribe();
            debug!("feed pump stopped");
        })
    }

    /// Fetch the most recent posts into the window. Safe to retry; events
    /// that arrive while the fetch is in flight are kept.
    pub async fn load(&self) -> WallResult<usize> {
        if self.cancel.is_cancelled() {
            return Ok(0);
        }
        let ticket = self.store.lock().begin_load();
        match self.source.fetch_recent(FEED_LIMIT).await {
            Ok(posts) => {
                let mut store = self.store.lock();
                if self.cancel.is_cancelled() {
                    debug!("view closed during load, result dropped");
                    return Ok(0);
                }
                if store.finish_load(ticket, posts) {
                    self.changes.send_replace(store.revision());
                }
                Ok(store.len())
            }
            Err(err) => {
                if !self.cancel.is_cancelled() {
                    self.store.lock().abort_load(ticket);
                }
                warn!(error = %err, "loading the wall failed");
                Err(match err {
                    WallError::Fetch(reason) => WallError::Fetch(reason),
                    other => WallError::Fetch(other.to_string()),
                })
            }
        }
    }

    /// Ask the backend to delete a post. The window changes when the delete
    /// event arrives, not when this returns.
    pub async fn request_delete(&self, id: PostId) -> WallResult<()> {
        let allowed = {
            let store = self.store.lock();
            store.get(id).map(|post| self.can_delete(post))
        };
        if allowed == Some(false) {
            return Err(WallError::Forbidden);
        }
        if !self.deleting.lock().insert(id) {
            debug!(%id, "delete already in flight");
            return Ok(());
        }
        let res = self.source.delete_post(id).await;
        self.deleting.lock().remove(&id);
        match res {
            Ok(()) => {
                info!(%id, "post delete requested");
                Ok(())
            }
            Err(err) => {
                warn!(%id, error = %err, "delete rejected");
                Err(match err {
                    WallError::Delete { id, reason } => WallError::Delete { id, reason },
                    other => WallError::Delete {
                        id,
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    pub fn can_delete(&self, post: &Post) -> bool {
        can_delete(post, self.session.as_ref().map(|s| s.user_id), self.is_admin)
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_deleting(&self, id: PostId) -> bool {
        self.deleting.lock().contains(&id)
    }

    /// Copy of the current window, newest first.
    pub fn snapshot(&self) -> Vec<Post> {
        self.store.lock().posts().to_vec()
    }

    pub fn with_store<R>(&self, f: impl FnOnce(&FeedStore) -> R) -> R {
        f(&self.store.lock())
    }

    pub fn revision(&self) -> u64 {
        self.store.lock().revision()
    }

    /// Wait until the window moves past `after`. Returns `None` once the
    /// view is closed or its change stream has ended.
    pub async fn wait_for_revision(&self, after: u64) -> Option<u64> {
        let mut rx = self.changes.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if current > after {
                return Some(current);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = self.lost.cancelled() => return None,
                res = rx.changed() => {
                    if res.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Stop applying updates and release the subscription.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
        debug!("feed view closed");
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True once the change stream ended without the view being closed.
    /// The window is frozen from then on.
    pub fn stream_lost(&self) -> bool {
        self.lost.is_cancelled() && !self.cancel.is_cancelled()
    }
}

impl Drop for FeedView {
    fn drop(&mut self) {
        self.close();
    }
}
