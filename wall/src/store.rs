use std::collections::HashSet;

use tracing::debug;

use crate::model::{Post, PostId, FEED_LIMIT};
use crate::remote::FeedEvent;

/// Handle for one in-flight `load`. Only the most recent ticket may install
/// its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket(u64);

/// Newest-first window of wall posts, fed by a bulk fetch and the live
/// change stream.
///
/// Identifiers are unique within the window. Streamed inserts always go to
/// the head; fetched posts keep the server order. Events applied while a
/// load is in flight are journaled and replayed on top of the fetched
/// posts, so a slow fetch never undoes them.
#[derive(Debug)]
pub struct FeedStore {
    posts: Vec<Post>,
    ids: HashSet<PostId>,
    limit: usize,
    generation: u64,
    journal: Option<Vec<FeedEvent>>,
    loaded: bool,
    revision: u64,
}

impl Default for FeedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedStore {
    pub fn new() -> Self {
        Self::with_limit(FEED_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            posts: Vec::with_capacity(limit),
            ids: HashSet::with_capacity(limit),
            limit: limit.max(1),
            generation: 0,
            journal: None,
            loaded: false,
            revision: 0,
        }
    }

    /// Start a load. Events applied from now on are journaled until the
    /// ticket is finished or aborted.
    pub fn begin_load(&mut self) -> LoadTicket {
        self.generation += 1;
        self.journal = Some(Vec::new());
        LoadTicket(self.generation)
    }

    /// Install fetched posts (newest first) and replay the events that
    /// arrived during the fetch. Returns false when the ticket was
    /// superseded by a newer load and the result was dropped.
    pub fn finish_load(&mut self, ticket: LoadTicket, fetched: Vec<Post>) -> bool {
        if ticket.0 != self.generation {
            debug!(ticket = ticket.0, current = self.generation, "discarding superseded load");
            return false;
        }
        let journal = self.journal.take().unwrap_or_default();
        self.posts.clear();
        self.ids.clear();
        for post in fetched {
            if self.posts.len() == self.limit {
                break;
            }
            if self.ids.insert(post.id) {
                self.posts.push(post);
            }
        }
        let replayed = journal.len();
        for event in journal {
            self.apply_unjournaled(event);
        }
        self.loaded = true;
        self.revision += 1;
        debug!(posts = self.posts.len(), replayed, "feed window loaded");
        true
    }

    /// Give up on a failed load without touching the window.
    pub fn abort_load(&mut self, ticket: LoadTicket) {
        if ticket.0 == self.generation {
            self.journal = None;
        }
    }

    /// Prepend a streamed post unless its id is already present.
    pub fn apply_insert(&mut self, post: Post) -> bool {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(FeedEvent::Insert(post.clone()));
        }
        self.insert(post)
    }

    /// Remove a post if present. Unknown ids are ignored.
    pub fn apply_delete(&mut self, id: PostId) -> bool {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(FeedEvent::Delete(id));
        }
        self.remove(id)
    }

    pub fn apply(&mut self, event: FeedEvent) -> bool {
        match event {
            FeedEvent::Insert(post) => self.apply_insert(post),
            FeedEvent::Delete(id) => self.apply_delete(id),
        }
    }

    fn apply_unjournaled(&mut self, event: FeedEvent) -> bool {
        match event {
            FeedEvent::Insert(post) => self.insert(post),
            FeedEvent::Delete(id) => self.remove(id),
        }
    }

    fn insert(&mut self, post: Post) -> bool {
        if !self.ids.insert(post.id) {
            return false;
        }
        self.posts.insert(0, post);
        if self.posts.len() > self.limit {
            if let Some(oldest) = self.posts.pop() {
                self.ids.remove(&oldest.id);
            }
        }
        self.revision += 1;
        true
    }

    fn remove(&mut self, id: PostId) -> bool {
        if !self.ids.remove(&id) {
            return false;
        }
        self.posts.retain(|p| p.id != id);
        self.revision += 1;
        true
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn get(&self, id: PostId) -> Option<&Post> {
        if !self.ids.contains(&id) {
            return None;
        }
        self.posts.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: PostId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    /// True once a load has completed.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_loading(&self) -> bool {
        self.journal.is_some()
    }

    /// Counter bumped on every change to the window.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}
