use std::sync::Arc;

use futures::future::join_all;
use rand::Rng;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{WallError, WallResult};
use crate::i18n::Locale;
use crate::model::{Attachment, NewPost, Post};
use crate::remote::{FeedSource, MediaStore};
use crate::session::Session;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Object path for an attachment, namespaced by its author.
pub fn object_path(author_id: Uuid, attachment: &Attachment) -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..10)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{author_id}/{millis}-{suffix}.{}", attachment.extension())
}

/// Input state of the post form.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub text: String,
    attachments: Vec<Attachment>,
}

impl Draft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    pub fn detach(&mut self, index: usize) -> Option<Attachment> {
        (index < self.attachments.len()).then(|| self.attachments.remove(index))
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Whether the draft has something worth posting.
    pub fn is_submittable(&self) -> bool {
        !self.text.trim().is_empty() || !self.attachments.is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.attachments.clear();
    }
}

/// Uploads attachments and then creates the post record.
///
/// The composer never touches a feed window: a created post shows up there
/// through the subscription's insert event, like everybody else's.
#[derive(Clone)]
pub struct Composer {
    source: Arc<dyn FeedSource>,
    media: Arc<dyn MediaStore>,
    locale: Locale,
}

impl Composer {
    pub fn new(source: Arc<dyn FeedSource>, media: Arc<dyn MediaStore>, locale: Locale) -> Self {
        Self {
            source,
            media,
            locale,
        }
    }

    /// Publish a post. Attachments that fail to upload are left out of the
    /// post; a failed create leaves the uploaded objects behind.
    pub async fn submit(
        &self,
        session: Option<&Session>,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> WallResult<Post> {
        let session = session
            .filter(|s| !s.user_id.is_nil())
            .ok_or(WallError::Unauthenticated)?;
        let text = text.trim();
        if text.is_empty() && attachments.is_empty() {
            return Err(WallError::EmptyPost);
        }

        let media_urls = self.upload_all(session.user_id, &attachments).await;
        let record = NewPost {
            user_id: session.user_id,
            user_name: session.display_name(self.locale),
            content: (!text.is_empty()).then(|| text.to_string()),
            media_urls: media_urls.clone(),
        };
        match self.source.create_post(record).await {
            Ok(post) => {
                info!(post_id = %post.id, media = post.media_urls.len(), "post created");
                Ok(post)
            }
            Err(err) => {
                if !media_urls.is_empty() {
                    warn!(orphaned = ?media_urls, "post not created, uploaded media left behind");
                }
                Err(match err {
                    WallError::Submit(reason) => WallError::Submit(reason),
                    other => WallError::Submit(other.to_string()),
                })
            }
        }
    }

    /// Submit the draft and clear it on success.
    pub async fn submit_draft(&self, session: Option<&Session>, draft: &mut Draft) -> WallResult<Post> {
        let post = self
            .submit(session, &draft.text, draft.attachments.clone())
            .await?;
        draft.clear();
        Ok(post)
    }

    async fn upload_all(&self, author_id: Uuid, attachments: &[Attachment]) -> Vec<String> {
        let uploads = attachments.iter().map(|attachment| {
            let path = object_path(author_id, attachment);
            async move {
                let res = self.media.upload(&path, attachment).await;
                (path, res)
            }
        });
        let mut urls = Vec::with_capacity(attachments.len());
        for (path, res) in join_all(uploads).await {
            match res {
                Ok(url) => urls.push(url),
                Err(err) => warn!(%path, error = %err, "attachment dropped"),
            }
        }
        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBackend, MEMORY_MEDIA_BASE};
    use crate::model::ContentKind;

    fn composer(backend: &MemoryBackend) -> Composer {
        Composer::new(Arc::new(backend.clone()), Arc::new(backend.clone()), Locale::Ca)
    }

    fn session() -> Session {
        Session::new(Uuid::from_u128(42), "token").with_name("Marta")
    }

    #[tokio::test]
    async fn empty_post_never_reaches_backend() {
        let backend = MemoryBackend::new();
        let err = composer(&backend)
            .submit(Some(&session()), "   \n", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, WallError::EmptyPost));
        assert!(err.is_validation());
        assert_eq!(backend.calls().total(), 0);
    }

    #[tokio::test]
    async fn requires_session() {
        let backend = MemoryBackend::new();
        let c = composer(&backend);
        let err = c.submit(None, "hola", vec![]).await.unwrap_err();
        assert!(matches!(err, WallError::Unauthenticated));
        let anon = Session::new(Uuid::nil(), "token");
        let err = c.submit(Some(&anon), "hola", vec![]).await.unwrap_err();
        assert!(matches!(err, WallError::Unauthenticated));
        assert_eq!(backend.calls().total(), 0);
    }

    #[tokio::test]
    async fn trims_text_and_denormalizes_name() {
        let backend = MemoryBackend::new();
        let post = composer(&backend)
            .submit(Some(&session()), "  assaig a les 8  ", vec![])
            .await
            .unwrap();
        assert_eq!(post.content.as_deref(), Some("assaig a les 8"));
        assert_eq!(post.user_name, "Marta");
        assert_eq!(post.user_id, Uuid::from_u128(42));
        assert!(post.media_urls.is_empty());
    }

    #[tokio::test]
    async fn media_only_post_has_null_text() {
        let backend = MemoryBackend::new();
        let post = composer(&backend)
            .submit(
                Some(&session()),
                "",
                vec![Attachment::recorded_audio(vec![1u8, 2, 3])],
            )
            .await
            .unwrap();
        assert!(post.content.is_none());
        assert_eq!(post.media_urls.len(), 1);
        let path = &backend.object_paths()[0];
        assert!(path.starts_with(&format!("{}/", Uuid::from_u128(42))));
        assert!(path.ends_with(".webm"));
        assert_eq!(post.media_urls[0], format!("{MEMORY_MEDIA_BASE}/{path}"));
    }

    #[tokio::test]
    async fn failed_upload_is_dropped() {
        let backend = MemoryBackend::new();
        backend.fail_uploads_where(|path| path.ends_with(".png"));
        let post = composer(&backend)
            .submit(
                Some(&session()),
                "fotos del concert",
                vec![
                    Attachment::from_file("escenari.png", vec![0u8; 8]),
                    Attachment::from_file("video.mp4", vec![0u8; 8]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(post.media_urls.len(), 1);
        assert!(post.media_urls[0].ends_with(".mp4"));
        assert_eq!(backend.calls().upload, 2);
    }

    #[tokio::test]
    async fn create_failure_is_submit_error() {
        let backend = MemoryBackend::new();
        backend.fail_creates(true);
        let err = composer(&backend)
            .submit(
                Some(&session()),
                "hola",
                vec![Attachment::new(vec![1u8], ContentKind::Image)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WallError::Submit(_)));
        assert!(backend.posts().is_empty());
        // uploaded media stays orphaned
        assert_eq!(backend.object_paths().len(), 1);
    }

    #[tokio::test]
    async fn draft_cleared_only_on_success() {
        let backend = MemoryBackend::new();
        let c = composer(&backend);
        let mut draft = Draft::new();
        assert!(!draft.is_submittable());
        draft.text = "bon dia".into();
        draft.attach(Attachment::recorded_audio(vec![9u8]));
        assert!(draft.detach(3).is_none());

        backend.fail_creates(true);
        assert!(c.submit_draft(Some(&session()), &mut draft).await.is_err());
        assert_eq!(draft.attachments().len(), 1);

        backend.fail_creates(false);
        c.submit_draft(Some(&session()), &mut draft).await.unwrap();
        assert!(draft.text.is_empty());
        assert!(draft.attachments().is_empty());
    }

    #[test]
    fn object_paths_are_unique() {
        let a = Attachment::from_file("a.jpg", vec![1u8]);
        let id = Uuid::from_u128(7);
        let p1 = object_path(id, &a);
        let p2 = object_path(id, &a);
        assert_ne!(p1, p2);
        assert!(p1.starts_with(&format!("{id}/")));
        assert!(p1.ends_with(".jpg"));
    }
}
