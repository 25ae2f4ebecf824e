use std::collections::HashSet;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::admin::{require_admin, WallMetrics};
use crate::cli::Command;
use crate::composer::Composer;
use crate::config::Config;
use crate::display::{initials, media_kind, relative_time, MediaKind};
use crate::error::WallError;
use crate::i18n::Locale;
use crate::model::{Attachment, Post, PostId};
use crate::remote::{FeedSource, MediaStore, RoleDirectory};
use crate::rest::RestBackend;
use crate::session::Session;
use crate::view::FeedView;

/// Wires a backend, the signed-in member and the locale into the wall
/// commands.
pub struct App {
    source: Arc<dyn FeedSource>,
    media: Arc<dyn MediaStore>,
    roles: Arc<dyn RoleDirectory>,
    session: Option<Session>,
    locale: Locale,
}

impl App {
    pub fn new<B>(backend: B, session: Option<Session>, locale: Locale) -> Self
    where
        B: FeedSource + MediaStore + RoleDirectory + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            source: backend.clone(),
            media: backend.clone(),
            roles: backend,
            session,
            locale,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let session = cfg
            .access_token
            .as_deref()
            .map(Session::from_access_token)
            .transpose()?;
        let backend = RestBackend::new(cfg.url.clone(), &cfg.anon_key, cfg.access_token.clone())?
            .with_bucket(&cfg.bucket)
            .with_channel(&cfg.channel);
        if let Some(s) = &session {
            info!(user_id = %s.user_id, "signed in");
        }
        Ok(Self::new(backend, session, cfg.locale))
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        let mut out = std::io::stdout();
        match command {
            Command::Tail => {
                self.tail(&mut out, async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await
            }
            Command::Post { text, attachments } => {
                let post = self.post(text.as_deref().unwrap_or_default(), &attachments).await?;
                writeln!(out, "{} {}", self.locale.messages().published, post.id)?;
                Ok(())
            }
            Command::Delete { id } => {
                self.delete(id).await?;
                writeln!(out, "{}", self.locale.messages().deleted)?;
                Ok(())
            }
            Command::Stats => {
                let metrics = self.stats().await?;
                writeln!(out, "{}", metrics.total_posts)?;
                let now = OffsetDateTime::now_utc();
                for post in &metrics.recent {
                    write!(out, "{}", render_post(post, now, self.locale))?;
                }
                Ok(())
            }
        }
    }

    fn explain(&self, err: WallError) -> anyhow::Error {
        let notice = self.locale.notice(&err);
        anyhow::Error::new(err).context(notice)
    }

    async fn open_view(&self) -> Result<FeedView> {
        let view = FeedView::open(self.source.clone(), self.roles.as_ref(), self.session.clone())
            .await
            .map_err(|e| self.explain(e))?;
        view.load().await.map_err(|e| self.explain(e))?;
        Ok(view)
    }

    /// Print the window, then every change to it until `shutdown` resolves.
    /// Fails if the live stream ends first.
    pub async fn tail<W, F>(&self, out: &mut W, shutdown: F) -> Result<()>
    where
        W: Write,
        F: Future<Output = ()>,
    {
        let view = self.open_view().await?;
        let mut shown = view.snapshot();
        if shown.is_empty() {
            writeln!(out, "{}", self.locale.messages().empty_wall)?;
        }
        let now = OffsetDateTime::now_utc();
        for post in &shown {
            write!(out, "{}", render_post(post, now, self.locale))?;
        }
        out.flush()?;

        tokio::pin!(shutdown);
        let mut revision = view.revision();
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                next = view.wait_for_revision(revision) => {
                    let Some(next) = next else { break };
                    revision = next;
                    let current = view.snapshot();
                    print_changes(out, &shown, &current, self.locale)?;
                    out.flush()?;
                    shown = current;
                }
            }
        }
        let lost = view.stream_lost();
        view.close();
        if lost {
            return Err(self.explain(WallError::Subscribe("live stream ended".into())));
        }
        Ok(())
    }

    pub async fn post(&self, text: &str, files: &[PathBuf]) -> Result<Post> {
        let mut attachments = Vec::with_capacity(files.len());
        for path in files {
            let attachment = Attachment::load(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            attachments.push(attachment);
        }
        let composer = Composer::new(self.source.clone(), self.media.clone(), self.locale);
        composer
            .submit(self.session.as_ref(), text, attachments)
            .await
            .map_err(|e| self.explain(e))
    }

    pub async fn delete(&self, id: PostId) -> Result<()> {
        let view = self.open_view().await?;
        let res = view.request_delete(id).await;
        view.close();
        res.map_err(|e| self.explain(e))
    }

    pub async fn stats(&self) -> Result<WallMetrics> {
        require_admin(self.roles.as_ref(), self.session.as_ref())
            .await
            .map_err(|e| self.explain(e))?;
        WallMetrics::collect(self.source.as_ref())
            .await
            .map_err(|e| self.explain(e))
    }
}

fn print_changes<W: Write>(out: &mut W, before: &[Post], after: &[Post], locale: Locale) -> Result<()> {
    let old: HashSet<Uuid> = before.iter().map(|p| p.id).collect();
    let new: HashSet<Uuid> = after.iter().map(|p| p.id).collect();
    let now = OffsetDateTime::now_utc();
    for post in after.iter().filter(|p| !old.contains(&p.id)) {
        write!(out, "+ {}", render_post(post, now, locale))?;
    }
    for post in before.iter().filter(|p| !new.contains(&p.id)) {
        writeln!(out, "- {}", post.id)?;
    }
    Ok(())
}

/// One post as printed by the CLI.
pub fn render_post(post: &Post, now: OffsetDateTime, locale: Locale) -> String {
    let mut s = format!(
        "{} [{}] {} ({})\n",
        post.id,
        initials(&post.user_name),
        post.user_name,
        relative_time(post.created_at, now, locale)
    );
    if let Some(text) = &post.content {
        for line in text.lines() {
            s.push_str(&format!("    {line}\n"));
        }
    }
    for url in &post.media_urls {
        let label = match media_kind(url) {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        };
        s.push_str(&format!("    [{label}] {url}\n"));
    }
    s
}
