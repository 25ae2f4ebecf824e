use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use wall_api::{NewPost, Post, PostId};

/// Maximum number of posts held in the feed window.
pub const FEED_LIMIT: usize = 100;

/// Content type used for audio recorded in the app.
pub const RECORDED_AUDIO_MIME: &str = "audio/webm";

/// Media category of an attachment.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Image,
    Audio,
    Video,
}

impl ContentKind {
    /// Classify a MIME type. Anything that is not audio or video counts as an image.
    pub fn from_mime(mime: &str) -> Self {
        match mime.split('/').next().unwrap_or_default() {
            "audio" => ContentKind::Audio,
            "video" => ContentKind::Video,
            _ => ContentKind::Image,
        }
    }

    fn default_extension(self) -> &'static str {
        match self {
            ContentKind::Image => "jpg",
            ContentKind::Audio => "webm",
            ContentKind::Video => "mp4",
        }
    }

    fn default_mime(self) -> &'static str {
        match self {
            ContentKind::Image => "image/jpeg",
            ContentKind::Audio => RECORDED_AUDIO_MIME,
            ContentKind::Video => "video/mp4",
        }
    }
}

/// A media payload waiting to be uploaded with a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub bytes: Bytes,
    pub kind: ContentKind,
    pub content_type: String,
    pub file_name: Option<String>,
}

impl Attachment {
    pub fn new(bytes: impl Into<Bytes>, kind: ContentKind) -> Self {
        Self {
            bytes: bytes.into(),
            kind,
            content_type: kind.default_mime().into(),
            file_name: None,
        }
    }

    /// Audio captured by the in-app recorder.
    pub fn recorded_audio(bytes: impl Into<Bytes>) -> Self {
        Self::new(bytes, ContentKind::Audio)
    }

    /// Attachment picked from a file. The content type comes from the file
    /// name, falling back to sniffing the bytes.
    pub fn from_file(file_name: &str, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let content_type = mime_guess::from_path(file_name)
            .first()
            .map(|m| m.essence_str().to_string())
            .or_else(|| infer::get(&bytes).map(|t| t.mime_type().to_string()))
            .unwrap_or_else(|| "application/octet-stream".into());
        Self {
            kind: ContentKind::from_mime(&content_type),
            content_type,
            file_name: Some(file_name.into()),
            bytes,
        }
    }

    /// Read an attachment from disk.
    pub async fn load(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::from_file(&name, bytes))
    }

    /// Extension used for the stored object.
    pub fn extension(&self) -> String {
        self.file_name
            .as_deref()
            .and_then(|n| Path::new(n).extension())
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .or_else(|| infer::get(&self.bytes).map(|t| t.extension().to_string()))
            .unwrap_or_else(|| self.kind.default_extension().to_string())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_mime() {
        assert_eq!(ContentKind::from_mime("audio/webm"), ContentKind::Audio);
        assert_eq!(ContentKind::from_mime("video/quicktime"), ContentKind::Video);
        assert_eq!(ContentKind::from_mime("image/png"), ContentKind::Image);
        assert_eq!(ContentKind::from_mime("application/pdf"), ContentKind::Image);
    }

    #[test]
    fn file_attachment_uses_name() {
        let a = Attachment::from_file("assaig.MP3", vec![1, 2, 3]);
        assert_eq!(a.kind, ContentKind::Audio);
        assert_eq!(a.content_type, "audio/mpeg");
        assert_eq!(a.extension(), "mp3");
    }

    #[test]
    fn sniffs_unnamed_bytes() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let a = Attachment::from_file("foto", png.to_vec());
        assert_eq!(a.content_type, "image/png");
        assert_eq!(a.kind, ContentKind::Image);
        assert_eq!(a.extension(), "png");
    }

    #[test]
    fn recorded_audio_defaults() {
        let a = Attachment::recorded_audio(vec![0u8; 4]);
        assert_eq!(a.content_type, RECORDED_AUDIO_MIME);
        assert_eq!(a.extension(), "webm");
    }
}
