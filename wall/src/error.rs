use thiserror::Error;
use uuid::Uuid;

/// Failures of wall operations. Every variant is scoped to a single user
/// action; none of them is fatal to the process.
#[derive(Error, Debug)]
pub enum WallError {
    /// Loading the recent posts failed.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// A post was submitted without a signed-in identity.
    #[error("not signed in")]
    Unauthenticated,

    /// Neither text nor attachments were provided.
    #[error("post has no text and no attachments")]
    EmptyPost,

    /// A single attachment could not be stored.
    #[error("upload of {path} failed: {reason}")]
    Upload { path: String, reason: String },

    /// Creating the post record failed.
    #[error("submit failed: {0}")]
    Submit(String),

    /// Deleting a post was rejected or did not reach the backend.
    #[error("delete of {id} failed: {reason}")]
    Delete { id: Uuid, reason: String },

    /// The realtime channel could not be opened.
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("role check failed: {0}")]
    RoleCheck(String),

    /// The actor lacks the role required for the operation.
    #[error("forbidden")]
    Forbidden,
}

impl WallError {
    /// Local validation failures never touch the network.
    pub fn is_validation(&self) -> bool {
        matches!(self, WallError::Unauthenticated | WallError::EmptyPost)
    }
}

pub type WallResult<T> = Result<T, WallError>;
