use tracing::warn;

use crate::error::{WallError, WallResult};
use crate::model::Post;
use crate::remote::{FeedSource, Role, RoleDirectory};
use crate::session::Session;

/// Number of posts shown in the admin overview.
pub const RECENT_POSTS: usize = 5;

/// Succeeds only for a signed-in admin. A failed lookup denies.
pub async fn require_admin(roles: &dyn RoleDirectory, session: Option<&Session>) -> WallResult<()> {
    let session = session.ok_or(WallError::Forbidden)?;
    match roles.check_role(session.user_id, Role::Admin).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(WallError::Forbidden),
        Err(err) => {
            warn!(user_id = %session.user_id, error = %err, "admin check failed, denying");
            Err(WallError::Forbidden)
        }
    }
}

/// Overview numbers for the admin dashboard.
#[derive(Debug, Clone)]
pub struct WallMetrics {
    pub total_posts: u64,
    pub recent: Vec<Post>,
}

impl WallMetrics {
    pub async fn collect(source: &dyn FeedSource) -> WallResult<Self> {
        let (total, recent) = futures::join!(source.count_posts(), source.fetch_recent(RECENT_POSTS));
        Ok(Self {
            total_posts: total?,
            recent: recent?,
        })
    }
}
