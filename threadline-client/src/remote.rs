use async_trait::async_trait;

use crate::api::{ArticleId, CommentId, CommentRecord, NewComment, User};

/// Persistence and user listing service the comment section talks to
#[async_trait]
pub trait CommentApi: Send + Sync {
    async fn fetch_comments(&self, article: ArticleId) -> anyhow::Result<Vec<CommentRecord>>;
    async fn fetch_users(&self) -> anyhow::Result<Vec<User>>;

    /// Stores the comment, returning it with its assigned id
    async fn create_comment(&self, comment: NewComment) -> anyhow::Result<CommentRecord>;
    async fn delete_comment(&self, id: CommentId) -> anyhow::Result<()>;
}
