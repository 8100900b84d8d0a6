use chrono::Utc;
use uuid::Uuid;

use crate::{Error, Time, UserId, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct ArticleId(pub Uuid);

impl ArticleId {
    pub fn stub() -> ArticleId {
        ArticleId(STUB_UUID)
    }
}

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

/// A comment as stored by the persistence layer. Never edited in place.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    pub id: CommentId,
    pub article_id: ArticleId,
    pub author_id: UserId,
    pub content: String,
    pub created_at: Time,

    /// Root comment this is a reply to, None for a root comment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<CommentId>,
}

impl CommentRecord {
    pub fn is_root(&self) -> bool {
        self.reply_to.is_none()
    }
}

/// Body of a comment creation request, the id is assigned on storage
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub article_id: ArticleId,
    pub author_id: UserId,
    pub content: String,
    pub created_at: Time,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<CommentId>,
}

impl NewComment {
    pub fn now(
        article_id: ArticleId,
        author_id: UserId,
        content: String,
        reply_to: Option<CommentId>,
    ) -> NewComment {
        NewComment {
            article_id,
            author_id,
            content,
            created_at: Utc::now(),
            reply_to,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_content(&self.content)
    }

    pub fn into_record(self, id: CommentId) -> CommentRecord {
        CommentRecord {
            id,
            article_id: self.article_id,
            author_id: self.author_id,
            content: self.content,
            created_at: self.created_at,
            reply_to: self.reply_to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_wire_format() {
        let record = CommentRecord {
            id: CommentId(Uuid::from_u128(1)),
            article_id: ArticleId(Uuid::from_u128(2)),
            author_id: UserId(Uuid::from_u128(3)),
            content: String::from("first!"),
            created_at: "2023-01-02T03:04:05Z".parse().unwrap(),
            reply_to: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["articleId"], "00000000-0000-0000-0000-000000000002");
        assert_eq!(json["createdAt"], "2023-01-02T03:04:05Z");
        assert!(json.get("replyTo").is_none());

        // replyTo is optional on input too
        let parsed: CommentRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, record);
    }
}
