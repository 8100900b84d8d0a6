use crate::{ArticleId, CommentRecord};

/// Messages a client sends on the comment feed websocket
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum ClientMessage {
    /// Subscribe to a room, leaving the currently joined one if any
    JoinRoom(ArticleId),
    LeaveRoom,
    SendComment {
        room: ArticleId,
        comment: CommentRecord,
    },
    Ping,
}

/// Messages the server sends on the comment feed websocket
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum FeedMessage {
    Joined(ArticleId),
    CommentReceived {
        room: ArticleId,
        comment: CommentRecord,
    },
    Pong,
}
