use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures::{channel::mpsc, select, SinkExt, StreamExt};
use threadline_api::{ArticleId, ClientMessage, CommentRecord, FeedMessage, Uuid};
use tokio::sync::RwLock;

use crate::{db, extractors::PgPool};

/// Lookup of the stored version of a comment, to refuse relaying forged records
#[async_trait]
pub trait CommentCheck: 'static + Send + Sync + Clone {
    async fn is_stored(&self, comment: &CommentRecord) -> anyhow::Result<bool>;
}

#[async_trait]
impl CommentCheck for PgPool {
    async fn is_stored(&self, comment: &CommentRecord) -> anyhow::Result<bool> {
        let mut conn = self.acquire().await?;
        db::is_stored(&mut *conn, comment).await
    }
}

type Rooms = HashMap<ArticleId, HashMap<Uuid, mpsc::UnboundedSender<FeedMessage>>>;

/// Websockets of the comment feed, grouped by the room they joined
#[derive(Clone, Debug)]
pub struct RoomFeeds(Arc<RwLock<Rooms>>);

impl RoomFeeds {
    pub fn new() -> RoomFeeds {
        RoomFeeds(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn room_size(&self, room: ArticleId) -> usize {
        self.0.read().await.get(&room).map(|r| r.len()).unwrap_or(0)
    }

    async fn join(&self, room: ArticleId, socket: Uuid, sender: mpsc::UnboundedSender<FeedMessage>) {
        self.0
            .write()
            .await
            .entry(room)
            .or_insert_with(HashMap::new)
            .insert(socket, sender);
        tracing::debug!(?room, ?socket, "socket joined comment room");
    }

    async fn leave(&self, room: ArticleId, socket: Uuid) {
        let mut rooms = self.0.write().await;
        if let Some(sockets) = rooms.get_mut(&room) {
            sockets.remove(&socket);
            if sockets.is_empty() {
                rooms.remove(&room);
            }
        }
        tracing::debug!(?room, ?socket, "socket left comment room");
    }

    /// Sends `comment` to every socket in `room`
    pub async fn relay(&self, room: ArticleId, comment: CommentRecord) {
        if let Some(sockets) = self.0.read().await.get(&room) {
            for s in sockets.values() {
                let _ = s.unbounded_send(FeedMessage::CommentReceived {
                    room,
                    comment: comment.clone(),
                });
            }
        }
    }

    pub async fn add_socket<C, W, R>(self, check: C, mut write: W, read: R)
    where
        C: CommentCheck,
        W: 'static + Send + Unpin + futures::Sink<Message>,
        <W as futures::Sink<Message>>::Error: Send,
        R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
    {
        // Note: if this were bounded, there would be a deadlock between the
        // write-lock to leave a room and the read-lock to relay to its sockets
        let (sender, mut receiver) = mpsc::unbounded();
        let socket = Uuid::new_v4();

        let this = self.clone();
        let mut read = read.fuse();
        tokio::spawn(async move {
            let mut joined = None;
            loop {
                let msg = select! {
                    msg = receiver.next() => match msg {
                        None => break,
                        Some(msg) => msg,
                    },
                    msg = read.next() => {
                        let msg = match msg {
                            None | Some(Ok(Message::Close(_))) => break,
                            Some(Ok(Message::Text(msg))) => serde_json::from_str::<ClientMessage>(&msg),
                            Some(Ok(Message::Binary(msg))) => serde_json::from_slice::<ClientMessage>(&msg),
                            // ping and pong frames are answered by axum
                            Some(Ok(_)) => continue,
                            Some(Err(err)) => {
                                tracing::debug!(?err, ?socket, "comment feed websocket failed");
                                break;
                            }
                        };
                        match msg {
                            Err(err) => {
                                tracing::warn!(?err, ?socket, "received unexpected message from client");
                                break;
                            }
                            Ok(msg) => match this.handle_client_message(&check, socket, &sender, &mut joined, msg).await {
                                Some(reply) => reply,
                                None => continue,
                            },
                        }
                    },
                };
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::error!(?err, ?msg, "failed serializing message to json");
                        continue;
                    }
                };
                if write.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            if let Some(room) = joined {
                this.leave(room, socket).await;
            }
            tracing::debug!(?socket, "comment feed websocket closed");
        });
    }

    async fn handle_client_message<C: CommentCheck>(
        &self,
        check: &C,
        socket: Uuid,
        sender: &mpsc::UnboundedSender<FeedMessage>,
        joined: &mut Option<ArticleId>,
        msg: ClientMessage,
    ) -> Option<FeedMessage> {
        match msg {
            ClientMessage::Ping => Some(FeedMessage::Pong),
            ClientMessage::JoinRoom(room) => {
                if let Some(previous) = joined.replace(room) {
                    self.leave(previous, socket).await;
                }
                self.join(room, socket, sender.clone()).await;
                Some(FeedMessage::Joined(room))
            }
            ClientMessage::LeaveRoom => {
                if let Some(previous) = joined.take() {
                    self.leave(previous, socket).await;
                }
                None
            }
            ClientMessage::SendComment { room, comment } => {
                if comment.article_id != room {
                    tracing::warn!(?room, id = ?comment.id, "refusing to relay comment to another article's room");
                    return None;
                }
                match check.is_stored(&comment).await {
                    Ok(true) => self.relay(room, comment).await,
                    Ok(false) => {
                        tracing::warn!(?room, id = ?comment.id, "refusing to relay comment that does not match the store")
                    }
                    Err(err) => {
                        tracing::error!(?err, id = ?comment.id, "failed checking comment before relaying it")
                    }
                }
                None
            }
        }
    }
}
