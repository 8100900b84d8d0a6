use async_trait::async_trait;
use futures::{
    channel::{mpsc, oneshot},
    StreamExt,
};

use crate::api::{ArticleId, CommentRecord, FeedMessage};

/// Membership in a room of the realtime transport.
///
/// Dropping `leave` (or sending on it) tells the transport to leave the room.
pub struct RoomSubscription {
    pub room: ArticleId,
    pub inbound: mpsc::UnboundedReceiver<FeedMessage>,
    pub leave: oneshot::Sender<()>,
}

/// Room-based publish/subscribe channel
#[async_trait]
pub trait RoomTransport: Send + Sync {
    async fn join_room(&self, room: ArticleId) -> anyhow::Result<RoomSubscription>;
    async fn send_comment(&self, room: ArticleId, comment: CommentRecord) -> anyhow::Result<()>;
}

/// Live link between the comment section of one article and its room
pub struct SyncBridge<T> {
    transport: T,
    room: ArticleId,
    inbound: Option<mpsc::UnboundedReceiver<FeedMessage>>,
    leave: Option<oneshot::Sender<()>>,
}

impl<T: RoomTransport + Clone> SyncBridge<T> {
    pub async fn attach(transport: &T, room: ArticleId) -> anyhow::Result<SyncBridge<T>> {
        let sub = transport.join_room(room).await?;
        if sub.room != room {
            anyhow::bail!("asked to join room {room:?} but joined {:?}", sub.room);
        }
        tracing::debug!(?room, "joined comment room");
        Ok(SyncBridge {
            transport: transport.clone(),
            room,
            inbound: Some(sub.inbound),
            leave: Some(sub.leave),
        })
    }

    pub fn room(&self) -> ArticleId {
        self.room
    }

    pub fn is_attached(&self) -> bool {
        self.inbound.is_some()
    }

    /// Broadcasts a freshly stored comment to the other clients in the room
    pub async fn publish(&self, comment: CommentRecord) -> anyhow::Result<()> {
        if comment.article_id != self.room {
            anyhow::bail!(
                "refusing to publish comment {:?} of article {:?} to room {:?}",
                comment.id,
                comment.article_id,
                self.room
            );
        }
        self.transport.send_comment(self.room, comment).await
    }

    /// Returns the next already-received push, without waiting
    pub fn try_next_push(&mut self) -> Option<CommentRecord> {
        loop {
            let inbound = self.inbound.as_mut()?;
            let msg = match inbound.try_next() {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    tracing::warn!(room = ?self.room, "comment room closed by the transport");
                    self.inbound = None;
                    return None;
                }
                Err(_) => return None, // nothing pending
            };
            if let Some(c) = self.accept(msg) {
                return Some(c);
            }
        }
    }

    /// Waits for the next push, None once the room is closed
    pub async fn next_push(&mut self) -> Option<CommentRecord> {
        loop {
            let msg = self.inbound.as_mut()?.next().await;
            match msg {
                None => {
                    tracing::warn!(room = ?self.room, "comment room closed by the transport");
                    self.inbound = None;
                    return None;
                }
                Some(msg) => {
                    if let Some(c) = self.accept(msg) {
                        return Some(c);
                    }
                }
            }
        }
    }

    /// Leaves the room. No push is delivered after this returns.
    pub fn detach(mut self) {
        self.leave_room();
    }
}

impl<T> SyncBridge<T> {
    fn accept(&self, msg: FeedMessage) -> Option<CommentRecord> {
        match msg {
            FeedMessage::CommentReceived { room, comment }
                if room == self.room && comment.article_id == self.room =>
            {
                Some(comment)
            }
            FeedMessage::CommentReceived { room, comment } => {
                tracing::debug!(
                    ?room,
                    id = ?comment.id,
                    joined = ?self.room,
                    "ignoring push for another room"
                );
                None
            }
            FeedMessage::Joined(_) | FeedMessage::Pong => None,
        }
    }

    fn leave_room(&mut self) {
        if let Some(leave) = self.leave.take() {
            // the transport may already be gone, which is just as good
            let _ = leave.send(());
            tracing::debug!(room = ?self.room, "left comment room");
        }
        if let Some(mut inbound) = self.inbound.take() {
            inbound.close();
        }
    }
}

impl<T> Drop for SyncBridge<T> {
    fn drop(&mut self) {
        self.leave_room();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::Utc;

    use super::*;
    use crate::api::{CommentId, UserId, Uuid};

    #[derive(Clone, Default)]
    struct Loopback {
        subscribers: Arc<Mutex<Vec<(ArticleId, mpsc::UnboundedSender<FeedMessage>)>>>,
        sent: Arc<Mutex<Vec<(ArticleId, CommentId)>>>,
    }

    impl Loopback {
        fn push(&self, room: ArticleId, comment: CommentRecord) {
            for (r, s) in self.subscribers.lock().unwrap().iter() {
                if *r == room {
                    let _ = s.unbounded_send(FeedMessage::CommentReceived {
                        room,
                        comment: comment.clone(),
                    });
                }
            }
        }
    }

    #[async_trait]
    impl RoomTransport for Loopback {
        async fn join_room(&self, room: ArticleId) -> anyhow::Result<RoomSubscription> {
            let (sender, inbound) = mpsc::unbounded();
            let (leave, _) = oneshot::channel();
            self.subscribers.lock().unwrap().push((room, sender));
            Ok(RoomSubscription {
                room,
                inbound,
                leave,
            })
        }

        async fn send_comment(
            &self,
            room: ArticleId,
            comment: CommentRecord,
        ) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push((room, comment.id));
            self.push(room, comment);
            Ok(())
        }
    }

    fn article(n: u128) -> ArticleId {
        ArticleId(Uuid::from_u128(n))
    }

    fn comment(n: u128, article_id: ArticleId) -> CommentRecord {
        CommentRecord {
            id: CommentId(Uuid::from_u128(n)),
            article_id,
            author_id: UserId::stub(),
            content: String::from("hi"),
            created_at: Utc::now(),
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn publish_reaches_the_room() {
        let transport = Loopback::default();
        let mut bridge = SyncBridge::attach(&transport, article(1)).await.unwrap();
        bridge.publish(comment(1, article(1))).await.unwrap();
        assert_eq!(
            bridge.try_next_push().map(|c| c.id),
            Some(CommentId(Uuid::from_u128(1)))
        );
        assert_eq!(bridge.try_next_push(), None);
        assert!(bridge.publish(comment(2, article(2))).await.is_err());
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pushes_for_other_rooms_are_dropped() {
        let transport = Loopback::default();
        let mut bridge = SyncBridge::attach(&transport, article(1)).await.unwrap();
        let sender = transport.subscribers.lock().unwrap()[0].1.clone();
        sender
            .unbounded_send(FeedMessage::CommentReceived {
                room: article(2),
                comment: comment(1, article(2)),
            })
            .unwrap();
        sender.unbounded_send(FeedMessage::Pong).unwrap();
        sender
            .unbounded_send(FeedMessage::CommentReceived {
                room: article(1),
                comment: comment(2, article(1)),
            })
            .unwrap();
        assert_eq!(
            bridge.next_push().await.map(|c| c.id),
            Some(CommentId(Uuid::from_u128(2)))
        );
    }

    #[tokio::test]
    async fn detach_stops_delivery() {
        let transport = Loopback::default();
        let bridge = SyncBridge::attach(&transport, article(1)).await.unwrap();
        bridge.detach();
        let sender = transport.subscribers.lock().unwrap()[0].1.clone();
        assert!(sender
            .unbounded_send(FeedMessage::CommentReceived {
                room: article(1),
                comment: comment(1, article(1)),
            })
            .is_err());
    }
}
