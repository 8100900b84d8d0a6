use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use futures::{
    channel::{mpsc, oneshot},
    select, Sink, SinkExt, Stream, StreamExt,
};
use threadline_client::{
    api::{ArticleId, ClientMessage, CommentRecord, FeedMessage},
    RoomSubscription, RoomTransport,
};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};

/// A message to write on a room socket, and who to tell once it is written
type Outgoing = (ClientMessage, oneshot::Sender<()>);

/// Comment rooms joined over the server's `/ws/comment-feed` websocket, one
/// socket per joined room
#[derive(Clone)]
pub struct WsTransport {
    url: String,
    rooms: Arc<Mutex<HashMap<ArticleId, mpsc::UnboundedSender<Outgoing>>>>,
}

/// Websocket url of the comment feed of the server at `host`
pub fn feed_url(host: &str) -> anyhow::Result<String> {
    let host = host.trim_end_matches('/');
    let rest = host
        .strip_prefix("http")
        .with_context(|| format!("host {host:?} is neither an http nor an https url"))?;
    Ok(format!("ws{rest}/ws/comment-feed"))
}

impl WsTransport {
    pub fn new(url: String) -> WsTransport {
        WsTransport {
            url,
            rooms: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl RoomTransport for WsTransport {
    async fn join_room(&self, room: ArticleId) -> anyhow::Result<RoomSubscription> {
        let (sock, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .with_context(|| format!("connecting to comment feed {}", self.url))?;
        let (mut write, mut read) = sock.split();
        send(&mut write, &ClientMessage::JoinRoom(room)).await?;
        wait_joined(room, &mut read).await?;
        tracing::info!(?room, "joined comment room");

        let (outgoing, outgoing_receiver) = mpsc::unbounded();
        let (inbound_sender, inbound) = mpsc::unbounded();
        let (leave, leave_receiver) = oneshot::channel();
        self.rooms.lock().await.insert(room, outgoing.clone());

        let rooms = self.rooms.clone();
        tokio::spawn(async move {
            run_room(
                room,
                write,
                read,
                outgoing_receiver,
                inbound_sender,
                leave_receiver,
            )
            .await;
            let mut rooms = rooms.lock().await;
            // the room may have been joined again on another socket meanwhile
            if rooms
                .get(&room)
                .map(|s| s.same_receiver(&outgoing))
                .unwrap_or(false)
            {
                rooms.remove(&room);
            }
        });

        Ok(RoomSubscription {
            room,
            inbound,
            leave,
        })
    }

    async fn send_comment(&self, room: ArticleId, comment: CommentRecord) -> anyhow::Result<()> {
        let sender = self
            .rooms
            .lock()
            .await
            .get(&room)
            .cloned()
            .with_context(|| format!("comment room {room:?} is not joined"))?;
        let (written, done) = oneshot::channel();
        sender
            .unbounded_send((ClientMessage::SendComment { room, comment }, written))
            .map_err(|_| anyhow::anyhow!("comment room {room:?} is closed"))?;
        done.await
            .with_context(|| format!("comment room {room:?} closed before the comment was sent"))
    }
}

async fn send<W>(write: &mut W, msg: &ClientMessage) -> anyhow::Result<()>
where
    W: Sink<Message> + Unpin,
    W::Error: std::error::Error + Send + Sync + 'static,
{
    let json = serde_json::to_string(msg).context("serializing comment feed message")?;
    write
        .send(Message::Text(json))
        .await
        .context("writing to comment feed")
}

fn parse(msg: Message) -> anyhow::Result<Option<FeedMessage>> {
    let msg = match msg {
        Message::Text(t) => serde_json::from_str(&t),
        Message::Binary(b) => serde_json::from_slice(&b),
        _ => return Ok(None),
    };
    msg.map(Some).context("parsing comment feed message")
}

async fn wait_joined<R>(room: ArticleId, read: &mut R) -> anyhow::Result<()>
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let msg = match read.next().await {
            None | Some(Ok(Message::Close(_))) => {
                anyhow::bail!("comment feed closed before joining room {room:?}")
            }
            Some(msg) => msg.context("reading from comment feed")?,
        };
        match parse(msg)? {
            Some(FeedMessage::Joined(r)) if r == room => return Ok(()),
            Some(msg) => tracing::debug!(?msg, "ignoring message received before joining"),
            None => (),
        }
    }
}

/// Runs the socket of `room` until it is left or closed by the server
async fn run_room<W, R>(
    room: ArticleId,
    mut write: W,
    read: R,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    inbound: mpsc::UnboundedSender<FeedMessage>,
    mut leave: oneshot::Receiver<()>,
) where
    W: Sink<Message> + Unpin,
    W::Error: std::error::Error + Send + Sync + 'static,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut read = read.fuse();
    loop {
        select! {
            _ = leave => {
                if let Err(err) = send(&mut write, &ClientMessage::LeaveRoom).await {
                    tracing::debug!(?err, ?room, "failed telling the server we left");
                }
                let _ = write.close().await;
                tracing::debug!(?room, "left comment room");
                return;
            }
            msg = outgoing.next() => {
                let (msg, written) = match msg {
                    None => return,
                    Some(msg) => msg,
                };
                if let Err(err) = send(&mut write, &msg).await {
                    tracing::warn!(?err, ?room, "lost comment feed connection");
                    return;
                }
                let _ = written.send(());
            }
            msg = read.next() => {
                let msg = match msg {
                    None | Some(Ok(Message::Close(_))) => {
                        tracing::info!(?room, "comment feed closed by the server");
                        return;
                    }
                    Some(Err(err)) => {
                        tracing::warn!(?err, ?room, "lost comment feed connection");
                        return;
                    }
                    Some(Ok(msg)) => msg,
                };
                match parse(msg) {
                    Ok(None) => (),
                    Ok(Some(msg)) => {
                        if inbound.unbounded_send(msg).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(?err, ?room, "received unexpected message from server")
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use threadline_client::api::{CommentId, UserId, Uuid};

    use super::*;

    fn article(n: u128) -> ArticleId {
        ArticleId(Uuid::from_u128(n))
    }

    fn comment(article_id: ArticleId) -> CommentRecord {
        CommentRecord {
            id: CommentId(Uuid::new_v4()),
            article_id,
            author_id: UserId::stub(),
            content: String::from("hi"),
            created_at: Utc::now(),
            reply_to: None,
        }
    }

    fn text(msg: &FeedMessage) -> Result<Message, tungstenite::Error> {
        Ok(Message::Text(serde_json::to_string(msg).unwrap()))
    }

    fn client_message(msg: Message) -> ClientMessage {
        match msg {
            Message::Text(t) => serde_json::from_str(&t).unwrap(),
            msg => panic!("unexpected frame {msg:?}"),
        }
    }

    struct Harness {
        from_client: mpsc::UnboundedReceiver<Message>,
        to_client: mpsc::UnboundedSender<Result<Message, tungstenite::Error>>,
        outgoing: mpsc::UnboundedSender<Outgoing>,
        inbound: mpsc::UnboundedReceiver<FeedMessage>,
        leave: oneshot::Sender<()>,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_room(room: ArticleId) -> Harness {
        let (write, from_client) = mpsc::unbounded();
        let (to_client, read) = mpsc::unbounded();
        let (outgoing, outgoing_receiver) = mpsc::unbounded();
        let (inbound_sender, inbound) = mpsc::unbounded();
        let (leave, leave_receiver) = oneshot::channel();
        let task = tokio::spawn(run_room(
            room,
            write,
            read,
            outgoing_receiver,
            inbound_sender,
            leave_receiver,
        ));
        Harness {
            from_client,
            to_client,
            outgoing,
            inbound,
            leave,
            task,
        }
    }

    #[test]
    fn feed_url_follows_the_http_scheme() {
        assert_eq!(
            feed_url("http://localhost:3000/").unwrap(),
            "ws://localhost:3000/ws/comment-feed"
        );
        assert_eq!(
            feed_url("https://comments.example.org").unwrap(),
            "wss://comments.example.org/ws/comment-feed"
        );
        assert!(feed_url("localhost:3000").is_err());
    }

    #[tokio::test]
    async fn joining_waits_for_the_right_room() {
        let (to_client, mut read) = mpsc::unbounded();
        to_client.unbounded_send(text(&FeedMessage::Pong)).unwrap();
        to_client
            .unbounded_send(Ok(Message::Ping(Vec::new())))
            .unwrap();
        to_client
            .unbounded_send(text(&FeedMessage::Joined(article(2))))
            .unwrap();
        to_client
            .unbounded_send(text(&FeedMessage::Joined(article(1))))
            .unwrap();
        wait_joined(article(1), &mut read).await.unwrap();

        drop(to_client);
        assert!(wait_joined(article(1), &mut read).await.is_err());
    }

    #[tokio::test]
    async fn pushes_reach_the_subscription() {
        let mut h = spawn_room(article(1));
        let c = comment(article(1));
        let push = FeedMessage::CommentReceived {
            room: article(1),
            comment: c.clone(),
        };
        h.to_client
            .unbounded_send(Ok(Message::Ping(Vec::new())))
            .unwrap();
        h.to_client
            .unbounded_send(Ok(Message::Text(String::from("not json"))))
            .unwrap();
        h.to_client.unbounded_send(text(&push)).unwrap();
        assert_eq!(h.inbound.next().await, Some(push));

        drop(h.to_client);
        h.task.await.unwrap();
        assert_eq!(h.inbound.next().await, None);
    }

    #[tokio::test]
    async fn sent_comments_are_written_before_acknowledging() {
        let mut h = spawn_room(article(1));
        let msg = ClientMessage::SendComment {
            room: article(1),
            comment: comment(article(1)),
        };
        let (written, done) = oneshot::channel();
        h.outgoing.unbounded_send((msg.clone(), written)).unwrap();
        done.await.unwrap();
        assert_eq!(
            client_message(h.from_client.next().await.unwrap()),
            msg
        );
    }

    #[tokio::test]
    async fn leaving_tells_the_server() {
        let mut h = spawn_room(article(1));
        drop(h.leave);
        h.task.await.unwrap();
        assert_eq!(
            client_message(h.from_client.next().await.unwrap()),
            ClientMessage::LeaveRoom
        );
        assert_eq!(h.from_client.next().await, None);
    }

    #[tokio::test]
    async fn sending_requires_a_joined_room() {
        let transport = WsTransport::new(String::from("ws://127.0.0.1:1/ws/comment-feed"));
        assert!(transport
            .send_comment(article(1), comment(article(1)))
            .await
            .is_err());
    }
}
