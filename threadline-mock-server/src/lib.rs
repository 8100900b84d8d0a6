use std::{
    collections::{btree_map, BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use futures::channel::{mpsc, oneshot};
use threadline_client::{
    api::{
        ArticleId, AuthToken, CommentId, CommentRecord, Error, FeedMessage, NewComment,
        NewSession, NewUser, User, UserId, Uuid,
    },
    CommentApi, RoomSubscription, RoomTransport,
};

mod scenarios;

/// In-memory stand-in for the comment server
#[derive(Default)]
pub struct MockServer {
    users: BTreeMap<UserId, DbUser>,
    comments: HashMap<CommentId, CommentRecord>,
    rooms: HashMap<ArticleId, Vec<Subscriber>>,

    /// Number of upcoming comment creations that will fail
    pub fail_next_creates: usize,
    /// Number of upcoming comment fetches that will fail
    pub fail_next_fetches: usize,
    /// Whether joining rooms fails
    pub refuse_joins: bool,

    create_calls: usize,
}

#[derive(Debug)]
struct DbUser {
    name: String,
    pass: String,
    user: User,
    sessions: HashMap<AuthToken, Device>,
}

#[derive(Debug)]
struct Device(String);

struct Subscriber {
    sender: mpsc::UnboundedSender<FeedMessage>,
    leave: oneshot::Receiver<()>,
}

impl Subscriber {
    fn is_gone(&mut self) -> bool {
        // a sent or dropped leave signal both mean the room was left
        self.sender.is_closed() || !matches!(self.leave.try_recv(), Ok(None))
    }
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer::default()
    }

    /// Number of comment creations attempted so far, failed ones included
    pub fn test_create_calls(&self) -> usize {
        self.create_calls
    }

    /// Number of clients currently in `room`
    pub fn test_room_size(&mut self, room: ArticleId) -> usize {
        self.prune_room(room);
        self.rooms.get(&room).map(|r| r.len()).unwrap_or(0)
    }

    pub fn test_comments(&self, article: ArticleId) -> Vec<CommentRecord> {
        self.comments
            .values()
            .filter(|c| c.article_id == article)
            .cloned()
            .collect()
    }

    /// Mock users log in with their plaintext password, the hash is ignored
    pub fn admin_create_user(&mut self, u: NewUser, password: String) -> Result<(), Error> {
        u.validate()?;

        if self.users.values().any(|db| db.name == u.name) {
            return Err(Error::NameAlreadyUsed(u.name));
        }

        match self.users.entry(u.id) {
            btree_map::Entry::Occupied(_) => Err(Error::UuidAlreadyUsed(u.id.0)),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(DbUser {
                    name: u.name,
                    pass: password,
                    user: User {
                        id: u.id,
                        full_name: u.full_name,
                        avatar_url: u.avatar_url,
                    },
                    sessions: HashMap::new(),
                });
                Ok(())
            }
        }
    }

    pub fn auth(&mut self, s: NewSession) -> Result<AuthToken, Error> {
        s.validate()?;
        let u = self
            .users
            .values_mut()
            .find(|u| u.name == s.user)
            .ok_or(Error::PermissionDenied)?;
        if s.password != u.pass {
            return Err(Error::PermissionDenied);
        }
        let tok = AuthToken(Uuid::new_v4());
        u.sessions.insert(tok, Device(s.device));
        Ok(tok)
    }

    fn resolve(&self, tok: AuthToken) -> Result<&DbUser, Error> {
        self.users
            .values()
            .find(|u| u.sessions.contains_key(&tok))
            .ok_or(Error::PermissionDenied)
    }

    pub fn unauth(&mut self, tok: AuthToken) -> Result<(), Error> {
        let u = self
            .users
            .values_mut()
            .find(|u| u.sessions.contains_key(&tok))
            .ok_or(Error::PermissionDenied)?;
        u.sessions.remove(&tok);
        Ok(())
    }

    pub fn whoami(&self, tok: AuthToken) -> Result<User, Error> {
        Ok(self.resolve(tok)?.user.clone())
    }

    pub fn fetch_users(&self) -> Vec<User> {
        self.users.values().map(|u| u.user.clone()).collect()
    }

    pub fn fetch_comments(&mut self, article: ArticleId) -> Result<Vec<CommentRecord>, Error> {
        if self.fail_next_fetches > 0 {
            self.fail_next_fetches -= 1;
            return Err(Error::Unknown(String::from("mock fetch failure")));
        }
        Ok(self.test_comments(article))
    }

    pub fn create_comment(
        &mut self,
        tok: AuthToken,
        c: NewComment,
    ) -> Result<CommentRecord, Error> {
        self.create_calls += 1;
        let user = self.resolve(tok)?.user.id;
        if c.author_id != user {
            return Err(Error::PermissionDenied);
        }
        c.validate()?;
        if let Some(parent) = c.reply_to {
            match self.comments.get(&parent) {
                Some(p) if p.is_root() && p.article_id == c.article_id => (),
                Some(_) => return Err(Error::InvalidParent(parent)),
                None => return Err(Error::UnknownComment(parent)),
            }
        }
        if self.fail_next_creates > 0 {
            self.fail_next_creates -= 1;
            return Err(Error::Unknown(String::from("mock create failure")));
        }
        let record = c.into_record(CommentId(Uuid::new_v4()));
        self.comments.insert(record.id, record.clone());
        Ok(record)
    }

    pub fn delete_comment(&mut self, tok: AuthToken, id: CommentId) -> Result<(), Error> {
        let user = self.resolve(tok)?.user.id;
        match self.comments.get(&id) {
            None => return Err(Error::UnknownComment(id)),
            Some(c) if c.author_id != user => return Err(Error::PermissionDenied),
            Some(_) => (),
        }
        self.comments
            .retain(|cid, c| *cid != id && c.reply_to != Some(id));
        Ok(())
    }

    pub fn join_room(&mut self, room: ArticleId) -> Result<RoomSubscription, Error> {
        if self.refuse_joins {
            return Err(Error::Unknown(String::from("mock transport is down")));
        }
        let (sender, inbound) = mpsc::unbounded();
        let (leave, leave_receiver) = oneshot::channel();
        self.rooms.entry(room).or_default().push(Subscriber {
            sender,
            leave: leave_receiver,
        });
        Ok(RoomSubscription {
            room,
            inbound,
            leave,
        })
    }

    /// Relays a stored comment to everyone in the room, sender included
    pub fn send_comment(&mut self, room: ArticleId, comment: CommentRecord) -> Result<(), Error> {
        if comment.article_id != room || self.comments.get(&comment.id) != Some(&comment) {
            tracing::warn!(?room, id = ?comment.id, "refusing to relay a comment that is not stored");
            return Err(Error::UnknownComment(comment.id));
        }
        self.push(room, comment);
        Ok(())
    }

    /// Delivers a push to a room without any check, eg. to simulate a late message
    pub fn push(&mut self, room: ArticleId, comment: CommentRecord) {
        self.prune_room(room);
        if let Some(subs) = self.rooms.get(&room) {
            for s in subs {
                let _ = s.sender.unbounded_send(FeedMessage::CommentReceived {
                    room,
                    comment: comment.clone(),
                });
            }
        }
    }

    fn prune_room(&mut self, room: ArticleId) {
        if let Some(subs) = self.rooms.get_mut(&room) {
            subs.retain_mut(|s| !s.is_gone());
        }
    }
}

/// Handle on a shared `MockServer`, as one client would see it
#[derive(Clone)]
pub struct MockClient {
    server: Arc<Mutex<MockServer>>,
    token: Option<AuthToken>,
}

impl MockClient {
    pub fn new(server: Arc<Mutex<MockServer>>, token: Option<AuthToken>) -> MockClient {
        MockClient { server, token }
    }

    fn token(&self) -> anyhow::Result<AuthToken> {
        self.token.ok_or_else(|| Error::PermissionDenied.into())
    }

    fn server(&self) -> std::sync::MutexGuard<'_, MockServer> {
        self.server.lock().expect("mock server mutex poisoned")
    }
}

#[async_trait]
impl CommentApi for MockClient {
    async fn fetch_comments(&self, article: ArticleId) -> anyhow::Result<Vec<CommentRecord>> {
        Ok(self.server().fetch_comments(article)?)
    }

    async fn fetch_users(&self) -> anyhow::Result<Vec<User>> {
        Ok(self.server().fetch_users())
    }

    async fn create_comment(&self, comment: NewComment) -> anyhow::Result<CommentRecord> {
        let tok = self.token()?;
        Ok(self.server().create_comment(tok, comment)?)
    }

    async fn delete_comment(&self, id: CommentId) -> anyhow::Result<()> {
        let tok = self.token()?;
        Ok(self.server().delete_comment(tok, id)?)
    }
}

#[async_trait]
impl RoomTransport for MockClient {
    async fn join_room(&self, room: ArticleId) -> anyhow::Result<RoomSubscription> {
        Ok(self.server().join_room(room)?)
    }

    async fn send_comment(&self, room: ArticleId, comment: CommentRecord) -> anyhow::Result<()> {
        Ok(self.server().send_comment(room, comment)?)
    }
}
