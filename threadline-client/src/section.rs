use std::sync::Arc;

use anyhow::Context;

use crate::{
    api::{ArticleId, CommentId, CommentRecord, NewComment, User},
    build_tree, AuthGate, CommentApi, CommentStore, Composer, ComposerKind, LoadOutcome, Merge,
    RoomTransport, SubmitStep, SyncBridge, Tree, UserDirectory,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LoadState {
    /// No article displayed
    Idle,
    Loading,
    Ready,
    Failed(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// Transient message for the user, eg. a toast
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Historical comments and user directory, fetched for one article
pub struct Fetched {
    pub article: ArticleId,
    pub result: anyhow::Result<(Vec<CommentRecord>, Vec<User>)>,
}

/// A submission whose persistence call has not completed yet
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingSubmit {
    pub kind: ComposerKind,
    pub comment: NewComment,
    /// Article generation the submission was started in
    generation: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    Ignored,
    LoginRequired,
    Empty,
    Posted(CommentRecord),
    Failed(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteOutcome {
    LoginRequired,
    NotFound,
    NotAuthor,
    /// Number of comments removed, the deleted one and its replies
    Deleted(usize),
    Failed,
}

/// Comment section of the displayed article.
///
/// Owns the store, the directory and both composers, and keeps at most one
/// room subscription: the one of the active article.
pub struct CommentSection<A, G, T> {
    api: A,
    auth: G,
    transport: T,

    store: CommentStore,
    directory: UserDirectory,
    state: LoadState,

    root: Composer,
    reply: Composer,

    bridge: Option<SyncBridge<T>>,
    notices: Vec<Notice>,

    /// Bumped every time the displayed article is replaced, so that submissions
    /// started before do not touch the new composers
    generation: u64,

    /// Last built tree, with the store and directory revisions it was built from
    cached_tree: Option<(u64, u64, Arc<Tree>)>,
    empty_tree: Arc<Tree>,
}

impl<A, G, T> CommentSection<A, G, T>
where
    A: CommentApi,
    G: AuthGate,
    T: RoomTransport + Clone,
{
    pub fn new(api: A, auth: G, transport: T) -> CommentSection<A, G, T> {
        CommentSection {
            api,
            auth,
            transport,
            store: CommentStore::new(),
            directory: UserDirectory::new(),
            state: LoadState::Idle,
            root: Composer::new(),
            reply: Composer::new(),
            bridge: None,
            notices: Vec::new(),
            generation: 0,
            cached_tree: None,
            empty_tree: Arc::new(Tree::default()),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn article(&self) -> Option<ArticleId> {
        self.store.article()
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn store(&self) -> &CommentStore {
        &self.store
    }

    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    pub fn composer(&self, kind: ComposerKind) -> &Composer {
        match kind {
            ComposerKind::Root => &self.root,
            ComposerKind::Reply => &self.reply,
        }
    }

    fn composer_mut(&mut self, kind: ComposerKind) -> &mut Composer {
        match kind {
            ComposerKind::Root => &mut self.root,
            ComposerKind::Reply => &mut self.reply,
        }
    }

    /// Whether the view should show a sign-in prompt instead of the inputs
    pub fn login_required(&self) -> bool {
        !self.auth.is_authenticated()
    }

    pub fn is_live(&self) -> bool {
        self.bridge.as_ref().map(|b| b.is_attached()).unwrap_or(false)
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        self.notices.push(Notice {
            level,
            message: message.into(),
        });
    }

    /// Displays `article`: joins its room, then loads its history
    pub async fn open(&mut self, article: ArticleId) {
        self.switch_article(article);
        self.connect_live().await;
        let fetched = self.fetch(article).await;
        self.apply_fetch(fetched);
    }

    /// Leaves the room of the previous article and empties the store. Responses
    /// still in flight for the previous article will be ignored.
    pub fn switch_article(&mut self, article: ArticleId) {
        if let Some(bridge) = self.bridge.take() {
            bridge.detach();
        }
        self.store.switch_to(article);
        self.state = LoadState::Loading;
        self.generation += 1;
        self.root = Composer::new();
        self.reply = Composer::new();
        self.cached_tree = None;
    }

    /// Tears everything down, eg. when the page goes away
    pub fn close(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.detach();
        }
        self.store.clear();
        self.state = LoadState::Idle;
        self.generation += 1;
        self.root = Composer::new();
        self.reply = Composer::new();
        self.cached_tree = None;
    }

    /// Joins the room of the active article. Failing to do so only loses live
    /// updates, so it is logged and reported as `false`.
    pub async fn connect_live(&mut self) -> bool {
        let Some(article) = self.store.article() else {
            return false;
        };
        if self
            .bridge
            .as_ref()
            .map(|b| b.room() == article && b.is_attached())
            .unwrap_or(false)
        {
            return true;
        }
        self.bridge = None;
        match SyncBridge::attach(&self.transport, article).await {
            Ok(bridge) => {
                self.bridge = Some(bridge);
                true
            }
            Err(err) => {
                tracing::warn!(?err, ?article, "live comment updates unavailable");
                false
            }
        }
    }

    pub async fn fetch(&self, article: ArticleId) -> Fetched {
        let result = futures::try_join!(
            async {
                self.api
                    .fetch_comments(article)
                    .await
                    .with_context(|| format!("fetching comments of article {article:?}"))
            },
            async { self.api.fetch_users().await.context("fetching user directory") },
        );
        Fetched { article, result }
    }

    /// Applies a fetch result, returning false if it was for another article
    pub fn apply_fetch(&mut self, fetched: Fetched) -> bool {
        match fetched.result {
            Ok((comments, users)) => {
                match self.store.load(fetched.article, comments) {
                    LoadOutcome::Applied { inserted } => {
                        tracing::debug!(article = ?fetched.article, inserted, "loaded comments")
                    }
                    LoadOutcome::Stale => return false,
                }
                self.directory.replace(users);
                self.state = LoadState::Ready;
            }
            Err(_) if self.store.article() != Some(fetched.article) => {
                tracing::debug!(article = ?fetched.article, "ignoring stale comment fetch failure");
                return false;
            }
            Err(err) => {
                tracing::error!(?err, article = ?fetched.article, "failed loading comments");
                self.state = LoadState::Failed(format!("{err:#}"));
                self.notify(
                    NoticeLevel::Error,
                    "Could not load the comments, please try again",
                );
            }
        }
        true
    }

    /// The reply tree to display. The same `Arc` is returned for as long as
    /// neither the comments nor the directory change.
    pub fn tree(&mut self) -> Arc<Tree> {
        if let LoadState::Failed(_) = self.state {
            return self.empty_tree.clone();
        }
        let key = (self.store.revision(), self.directory.revision());
        if let Some((store_rev, dir_rev, tree)) = &self.cached_tree {
            if (*store_rev, *dir_rev) == key {
                return tree.clone();
            }
        }
        let tree = Arc::new(build_tree(self.store.records(), &self.directory));
        self.cached_tree = Some((key.0, key.1, tree.clone()));
        tree
    }

    /// Opens or closes the reply input under root comment `parent`
    pub fn toggle_reply(&mut self, parent: CommentId) -> bool {
        let author = match self.store.get(&parent) {
            Some(r) if r.is_root() => r.author_id,
            Some(_) => {
                tracing::warn!(?parent, "only root comments can be replied to");
                return false;
            }
            None => {
                tracing::warn!(?parent, "replying to an unknown comment");
                return false;
            }
        };
        let opened = self.reply.toggle_reply(parent);
        if opened {
            let message = format!("Replying to {}", self.directory.display_name(&author));
            self.notify(NoticeLevel::Info, message);
        }
        opened
    }

    pub fn cancel_reply(&mut self) {
        self.reply.cancel();
    }

    /// Replaces the draft of a composer, opening the root composer if needed
    pub fn edit(&mut self, kind: ComposerKind, text: String) -> bool {
        let composer = self.composer_mut(kind);
        if kind == ComposerKind::Root {
            composer.open_root();
        }
        composer.edit(text)
    }

    /// Moves a composer to `Submitting`. The returned comment must be persisted
    /// and the result handed to `complete_submit`.
    pub fn begin_submit(&mut self, kind: ComposerKind) -> Result<PendingSubmit, SubmitOutcome> {
        let Some(article) = self.store.article() else {
            return Err(SubmitOutcome::Ignored);
        };
        let step = match kind {
            ComposerKind::Root => self.root.begin_submit(&self.auth, article),
            ComposerKind::Reply => self.reply.begin_submit(&self.auth, article),
        };
        match step {
            SubmitStep::Submit(comment) => Ok(PendingSubmit {
                kind,
                comment,
                generation: self.generation,
            }),
            SubmitStep::Ignored => Err(SubmitOutcome::Ignored),
            SubmitStep::Empty => Err(SubmitOutcome::Empty),
            SubmitStep::LoginRequired => {
                self.notify(NoticeLevel::Info, "Please sign in to comment");
                Err(SubmitOutcome::LoginRequired)
            }
        }
    }

    pub async fn persist(&self, pending: &PendingSubmit) -> anyhow::Result<CommentRecord> {
        self.api
            .create_comment(pending.comment.clone())
            .await
            .context("storing comment")
    }

    /// Ends a submission: on success the stored comment is added locally, then
    /// published to the room. A submission started before the article was last
    /// replaced leaves the composers alone, they belong to a later article view.
    pub async fn complete_submit(
        &mut self,
        pending: PendingSubmit,
        result: anyhow::Result<CommentRecord>,
    ) -> SubmitOutcome {
        let current = pending.generation == self.generation;
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                tracing::error!(?err, "failed storing comment");
                let msg = format!("{err:#}");
                if current {
                    self.composer_mut(pending.kind)
                        .finish_submit(Err(msg.clone()));
                    self.notify(NoticeLevel::Error, "Could not post the comment");
                }
                return SubmitOutcome::Failed(msg);
            }
        };
        if current {
            self.composer_mut(pending.kind).finish_submit(Ok(()));
            self.notify(
                NoticeLevel::Success,
                match pending.kind {
                    ComposerKind::Root => "Comment posted",
                    ComposerKind::Reply => "Reply posted",
                },
            );
        } else {
            tracing::debug!(id = ?record.id, "comment stored after its composer was reset");
        }
        if self.store.merge(record.clone()) == Merge::OtherArticle {
            return SubmitOutcome::Posted(record);
        }
        if let Some(bridge) = &self.bridge {
            if let Err(err) = bridge.publish(record.clone()).await {
                tracing::warn!(?err, id = ?record.id, "failed publishing comment to room");
            }
        }
        SubmitOutcome::Posted(record)
    }

    pub async fn submit(&mut self, kind: ComposerKind) -> SubmitOutcome {
        let pending = match self.begin_submit(kind) {
            Ok(pending) => pending,
            Err(outcome) => return outcome,
        };
        let result = self.persist(&pending).await;
        self.complete_submit(pending, result).await
    }

    /// Folds a comment pushed by the room into the store
    pub fn handle_push(&mut self, room: ArticleId, comment: CommentRecord) -> Merge {
        if self.store.article() != Some(room) {
            tracing::debug!(?room, id = ?comment.id, "ignoring push for an article not displayed");
            return Merge::OtherArticle;
        }
        let id = comment.id;
        let res = self.store.merge(comment);
        if res == Merge::Duplicate {
            tracing::debug!(?id, "ignoring already known comment");
        }
        res
    }

    /// Handles all the pushes already received, returning how many were new
    pub fn poll_live(&mut self) -> usize {
        let mut inserted = 0;
        while let Some(bridge) = self.bridge.as_mut() {
            let room = bridge.room();
            let Some(comment) = bridge.try_next_push() else {
                break;
            };
            if self.handle_push(room, comment) == Merge::Inserted {
                inserted += 1;
            }
        }
        inserted
    }

    /// Waits for the next push and handles it, None if there is no live room
    pub async fn next_live(&mut self) -> Option<Merge> {
        let bridge = self.bridge.as_mut()?;
        let room = bridge.room();
        let comment = bridge.next_push().await?;
        Some(self.handle_push(room, comment))
    }

    /// Deletes one of the current user's comments, along with its replies
    pub async fn delete(&mut self, id: CommentId) -> DeleteOutcome {
        let Some(user) = self.auth.current_user() else {
            self.auth.require_login();
            self.notify(NoticeLevel::Info, "Please sign in to delete comments");
            return DeleteOutcome::LoginRequired;
        };
        match self.store.get(&id) {
            None => return DeleteOutcome::NotFound,
            Some(r) if r.author_id != user.id => {
                self.notify(NoticeLevel::Error, "Only the author can delete a comment");
                return DeleteOutcome::NotAuthor;
            }
            Some(_) => (),
        }
        if let Err(err) = self.api.delete_comment(id).await {
            tracing::error!(?err, ?id, "failed deleting comment");
            self.notify(NoticeLevel::Error, "Could not delete the comment");
            return DeleteOutcome::Failed;
        }
        let removed = self.store.remove(id);
        if self
            .reply
            .reply_target()
            .map(|p| removed.contains(&p))
            .unwrap_or(false)
        {
            self.reply.cancel();
        }
        self.notify(NoticeLevel::Success, "Comment deleted");
        DeleteOutcome::Deleted(removed.len())
    }
}
