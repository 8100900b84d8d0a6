use crate::{
    api::{ArticleId, CommentId, NewComment},
    AuthGate,
};

/// What a submission is about
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Target {
    Root,
    Reply(CommentId),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ComposeState {
    Idle,
    ComposingRoot,
    ComposingReply(CommentId),
    /// A persistence call is in flight, the input is disabled
    Submitting(Target),
}

/// The two independent composers of a comment section
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ComposerKind {
    Root,
    Reply,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubmitStep {
    /// Nothing being composed, or a submission is already in flight
    Ignored,
    /// Anonymous user, `require_login` was called and the draft is kept
    LoginRequired,
    /// Content is empty once trimmed
    Empty,
    /// Now in `Submitting`, the caller must persist this and report back
    Submit(NewComment),
}

/// Authoring state machine for one comment input.
///
/// At most one submission is in flight per composer: while `Submitting`, every
/// input is ignored until `finish_submit` is called.
#[derive(Clone, Debug)]
pub struct Composer {
    state: ComposeState,
    draft: String,
    last_error: Option<String>,
}

impl Default for Composer {
    fn default() -> Composer {
        Composer::new()
    }
}

impl Composer {
    pub fn new() -> Composer {
        Composer {
            state: ComposeState::Idle,
            draft: String::new(),
            last_error: None,
        }
    }

    pub fn state(&self) -> ComposeState {
        self.state
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn input_disabled(&self) -> bool {
        matches!(self.state, ComposeState::Submitting(_))
    }

    /// Comment this composer currently replies to
    pub fn reply_target(&self) -> Option<CommentId> {
        match self.state {
            ComposeState::ComposingReply(p) | ComposeState::Submitting(Target::Reply(p)) => Some(p),
            _ => None,
        }
    }

    pub fn open_root(&mut self) {
        if self.state == ComposeState::Idle {
            self.state = ComposeState::ComposingRoot;
        }
    }

    /// Opens the reply input for `parent`, or closes it if it is already open for
    /// `parent`. Returns whether the input is now open.
    pub fn toggle_reply(&mut self, parent: CommentId) -> bool {
        match self.state {
            ComposeState::Submitting(_) => return self.reply_target() == Some(parent),
            ComposeState::ComposingReply(p) if p == parent => {
                self.reset();
                return false;
            }
            ComposeState::ComposingReply(_) => {
                // switching target, the draft was written for another comment
                self.draft.clear();
                self.last_error = None;
            }
            ComposeState::Idle | ComposeState::ComposingRoot => (),
        }
        self.state = ComposeState::ComposingReply(parent);
        true
    }

    pub fn cancel(&mut self) {
        if !self.input_disabled() {
            self.reset();
        }
    }

    /// Replaces the draft, returns false if the input is not accepting text
    pub fn edit(&mut self, text: String) -> bool {
        match self.state {
            ComposeState::ComposingRoot | ComposeState::ComposingReply(_) => {
                self.draft = text;
                true
            }
            ComposeState::Idle | ComposeState::Submitting(_) => false,
        }
    }

    pub fn begin_submit<G: AuthGate + ?Sized>(
        &mut self,
        auth: &G,
        article: ArticleId,
    ) -> SubmitStep {
        let target = match self.state {
            ComposeState::ComposingRoot => Target::Root,
            ComposeState::ComposingReply(p) => Target::Reply(p),
            ComposeState::Idle | ComposeState::Submitting(_) => return SubmitStep::Ignored,
        };
        let user = match auth.current_user() {
            Some(user) => user,
            None => {
                auth.require_login();
                return SubmitStep::LoginRequired;
            }
        };
        let content = self.draft.trim();
        if content.is_empty() {
            return SubmitStep::Empty;
        }
        let reply_to = match target {
            Target::Root => None,
            Target::Reply(p) => Some(p),
        };
        let comment = NewComment::now(article, user.id, content.to_string(), reply_to);
        self.state = ComposeState::Submitting(target);
        self.last_error = None;
        SubmitStep::Submit(comment)
    }

    /// Reports the persistence result of the in-flight submission. On failure the
    /// draft is kept and the composer goes back to where it was.
    pub fn finish_submit(&mut self, result: Result<(), String>) {
        let target = match self.state {
            ComposeState::Submitting(target) => target,
            state => {
                tracing::warn!(?state, "submission finished while not submitting");
                return;
            }
        };
        match result {
            Ok(()) => self.reset(),
            Err(err) => {
                self.state = match target {
                    Target::Root => ComposeState::ComposingRoot,
                    Target::Reply(p) => ComposeState::ComposingReply(p),
                };
                self.last_error = Some(err);
            }
        }
    }

    fn reset(&mut self) {
        self.state = ComposeState::Idle;
        self.draft.clear();
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::api::{User, UserId, Uuid};

    struct Gate {
        user: Option<User>,
        login_prompts: Cell<usize>,
    }

    impl Gate {
        fn signed_in() -> Gate {
            Gate {
                user: Some(User {
                    id: UserId(Uuid::from_u128(7)),
                    full_name: String::from("Jane"),
                    avatar_url: None,
                }),
                login_prompts: Cell::new(0),
            }
        }

        fn anonymous() -> Gate {
            Gate {
                user: None,
                login_prompts: Cell::new(0),
            }
        }
    }

    impl AuthGate for Gate {
        fn current_user(&self) -> Option<User> {
            self.user.clone()
        }

        fn require_login(&self) {
            self.login_prompts.set(self.login_prompts.get() + 1);
        }
    }

    fn cid(n: u128) -> CommentId {
        CommentId(Uuid::from_u128(n))
    }

    #[test]
    fn reply_toggles() {
        let mut c = Composer::new();
        assert!(c.toggle_reply(cid(1)));
        assert_eq!(c.state(), ComposeState::ComposingReply(cid(1)));
        assert!(!c.toggle_reply(cid(1)));
        assert_eq!(c.state(), ComposeState::Idle);

        assert!(c.toggle_reply(cid(1)));
        assert!(c.edit(String::from("draft for 1")));
        assert!(c.toggle_reply(cid(2)));
        assert_eq!(c.state(), ComposeState::ComposingReply(cid(2)));
        assert_eq!(c.draft(), "");

        c.cancel();
        assert_eq!(c.state(), ComposeState::Idle);
        assert!(!c.edit(String::from("nowhere to write")));
    }

    #[test]
    fn submit_round_trip() {
        let gate = Gate::signed_in();
        let mut c = Composer::new();
        c.open_root();
        c.edit(String::from("  hello world \n"));
        let comment = match c.begin_submit(&gate, ArticleId::stub()) {
            SubmitStep::Submit(comment) => comment,
            step => panic!("unexpected step {step:?}"),
        };
        assert_eq!(comment.content, "hello world");
        assert_eq!(comment.author_id, UserId(Uuid::from_u128(7)));
        assert_eq!(comment.reply_to, None);
        assert_eq!(c.state(), ComposeState::Submitting(Target::Root));
        assert!(c.input_disabled());

        // no second submission, no editing
        assert_eq!(c.begin_submit(&gate, ArticleId::stub()), SubmitStep::Ignored);
        assert!(!c.edit(String::from("changed")));
        c.cancel();
        assert!(c.input_disabled());

        c.finish_submit(Ok(()));
        assert_eq!(c.state(), ComposeState::Idle);
        assert_eq!(c.draft(), "");
        assert_eq!(gate.login_prompts.get(), 0);
    }

    #[test]
    fn failed_submit_keeps_the_draft() {
        let gate = Gate::signed_in();
        let mut c = Composer::new();
        c.toggle_reply(cid(3));
        c.edit(String::from("a reply"));
        match c.begin_submit(&gate, ArticleId::stub()) {
            SubmitStep::Submit(comment) => assert_eq!(comment.reply_to, Some(cid(3))),
            step => panic!("unexpected step {step:?}"),
        }
        c.finish_submit(Err(String::from("server said no")));
        assert_eq!(c.state(), ComposeState::ComposingReply(cid(3)));
        assert_eq!(c.draft(), "a reply");
        assert_eq!(c.last_error(), Some("server said no"));
    }

    #[test]
    fn anonymous_submit_asks_for_login_once() {
        let gate = Gate::anonymous();
        let mut c = Composer::new();
        c.open_root();
        c.edit(String::from("hi"));
        assert_eq!(
            c.begin_submit(&gate, ArticleId::stub()),
            SubmitStep::LoginRequired
        );
        assert_eq!(gate.login_prompts.get(), 1);
        assert_eq!(c.state(), ComposeState::ComposingRoot);
        assert_eq!(c.draft(), "hi");
    }

    #[test]
    fn empty_content_is_not_submitted() {
        let gate = Gate::signed_in();
        let mut c = Composer::new();
        c.open_root();
        c.edit(String::from("   "));
        assert_eq!(c.begin_submit(&gate, ArticleId::stub()), SubmitStep::Empty);
        assert_eq!(c.state(), ComposeState::ComposingRoot);

        let mut idle = Composer::new();
        assert_eq!(
            idle.begin_submit(&gate, ArticleId::stub()),
            SubmitStep::Ignored
        );
    }
}
