#![cfg(test)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use threadline_client::{
    api::{ArticleId, AuthToken, CommentId, CommentRecord, NewComment, NewUser, User, UserId, Uuid},
    AuthGate, CommentSection, ComposeState, ComposerKind, DeleteOutcome, LoadState, Merge,
    NoticeLevel, SubmitOutcome, Target,
};

use crate::{MockClient, MockServer};

#[derive(Clone)]
struct TestGate {
    user: Option<User>,
    login_prompts: Arc<AtomicUsize>,
}

impl AuthGate for TestGate {
    fn current_user(&self) -> Option<User> {
        self.user.clone()
    }

    fn require_login(&self) {
        self.login_prompts.fetch_add(1, Ordering::SeqCst);
    }
}

type Section = CommentSection<MockClient, TestGate, MockClient>;

struct Account {
    user: User,
    token: AuthToken,
}

fn article(n: u128) -> ArticleId {
    ArticleId(Uuid::from_u128(n))
}

fn create_account(server: &Arc<Mutex<MockServer>>, n: u128, name: &str) -> Account {
    let mut server = server.lock().unwrap();
    let id = UserId(Uuid::from_u128(n));
    server
        .admin_create_user(
            NewUser {
                id,
                name: name.to_string(),
                full_name: format!("{name} tester"),
                avatar_url: None,
                initial_password_hash: String::new(),
            },
            format!("{name}'s password"),
        )
        .unwrap();
    let token = server
        .auth(threadline_client::api::NewSession {
            user: name.to_string(),
            password: format!("{name}'s password"),
            device: String::from("test"),
        })
        .unwrap();
    Account {
        user: server.whoami(token).unwrap(),
        token,
    }
}

fn setup() -> (Arc<Mutex<MockServer>>, Account, Account) {
    let server = Arc::new(Mutex::new(MockServer::new()));
    let alice = create_account(&server, 1, "alice");
    let bob = create_account(&server, 2, "bob");
    (server, alice, bob)
}

fn section_for(server: &Arc<Mutex<MockServer>>, account: Option<&Account>) -> (Section, Arc<AtomicUsize>) {
    let client = MockClient::new(server.clone(), account.map(|a| a.token));
    let login_prompts = Arc::new(AtomicUsize::new(0));
    let gate = TestGate {
        user: account.map(|a| a.user.clone()),
        login_prompts: login_prompts.clone(),
    };
    (CommentSection::new(client.clone(), gate, client), login_prompts)
}

fn signed_in(server: &Arc<Mutex<MockServer>>, account: &Account) -> Section {
    section_for(server, Some(account)).0
}

/// Stores a comment directly on the server, as if posted from elsewhere
fn stored(
    server: &Arc<Mutex<MockServer>>,
    account: &Account,
    article: ArticleId,
    content: &str,
    reply_to: Option<CommentId>,
) -> CommentRecord {
    server
        .lock()
        .unwrap()
        .create_comment(
            account.token,
            NewComment::now(article, account.user.id, content.to_string(), reply_to),
        )
        .unwrap()
}

fn copies(section: &Section, id: CommentId) -> usize {
    section.store().records().filter(|r| r.id == id).count()
}

async fn post(section: &mut Section, kind: ComposerKind, content: &str) -> CommentRecord {
    if kind == ComposerKind::Reply {
        assert_ne!(
            section.composer(kind).state(),
            ComposeState::Idle,
            "reply input must be opened first"
        );
    }
    assert!(section.edit(kind, content.to_string()));
    match section.submit(kind).await {
        SubmitOutcome::Posted(record) => record,
        outcome => panic!("unexpected submit outcome {outcome:?}"),
    }
}

#[tokio::test]
async fn comments_converge_across_clients() {
    let (server, alice, bob) = setup();
    let mut a = signed_in(&server, &alice);
    let mut b = signed_in(&server, &bob);
    a.open(article(1)).await;
    b.open(article(1)).await;
    assert!(a.is_live());
    assert!(b.is_live());

    let x = post(&mut a, ComposerKind::Root, "x").await;
    assert_eq!(copies(&a, x.id), 1);

    // the echo of our own comment changes nothing
    assert_eq!(a.poll_live(), 0);
    assert_eq!(copies(&a, x.id), 1);

    assert_eq!(b.poll_live(), 1);
    assert_eq!(copies(&b, x.id), 1);

    // neither does a duplicate push
    server.lock().unwrap().push(article(1), x.clone());
    assert_eq!(b.poll_live(), 0);
    assert_eq!(copies(&b, x.id), 1);

    assert_eq!(a.tree().roots, b.tree().roots);
}

#[tokio::test]
async fn pushes_can_be_awaited() {
    let (server, alice, bob) = setup();
    let mut a = signed_in(&server, &alice);
    let mut b = signed_in(&server, &bob);
    a.open(article(1)).await;
    b.open(article(1)).await;

    let x = post(&mut a, ComposerKind::Root, "hello bob").await;
    assert_eq!(b.next_live().await, Some(Merge::Inserted));
    assert!(b.store().contains(&x.id));
}

#[tokio::test]
async fn anonymous_submit_never_reaches_the_server() {
    let (server, _alice, _bob) = setup();
    let (mut anon, login_prompts) = section_for(&server, None);
    anon.open(article(1)).await;
    assert!(anon.login_required());

    assert!(anon.edit(ComposerKind::Root, String::from("hello")));
    assert_eq!(
        anon.submit(ComposerKind::Root).await,
        SubmitOutcome::LoginRequired
    );
    assert_eq!(login_prompts.load(Ordering::SeqCst), 1);
    assert_eq!(server.lock().unwrap().test_create_calls(), 0);
    assert_eq!(
        anon.composer(ComposerKind::Root).state(),
        ComposeState::ComposingRoot
    );
    assert_eq!(anon.composer(ComposerKind::Root).draft(), "hello");
    assert!(anon
        .take_notices()
        .iter()
        .any(|n| n.level == NoticeLevel::Info));
    assert!(anon.store().is_empty());
}

#[tokio::test]
async fn switching_article_leaves_the_old_room() {
    let (server, alice, bob) = setup();
    let mut a = signed_in(&server, &alice);
    let mut b = signed_in(&server, &bob);
    a.open(article(1)).await;
    b.open(article(1)).await;
    assert_eq!(server.lock().unwrap().test_room_size(article(1)), 2);

    a.open(article(2)).await;
    assert_eq!(server.lock().unwrap().test_room_size(article(1)), 1);
    assert_eq!(server.lock().unwrap().test_room_size(article(2)), 1);

    let late = post(&mut b, ComposerKind::Root, "for article 1 only").await;
    server.lock().unwrap().push(article(1), late.clone());
    assert_eq!(a.poll_live(), 0);
    assert_eq!(a.handle_push(article(1), late.clone()), Merge::OtherArticle);
    // even when pushed on the right room, a record of another article is dropped
    assert_eq!(a.handle_push(article(2), late.clone()), Merge::OtherArticle);
    assert!(a.store().is_empty());
    assert!(a.tree().find(&late.id).is_none());
}

#[tokio::test]
async fn stale_fetch_is_ignored() {
    let (server, alice, bob) = setup();
    stored(&server, &bob, article(1), "old news", None);
    let mut a = signed_in(&server, &alice);

    a.switch_article(article(1));
    let fetched = a.fetch(article(1)).await;
    a.switch_article(article(2));
    assert!(!a.apply_fetch(fetched));
    assert!(a.store().is_empty());
    assert_eq!(a.state(), &LoadState::Loading);

    let fetched = a.fetch(article(2)).await;
    assert!(a.apply_fetch(fetched));
    assert_eq!(a.state(), &LoadState::Ready);
}

#[tokio::test]
async fn failed_submit_keeps_the_draft() {
    let (server, alice, bob) = setup();
    let mut a = signed_in(&server, &alice);
    let mut b = signed_in(&server, &bob);
    a.open(article(1)).await;
    b.open(article(1)).await;
    a.take_notices();

    server.lock().unwrap().fail_next_creates = 1;
    assert!(a.edit(ComposerKind::Root, String::from("second try")));
    assert!(matches!(
        a.submit(ComposerKind::Root).await,
        SubmitOutcome::Failed(_)
    ));
    let composer = a.composer(ComposerKind::Root);
    assert_eq!(composer.state(), ComposeState::ComposingRoot);
    assert_eq!(composer.draft(), "second try");
    assert!(composer.last_error().is_some());
    assert!(a.store().is_empty());
    assert_eq!(b.poll_live(), 0);
    assert!(a
        .take_notices()
        .iter()
        .any(|n| n.level == NoticeLevel::Error));

    // the draft is still there to retry
    assert!(matches!(
        a.submit(ComposerKind::Root).await,
        SubmitOutcome::Posted(_)
    ));
    assert_eq!(a.store().len(), 1);
    assert_eq!(b.poll_live(), 1);
}

#[tokio::test]
async fn works_without_live_updates() {
    let (server, alice, bob) = setup();
    stored(&server, &bob, article(1), "before", None);
    server.lock().unwrap().refuse_joins = true;

    let mut a = signed_in(&server, &alice);
    a.open(article(1)).await;
    assert!(!a.is_live());
    assert_eq!(a.state(), &LoadState::Ready);
    assert_eq!(a.store().len(), 1);

    post(&mut a, ComposerKind::Root, "after").await;
    assert_eq!(a.store().len(), 2);
    assert_eq!(a.poll_live(), 0);
    assert_eq!(a.next_live().await, None);
}

#[tokio::test]
async fn failed_fetch_shows_nothing() {
    let (server, alice, bob) = setup();
    stored(&server, &bob, article(1), "hidden", None);
    server.lock().unwrap().fail_next_fetches = 1;

    let mut a = signed_in(&server, &alice);
    a.open(article(1)).await;
    assert!(matches!(a.state(), LoadState::Failed(_)));
    let empty = a.tree();
    assert!(empty.is_empty());
    assert!(Arc::ptr_eq(&empty, &a.tree()));
    assert!(a
        .take_notices()
        .iter()
        .any(|n| n.level == NoticeLevel::Error));

    a.open(article(1)).await;
    assert_eq!(a.state(), &LoadState::Ready);
    assert_eq!(a.tree().total_count(), 1);
}

#[tokio::test]
async fn root_and_reply_composers_run_concurrently() {
    let (server, alice, bob) = setup();
    let root = stored(&server, &bob, article(1), "root", None);
    let mut a = signed_in(&server, &alice);
    a.open(article(1)).await;

    assert!(a.toggle_reply(root.id));
    assert!(a.edit(ComposerKind::Reply, String::from("a reply")));
    assert!(a.edit(ComposerKind::Root, String::from("a new root")));

    let new_root = a.begin_submit(ComposerKind::Root).unwrap();
    let reply = a.begin_submit(ComposerKind::Reply).unwrap();
    assert!(a.composer(ComposerKind::Root).input_disabled());
    assert!(a.composer(ComposerKind::Reply).input_disabled());
    assert_eq!(
        a.begin_submit(ComposerKind::Root),
        Err(SubmitOutcome::Ignored)
    );

    let (root_res, reply_res) = futures::join!(a.persist(&new_root), a.persist(&reply));
    assert!(matches!(
        a.complete_submit(reply, reply_res).await,
        SubmitOutcome::Posted(_)
    ));
    assert!(matches!(
        a.complete_submit(new_root, root_res).await,
        SubmitOutcome::Posted(_)
    ));

    let tree = a.tree();
    assert_eq!(tree.roots.len(), 2);
    assert_eq!(tree.roots[0].comment.record.content, "a new root");
    assert_eq!(tree.find(&root.id).unwrap().replies.len(), 1);
    assert_eq!(a.composer(ComposerKind::Reply).state(), ComposeState::Idle);
}

#[tokio::test]
async fn replies_target_root_comments_only() {
    let (server, alice, bob) = setup();
    let root = stored(&server, &bob, article(1), "root", None);
    let reply = stored(&server, &bob, article(1), "reply", Some(root.id));
    let mut a = signed_in(&server, &alice);
    a.open(article(1)).await;

    assert!(!a.toggle_reply(reply.id));
    assert!(!a.toggle_reply(CommentId(Uuid::from_u128(404))));
    assert!(a.toggle_reply(root.id));
    assert!(a
        .take_notices()
        .iter()
        .any(|n| n.message == "Replying to bob tester"));
    assert!(!a.toggle_reply(root.id));
    assert_eq!(a.composer(ComposerKind::Reply).state(), ComposeState::Idle);
}

#[tokio::test]
async fn delete_removes_replies_too() {
    let (server, alice, bob) = setup();
    let root = stored(&server, &bob, article(1), "root", None);
    stored(&server, &alice, article(1), "reply", Some(root.id));
    let other = stored(&server, &alice, article(1), "other", None);

    let mut a = signed_in(&server, &alice);
    let mut b = signed_in(&server, &bob);
    a.open(article(1)).await;
    b.open(article(1)).await;

    assert_eq!(a.delete(root.id).await, DeleteOutcome::NotAuthor);
    assert_eq!(
        a.delete(CommentId(Uuid::from_u128(404))).await,
        DeleteOutcome::NotFound
    );

    assert!(b.toggle_reply(root.id));
    assert_eq!(b.delete(root.id).await, DeleteOutcome::Deleted(2));
    assert_eq!(b.store().len(), 1);
    assert!(b.store().contains(&other.id));
    assert_eq!(b.composer(ComposerKind::Reply).state(), ComposeState::Idle);
    assert_eq!(server.lock().unwrap().test_comments(article(1)), vec![other]);

    let (mut anon, login_prompts) = section_for(&server, None);
    anon.open(article(1)).await;
    assert_eq!(
        anon.delete(CommentId(Uuid::from_u128(404))).await,
        DeleteOutcome::LoginRequired
    );
    assert_eq!(login_prompts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn tree_is_rebuilt_only_on_change() {
    let (server, alice, bob) = setup();
    stored(&server, &bob, article(1), "first", None);
    let mut a = signed_in(&server, &alice);
    let mut b = signed_in(&server, &bob);
    a.open(article(1)).await;
    b.open(article(1)).await;

    let first = a.tree();
    assert!(Arc::ptr_eq(&first, &a.tree()));

    let x = post(&mut b, ComposerKind::Root, "second").await;
    assert!(Arc::ptr_eq(&first, &a.tree()));
    assert_eq!(a.poll_live(), 1);
    let second = a.tree();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.roots[0].id(), x.id);
    assert_eq!(second.roots[0].comment.author_name, "bob tester");
}

#[tokio::test]
async fn close_tears_down() {
    let (server, alice, _bob) = setup();
    let mut a = signed_in(&server, &alice);
    a.open(article(1)).await;
    post(&mut a, ComposerKind::Root, "bye").await;
    a.close();
    assert_eq!(a.article(), None);
    assert_eq!(a.state(), &LoadState::Idle);
    assert!(a.store().is_empty());
    assert!(!a.is_live());
    assert_eq!(server.lock().unwrap().test_room_size(article(1)), 0);
    assert_eq!(a.submit(ComposerKind::Root).await, SubmitOutcome::Ignored);
}

#[tokio::test]
async fn late_success_leaves_the_new_composer_alone() {
    let (server, alice, bob) = setup();
    let mut a = signed_in(&server, &alice);
    let mut b = signed_in(&server, &bob);
    a.open(article(1)).await;
    b.open(article(1)).await;

    assert!(a.edit(ComposerKind::Root, String::from("first")));
    let old = a.begin_submit(ComposerKind::Root).unwrap();
    let old_res = a.persist(&old).await;

    // back and forth while the first submission is in flight
    a.open(article(2)).await;
    a.open(article(1)).await;
    assert!(a.edit(ComposerKind::Root, String::from("second")));
    let new = a.begin_submit(ComposerKind::Root).unwrap();
    a.take_notices();

    let first = match a.complete_submit(old, old_res).await {
        SubmitOutcome::Posted(record) => record,
        outcome => panic!("unexpected submit outcome {outcome:?}"),
    };
    let composer = a.composer(ComposerKind::Root);
    assert_eq!(composer.state(), ComposeState::Submitting(Target::Root));
    assert!(composer.input_disabled());
    assert_eq!(composer.draft(), "second");
    assert_eq!(a.begin_submit(ComposerKind::Root), Err(SubmitOutcome::Ignored));
    assert!(a.take_notices().is_empty());
    assert_eq!(copies(&a, first.id), 1);
    assert_eq!(b.poll_live(), 1);

    let new_res = a.persist(&new).await;
    assert!(matches!(
        a.complete_submit(new, new_res).await,
        SubmitOutcome::Posted(_)
    ));
    assert_eq!(a.composer(ComposerKind::Root).state(), ComposeState::Idle);
    assert_eq!(a.store().len(), 2);
    assert_eq!(server.lock().unwrap().test_create_calls(), 2);
}

#[tokio::test]
async fn late_failure_leaves_the_new_composer_alone() {
    let (server, alice, _bob) = setup();
    let mut a = signed_in(&server, &alice);
    a.open(article(1)).await;

    server.lock().unwrap().fail_next_creates = 1;
    assert!(a.edit(ComposerKind::Root, String::from("first")));
    let old = a.begin_submit(ComposerKind::Root).unwrap();
    let old_res = a.persist(&old).await;
    assert!(old_res.is_err());

    a.open(article(2)).await;
    a.open(article(1)).await;
    assert!(a.edit(ComposerKind::Root, String::from("second")));
    let new = a.begin_submit(ComposerKind::Root).unwrap();
    a.take_notices();

    assert!(matches!(
        a.complete_submit(old, old_res).await,
        SubmitOutcome::Failed(_)
    ));
    let composer = a.composer(ComposerKind::Root);
    assert_eq!(composer.state(), ComposeState::Submitting(Target::Root));
    assert!(composer.last_error().is_none());
    assert!(!a.edit(ComposerKind::Root, String::from("overwritten")));
    assert!(a.take_notices().is_empty());

    let new_res = a.persist(&new).await;
    match a.complete_submit(new, new_res).await {
        SubmitOutcome::Posted(record) => assert_eq!(record.content, "second"),
        outcome => panic!("unexpected submit outcome {outcome:?}"),
    }
    assert_eq!(a.store().len(), 1);
}

#[tokio::test]
async fn completion_after_leaving_does_not_leak_into_the_new_article() {
    let (server, alice, _bob) = setup();
    let mut a = signed_in(&server, &alice);
    a.open(article(1)).await;

    assert!(a.edit(ComposerKind::Root, String::from("for article 1")));
    let old = a.begin_submit(ComposerKind::Root).unwrap();
    let old_res = a.persist(&old).await;
    a.open(article(2)).await;
    assert!(a.edit(ComposerKind::Root, String::from("draft for article 2")));

    assert!(matches!(
        a.complete_submit(old, old_res).await,
        SubmitOutcome::Posted(_)
    ));
    assert!(a.store().is_empty());
    let composer = a.composer(ComposerKind::Root);
    assert_eq!(composer.state(), ComposeState::ComposingRoot);
    assert_eq!(composer.draft(), "draft for article 2");
    assert_eq!(server.lock().unwrap().test_comments(article(1)).len(), 1);
}
