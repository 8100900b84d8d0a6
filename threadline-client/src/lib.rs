mod auth;
pub use auth::{AuthGate, StaticAuth};

mod bridge;
pub use bridge::{RoomSubscription, RoomTransport, SyncBridge};

mod compose;
pub use compose::{ComposeState, Composer, ComposerKind, SubmitStep, Target};

mod directory;
pub use directory::{initials, UserDirectory, ANONYMOUS_NAME, DEFAULT_AVATAR};

mod remote;
pub use remote::CommentApi;

mod section;
pub use section::{
    CommentSection, DeleteOutcome, Fetched, LoadState, Notice, NoticeLevel, PendingSubmit,
    SubmitOutcome,
};

mod store;
pub use store::{CommentStore, LoadOutcome, Merge};

mod tree;
pub use tree::{build_tree, CommentNode, DenormalizedComment, Diagnostic, Tree};

pub mod api {
    pub use threadline_api::*;
}
