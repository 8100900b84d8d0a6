use std::{cmp::Reverse, collections::HashMap};

use crate::{
    api::{CommentId, CommentRecord},
    UserDirectory, DEFAULT_AVATAR,
};

/// A record along with the display fields of its author
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DenormalizedComment {
    pub record: CommentRecord,
    pub author_name: String,
    pub author_avatar: Option<String>,
}

impl DenormalizedComment {
    pub fn new(record: CommentRecord, directory: &UserDirectory) -> DenormalizedComment {
        DenormalizedComment {
            author_name: directory.display_name(&record.author_id).to_string(),
            author_avatar: directory.avatar(&record.author_id).map(String::from),
            record,
        }
    }

    pub fn avatar_or_default(&self) -> &str {
        self.author_avatar.as_deref().unwrap_or(DEFAULT_AVATAR)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentNode {
    pub comment: DenormalizedComment,

    /// Direct replies, oldest first. Always empty for a reply.
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    pub fn id(&self) -> CommentId {
        self.comment.record.id
    }
}

/// Records left out of the tree
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Diagnostic {
    /// The parent is not in the record set
    OrphanReply { id: CommentId, reply_to: CommentId },

    /// The parent is itself a reply, and the tree is only two levels deep
    NestedReply { id: CommentId, reply_to: CommentId },
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Tree {
    /// Root comments, newest first
    pub roots: Vec<CommentNode>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Tree {
    /// Number of displayed comments, replies included
    pub fn total_count(&self) -> usize {
        self.roots.len() + self.roots.iter().map(|r| r.replies.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn orphans(&self) -> impl Iterator<Item = CommentId> + '_ {
        self.diagnostics.iter().filter_map(|d| match d {
            Diagnostic::OrphanReply { id, .. } => Some(*id),
            Diagnostic::NestedReply { .. } => None,
        })
    }

    pub fn find(&self, id: &CommentId) -> Option<&CommentNode> {
        self.roots
            .iter()
            .flat_map(|r| std::iter::once(r).chain(r.replies.iter()))
            .find(|n| n.id() == *id)
    }
}

/// Builds the two-level reply tree of a flat record set.
///
/// Roots are sorted newest first and replies oldest first, ties being broken by
/// id, so the same records always give the same tree whatever their order.
/// Replies that cannot be attached to a root are reported in `diagnostics`.
pub fn build_tree<'a, I>(records: I, directory: &UserDirectory) -> Tree
where
    I: IntoIterator<Item = &'a CommentRecord>,
{
    let (mut roots, mut replies): (Vec<&CommentRecord>, Vec<&CommentRecord>) =
        records.into_iter().partition(|r| r.is_root());
    roots.sort_unstable_by_key(|r| (Reverse(r.created_at), r.id));
    replies.sort_unstable_by_key(|r| (r.created_at, r.id));

    let mut nodes = roots
        .iter()
        .map(|r| CommentNode {
            comment: DenormalizedComment::new((*r).clone(), directory),
            replies: Vec::new(),
        })
        .collect::<Vec<_>>();
    let root_idx = roots
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id, i))
        .collect::<HashMap<_, _>>();

    let mut diagnostics = Vec::new();
    for r in replies.iter() {
        // partition guarantees reply_to is set
        let Some(parent) = r.reply_to else { continue };
        match root_idx.get(&parent) {
            Some(&i) => nodes[i].replies.push(CommentNode {
                comment: DenormalizedComment::new((*r).clone(), directory),
                replies: Vec::new(),
            }),
            None if replies.iter().any(|p| p.id == parent) => {
                tracing::warn!(id = ?r.id, ?parent, "reply to a reply left out of the tree");
                diagnostics.push(Diagnostic::NestedReply {
                    id: r.id,
                    reply_to: parent,
                });
            }
            None => {
                tracing::warn!(id = ?r.id, ?parent, "orphan reply left out of the tree");
                diagnostics.push(Diagnostic::OrphanReply {
                    id: r.id,
                    reply_to: parent,
                });
            }
        }
    }

    Tree {
        roots: nodes,
        diagnostics,
    }
}
