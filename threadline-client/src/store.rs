use std::{collections::HashMap, sync::Arc};

use crate::api::{ArticleId, CommentId, CommentRecord};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Merge {
    Inserted,
    /// A record with this id is already there, eg. the echo of our own comment
    Duplicate,
    /// The record is not about the article currently displayed
    OtherArticle,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadOutcome {
    Applied { inserted: usize },
    /// The response was for an article that is no longer the active one
    Stale,
}

/// Flat comment records of the active article, keyed by id
#[derive(Clone, Debug, Default)]
pub struct CommentStore {
    article: Option<ArticleId>,
    comments: Arc<HashMap<CommentId, CommentRecord>>,

    /// Bumped on every change, lets views skip rebuilding the tree
    revision: u64,
}

impl CommentStore {
    pub fn new() -> CommentStore {
        CommentStore::default()
    }

    pub fn article(&self) -> Option<ArticleId> {
        self.article
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Drops everything and starts holding comments for `article`
    pub fn switch_to(&mut self, article: ArticleId) {
        self.article = Some(article);
        self.comments = Arc::new(HashMap::new());
        self.revision += 1;
    }

    /// Tears the store down, no article is active afterwards
    pub fn clear(&mut self) {
        self.article = None;
        self.comments = Arc::new(HashMap::new());
        self.revision += 1;
    }

    /// Merges the fetched history for `article`, unless the active article changed
    /// since the fetch was started
    pub fn load(&mut self, article: ArticleId, records: Vec<CommentRecord>) -> LoadOutcome {
        if self.article != Some(article) {
            tracing::debug!(?article, active = ?self.article, "ignoring stale comment fetch");
            return LoadOutcome::Stale;
        }
        let mut inserted = 0;
        for r in records {
            if self.merge(r) == Merge::Inserted {
                inserted += 1;
            }
        }
        LoadOutcome::Applied { inserted }
    }

    /// Adds `record` unless its id is already known. Idempotent and commutative,
    /// so every client converges to the same set whatever the delivery order.
    pub fn merge(&mut self, record: CommentRecord) -> Merge {
        if self.article != Some(record.article_id) {
            tracing::debug!(
                id = ?record.id,
                article = ?record.article_id,
                active = ?self.article,
                "dropping comment for another article"
            );
            return Merge::OtherArticle;
        }
        if self.comments.contains_key(&record.id) {
            return Merge::Duplicate;
        }
        Arc::make_mut(&mut self.comments).insert(record.id, record);
        self.revision += 1;
        Merge::Inserted
    }

    /// Removes a comment and all the replies to it, returning the removed ids
    pub fn remove(&mut self, id: CommentId) -> Vec<CommentId> {
        if !self.comments.contains_key(&id) {
            return Vec::new();
        }
        let comments = Arc::make_mut(&mut self.comments);
        let mut removed = vec![id];
        removed.extend(
            comments
                .values()
                .filter(|c| c.reply_to == Some(id))
                .map(|c| c.id),
        );
        for r in removed.iter() {
            comments.remove(r);
        }
        self.revision += 1;
        removed
    }

    pub fn get(&self, id: &CommentId) -> Option<&CommentRecord> {
        self.comments.get(id)
    }

    pub fn contains(&self, id: &CommentId) -> bool {
        self.comments.contains_key(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &CommentRecord> {
        self.comments.values()
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::TimeZone;

    use super::*;
    use crate::api::{UserId, Uuid};

    fn article(n: u128) -> ArticleId {
        ArticleId(Uuid::from_u128(n))
    }

    fn record(id: u128, article_id: ArticleId, reply_to: Option<u128>) -> CommentRecord {
        CommentRecord {
            id: CommentId(Uuid::from_u128(id)),
            article_id,
            author_id: UserId::stub(),
            content: format!("comment {id}"),
            created_at: chrono::Utc.timestamp_opt(id as i64, 0).unwrap(),
            reply_to: reply_to.map(|p| CommentId(Uuid::from_u128(p))),
        }
    }

    fn ids(store: &CommentStore) -> BTreeSet<CommentId> {
        store.records().map(|r| r.id).collect()
    }

    #[test]
    fn merge_is_idempotent() {
        let mut store = CommentStore::new();
        store.switch_to(article(1));
        assert_eq!(store.merge(record(1, article(1), None)), Merge::Inserted);
        let rev = store.revision();
        assert_eq!(store.merge(record(1, article(1), None)), Merge::Duplicate);
        assert_eq!(store.len(), 1);
        assert_eq!(store.revision(), rev);
    }

    #[test]
    fn merge_rejects_other_articles() {
        let mut store = CommentStore::new();
        assert_eq!(
            store.merge(record(1, article(1), None)),
            Merge::OtherArticle
        );
        store.switch_to(article(2));
        assert_eq!(
            store.merge(record(1, article(1), None)),
            Merge::OtherArticle
        );
        assert!(store.is_empty());
    }

    #[test]
    fn stale_load_is_ignored() {
        let mut store = CommentStore::new();
        store.switch_to(article(1));
        store.switch_to(article(2));
        assert_eq!(
            store.load(article(1), vec![record(1, article(1), None)]),
            LoadOutcome::Stale
        );
        assert!(store.is_empty());
        assert_eq!(
            store.load(
                article(2),
                vec![record(2, article(2), None), record(3, article(2), Some(2))]
            ),
            LoadOutcome::Applied { inserted: 2 }
        );
    }

    #[test]
    fn load_keeps_optimistic_records() {
        let mut store = CommentStore::new();
        store.switch_to(article(1));
        store.merge(record(5, article(1), None));
        store.load(
            article(1),
            vec![record(1, article(1), None), record(5, article(1), None)],
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn switching_clears() {
        let mut store = CommentStore::new();
        store.switch_to(article(1));
        store.merge(record(1, article(1), None));
        store.switch_to(article(2));
        assert!(store.is_empty());
        assert_eq!(store.article(), Some(article(2)));
        store.clear();
        assert_eq!(store.article(), None);
    }

    #[test]
    fn remove_cascades_to_replies() {
        let mut store = CommentStore::new();
        store.switch_to(article(1));
        for r in [
            record(1, article(1), None),
            record(2, article(1), Some(1)),
            record(3, article(1), Some(1)),
            record(4, article(1), None),
            record(5, article(1), Some(4)),
        ] {
            store.merge(r);
        }
        let mut removed = store.remove(CommentId(Uuid::from_u128(1)));
        removed.sort();
        assert_eq!(
            removed,
            vec![
                CommentId(Uuid::from_u128(1)),
                CommentId(Uuid::from_u128(2)),
                CommentId(Uuid::from_u128(3)),
            ]
        );
        assert_eq!(
            ids(&store),
            [4, 5]
                .into_iter()
                .map(|i| CommentId(Uuid::from_u128(i)))
                .collect()
        );
        assert!(store.remove(CommentId(Uuid::from_u128(1))).is_empty());
    }

    #[test]
    fn merge_converges_whatever_the_order() {
        bolero::check!()
            .with_type::<Vec<(u8, Option<u8>)>>()
            .for_each(|v| {
                let records = v
                    .iter()
                    .map(|(id, reply)| record(*id as u128, article(1), reply.map(|r| r as u128)))
                    .collect::<Vec<_>>();

                let mut once = CommentStore::new();
                once.switch_to(article(1));
                for r in records.iter() {
                    once.merge(r.clone());
                }

                // reversed, and every record delivered twice
                let mut twice = CommentStore::new();
                twice.switch_to(article(1));
                for r in records.iter().rev().chain(records.iter()) {
                    twice.merge(r.clone());
                }

                let expected = v
                    .iter()
                    .map(|(id, _)| CommentId(Uuid::from_u128(*id as u128)))
                    .collect::<BTreeSet<_>>();
                assert_eq!(ids(&once), expected);
                assert_eq!(ids(&twice), expected);
                assert_eq!(once.len(), expected.len());
                assert_eq!(twice.len(), expected.len());
            });
    }
}
