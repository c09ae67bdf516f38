use std::collections::HashMap;

use futures::{stream, StreamExt};

use crate::api::{PostId, RemoteStore, StoreLayout, SubjectId, UserId};

/// Looks up whether `viewer` likes each of `subjects`, with at most `concurrency` lookups in flight
///
/// A failed lookup counts as "not liked".
pub async fn resolve<S>(
    store: &S,
    layout: &StoreLayout,
    post: PostId,
    viewer: UserId,
    subjects: Vec<SubjectId>,
    concurrency: usize,
) -> HashMap<SubjectId, bool>
where
    S: ?Sized + RemoteStore,
{
    tracing::trace!(%viewer, num_subjects = subjects.len(), "resolving like states");
    stream::iter(subjects)
        .map(|subject| async move {
            let path = layout.like(post, &subject, viewer);
            let liked = match store.get_record(&path).await {
                Ok(record) => record.is_some(),
                Err(err) => {
                    tracing::warn!(?err, %subject, "like lookup failed, assuming not liked");
                    false
                }
            };
            (subject, liked)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

/// What the viewer is known to like
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LikeStates(HashMap<SubjectId, bool>);

impl LikeStates {
    pub fn is_liked(&self, subject: &SubjectId) -> bool {
        self.0.get(subject).copied().unwrap_or(false)
    }

    pub fn is_known(&self, subject: &SubjectId) -> bool {
        self.0.contains_key(subject)
    }

    pub fn set(&mut self, subject: SubjectId, liked: bool) {
        self.0.insert(subject, liked);
    }

    /// Subjects among `subjects` that were never resolved
    pub fn unknown(&self, subjects: impl IntoIterator<Item = SubjectId>) -> Vec<SubjectId> {
        subjects
            .into_iter()
            .filter(|s| !self.is_known(s))
            .collect()
    }

    /// Merge lookup results, leaving entries for other subjects and for subjects `skip` selects untouched
    ///
    /// Returns whether anything changed.
    pub fn merge(
        &mut self,
        results: HashMap<SubjectId, bool>,
        skip: impl Fn(&SubjectId) -> bool,
    ) -> bool {
        let mut changed = false;
        for (subject, liked) in results {
            if skip(&subject) {
                continue;
            }
            changed |= self.0.insert(subject, liked) != Some(liked);
        }
        changed
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Forget the subjects `keep` rejects
    pub fn retain(&mut self, keep: impl Fn(&SubjectId) -> bool) {
        self.0.retain(|s, _| keep(s));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CommentId, Fields, ReplyId, Uuid};
    use threadline_mock_server::{FailOn, MockStore};

    fn comment(n: u128) -> SubjectId {
        SubjectId::Comment(CommentId(Uuid::from_u128(n)))
    }

    fn reply(c: u128, r: u128) -> SubjectId {
        SubjectId::Reply {
            comment: CommentId(Uuid::from_u128(c)),
            reply: ReplyId(Uuid::from_u128(r)),
        }
    }

    #[tokio::test]
    async fn lookups_resolve_presence() {
        let store = MockStore::new();
        let layout = StoreLayout::default();
        let post = PostId::stub();
        let viewer = UserId::stub();
        store.insert(layout.like(post, &comment(1), viewer), Fields::new());
        store.insert(layout.like(post, &reply(2, 3), viewer), Fields::new());
        // somebody else's like
        let other = UserId(Uuid::from_u128(42));
        store.insert(layout.like(post, &comment(2), other), Fields::new());

        let res = resolve(
            &store,
            &layout,
            post,
            viewer,
            vec![comment(1), comment(2), reply(2, 3), reply(2, 4)],
            2,
        )
        .await;
        assert_eq!(res.len(), 4);
        assert_eq!(res[&comment(1)], true);
        assert_eq!(res[&comment(2)], false);
        assert_eq!(res[&reply(2, 3)], true);
        assert_eq!(res[&reply(2, 4)], false);
    }

    #[tokio::test]
    async fn failed_lookup_is_never_liked() {
        let store = MockStore::new();
        let layout = StoreLayout::default();
        let post = PostId::stub();
        let viewer = UserId::stub();
        store.insert(layout.like(post, &comment(1), viewer), Fields::new());
        store.insert(layout.like(post, &comment(2), viewer), Fields::new());
        store.fail(FailOn::Read, layout.subject(post, &comment(1)));

        let res = resolve(&store, &layout, post, viewer, vec![comment(1), comment(2)], 16).await;
        assert_eq!(res[&comment(1)], false);
        assert_eq!(res[&comment(2)], true);
    }

    #[test]
    fn merge_keeps_other_knowledge() {
        let mut states = LikeStates::default();
        states.set(comment(1), true);
        states.set(comment(2), true);
        let results = [(comment(2), false), (comment(3), true), (comment(4), true)]
            .into_iter()
            .collect();
        assert!(states.merge(results, |s| *s == comment(4)));
        assert!(states.is_liked(&comment(1)));
        assert!(!states.is_liked(&comment(2)));
        assert!(states.is_liked(&comment(3)));
        assert!(!states.is_known(&comment(4)));
        assert_eq!(states.unknown([comment(1), comment(4), comment(5)]), vec![comment(4), comment(5)]);
        assert!(!states.merge([(comment(1), true)].into_iter().collect(), |_| false));

        states.retain(|s| *s != comment(3));
        assert!(!states.is_known(&comment(3)));
        assert_eq!(states.len(), 2);
    }
}
