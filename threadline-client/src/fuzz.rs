#![cfg(test)]

use std::{
    collections::{HashMap, HashSet},
    panic::AssertUnwindSafe,
    sync::Arc,
};

use threadline_mock_server::MockStore;

use crate::{
    api::{PostId, ReplyId, StoreLayout, SubjectId},
    forest::{
        tests::{reply, rid},
        Forest,
    },
    mutation::{OptimisticPatch, PendingToggles},
    subscriptions::{
        tests::{cid, RecordingSink},
        SubscriptionManager,
    },
};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            init_tracing();
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

fn init_tracing() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt::try_init();
    }
}

#[test]
fn forest_matches_parent_pointers() {
    init_tracing();
    bolero::check!()
        .with_type::<Vec<(u8, Option<u8>, u8)>>()
        .for_each(|records| {
            let mut seen = HashSet::new();
            let replies = records
                .iter()
                .filter(|(id, _, _)| seen.insert(*id))
                .map(|(id, parent, t)| reply(u128::from(*id), parent.map(u128::from), i64::from(*t)))
                .collect::<Vec<_>>();
            let ids = replies.iter().map(|r| r.id).collect::<HashSet<_>>();
            let forest = Forest::build(replies.clone());

            let mut expected_roots = replies.iter().filter(|r| r.is_root()).collect::<Vec<_>>();
            expected_roots.sort_by_key(|r| r.created_at);
            assert_eq!(
                forest.roots.iter().map(|r| r.id).collect::<Vec<_>>(),
                expected_roots.iter().map(|r| r.id).collect::<Vec<_>>(),
            );

            let mut placements = HashMap::<ReplyId, usize>::new();
            for (parent, children) in &forest.children_by_parent {
                assert!(ids.contains(parent), "children listed under a missing parent");
                assert!(children.windows(2).all(|w| w[0].created_at <= w[1].created_at));
                for c in children {
                    assert_eq!(c.parent_reply_id, Some(*parent));
                    *placements.entry(c.id).or_default() += 1;
                }
            }
            let parents = replies
                .iter()
                .map(|r| (r.id, r.parent_reply_id))
                .collect::<HashMap<_, _>>();
            let reaches_root = |mut id: ReplyId| {
                for _ in 0..=replies.len() {
                    match parents.get(&id) {
                        Some(None) => return true,
                        Some(Some(p)) => id = *p,
                        None => return false,
                    }
                }
                false
            };
            for r in &replies {
                match (r.parent_reply_id, reaches_root(r.id)) {
                    (None, _) => assert!(!placements.contains_key(&r.id)),
                    (Some(_), true) => assert_eq!(placements.get(&r.id), Some(&1)),
                    (Some(_), false) => {
                        assert!(!placements.contains_key(&r.id));
                        assert!(forest.get(&r.id).is_none());
                    }
                }
            }
            assert_eq!(forest.len(), forest.depth_first().count());
        });
}

/// Interleavings of toggles and of their outcomes, on a single subject
///
/// Each step either toggles (`true`), or resolves the `pick`-th unresolved
/// toggle, successfully or not.
#[test]
fn displayed_like_follows_latest_surviving_toggle() {
    init_tracing();
    bolero::check!()
        .with_type::<Vec<(bool, u8, bool)>>()
        .for_each(|steps| {
            let subject = SubjectId::Reply {
                comment: cid(1),
                reply: rid(1),
            };
            let original = OptimisticPatch {
                liked: false,
                likes_count: 1,
            };
            let mut displayed = original;
            let mut pending = PendingToggles::default();
            let mut unresolved = Vec::new();
            // after-value of every toggle that did not fail, by sequence number
            let mut surviving = Vec::<(u64, OptimisticPatch)>::new();

            for (toggle, pick, success) in steps {
                if *toggle || unresolved.is_empty() {
                    let seq = pending.begin(subject, displayed);
                    displayed = displayed.toggled();
                    unresolved.push(seq);
                    surviving.push((seq, displayed));
                    continue;
                }
                let seq = unresolved.remove(usize::from(*pick) % unresolved.len());
                if *success {
                    pending.succeeded(&subject, seq);
                } else {
                    if let Some(patch) = pending.failed(&subject, seq) {
                        displayed = patch;
                    }
                    surviving.retain(|(s, _)| *s != seq);
                }
                let expected = surviving
                    .iter()
                    .max_by_key(|(s, _)| *s)
                    .map_or(original, |(_, after)| *after);
                assert_eq!(displayed, expected);
            }
            assert_eq!(pending.is_pending(&subject), !unresolved.is_empty());
        });
}

async fn reconcile_tracks_comment_set(sets: Vec<Vec<u8>>) {
    let store = Arc::new(MockStore::new());
    let sink = Arc::new(RecordingSink::default());
    let mgr = SubscriptionManager::new(store.clone(), StoreLayout::default(), PostId::stub(), sink);
    let mut previous = HashSet::new();
    for set in sets {
        let comments = set.iter().map(|c| cid(u128::from(*c))).collect::<Vec<_>>();
        let current = comments.iter().copied().collect::<HashSet<_>>();
        let cancelled_before = store.cancelled_feeds();

        mgr.reconcile(&comments).await;

        assert_eq!(mgr.active_count(), current.len());
        assert_eq!(store.total_active_feeds(), current.len());
        assert_eq!(
            store.cancelled_feeds() - cancelled_before,
            previous.difference(&current).count()
        );
        previous = current;
    }
    mgr.teardown();
    assert_eq!(store.total_active_feeds(), 0);
}

do_tokio_test!(
    reconcile_keeps_one_subscription_per_comment,
    Vec<Vec<u8>>,
    reconcile_tracks_comment_set
);
