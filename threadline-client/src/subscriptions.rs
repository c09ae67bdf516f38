use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use futures::future;
use parking_lot::Mutex;

use crate::api::{
    CommentId, Document, PostId, RemoteStore, SnapshotCallback, StoreLayout, Subscription,
};

/// Receiver of the reply snapshots of the comments a [`SubscriptionManager`] follows
pub trait ReplySink: 'static + Send + Sync {
    /// Full current set of replies of `comment`
    fn replies_pushed(&self, comment: CommentId, replies: Vec<Document>);

    /// `comment` is no longer followed, anything derived from its replies should go
    fn replies_discarded(&self, comment: CommentId);
}

/// Keeps exactly one reply subscription open per followed comment
pub struct SubscriptionManager<S> {
    store: Arc<S>,
    layout: StoreLayout,
    post: PostId,
    sink: Arc<dyn ReplySink>,
    registry: Arc<Mutex<Registry>>,
}

#[derive(Default)]
struct Registry {
    slots: HashMap<CommentId, Slot>,
    next_generation: u64,
    torn_down: bool,
}

struct Slot {
    // distinguishes successive subscriptions for the same comment
    generation: u64,
    state: SlotState,
}

enum SlotState {
    Opening,
    /// Holding the handle keeps the feed alive, dropping it cancels
    Open { _subscription: Subscription },
    Failed,
}

impl Registry {
    /// Whether pushes from subscription `generation` of `comment` should still be relayed
    fn is_live(&self, comment: &CommentId, generation: u64) -> bool {
        match self.slots.get(comment) {
            Some(s) => s.generation == generation && !matches!(s.state, SlotState::Failed),
            None => false,
        }
    }
}

impl<S: RemoteStore> SubscriptionManager<S> {
    pub fn new(
        store: Arc<S>,
        layout: StoreLayout,
        post: PostId,
        sink: Arc<dyn ReplySink>,
    ) -> SubscriptionManager<S> {
        SubscriptionManager {
            store,
            layout,
            post,
            sink,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Follow exactly `comments`
    ///
    /// Subscriptions of comments that are no longer listed get cancelled, and
    /// ones for newly listed comments (or ones that failed to open earlier)
    /// get opened concurrently. Subscriptions already open are left alone.
    pub async fn reconcile(&self, comments: &[CommentId]) {
        let wanted = comments.iter().copied().collect::<HashSet<_>>();
        let (removed, to_open) = {
            let mut reg = self.registry.lock();
            if reg.torn_down {
                tracing::debug!("ignoring reconciliation of torn down subscriptions");
                return;
            }
            let removed = reg
                .slots
                .keys()
                .filter(|c| !wanted.contains(c))
                .copied()
                .collect::<Vec<_>>();
            let removed = removed
                .into_iter()
                .filter_map(|c| reg.slots.remove(&c).map(|slot| (c, slot)))
                .collect::<Vec<_>>();
            let mut to_open = Vec::new();
            for c in comments {
                match reg.slots.get(c) {
                    Some(Slot {
                        state: SlotState::Failed,
                        ..
                    })
                    | None => (),
                    Some(_) => continue,
                }
                let generation = reg.next_generation;
                reg.next_generation += 1;
                reg.slots.insert(
                    *c,
                    Slot {
                        generation,
                        state: SlotState::Opening,
                    },
                );
                to_open.push((*c, generation));
            }
            (removed, to_open)
        };

        tracing::debug!(
            num_removed = removed.len(),
            num_opening = to_open.len(),
            "reconciling reply subscriptions"
        );
        for (comment, slot) in removed {
            // dropping an open subscription cancels it
            drop(slot);
            self.sink.replies_discarded(comment);
            tracing::debug!(%comment, "closed reply subscription");
        }
        future::join_all(to_open.into_iter().map(|(c, g)| self.open(c, g))).await;
    }

    async fn open(&self, comment: CommentId, generation: u64) {
        let collection = self.layout.replies_of(self.post, comment);
        let on_records: SnapshotCallback = {
            let registry = Arc::downgrade(&self.registry);
            let sink = self.sink.clone();
            Box::new(move |replies: Vec<Document>| {
                let live = registry
                    .upgrade()
                    .map(|r| r.lock().is_live(&comment, generation))
                    .unwrap_or(false);
                if !live {
                    tracing::trace!(%comment, generation, "ignoring push from stale reply subscription");
                    return;
                }
                tracing::trace!(%comment, num_replies = replies.len(), "received reply snapshot");
                sink.replies_pushed(comment, replies);
            })
        };
        let res = self.store.subscribe(&collection, on_records).await;

        let mut reg = self.registry.lock();
        let live = reg.is_live(&comment, generation);
        match res {
            Ok(sub) if live => {
                if let Some(slot) = reg.slots.get_mut(&comment) {
                    slot.state = SlotState::Open { _subscription: sub };
                }
                tracing::debug!(%comment, "opened reply subscription");
            }
            Ok(sub) => {
                drop(reg);
                sub.cancel();
                tracing::debug!(%comment, "cancelled reply subscription that opened after it was dropped");
            }
            Err(err) => {
                tracing::warn!(?err, %comment, "failed opening reply subscription");
                if live {
                    if let Some(slot) = reg.slots.get_mut(&comment) {
                        slot.state = SlotState::Failed;
                    }
                    drop(reg);
                    self.sink.replies_discarded(comment);
                }
            }
        }
    }

    /// Cancel every subscription, including ones still opening, and refuse new ones
    pub fn teardown(&self) {
        let slots = {
            let mut reg = self.registry.lock();
            reg.torn_down = true;
            std::mem::take(&mut reg.slots)
        };
        if slots.is_empty() {
            return;
        }
        tracing::debug!(num_subscriptions = slots.len(), "tearing down reply subscriptions");
        for (comment, slot) in slots {
            drop(slot);
            self.sink.replies_discarded(comment);
        }
    }

    /// Number of subscriptions currently open
    pub fn active_count(&self) -> usize {
        self.registry
            .lock()
            .slots
            .values()
            .filter(|s| matches!(s.state, SlotState::Open { .. }))
            .count()
    }

    pub fn is_subscribed(&self, comment: &CommentId) -> bool {
        matches!(
            self.registry.lock().slots.get(comment),
            Some(Slot {
                state: SlotState::Open { .. },
                ..
            })
        )
    }
}

impl<S> Drop for SubscriptionManager<S> {
    fn drop(&mut self) {
        let slots = {
            let mut reg = self.registry.lock();
            reg.torn_down = true;
            std::mem::take(&mut reg.slots)
        };
        // subscriptions cancel on drop
        drop(slots);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::{Error, Fields, Uuid};
    use async_trait::async_trait;
    use futures::channel::oneshot;
    use threadline_mock_server::{FailOn, MockStore};

    #[derive(Default)]
    pub struct RecordingSink {
        pub pushes: Mutex<Vec<(CommentId, usize)>>,
        pub discarded: Mutex<Vec<CommentId>>,
    }

    impl ReplySink for RecordingSink {
        fn replies_pushed(&self, comment: CommentId, replies: Vec<Document>) {
            self.pushes.lock().push((comment, replies.len()));
        }

        fn replies_discarded(&self, comment: CommentId) {
            self.discarded.lock().push(comment);
        }
    }

    pub fn cid(n: u128) -> CommentId {
        CommentId(Uuid::from_u128(n))
    }

    fn manager<S: RemoteStore>(store: Arc<S>) -> (SubscriptionManager<S>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let mgr = SubscriptionManager::new(store, StoreLayout::default(), PostId::stub(), sink.clone());
        (mgr, sink)
    }

    fn replies_of(c: CommentId) -> crate::api::DocPath {
        StoreLayout::default().replies_of(PostId::stub(), c)
    }

    #[tokio::test]
    async fn removing_a_comment_cancels_only_its_subscription() {
        let store = Arc::new(MockStore::new());
        let (mgr, sink) = manager(store.clone());

        mgr.reconcile(&[cid(1), cid(2)]).await;
        assert_eq!(mgr.active_count(), 2);
        assert_eq!(store.total_active_feeds(), 2);
        assert_eq!(sink.pushes.lock().len(), 2, "initial snapshots are relayed");

        mgr.reconcile(&[cid(1)]).await;
        assert_eq!(mgr.active_count(), 1);
        assert!(mgr.is_subscribed(&cid(1)));
        assert!(!mgr.is_subscribed(&cid(2)));
        assert_eq!(store.cancelled_feeds(), 1);
        assert_eq!(store.active_feeds(&replies_of(cid(1))), 1);
        assert_eq!(store.active_feeds(&replies_of(cid(2))), 0);
        assert_eq!(*sink.discarded.lock(), vec![cid(2)]);

        // pushes keep flowing for the remaining comment only
        store.insert(replies_of(cid(1)).child("a"), Fields::new());
        store.insert(replies_of(cid(2)).child("b"), Fields::new());
        assert_eq!(sink.pushes.lock().last(), Some(&(cid(1), 1)));
        assert_eq!(sink.pushes.lock().len(), 3);
    }

    #[tokio::test]
    async fn unchanged_comments_are_not_resubscribed() {
        let store = Arc::new(MockStore::new());
        let (mgr, _) = manager(store.clone());
        mgr.reconcile(&[cid(1), cid(2), cid(1)]).await;
        mgr.reconcile(&[cid(2), cid(1)]).await;
        mgr.reconcile(&[cid(1), cid(2), cid(3)]).await;
        assert_eq!(store.total_active_feeds(), 3);
        assert_eq!(store.cancelled_feeds(), 0);
    }

    #[tokio::test]
    async fn failed_open_leaves_others_alone_and_is_retried() {
        let store = Arc::new(MockStore::new());
        store.fail(FailOn::Subscribe, replies_of(cid(2)));
        let (mgr, sink) = manager(store.clone());

        mgr.reconcile(&[cid(1), cid(2), cid(3)]).await;
        assert_eq!(mgr.active_count(), 2);
        assert!(!mgr.is_subscribed(&cid(2)));
        assert!(sink.pushes.lock().iter().all(|(c, _)| *c != cid(2)));
        assert_eq!(*sink.discarded.lock(), vec![cid(2)]);

        store.clear_failures();
        mgr.reconcile(&[cid(1), cid(2), cid(3)]).await;
        assert_eq!(mgr.active_count(), 3);
        assert!(mgr.is_subscribed(&cid(2)));
        assert_eq!(store.total_active_feeds(), 3);
    }

    #[tokio::test]
    async fn teardown_cancels_everything() {
        let store = Arc::new(MockStore::new());
        let (mgr, sink) = manager(store.clone());
        mgr.reconcile(&[cid(1), cid(2), cid(3)]).await;
        mgr.teardown();
        assert_eq!(store.total_active_feeds(), 0);
        assert_eq!(store.cancelled_feeds(), 3);
        assert_eq!(sink.discarded.lock().len(), 3);

        mgr.reconcile(&[cid(4)]).await;
        assert_eq!(store.total_active_feeds(), 0);
    }

    /// Store whose subscriptions only open once the test says so
    struct GatedStore {
        inner: MockStore,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl RemoteStore for GatedStore {
        async fn subscribe(
            &self,
            collection: &crate::api::DocPath,
            on_records: SnapshotCallback,
        ) -> Result<Subscription, Error> {
            let gate = self.gate.lock().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            self.inner.subscribe(collection, on_records).await
        }

        async fn get_record(&self, path: &crate::api::DocPath) -> Result<Option<Document>, Error> {
            self.inner.get_record(path).await
        }

        async fn write_record(&self, path: &crate::api::DocPath, fields: Fields) -> Result<(), Error> {
            self.inner.write_record(path, fields).await
        }

        async fn delete_record(&self, path: &crate::api::DocPath) -> Result<(), Error> {
            self.inner.delete_record(path).await
        }

        async fn increment_counter(
            &self,
            path: &crate::api::DocPath,
            field: &str,
            delta: i64,
        ) -> Result<(), Error> {
            self.inner.increment_counter(path, field, delta).await
        }
    }

    #[tokio::test]
    async fn teardown_cancels_subscriptions_still_opening() {
        let inner = MockStore::new();
        let (open, gate) = oneshot::channel();
        let store = Arc::new(GatedStore {
            inner: inner.clone(),
            gate: Mutex::new(Some(gate)),
        });
        let (mgr, sink) = manager(store);
        let mgr = Arc::new(mgr);

        let reconciling = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.reconcile(&[cid(1)]).await })
        };
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        mgr.teardown();
        open.send(()).expect("reconciliation is waiting on the gate");
        reconciling.await.expect("joining reconciliation");

        assert_eq!(inner.total_active_feeds(), 0);
        assert_eq!(inner.cancelled_feeds(), 1);
        assert_eq!(mgr.active_count(), 0);
        assert!(sink.pushes.lock().is_empty(), "pushes after teardown are not relayed");
    }
}
