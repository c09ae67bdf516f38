use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use futures::channel::{mpsc, oneshot};
use parking_lot::Mutex;
use threadline_api::{
    DocPath, Document, Error, Fields, RemoteStore, SnapshotCallback, Subscription,
};

/// In-memory document store, with failure injection and write interception for tests
#[derive(Clone)]
pub struct MockStore(Arc<Mutex<Inner>>);

struct Inner {
    docs: BTreeMap<DocPath, Fields>,
    feeds: HashMap<u64, Feed>,
    next_feed_id: u64,
    cancelled_feeds: usize,
    failures: Vec<(FailOn, DocPath)>,
    interceptor: Option<mpsc::UnboundedSender<InterceptedWrite>>,
}

struct Feed {
    collection: DocPath,
    callback: Arc<SnapshotCallback>,
}

/// Kind of operation a failure injected with [`MockStore::fail`] applies to
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailOn {
    Subscribe,
    Read,
    Write,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    Write { path: DocPath, fields: Fields },
    Delete { path: DocPath },
    Increment { path: DocPath, field: String, delta: i64 },
}

impl WriteOp {
    pub fn path(&self) -> &DocPath {
        match self {
            WriteOp::Write { path, .. }
            | WriteOp::Delete { path }
            | WriteOp::Increment { path, .. } => path,
        }
    }
}

/// A write held back until the test decides its outcome
#[derive(Debug)]
pub struct InterceptedWrite {
    pub op: WriteOp,
    verdict: oneshot::Sender<Result<(), Error>>,
}

impl InterceptedWrite {
    pub fn allow(self) {
        let _ = self.verdict.send(Ok(()));
    }

    pub fn reject(self, err: Error) {
        let _ = self.verdict.send(Err(err));
    }
}

/// Serializable content of a [`MockStore`]
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StoreDump {
    pub documents: Vec<Document>,
}

type Notification = (Vec<Arc<SnapshotCallback>>, Vec<Document>);

impl Inner {
    fn snapshot(&self, collection: &DocPath) -> Vec<Document> {
        self.docs
            .range(collection.clone()..)
            .take_while(|(p, _)| p.starts_with(collection))
            .filter(|(p, _)| p.parent().as_ref() == Some(collection))
            .map(|(p, f)| Document::new(p.clone(), f.clone()))
            .collect()
    }

    fn is_failing(&self, on: FailOn, path: &DocPath) -> bool {
        self.failures
            .iter()
            .any(|(o, prefix)| *o == on && path.starts_with(prefix))
    }

    /// Callbacks to run (outside the lock) after a change to the document at `path`
    fn notification_for(&self, path: &DocPath) -> Option<Notification> {
        let collection = path.parent()?;
        let callbacks = self
            .feeds
            .values()
            .filter(|f| f.collection == collection)
            .map(|f| f.callback.clone())
            .collect::<Vec<_>>();
        if callbacks.is_empty() {
            return None;
        }
        Some((callbacks, self.snapshot(&collection)))
    }

    fn apply(&mut self, op: &WriteOp) -> Result<(), Error> {
        match op {
            WriteOp::Write { path, fields } => {
                self.docs.insert(path.clone(), fields.clone());
            }
            WriteOp::Delete { path } => {
                self.docs.remove(path);
            }
            WriteOp::Increment { path, field, delta } => {
                let doc = self
                    .docs
                    .get_mut(path)
                    .ok_or_else(|| Error::not_found(path))?;
                let current = doc.get(field).and_then(|v| v.as_i64()).unwrap_or(0);
                doc.insert(field.clone(), serde_json::Value::from(current + delta));
            }
        }
        Ok(())
    }
}

fn relay(notification: Option<Notification>) {
    if let Some((callbacks, snapshot)) = notification {
        for cb in callbacks {
            (*cb)(snapshot.clone());
        }
    }
}

impl MockStore {
    pub fn new() -> MockStore {
        MockStore(Arc::new(Mutex::new(Inner {
            docs: BTreeMap::new(),
            feeds: HashMap::new(),
            next_feed_id: 0,
            cancelled_feeds: 0,
            failures: Vec::new(),
            interceptor: None,
        })))
    }

    pub fn from_dump(dump: StoreDump) -> MockStore {
        let store = MockStore::new();
        store.0.lock().docs = dump
            .documents
            .into_iter()
            .map(|d| (d.path, d.fields))
            .collect();
        store
    }

    pub fn dump(&self) -> StoreDump {
        StoreDump {
            documents: self
                .0
                .lock()
                .docs
                .iter()
                .map(|(p, f)| Document::new(p.clone(), f.clone()))
                .collect(),
        }
    }

    /// Write a document as if another client did, notifying subscribers
    pub fn insert(&self, path: DocPath, fields: Fields) {
        let op = WriteOp::Write { path, fields };
        let notification = {
            let mut inner = self.0.lock();
            let _ = inner.apply(&op);
            inner.notification_for(op.path())
        };
        relay(notification);
    }

    /// Delete a document as if another client did, notifying subscribers
    pub fn remove(&self, path: &DocPath) {
        let notification = {
            let mut inner = self.0.lock();
            inner.docs.remove(path);
            inner.notification_for(path)
        };
        relay(notification);
    }

    pub fn get(&self, path: &DocPath) -> Option<Fields> {
        self.0.lock().docs.get(path).cloned()
    }

    /// Make every `on` operation on a path under `prefix` fail
    pub fn fail(&self, on: FailOn, prefix: DocPath) {
        self.0.lock().failures.push((on, prefix));
    }

    pub fn clear_failures(&self) {
        self.0.lock().failures.clear();
    }

    /// Hold every subsequent write until the returned receiver's item is allowed or rejected
    pub fn intercept_writes(&self) -> mpsc::UnboundedReceiver<InterceptedWrite> {
        let (sender, receiver) = mpsc::unbounded();
        self.0.lock().interceptor = Some(sender);
        receiver
    }

    pub fn stop_intercepting(&self) {
        self.0.lock().interceptor = None;
    }

    /// Number of live subscriptions on `collection`
    pub fn active_feeds(&self, collection: &DocPath) -> usize {
        self.0
            .lock()
            .feeds
            .values()
            .filter(|f| f.collection == *collection)
            .count()
    }

    pub fn total_active_feeds(&self) -> usize {
        self.0.lock().feeds.len()
    }

    pub fn cancelled_feeds(&self) -> usize {
        self.0.lock().cancelled_feeds
    }

    async fn submit(&self, op: WriteOp) -> Result<(), Error> {
        let interceptor = {
            let inner = self.0.lock();
            if inner.is_failing(FailOn::Write, op.path()) {
                return Err(Error::Unavailable(format!("injected failure writing {}", op.path())));
            }
            inner.interceptor.clone()
        };
        if let Some(interceptor) = interceptor {
            let (verdict, receiver) = oneshot::channel();
            let intercepted = InterceptedWrite {
                op: op.clone(),
                verdict,
            };
            if interceptor.unbounded_send(intercepted).is_ok() {
                match receiver.await {
                    Ok(Ok(())) => (),
                    Ok(Err(err)) => return Err(err),
                    Err(_) => return Err(Error::Unknown(String::from("write interceptor went away"))),
                }
            }
        }
        let notification = {
            let mut inner = self.0.lock();
            inner.apply(&op)?;
            inner.notification_for(op.path())
        };
        relay(notification);
        Ok(())
    }
}

impl Default for MockStore {
    fn default() -> MockStore {
        MockStore::new()
    }
}

fn cancel_feed(inner: &Weak<Mutex<Inner>>, id: u64) {
    if let Some(inner) = inner.upgrade() {
        let mut inner = inner.lock();
        if inner.feeds.remove(&id).is_some() {
            inner.cancelled_feeds += 1;
        }
    }
}

#[async_trait]
impl RemoteStore for MockStore {
    async fn subscribe(
        &self,
        collection: &DocPath,
        on_records: SnapshotCallback,
    ) -> Result<Subscription, Error> {
        let callback = Arc::new(on_records);
        let (id, initial) = {
            let mut inner = self.0.lock();
            if inner.is_failing(FailOn::Subscribe, collection) {
                return Err(Error::Unavailable(format!(
                    "injected failure subscribing to {collection}"
                )));
            }
            let id = inner.next_feed_id;
            inner.next_feed_id += 1;
            inner.feeds.insert(
                id,
                Feed {
                    collection: collection.clone(),
                    callback: callback.clone(),
                },
            );
            (id, inner.snapshot(collection))
        };
        tracing::trace!(%collection, id, "mock store opened feed");
        (*callback)(initial);
        let inner = Arc::downgrade(&self.0);
        Ok(Subscription::new(move || cancel_feed(&inner, id)))
    }

    async fn get_record(&self, path: &DocPath) -> Result<Option<Document>, Error> {
        let inner = self.0.lock();
        if inner.is_failing(FailOn::Read, path) {
            return Err(Error::Unavailable(format!("injected failure reading {path}")));
        }
        Ok(inner
            .docs
            .get(path)
            .map(|f| Document::new(path.clone(), f.clone())))
    }

    async fn write_record(&self, path: &DocPath, fields: Fields) -> Result<(), Error> {
        self.submit(WriteOp::Write {
            path: path.clone(),
            fields,
        })
        .await
    }

    async fn delete_record(&self, path: &DocPath) -> Result<(), Error> {
        self.submit(WriteOp::Delete { path: path.clone() }).await
    }

    async fn increment_counter(
        &self,
        path: &DocPath,
        field: &str,
        delta: i64,
    ) -> Result<(), Error> {
        self.submit(WriteOp::Increment {
            path: path.clone(),
            field: String::from(field),
            delta,
        })
        .await
    }
}
