use async_trait::async_trait;

use crate::{DocPath, Document, Error, Fields};

/// Receives the full current content of a collection, on subscription and after every change
pub type SnapshotCallback = Box<dyn Fn(Vec<Document>) + Send + Sync>;

/// Live push-subscription to a collection
///
/// Cancelled at most once, either explicitly or when dropped.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl 'static + Send + FnOnce()) -> Subscription {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        self.do_cancel();
    }

    fn do_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.do_cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.cancel.is_some())
            .finish()
    }
}

#[async_trait]
pub trait RemoteStore: 'static + Send + Sync {
    /// Subscribe to the documents directly inside `collection`
    ///
    /// `on_records` is called with the initial snapshot, then with a full
    /// snapshot after each change, until the returned handle is cancelled.
    async fn subscribe(
        &self,
        collection: &DocPath,
        on_records: SnapshotCallback,
    ) -> Result<Subscription, Error>;

    async fn get_record(&self, path: &DocPath) -> Result<Option<Document>, Error>;

    /// Create or overwrite the document at `path`
    async fn write_record(&self, path: &DocPath, fields: Fields) -> Result<(), Error>;

    async fn delete_record(&self, path: &DocPath) -> Result<(), Error>;

    async fn increment_counter(&self, path: &DocPath, field: &str, delta: i64)
        -> Result<(), Error>;
}
