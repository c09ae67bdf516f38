use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::{channel::mpsc, Stream, StreamExt};

use crate::api::{self, Comment, Document, PostId, RemoteStore, Reply, StoreLayout, Subscription};

/// Decode every document of a snapshot, skipping the ones that are not valid
pub fn decode_all<T>(
    docs: Vec<Document>,
    decode: impl Fn(&Document) -> Result<T, api::Error>,
) -> Vec<T> {
    docs.iter()
        .filter_map(|d| match decode(d) {
            Ok(v) => Some(v),
            Err(err) => {
                tracing::warn!(?err, path = %d.path, "skipping undecodable document");
                None
            }
        })
        .collect()
}

pub fn decode_replies(docs: Vec<Document>) -> Vec<Reply> {
    decode_all(docs, Reply::from_document)
}

/// Comments of a snapshot, oldest first
pub fn decode_comments(docs: Vec<Document>) -> Vec<Comment> {
    let mut comments = decode_all(docs, Comment::from_document);
    comments.sort_by_key(|c| c.created_at);
    comments
}

/// Stream of the successive comment lists of a post
///
/// The underlying subscription is cancelled when the feed is dropped.
pub struct CommentFeed {
    receiver: mpsc::UnboundedReceiver<Vec<Comment>>,
    _subscription: Subscription,
}

pub async fn comment_feed<S>(
    store: &S,
    layout: &StoreLayout,
    post: PostId,
) -> Result<CommentFeed, api::Error>
where
    S: ?Sized + RemoteStore,
{
    let (sender, receiver) = mpsc::unbounded();
    let collection = layout.comments_of(post);
    let subscription = store
        .subscribe(
            &collection,
            Box::new(move |docs: Vec<Document>| {
                // the receiver only goes away along with the subscription
                let _ = sender.unbounded_send(decode_comments(docs));
            }),
        )
        .await?;
    tracing::debug!(%post, "opened comment feed");
    Ok(CommentFeed {
        receiver,
        _subscription: subscription,
    })
}

impl Stream for CommentFeed {
    type Item = Vec<Comment>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Vec<Comment>>> {
        self.receiver.poll_next_unpin(cx)
    }
}
