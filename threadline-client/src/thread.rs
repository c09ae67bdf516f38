use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{Arc, Weak},
};

use chrono::Utc;
use futures::{channel::mpsc, Stream, StreamExt};
use parking_lot::Mutex;

use crate::{
    api::{
        Comment, CommentId, Document, PostId, RemoteStore, Reply, ReplyId, SubjectId,
        UserId, Uuid, REPLIES_COUNT,
    },
    compose::{ComposeState, ReplyTarget},
    config::SyncConfig,
    feed,
    forest::Forest,
    likes::{self, LikeStates},
    mutation::{self, OptimisticPatch, PendingToggles},
    subscriptions::{ReplySink, SubscriptionManager},
    Error,
};

/// Signed-in user, as seen by the thread view
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Viewer {
    pub id: UserId,
    pub name: String,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ThreadEvent {
    CommentsChanged,
    RepliesChanged(CommentId),
    LikesChanged,
    ComposeChanged,
}

/// A comment along with whether the viewer likes it
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentView {
    pub comment: Comment,
    pub liked: bool,
}

#[derive(Default)]
struct ThreadState {
    comments: Vec<Comment>,
    forests: HashMap<CommentId, Forest>,
    likes: LikeStates,
    pending: PendingToggles,
    compose: ComposeState,
    viewer: Option<Viewer>,

    // bumped on each viewer change, lookups started under another epoch are stale
    viewer_epoch: u64,

    listeners: Vec<mpsc::UnboundedSender<ThreadEvent>>,
    torn_down: bool,
}

impl ThreadState {
    fn notify(&mut self, event: ThreadEvent) {
        self.listeners.retain(|l| l.unbounded_send(event).is_ok());
    }

    fn comment(&self, id: &CommentId) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == *id)
    }

    fn like_patch(&self, subject: &SubjectId) -> Result<OptimisticPatch, Error> {
        let likes_count = match subject {
            SubjectId::Comment(c) => self.comment(c).map(|c| c.likes_count),
            SubjectId::Reply { comment, reply } => self
                .forests
                .get(comment)
                .and_then(|f| f.get(reply))
                .map(|r| r.likes_count),
        };
        Ok(OptimisticPatch {
            liked: self.likes.is_liked(subject),
            likes_count: likes_count.ok_or(Error::UnknownSubject(*subject))?,
        })
    }

    fn apply_patch(&mut self, subject: &SubjectId, patch: OptimisticPatch) {
        self.likes.set(*subject, patch.liked);
        match subject {
            SubjectId::Comment(id) => {
                if let Some(c) = self.comments.iter_mut().find(|c| c.id == *id) {
                    c.likes_count = patch.likes_count;
                }
            }
            SubjectId::Reply { comment, reply } => {
                if let Some(r) = self.forests.get_mut(comment).and_then(|f| f.get_mut(reply)) {
                    r.likes_count = patch.likes_count;
                }
            }
        }
        self.notify(ThreadEvent::LikesChanged);
    }

    fn reply_subjects(&self, comment: CommentId) -> Vec<SubjectId> {
        self.forests
            .get(&comment)
            .map(|f| {
                f.reply_ids()
                    .map(|reply| SubjectId::Reply { comment, reply })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn all_subjects(&self) -> Vec<SubjectId> {
        let mut subjects = self
            .comments
            .iter()
            .map(|c| SubjectId::Comment(c.id))
            .collect::<Vec<_>>();
        for c in &self.comments {
            subjects.extend(self.reply_subjects(c.id));
        }
        subjects
    }

    /// Forget like knowledge about comments and replies that are no longer shown
    fn forget_hidden_subjects(&mut self) {
        let shown = self.all_subjects().into_iter().collect::<HashSet<_>>();
        self.likes.retain(|s| shown.contains(s));
        self.pending.retain(|s| shown.contains(s));
    }

    fn viewer_id(&self) -> Result<UserId, Error> {
        if self.torn_down {
            return Err(Error::TornDown);
        }
        self.viewer.as_ref().map(|v| v.id).ok_or(Error::NoViewer)
    }
}

/// Turns reply pushes into forests of the shared state
struct ForestSink {
    state: Weak<Mutex<ThreadState>>,
}

impl ReplySink for ForestSink {
    fn replies_pushed(&self, comment: CommentId, replies: Vec<Document>) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let forest = Forest::build(feed::decode_replies(replies));
        let mut state = state.lock();
        if state.torn_down {
            return;
        }
        state.forests.insert(comment, forest);
        state.forget_hidden_subjects();
        state.notify(ThreadEvent::RepliesChanged(comment));
    }

    fn replies_discarded(&self, comment: CommentId) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = state.lock();
        if state.forests.remove(&comment).is_some() {
            state.forget_hidden_subjects();
            state.notify(ThreadEvent::RepliesChanged(comment));
        }
    }
}

/// Live state of the comment thread of one post
///
/// Comment lists come in through [`ThreadViewModel::sync_comments`] (usually
/// driven by [`ThreadViewModel::run`]), reply forests are kept up to date by
/// one reply subscription per comment, and like states are resolved for the
/// current viewer as new comments and replies show up.
pub struct ThreadViewModel<S> {
    store: Arc<S>,
    config: SyncConfig,
    post: PostId,
    state: Arc<Mutex<ThreadState>>,
    subscriptions: SubscriptionManager<S>,
}

impl<S: RemoteStore> ThreadViewModel<S> {
    pub fn new(store: Arc<S>, config: SyncConfig, post: PostId) -> ThreadViewModel<S> {
        let state = Arc::new(Mutex::new(ThreadState::default()));
        let sink = Arc::new(ForestSink {
            state: Arc::downgrade(&state),
        });
        let subscriptions =
            SubscriptionManager::new(store.clone(), config.layout.clone(), post, sink);
        ThreadViewModel {
            store,
            config,
            post,
            state,
            subscriptions,
        }
    }

    pub fn post(&self) -> PostId {
        self.post
    }

    /// Receive an event after each change, until the view is torn down
    pub fn subscribe_changes(&self) -> mpsc::UnboundedReceiver<ThreadEvent> {
        let (sender, receiver) = mpsc::unbounded();
        let mut state = self.state.lock();
        if !state.torn_down {
            state.listeners.push(sender);
        }
        receiver
    }

    pub fn comments(&self) -> Vec<CommentView> {
        let state = self.state.lock();
        state
            .comments
            .iter()
            .map(|c| CommentView {
                comment: c.clone(),
                liked: state.likes.is_liked(&SubjectId::Comment(c.id)),
            })
            .collect()
    }

    /// Replies of `comment`, absent until its subscription delivered a first snapshot
    pub fn forest(&self, comment: &CommentId) -> Option<Forest> {
        self.state.lock().forests.get(comment).cloned()
    }

    pub fn is_liked(&self, subject: &SubjectId) -> bool {
        self.state.lock().likes.is_liked(subject)
    }

    /// Number of subjects whose like state is known for the current viewer
    pub fn known_likes(&self) -> usize {
        self.state.lock().likes.len()
    }

    /// Currently displayed like state of `subject`
    pub fn like_state(&self, subject: &SubjectId) -> Result<OptimisticPatch, Error> {
        self.state.lock().like_patch(subject)
    }

    pub fn compose(&self) -> ComposeState {
        self.state.lock().compose.clone()
    }

    pub fn viewer(&self) -> Option<Viewer> {
        self.state.lock().viewer.clone()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.active_count()
    }

    /// Replace the comment list, then follow the replies and resolve the likes of the new comments
    pub async fn sync_comments(&self, comments: Vec<Comment>) {
        let ids = {
            let mut state = self.state.lock();
            if state.torn_down {
                return;
            }
            let ids = comments.iter().map(|c| c.id).collect::<Vec<_>>();
            let removed = state
                .comments
                .iter()
                .map(|c| c.id)
                .filter(|id| !ids.contains(id))
                .collect::<Vec<_>>();
            let mut compose_changed = false;
            for c in removed {
                compose_changed |= state.compose.forget_comment(&c);
            }
            state.comments = comments;
            state.forget_hidden_subjects();
            state.notify(ThreadEvent::CommentsChanged);
            if compose_changed {
                state.notify(ThreadEvent::ComposeChanged);
            }
            ids
        };
        tracing::debug!(post = %self.post, num_comments = ids.len(), "syncing comments");
        self.subscriptions.reconcile(&ids).await;
        self.resolve_likes(ids.into_iter().map(SubjectId::Comment).collect())
            .await;
    }

    /// Resolve the likes of the replies of `comment` that were not resolved yet
    pub async fn resolve_replies(&self, comment: CommentId) {
        let subjects = self.state.lock().reply_subjects(comment);
        self.resolve_likes(subjects).await;
    }

    async fn resolve_likes(&self, subjects: Vec<SubjectId>) {
        let (viewer, epoch, mark, unknown) = {
            let state = self.state.lock();
            let Some(viewer) = state.viewer.as_ref().map(|v| v.id) else {
                return;
            };
            (
                viewer,
                state.viewer_epoch,
                state.pending.mark(),
                state.likes.unknown(subjects),
            )
        };
        if unknown.is_empty() {
            return;
        }
        let results = likes::resolve(
            &*self.store,
            &self.config.layout,
            self.post,
            viewer,
            unknown,
            self.config.lookup_concurrency,
        )
        .await;

        let mut state = self.state.lock();
        if state.torn_down || state.viewer_epoch != epoch {
            tracing::debug!(%viewer, "discarding like states resolved for a previous viewer");
            return;
        }
        // a toggle begun since the lookups started knows better than them
        let shown = state.all_subjects().into_iter().collect::<HashSet<_>>();
        let changed = {
            let ThreadState { likes, pending, .. } = &mut *state;
            likes.merge(results, |s| {
                !shown.contains(s) || pending.touched_since(s, mark)
            })
        };
        if changed {
            state.notify(ThreadEvent::LikesChanged);
        }
    }

    /// Switch to another viewer, forgetting everything known about the previous one's likes
    pub async fn set_viewer(&self, viewer: Option<Viewer>) {
        let subjects = {
            let mut state = self.state.lock();
            if state.torn_down {
                return;
            }
            let same_id = state.viewer.as_ref().map(|v| v.id) == viewer.as_ref().map(|v| v.id);
            state.viewer = viewer;
            if same_id {
                return;
            }
            state.viewer_epoch += 1;
            state.likes.clear();
            state.pending.clear();
            state.notify(ThreadEvent::LikesChanged);
            state.all_subjects()
        };
        self.resolve_likes(subjects).await;
    }

    /// Toggle whether the viewer likes `subject`
    ///
    /// The new state is displayed before this returns. The returned future
    /// performs the remote writes and resolves to the requested like state, or
    /// to the error that made the toggle roll back.
    pub fn toggle_like(
        &self,
        subject: SubjectId,
    ) -> impl Future<Output = Result<bool, Error>> + Send + 'static {
        let started = self.begin_toggle(subject);
        let store = self.store.clone();
        let layout = self.config.layout.clone();
        let post = self.post;
        let state = Arc::downgrade(&self.state);
        async move {
            let (viewer, seq, liked) = match started {
                Ok(started) => started,
                Err(err) => return Err(err),
            };
            let res = mutation::write_like(&*store, &layout, post, viewer, subject, liked).await;
            let Some(state) = state.upgrade() else {
                return res.map(|()| liked).map_err(Error::from);
            };
            let mut state = state.lock();
            match res {
                Ok(()) => {
                    state.pending.succeeded(&subject, seq);
                    Ok(liked)
                }
                Err(err) => {
                    tracing::warn!(?err, %subject, liked, "failed toggling like, rolling back");
                    if let Some(patch) = state.pending.failed(&subject, seq) {
                        state.apply_patch(&subject, patch);
                    }
                    Err(Error::Store(err))
                }
            }
        }
    }

    fn begin_toggle(&self, subject: SubjectId) -> Result<(UserId, u64, bool), Error> {
        let mut state = self.state.lock();
        let viewer = state.viewer_id()?;
        let current = state.like_patch(&subject)?;
        let next = current.toggled();
        let seq = state.pending.begin(subject, current);
        state.apply_patch(&subject, next);
        tracing::trace!(%subject, seq, liked = next.liked, "toggled like locally");
        Ok((viewer, seq, next.liked))
    }

    pub fn set_reply_target(&self, target: ReplyTarget) {
        let mut state = self.state.lock();
        if state.compose.set_target(target) {
            state.notify(ThreadEvent::ComposeChanged);
        }
    }

    pub fn clear_reply_target(&self) {
        let mut state = self.state.lock();
        if state.compose.clear() {
            state.notify(ThreadEvent::ComposeChanged);
        }
    }

    pub fn set_draft(&self, text: String) {
        let mut state = self.state.lock();
        if state.compose.set_draft(text) {
            state.notify(ThreadEvent::ComposeChanged);
        }
    }

    /// Store a reply to `comment`, or to its reply `parent`
    ///
    /// Nothing is displayed before the store accepted the reply: it shows up
    /// with the next push of the comment's replies. The compose state is only
    /// reset once the reply is stored.
    pub async fn submit_reply(
        &self,
        comment: CommentId,
        parent: Option<ReplyId>,
        text: &str,
    ) -> Result<ReplyId, Error> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyText);
        }
        let viewer = {
            let state = self.state.lock();
            state.viewer_id()?;
            if state.comment(&comment).is_none() {
                return Err(Error::UnknownSubject(SubjectId::Comment(comment)));
            }
            state.viewer.clone().ok_or(Error::NoViewer)?
        };
        let reply = Reply {
            id: ReplyId(Uuid::new_v4()),
            author_id: viewer.id,
            author_name: viewer.name,
            text: text.to_string(),
            created_at: Utc::now(),
            likes_count: 0,
            parent_reply_id: parent,
        };
        let layout = &self.config.layout;
        let path = layout.reply(self.post, comment, reply.id);
        if let Err(err) = self.store.write_record(&path, reply.to_fields()).await {
            tracing::warn!(?err, %comment, "failed submitting reply");
            return Err(Error::Store(err));
        }
        if let Err(err) = self
            .store
            .increment_counter(&layout.comment(self.post, comment), REPLIES_COUNT, 1)
            .await
        {
            tracing::warn!(?err, %comment, reply = %reply.id, "reply stored but its comment's counter was not bumped");
        }

        let mut state = self.state.lock();
        if state.compose.submitted(ReplyTarget { comment, parent }) {
            state.notify(ThreadEvent::ComposeChanged);
        }
        Ok(reply.id)
    }

    /// Store a new comment on the post, it shows up with the next comment feed push
    pub async fn add_comment(&self, text: &str) -> Result<CommentId, Error> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyText);
        }
        let viewer = {
            let state = self.state.lock();
            state.viewer_id()?;
            state.viewer.clone().ok_or(Error::NoViewer)?
        };
        let comment = Comment {
            id: CommentId(Uuid::new_v4()),
            author_id: viewer.id,
            author_name: viewer.name,
            text: text.to_string(),
            created_at: Utc::now(),
            likes_count: 0,
            replies_count: 0,
        };
        let path = self.config.layout.comment(self.post, comment.id);
        self.store
            .write_record(&path, comment.to_fields())
            .await
            .map_err(|err| {
                tracing::warn!(?err, post = %self.post, "failed adding comment");
                Error::Store(err)
            })?;
        Ok(comment.id)
    }

    /// Delete `comment` remotely, then stop following it
    pub async fn delete_comment(&self, comment: CommentId) -> Result<(), Error> {
        self.state.lock().viewer_id()?;
        let path = self.config.layout.comment(self.post, comment);
        self.store.delete_record(&path).await.map_err(|err| {
            tracing::warn!(?err, %comment, "failed deleting comment");
            Error::Store(err)
        })?;
        let remaining = {
            let state = self.state.lock();
            state
                .comments
                .iter()
                .filter(|c| c.id != comment)
                .cloned()
                .collect::<Vec<_>>()
        };
        self.sync_comments(remaining).await;
        Ok(())
    }

    /// Follow `feed` until it ends or the view is torn down
    ///
    /// Each comment list is synced, and likes are resolved for the replies
    /// that show up in reply pushes.
    pub async fn run(&self, feed: impl Stream<Item = Vec<Comment>> + Unpin) {
        let mut events = self.subscribe_changes();
        let mut feed = feed.fuse();
        loop {
            futures::select! {
                comments = feed.next() => match comments {
                    Some(comments) => self.sync_comments(comments).await,
                    None => {
                        tracing::debug!(post = %self.post, "comment feed ended");
                        return;
                    }
                },
                event = events.next() => match event {
                    Some(ThreadEvent::RepliesChanged(comment)) => self.resolve_replies(comment).await,
                    Some(_) => (),
                    None => {
                        tracing::debug!(post = %self.post, "thread view torn down, stopping");
                        return;
                    }
                },
            }
        }
    }

    /// Cancel every reply subscription and stop accepting changes
    ///
    /// Writes still in flight complete, but their outcome is ignored.
    pub fn teardown(&self) {
        {
            let mut state = self.state.lock();
            if state.torn_down {
                return;
            }
            state.torn_down = true;
            state.listeners.clear();
            state.pending.clear();
        }
        self.subscriptions.teardown();
        tracing::debug!(post = %self.post, "tore down thread view");
    }
}

impl<S> Drop for ThreadViewModel<S> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.torn_down = true;
        state.listeners.clear();
    }
}
