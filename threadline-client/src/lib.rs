mod compose;
pub use compose::{ComposeState, ReplyTarget};

mod config;
pub use config::{SyncConfig, ENV_LAYOUT, ENV_LOOKUP_CONCURRENCY};

mod error;
pub use error::Error;

pub mod feed;
pub use feed::{comment_feed, CommentFeed};

mod forest;
pub use forest::{DepthFirst, Forest};

pub mod likes;
pub use likes::LikeStates;

pub mod mutation;
pub use mutation::{OptimisticPatch, PendingToggles};

mod subscriptions;
pub use subscriptions::{ReplySink, SubscriptionManager};

mod thread;
pub use thread::{CommentView, ThreadEvent, ThreadViewModel, Viewer};

mod fuzz;

pub mod api {
    pub use threadline_api::*;
}
