use std::fmt;

use crate::{CommentId, ReplyId};

/// Something a viewer can like
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub enum SubjectId {
    Comment(CommentId),
    Reply { comment: CommentId, reply: ReplyId },
}

impl SubjectId {
    /// The comment this subject lives under (itself for comments)
    pub fn comment(&self) -> CommentId {
        match *self {
            SubjectId::Comment(c) => c,
            SubjectId::Reply { comment, .. } => comment,
        }
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectId::Comment(c) => write!(f, "comment {c}"),
            SubjectId::Reply { comment, reply } => write!(f, "reply {reply} (in comment {comment})"),
        }
    }
}
