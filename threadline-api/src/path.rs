use std::{fmt, str::FromStr};

use crate::{CommentId, Error, PostId, ReplyId, SubjectId, UserId};

/// Slash-separated address of a document or a collection in the remote store
///
/// Even-length paths name documents, odd-length paths name collections.
#[derive(
    Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct DocPath(Vec<String>);

impl DocPath {
    pub fn root() -> DocPath {
        DocPath(Vec::new())
    }

    pub fn child(&self, segment: impl ToString) -> DocPath {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        DocPath(segments)
    }

    pub fn parent(&self) -> Option<DocPath> {
        match self.0.split_last() {
            None => None,
            Some((_, rest)) => Some(DocPath(rest.to_vec())),
        }
    }

    /// Last segment, ie. the document id for document paths
    pub fn id(&self) -> Option<&str> {
        self.0.last().map(|s| s as &str)
    }

    pub fn is_document(&self) -> bool {
        !self.0.is_empty() && self.0.len() % 2 == 0
    }

    pub fn starts_with(&self, prefix: &DocPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl FromStr for DocPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<DocPath, Error> {
        let segments = s.split('/').map(String::from).collect::<Vec<_>>();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::Unknown(format!("invalid document path {s:?}")));
        }
        Ok(DocPath(segments))
    }
}

impl From<DocPath> for String {
    fn from(p: DocPath) -> String {
        p.to_string()
    }
}

impl TryFrom<String> for DocPath {
    type Error = Error;

    fn try_from(s: String) -> Result<DocPath, Error> {
        s.parse()
    }
}

/// Collection names used to lay posts, comments, replies and likes out in the store
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct StoreLayout {
    pub posts: String,
    pub comments: String,
    pub replies: String,
    pub likes: String,
}

impl Default for StoreLayout {
    fn default() -> StoreLayout {
        StoreLayout {
            posts: String::from("posts"),
            comments: String::from("comments"),
            replies: String::from("replies"),
            likes: String::from("likes"),
        }
    }
}

impl StoreLayout {
    pub fn post(&self, post: PostId) -> DocPath {
        DocPath::root().child(&self.posts).child(post)
    }

    pub fn comments_of(&self, post: PostId) -> DocPath {
        self.post(post).child(&self.comments)
    }

    pub fn comment(&self, post: PostId, comment: CommentId) -> DocPath {
        self.comments_of(post).child(comment)
    }

    pub fn replies_of(&self, post: PostId, comment: CommentId) -> DocPath {
        self.comment(post, comment).child(&self.replies)
    }

    pub fn reply(&self, post: PostId, comment: CommentId, reply: ReplyId) -> DocPath {
        self.replies_of(post, comment).child(reply)
    }

    /// Document carrying the like counter of `subject`
    pub fn subject(&self, post: PostId, subject: &SubjectId) -> DocPath {
        match *subject {
            SubjectId::Comment(c) => self.comment(post, c),
            SubjectId::Reply { comment, reply } => self.reply(post, comment, reply),
        }
    }

    /// Like record of `viewer` on `subject`, present iff `viewer` likes it
    pub fn like(&self, post: PostId, subject: &SubjectId, viewer: UserId) -> DocPath {
        self.subject(post, subject).child(&self.likes).child(viewer)
    }
}
