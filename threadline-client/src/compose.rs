use crate::api::{CommentId, ReplyId};

/// Where the reply being composed will go
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ReplyTarget {
    pub comment: CommentId,

    /// Reply being answered, `None` to answer the comment itself
    pub parent: Option<ReplyId>,
}

/// Reply composition state: at most one active target, and the draft written for it
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ComposeState {
    target: Option<ReplyTarget>,
    draft: String,
}

impl ComposeState {
    pub fn target(&self) -> Option<ReplyTarget> {
        self.target
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Switching to another target drops the draft; re-selecting the current one keeps it
    pub fn set_target(&mut self, target: ReplyTarget) -> bool {
        if self.target == Some(target) {
            return false;
        }
        self.target = Some(target);
        self.draft.clear();
        true
    }

    pub fn clear(&mut self) -> bool {
        let changed = self.target.is_some() || !self.draft.is_empty();
        self.target = None;
        self.draft.clear();
        changed
    }

    /// Ignored when no target is active
    pub fn set_draft(&mut self, text: String) -> bool {
        if self.target.is_none() {
            return false;
        }
        self.draft = text;
        true
    }

    /// A reply to `target` was stored; done composing unless another target was picked meanwhile
    pub fn submitted(&mut self, target: ReplyTarget) -> bool {
        match self.target == Some(target) {
            true => self.clear(),
            false => false,
        }
    }

    /// `comment` went away, along with any reply being composed under it
    pub fn forget_comment(&mut self, comment: &CommentId) -> bool {
        match self.target {
            Some(t) if t.comment == *comment => self.clear(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Uuid;

    fn target(c: u128, parent: Option<u128>) -> ReplyTarget {
        ReplyTarget {
            comment: CommentId(Uuid::from_u128(c)),
            parent: parent.map(|p| ReplyId(Uuid::from_u128(p))),
        }
    }

    #[test]
    fn new_target_drops_draft() {
        let mut c = ComposeState::default();
        assert!(!c.set_draft(String::from("lost")));
        assert_eq!(c.draft(), "");

        c.set_target(target(1, None));
        c.set_draft(String::from("hello"));
        assert!(!c.set_target(target(1, None)));
        assert_eq!(c.draft(), "hello");

        assert!(c.set_target(target(1, Some(2))));
        assert_eq!(c.target(), Some(target(1, Some(2))));
        assert_eq!(c.draft(), "");
    }

    #[test]
    fn submission_only_clears_its_own_target() {
        let mut c = ComposeState::default();
        c.set_target(target(1, None));
        c.set_draft(String::from("first"));
        c.set_target(target(2, None));
        c.set_draft(String::from("second"));
        assert!(!c.submitted(target(1, None)));
        assert_eq!(c.draft(), "second");
        assert!(c.submitted(target(2, None)));
        assert_eq!(c, ComposeState::default());
    }

    #[test]
    fn forgetting_comment_clears_its_target() {
        let mut c = ComposeState::default();
        c.set_target(target(1, Some(5)));
        assert!(!c.forget_comment(&CommentId(Uuid::from_u128(2))));
        assert!(c.forget_comment(&CommentId(Uuid::from_u128(1))));
        assert_eq!(c.target(), None);
    }
}
