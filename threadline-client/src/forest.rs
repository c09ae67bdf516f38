use std::collections::{HashMap, HashSet};

use crate::api::{Reply, ReplyId};

/// Replies of one comment, arranged by parent
///
/// Rebuilt from scratch from every snapshot of the comment's replies, never
/// patched in place.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Forest {
    /// Replies made directly to the comment, oldest first
    pub roots: Vec<Reply>,

    /// Answers to each reply, oldest first
    pub children_by_parent: HashMap<ReplyId, Vec<Reply>>,
}

impl Forest {
    /// Replies whose parent is not part of `replies` are dropped, not promoted to roots,
    /// along with their own answers
    pub fn build(replies: Vec<Reply>) -> Forest {
        let known = replies.iter().map(|r| r.id).collect::<HashSet<_>>();
        let (mut roots, mut children): (Vec<_>, Vec<_>) =
            replies.into_iter().partition(|r| r.is_root());

        // stable sorts, so that replies with the same date stay in arrival order
        roots.sort_by_key(|r| r.created_at);
        children.sort_by_key(|r| r.created_at);

        let mut children_by_parent = HashMap::<ReplyId, Vec<Reply>>::new();
        for r in children {
            let parent = match r.parent_reply_id {
                Some(p) if known.contains(&p) => p,
                parent => {
                    tracing::debug!(reply = %r.id, ?parent, "dropping reply whose parent is not in snapshot");
                    continue;
                }
            };
            children_by_parent.entry(parent).or_default().push(r);
        }

        // answers to dropped replies, and replies caught in parent cycles, never reach a root
        let mut reachable = HashSet::new();
        let mut stack = roots.iter().map(|r| r.id).collect::<Vec<_>>();
        while let Some(id) = stack.pop() {
            if reachable.insert(id) {
                if let Some(children) = children_by_parent.get(&id) {
                    stack.extend(children.iter().map(|c| c.id));
                }
            }
        }
        children_by_parent.retain(|parent, children| {
            let keep = reachable.contains(parent);
            if !keep {
                tracing::debug!(%parent, num_replies = children.len(), "dropping replies unreachable from the roots");
            }
            keep
        });

        Forest {
            roots,
            children_by_parent,
        }
    }

    pub fn children(&self, parent: &ReplyId) -> &[Reply] {
        self.children_by_parent
            .get(parent)
            .map(|c| c as &[Reply])
            .unwrap_or(&[])
    }

    fn iter(&self) -> impl Iterator<Item = &Reply> {
        self.roots
            .iter()
            .chain(self.children_by_parent.values().flat_map(|c| c.iter()))
    }

    pub fn get(&self, id: &ReplyId) -> Option<&Reply> {
        self.iter().find(|r| r.id == *id)
    }

    pub fn get_mut(&mut self, id: &ReplyId) -> Option<&mut Reply> {
        self.roots
            .iter_mut()
            .chain(
                self.children_by_parent
                    .values_mut()
                    .flat_map(|c| c.iter_mut()),
            )
            .find(|r| r.id == *id)
    }

    /// Ids of all replies kept in this forest
    pub fn reply_ids(&self) -> impl '_ + Iterator<Item = ReplyId> {
        self.iter().map(|r| r.id)
    }

    pub fn len(&self) -> usize {
        self.roots.len() + self.children_by_parent.values().map(|c| c.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walks the replies reachable from the roots in display order, with their nesting depth
    pub fn depth_first(&self) -> DepthFirst<'_> {
        DepthFirst {
            forest: self,
            stack: self.roots.iter().rev().map(|r| (0, r)).collect(),
            visited: HashSet::new(),
        }
    }
}

pub struct DepthFirst<'a> {
    forest: &'a Forest,
    stack: Vec<(usize, &'a Reply)>,
    visited: HashSet<ReplyId>,
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = (usize, &'a Reply);

    fn next(&mut self) -> Option<(usize, &'a Reply)> {
        loop {
            let (depth, reply) = self.stack.pop()?;
            if !self.visited.insert(reply.id) {
                tracing::warn!(reply = %reply.id, "reply cycle detected while walking forest");
                continue;
            }
            self.stack.extend(
                self.forest
                    .children(&reply.id)
                    .iter()
                    .rev()
                    .map(|c| (depth + 1, c)),
            );
            return Some((depth, reply));
        }
    }
}
