use std::collections::HashMap;

use chrono::Utc;

use crate::api::{self, LikeRecord, PostId, RemoteStore, StoreLayout, SubjectId, UserId, LIKES_COUNT};

/// Displayed like state of one subject
///
/// Captured before each toggle so a failed toggle can restore it verbatim.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OptimisticPatch {
    pub liked: bool,
    pub likes_count: u64,
}

impl OptimisticPatch {
    pub fn toggled(self) -> OptimisticPatch {
        match self.liked {
            true => OptimisticPatch {
                liked: false,
                likes_count: self.likes_count.saturating_sub(1),
            },
            false => OptimisticPatch {
                liked: true,
                likes_count: self.likes_count.saturating_add(1),
            },
        }
    }
}

#[derive(Debug)]
struct PendingToggle {
    seq: u64,
    rollback: OptimisticPatch,

    /// A later toggle of the same subject already succeeded, so this one must not roll back
    superseded: bool,
}

/// Toggles whose remote writes have not resolved yet, per subject, in issue order
#[derive(Debug, Default)]
pub struct PendingToggles {
    next_seq: u64,
    by_subject: HashMap<SubjectId, Vec<PendingToggle>>,

    /// Sequence number of the latest toggle begun on each subject, resolved or not
    latest: HashMap<SubjectId, u64>,
}

impl PendingToggles {
    /// Record a toggle of `subject` that was displayed over `rollback`
    pub fn begin(&mut self, subject: SubjectId, rollback: OptimisticPatch) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.latest.insert(subject, seq);
        self.by_subject
            .entry(subject)
            .or_default()
            .push(PendingToggle {
                seq,
                rollback,
                superseded: false,
            });
        seq
    }

    pub fn succeeded(&mut self, subject: &SubjectId, seq: u64) {
        let Some(idx) = self.position(subject, seq) else {
            return;
        };
        let pending = self.pending_mut(subject);
        pending.remove(idx);
        for earlier in &mut pending[..idx] {
            earlier.superseded = true;
        }
        self.forget_if_idle(subject);
    }

    /// Returns the state to display again, if the failed toggle's effect is still what is displayed
    ///
    /// When later toggles of the same subject are still in flight, the failed
    /// toggle's rollback is handed over to the next one instead, so that its
    /// own failure would restore the state from before both.
    pub fn failed(&mut self, subject: &SubjectId, seq: u64) -> Option<OptimisticPatch> {
        let idx = self.position(subject, seq)?;
        let pending = self.pending_mut(subject);
        let failed = pending.remove(idx);
        let restore = match (failed.superseded, pending.get_mut(idx)) {
            (true, _) => None,
            (false, Some(next)) => {
                next.rollback = failed.rollback;
                None
            }
            (false, None) => Some(failed.rollback),
        };
        self.forget_if_idle(subject);
        restore
    }

    pub fn is_pending(&self, subject: &SubjectId) -> bool {
        self.by_subject.contains_key(subject)
    }

    /// Position in the toggle history, to later tell which subjects were toggled since
    pub fn mark(&self) -> u64 {
        self.next_seq
    }

    /// Whether `subject` was toggled since `mark`, or has a toggle still in flight
    pub fn touched_since(&self, subject: &SubjectId, mark: u64) -> bool {
        self.is_pending(subject) || self.latest.get(subject).map_or(false, |seq| *seq >= mark)
    }

    /// Forget every toggle in flight, their outcomes will then be ignored
    pub fn clear(&mut self) {
        self.by_subject.clear();
        self.latest.clear();
    }

    /// Forget the history of subjects `keep` rejects, unless they have toggles in flight
    pub fn retain(&mut self, keep: impl Fn(&SubjectId) -> bool) {
        let by_subject = &self.by_subject;
        self.latest
            .retain(|s, _| keep(s) || by_subject.contains_key(s));
    }

    fn position(&self, subject: &SubjectId, seq: u64) -> Option<usize> {
        self.by_subject
            .get(subject)?
            .iter()
            .position(|t| t.seq == seq)
    }

    fn pending_mut(&mut self, subject: &SubjectId) -> &mut Vec<PendingToggle> {
        self.by_subject.entry(*subject).or_default()
    }

    fn forget_if_idle(&mut self, subject: &SubjectId) {
        if self.by_subject.get(subject).map_or(false, |p| p.is_empty()) {
            self.by_subject.remove(subject);
        }
    }
}

/// Persist that `viewer` now does (or does not) like `subject`
///
/// The like record and the counter are two independent writes: a failure
/// between them leaves them disagreeing.
pub async fn write_like<S>(
    store: &S,
    layout: &StoreLayout,
    post: PostId,
    viewer: UserId,
    subject: SubjectId,
    liked: bool,
) -> Result<(), api::Error>
where
    S: ?Sized + RemoteStore,
{
    let like_path = layout.like(post, &subject, viewer);
    let subject_path = layout.subject(post, &subject);
    if liked {
        let record = LikeRecord {
            user_id: viewer,
            created_at: Utc::now(),
        };
        store.write_record(&like_path, record.to_fields()).await?;
        store.increment_counter(&subject_path, LIKES_COUNT, 1).await
    } else {
        store.delete_record(&like_path).await?;
        store.increment_counter(&subject_path, LIKES_COUNT, -1).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CommentId, Uuid};

    const UNLIKED: OptimisticPatch = OptimisticPatch {
        liked: false,
        likes_count: 3,
    };
    const LIKED: OptimisticPatch = OptimisticPatch {
        liked: true,
        likes_count: 4,
    };

    fn subject() -> SubjectId {
        SubjectId::Comment(CommentId(Uuid::from_u128(1)))
    }

    #[test]
    fn toggle_floors_at_zero() {
        assert_eq!(UNLIKED.toggled(), LIKED);
        assert_eq!(LIKED.toggled(), UNLIKED);
        let odd = OptimisticPatch {
            liked: true,
            likes_count: 0,
        };
        assert_eq!(odd.toggled().likes_count, 0);
    }

    #[test]
    fn lone_failure_restores_its_patch() {
        let mut p = PendingToggles::default();
        let seq = p.begin(subject(), UNLIKED);
        assert!(p.is_pending(&subject()));
        assert_eq!(p.failed(&subject(), seq), Some(UNLIKED));
        assert!(!p.is_pending(&subject()));
    }

    #[test]
    fn earlier_failure_after_later_success_is_ignored() {
        let mut p = PendingToggles::default();
        let like = p.begin(subject(), UNLIKED);
        let unlike = p.begin(subject(), LIKED);
        p.succeeded(&subject(), unlike);
        assert_eq!(p.failed(&subject(), like), None);
        assert!(!p.is_pending(&subject()));
    }

    #[test]
    fn earlier_failure_hands_rollback_to_next_toggle() {
        let mut p = PendingToggles::default();
        let like = p.begin(subject(), UNLIKED);
        let unlike = p.begin(subject(), LIKED);
        let like_again = p.begin(subject(), UNLIKED);
        assert_eq!(p.failed(&subject(), like), None);
        assert_eq!(p.failed(&subject(), like_again), Some(UNLIKED));
        // the unlike now rolls back to before the failed like
        assert_eq!(p.failed(&subject(), unlike), Some(UNLIKED));
    }

    #[test]
    fn resolved_toggles_still_count_as_touched() {
        let mut p = PendingToggles::default();
        let before = p.mark();
        assert!(!p.touched_since(&subject(), before));
        let seq = p.begin(subject(), UNLIKED);
        p.succeeded(&subject(), seq);
        assert!(!p.is_pending(&subject()));
        assert!(p.touched_since(&subject(), before));
        assert!(!p.touched_since(&subject(), p.mark()));

        p.retain(|_| false);
        assert!(!p.touched_since(&subject(), before));
    }

    #[test]
    fn unknown_outcomes_are_ignored() {
        let mut p = PendingToggles::default();
        let seq = p.begin(subject(), UNLIKED);
        p.clear();
        assert_eq!(p.failed(&subject(), seq), None);
        p.succeeded(&subject(), seq);
        assert!(!p.is_pending(&subject()));
    }
}
