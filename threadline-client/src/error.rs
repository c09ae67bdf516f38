use crate::api::{self, SubjectId};

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] api::Error),

    #[error("No viewer is signed in")]
    NoViewer,

    #[error("Unknown {0}")]
    UnknownSubject(SubjectId),

    #[error("Refusing to submit empty text")]
    EmptyText,

    #[error("Thread view was torn down")]
    TornDown,
}
