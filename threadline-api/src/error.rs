#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("No document at {0}")]
    NotFound(String),

    #[error("Failed decoding document {path}: {message}")]
    Decode { path: String, message: String },
}

impl Error {
    pub fn decode(path: &crate::DocPath, err: serde_json::Error) -> Error {
        Error::Decode {
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    pub fn not_found(path: &crate::DocPath) -> Error {
        Error::NotFound(path.to_string())
    }
}
