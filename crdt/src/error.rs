use crate::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("node at {path:?} is already attached to a parent")]
    Attachment { path: String },
    #[error("mutation attempted from within a subscriber notification")]
    ReentrantMutation,
    #[error("no node at path {0}")]
    PathNotFound(String),
    #[error("op {kind} targets path {path} which does not resolve to a compatible node")]
    WrongNodeKind { path: String, kind: &'static str },
}

impl Error {
    pub fn attachment(path: &Path) -> Self {
        Error::Attachment {
            path: crate::path::path_string(path),
        }
    }

    pub fn path_not_found(path: &Path) -> Self {
        Error::PathNotFound(crate::path::path_string(path))
    }

    pub fn wrong_node_kind(path: &Path, kind: &'static str) -> Self {
        Error::WrongNodeKind {
            path: crate::path::path_string(path),
            kind,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
