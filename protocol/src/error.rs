use thiserror::Error;

/// A malformed frame or an unrecognized `type` tag. The receiving side drops the frame, logs
/// it, and keeps the socket open — tolerating rolling upgrades where peers momentarily
/// disagree on the message vocabulary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown message type {0:?}")]
    UnknownType(String),
}

pub type Result<T> = std::result::Result<T, Error>;
