use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] lively_crdt::Error),
    #[error(transparent)]
    Protocol(#[from] lively_protocol::Error),
    #[error("connection lost after repeated failed reconnect attempts")]
    ConnectionLost,
    #[error("outbound queue is full and {0:?} is not droppable")]
    QueueFull(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
