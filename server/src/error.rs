use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] lively_crdt::Error),
    #[error(transparent)]
    Protocol(#[from] lively_protocol::Error),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("room actor stopped before it could process the join")]
    RoomGone,
    #[error("persistence failure for room {room_id:?}: {source}")]
    Persistence {
        room_id: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
