//! The lively client runtime: a reconnecting WebSocket transport, a mirrored `Room` document
//! with undo/redo, cursor throttling, and local activity tracking.
pub mod activity;
pub mod connection;
pub mod cursor_throttle;
pub mod error;
pub mod room;

pub use activity::{ActivityLevel, ActivityTracker};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use cursor_throttle::CursorThrottle;
pub use error::{Error, Result};
pub use room::Room;
