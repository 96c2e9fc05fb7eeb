//! Wire protocol shared between the game client and its server
//!
//! Everything here is pure data: decoding and encoding the JSON envelope,
//! the typed message bodies, and room snapshots. No I/O happens in this crate.

pub mod frame;
pub mod message;
pub mod payload;

pub use frame::{Frame, FrameData, RoomFrame, RoomPhase, FRAME_VERSION};
pub use message::{ActionMessage, MessageGroup, ServerUser, UpgradeRequest, UpgradeResult};
pub use payload::{DecodeError, Payload, PayloadType};
