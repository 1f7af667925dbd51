pub mod frame;
pub mod message;

pub use frame::{checksum, Frame, ProtocolError};
pub use message::{DownReason, Message, RejectReason};

pub const PROTOCOL_VERSION: u32 = 1;

/// Hard cap on payload words per frame; anything larger is rejected unread.
pub const MAX_PAYLOAD_WORDS: u32 = 64;

/// Player slots are bits in a u8 visibility mask, so eight is the ceiling.
pub const MAX_PLAYERS: usize = 8;

pub const CONTROL_TAG_LIMIT: u32 = 16;
pub const DIALOG_TAG_LIMIT: u32 = 32;

/// Returns true for handshake-layer tags (join, time sync, reject).
pub fn is_control_tag(tag: u32) -> bool {
    tag < CONTROL_TAG_LIMIT
}

/// Returns true for session-dialog tags (lobby status, game start, teardown).
pub fn is_dialog_tag(tag: u32) -> bool {
    (CONTROL_TAG_LIMIT..DIALOG_TAG_LIMIT).contains(&tag)
}

/// Returns true for gameplay tags; these are only legal once the sender
/// has completed the connection handshake.
pub fn is_gameplay_tag(tag: u32) -> bool {
    tag >= DIALOG_TAG_LIMIT
}
