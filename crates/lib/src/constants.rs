//! Shared constants for the document engine and its wire protocol.

/// Id of the root record in every storage snapshot.
pub const ROOT_ID: &str = "root";

/// Id carried by a `DeleteNode` op that only acknowledges a rejected operation.
pub const ACK_OP_ID: &str = "ACK";

/// Default delay between two outbound flushes, in milliseconds.
pub const DEFAULT_THROTTLE_MS: u64 = 100;

/// Default bound of the undo stack. The oldest entry is evicted beyond this.
pub const DEFAULT_MAX_UNDO_STACK: usize = 50;

/// Smallest digit of the position alphabet (space).
pub const POSITION_MIN_DIGIT: u8 = 32;

/// Largest digit of the position alphabet (tilde).
pub const POSITION_MAX_DIGIT: u8 = 126;
