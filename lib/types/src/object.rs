//! Object header layout used by generated code.

use crate::MemberOffset;

/// Offset of the monitor (lock) word in every object header.
pub const MONITOR_OFFSET: MemberOffset = MemberOffset(4);

/// The lock word: the concurrent collector publishes an object's mark state
/// in a single bit of the monitor word.
pub mod lock_word {
    /// Bit position of the mark-bit state.
    pub const MARK_BIT_STATE_SHIFT: u32 = 29;

    /// The mark state is a single bit; generated tests rotate it into the
    /// sign position and branch on the sign.
    pub const MARK_BIT_STATE_SIZE: u32 = 1;

    const _: () = assert!(MARK_BIT_STATE_SIZE == 1);
    const _: () = assert!(MARK_BIT_STATE_SHIFT + MARK_BIT_STATE_SIZE <= 32);
}
