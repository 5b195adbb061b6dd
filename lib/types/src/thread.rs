//! Layout of the thread control block and the thread-state word.
//!
//! A thread crossing the JNI boundary publishes its state in a single
//! 32-bit `state_and_flags` word: the low [`STATE_BITS`] bits hold the
//! enumerated [`ThreadState`], the bits above them hold independent request
//! flags set by other threads (suspend, checkpoint). `Runnable` is encoded
//! as zero so that "no flags and runnable" is exactly the zero word, which
//! the transition fast paths rely on.

use crate::ThreadOffset;

/// Number of low bits of the state-and-flags word holding the thread state.
pub const STATE_BITS: u32 = 8;

/// The enumerated state stored in the low bits of the state-and-flags word.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ThreadState {
    /// Executing managed code; holds the mutator lock.
    Runnable = 0,
    /// Executing native code across the JNI boundary.
    Native = 1,
    /// Suspended by the runtime (GC pause, debugger, shutdown).
    Suspended = 2,
}

impl ThreadState {
    /// The value of the state-and-flags word for this state with no request
    /// flags set.
    pub const fn stored_value(self) -> u32 {
        self as u32
    }
}

/// Another thread asked this thread to suspend.
pub const SUSPEND_REQUEST: u32 = 1 << STATE_BITS;
/// Another thread queued a checkpoint closure on this thread.
pub const CHECKPOINT_REQUEST: u32 = 1 << (STATE_BITS + 1);
/// A barrier-only checkpoint with no closure to run.
pub const EMPTY_CHECKPOINT_REQUEST: u32 = 1 << (STATE_BITS + 2);

/// Flags that force the JNI stub onto the suspend slow path.
pub const SUSPEND_OR_CHECKPOINT_REQUEST_FLAGS: u32 =
    SUSPEND_REQUEST | CHECKPOINT_REQUEST | EMPTY_CHECKPOINT_REQUEST;

// Single `andi`/`li` in generated code; 12-bit immediates only.
const _: () = assert!(SUSPEND_OR_CHECKPOINT_REQUEST_FLAGS < 0x800);
const _: () = assert!(ThreadState::Native.stored_value() < 0x800);
const _: () = assert!(ThreadState::Runnable.stored_value() == 0);

/// Offset of the `state_and_flags` word. The transition fast paths address
/// it with LR/SC, which take the base register with no displacement, so
/// this must stay at offset zero.
pub const FLAGS_OFFSET: ThreadOffset = ThreadOffset(0);

const _: () = assert!(FLAGS_OFFSET.value() == 0);

/// Offset of the 32-bit "concurrent collector is marking" flag.
pub const IS_GC_MARKING_OFFSET: ThreadOffset = ThreadOffset(4);

/// Size in bytes of the "is GC marking" field.
pub const IS_GC_MARKING_SIZE: usize = 4;

/// Offset of the pending-exception reference.
pub const EXCEPTION_OFFSET: ThreadOffset = ThreadOffset(8);

/// Offset of the pointer to the runtime-wide mutator lock.
pub const MUTATOR_LOCK_OFFSET: ThreadOffset = ThreadOffset(16);

/// Offset of the exception-delivery entry point in the thread-local
/// entrypoint table.
pub const DELIVER_EXCEPTION_ENTRYPOINT_OFFSET: ThreadOffset = ThreadOffset(192);

/// Offset of the "held mutexes" bookkeeping slot for the mutator lock.
/// Lives past the entrypoint table, beyond the reach of a 12-bit
/// displacement from the thread register.
pub const HELD_MUTEX_MUTATOR_LOCK_OFFSET: ThreadOffset = ThreadOffset(2096);
