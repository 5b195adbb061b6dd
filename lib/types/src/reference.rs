//! Indirect-reference (handle) tagging.
//!
//! A native handle is either null or a tagged pointer: the low two bits
//! carry the reference kind, the rest is the address of the slot holding
//! the referent. Handles produced by the JNI stub itself (kind
//! `JniTransition`) point straight at a stack spill slot.

/// The kind of an indirect reference, stored in the low bits of the handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IndirectRefKind {
    /// A handle created for a JNI transition, pointing into the stub frame.
    JniTransition = 0,
    /// An entry in the thread-local reference table.
    Local = 1,
    /// An entry in the runtime-wide global reference table.
    Global = 2,
    /// An entry in the weak-global reference table.
    WeakGlobal = 3,
}

/// Mask covering the kind tag bits of a handle.
pub const KIND_MASK: i64 = 3;

/// Mask that is nonzero exactly for `Global` and `WeakGlobal` handles.
pub const GLOBAL_OR_WEAK_GLOBAL_MASK: i64 = 2;

// Both masks are used as 12-bit immediates in generated code.
const _: () = assert!(KIND_MASK < 0x800);
const _: () = assert!(GLOBAL_OR_WEAK_GLOBAL_MASK < 0x800);
