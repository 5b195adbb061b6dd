//! Common types shared between the Mira compiler backends and the parts of
//! the runtime they generate code against.
//!
//! This crate is deliberately free of codegen machinery: it only defines
//! typed byte offsets, the thread-state word encoding, object and reference
//! layout constants, and the compiler error type. The values here are the
//! single source of truth for every offset the JNI stub compiler bakes into
//! generated code.

#![deny(missing_docs, unused_extern_crates)]
#![warn(unused_import_braces)]

mod error;
mod offsets;

pub mod object;
pub mod reference;
pub mod thread;

pub use crate::error::CompileError;
pub use crate::offsets::{FrameOffset, MemberOffset, ThreadOffset};

/// Width in bytes of a native pointer on the targets we compile for.
pub const NATIVE_POINTER_SIZE: usize = 8;

/// Width in bytes of a managed object reference (compressed, 32 bits).
pub const OBJECT_REFERENCE_SIZE: usize = 4;

/// Required stack alignment of the native ABI, in bytes.
pub const STACK_ALIGNMENT: usize = 16;
