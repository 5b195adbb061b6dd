//! JNI transition stubs for riscv64.
//!
//! This crate is the ABI bridge of the Mira compiler's foreign-function
//! boundary: given the managed-convention locations of a native method's
//! arguments and their native-convention destinations, it emits the exact
//! riscv64 instruction sequence that builds the stub frame, shuffles every
//! argument into place (turning spilled object references into `jobject`
//! handles on the way), flips the thread between the Runnable and Native
//! states with lock-free fast paths, polls for suspend requests and pending
//! exceptions, and tears the frame back down.
//!
//! Everything is emitted through the [`EmitterRiscv64`] abstraction, so the
//! same code generation drives both the dynasm-backed production
//! [`Assembler`] and the instruction-recording backend used by the
//! golden-output tests. For a fixed input the emitted sequence is identical
//! on every run; there are no unspecified register choices.

#![deny(missing_docs, unused_extern_crates)]
#![warn(unused_import_braces)]

mod common_decl;
mod emitter_riscv64;
mod machine_riscv64;
pub mod recorder;
mod riscv64_decl;
mod unwind;

pub use crate::common_decl::{ArgumentLocation, JniUnaryCondition, RegisterIndex, Size};
pub use crate::emitter_riscv64::{AqRl, Assembler, EmitterRiscv64, Label};
pub use crate::machine_riscv64::{ImmType, MachineRiscv64};
pub use crate::riscv64_decl::{
    FPR, FTMP, GPR, Riscv64Register, TMP, TMP2, TR, core_and_fp_spill_masks,
};
pub use crate::unwind::UnwindOp;
#[cfg(feature = "unwind")]
pub use crate::unwind::{create_systemv_cie, to_call_frame_instructions};

macro_rules! codegen_error {
    ($($arg:tt)*) => {
        return Err(::mira_types::CompileError::Codegen(format!($($arg)*)))
    };
}
pub(crate) use codegen_error;
