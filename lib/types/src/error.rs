//! The possible errors of the compiler backends.

use thiserror::Error;

/// An error produced while generating machine code.
///
/// None of these are recoverable at the codegen layer: they signal a bug in
/// the calling compiler (malformed input) or a use of the backend outside
/// its documented ABI assumptions, and the enclosing compiler is expected to
/// abort the compilation unit and report them through its own diagnostics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A codegen error occurred: the caller handed the backend input that
    /// violates a documented contract (misaligned frame size, incompatible
    /// argument sizes, an argument mapping the shuffle cannot resolve).
    #[error("Codegen error: {0}")]
    Codegen(String),

    /// The requested operation is outside what the backend supports for
    /// this target ABI.
    #[error("Operation {0} is not supported")]
    Unsupported(String),
}
