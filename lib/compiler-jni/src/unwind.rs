//! Unwind metadata.
//!
//! The frame manager annotates every SP adjustment and callee-save
//! spill/reload with an [`UnwindOp`]; emitter backends record them next to
//! the code offsets they apply at. Under the `unwind` feature the stream
//! translates into DWARF call-frame instructions.

use crate::riscv64_decl::Riscv64Register;

#[cfg(feature = "unwind")]
use gimli::write::{CallFrameInstruction, CommonInformationEntry};

/// One unwind directive, recorded at a code offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnwindOp {
    /// The CFA moved by this many bytes (positive = frame grew).
    AdjustCfaOffset(i32),
    /// The CFA is at this absolute offset above SP.
    DefCfaOffset(i32),
    /// The register was stored this many bytes above SP.
    RelOffset(Riscv64Register, i32),
    /// The register was restored to its pre-frame value.
    Restore(Riscv64Register),
    /// Snapshot the unwind state (before an epilogue).
    RememberState,
    /// Restore the snapshotted unwind state (after an epilogue, for
    /// slow-path code that still lives inside the frame).
    RestoreState,
}

/// DWARF register number for a riscv64 register (x0..x31, then f0..f31).
#[cfg(feature = "unwind")]
fn dwarf_reg(reg: Riscv64Register) -> gimli::Register {
    match reg {
        Riscv64Register::GPR(r) => gimli::Register(r.into_index() as u16),
        Riscv64Register::FPR(r) => gimli::Register(32 + r.into_index() as u16),
    }
}

/// Generate a default System-V CIE for riscv64.
#[cfg(feature = "unwind")]
pub fn create_systemv_cie() -> CommonInformationEntry {
    use crate::riscv64_decl::GPR;
    let mut entry = CommonInformationEntry::new(
        gimli::Encoding {
            address_size: 8,
            format: gimli::Format::Dwarf32,
            version: 1,
        },
        1,
        -8,
        dwarf_reg(Riscv64Register::GPR(GPR::Ra)),
    );
    entry.add_instruction(CallFrameInstruction::Cfa(
        dwarf_reg(Riscv64Register::GPR(GPR::Sp)),
        0,
    ));
    entry
}

/// Translate a recorded [`UnwindOp`] stream into DWARF call-frame
/// instructions, resolving relative CFA adjustments against a running
/// offset.
#[cfg(feature = "unwind")]
pub fn to_call_frame_instructions(
    ops: &[(usize, UnwindOp)],
) -> Vec<(usize, CallFrameInstruction)> {
    let mut cfa_offset = 0i32;
    let mut remembered: Vec<i32> = Vec::new();
    ops.iter()
        .map(|(offset, op)| {
            let insn = match op {
                UnwindOp::AdjustCfaOffset(delta) => {
                    cfa_offset += delta;
                    CallFrameInstruction::CfaOffset(cfa_offset)
                }
                UnwindOp::DefCfaOffset(absolute) => {
                    cfa_offset = *absolute;
                    CallFrameInstruction::CfaOffset(cfa_offset)
                }
                // DWARF wants the slot relative to the CFA, not to SP.
                UnwindOp::RelOffset(reg, sp_offset) => {
                    CallFrameInstruction::Offset(dwarf_reg(*reg), sp_offset - cfa_offset)
                }
                UnwindOp::Restore(reg) => CallFrameInstruction::Restore(dwarf_reg(*reg)),
                UnwindOp::RememberState => {
                    remembered.push(cfa_offset);
                    CallFrameInstruction::RememberState
                }
                UnwindOp::RestoreState => {
                    cfa_offset = remembered
                        .pop()
                        .expect("restore_state without remember_state");
                    CallFrameInstruction::RestoreState
                }
            };
            (*offset, insn)
        })
        .collect()
}

#[cfg(all(test, feature = "unwind"))]
mod tests {
    use super::*;
    use crate::riscv64_decl::GPR;

    #[test]
    fn cfa_runs_relative_adjustments() {
        let ra = Riscv64Register::GPR(GPR::Ra);
        let ops = vec![
            (4, UnwindOp::AdjustCfaOffset(208)),
            (8, UnwindOp::RelOffset(ra, 200)),
            (12, UnwindOp::RememberState),
            (16, UnwindOp::Restore(ra)),
            (20, UnwindOp::AdjustCfaOffset(-208)),
            (24, UnwindOp::RestoreState),
        ];
        let insns = to_call_frame_instructions(&ops);
        assert!(matches!(insns[0].1, CallFrameInstruction::CfaOffset(208)));
        // ra sits 8 bytes below the CFA.
        assert!(matches!(
            insns[1].1,
            CallFrameInstruction::Offset(gimli::Register(1), -8)
        ));
        assert!(matches!(insns[4].1, CallFrameInstruction::CfaOffset(0)));
        assert!(matches!(insns[5].1, CallFrameInstruction::RestoreState));
    }
}
