//! Instruction-recording emitter backend.
//!
//! Records every emitted instruction as a structured [`Insn`] and renders a
//! deterministic one-instruction-per-line disassembly. This is what the
//! golden-output tests compare against, and it doubles as a cheap way to
//! dump what the stub compiler produced for a given input.

use crate::codegen_error;
use crate::emitter_riscv64::{AqRl, EmitterRiscv64, Label};
use crate::machine_riscv64::ImmType;
use crate::riscv64_decl::{FPR, GPR, Riscv64Register};
use crate::unwind::UnwindOp;
use mira_types::CompileError;
use std::fmt;

/// One recorded instruction (or label binding).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Insn {
    Lb { rd: GPR, base: GPR, offset: i32 },
    Lw { rd: GPR, base: GPR, offset: i32 },
    Lwu { rd: GPR, base: GPR, offset: i32 },
    Ld { rd: GPR, base: GPR, offset: i32 },
    Sw { rs: GPR, base: GPR, offset: i32 },
    Sd { rs: GPR, base: GPR, offset: i32 },
    Flw { rd: FPR, base: GPR, offset: i32 },
    Fld { rd: FPR, base: GPR, offset: i32 },
    Fsw { rs: FPR, base: GPR, offset: i32 },
    Fsd { rs: FPR, base: GPR, offset: i32 },
    Mv { rd: GPR, rs: GPR },
    Li { rd: GPR, imm: i32 },
    Lui { rd: GPR, imm20: i32 },
    Addi { rd: GPR, rs: GPR, imm: i32 },
    Addiw { rd: GPR, rs: GPR, imm: i32 },
    Add { rd: GPR, rs1: GPR, rs2: GPR },
    Andi { rd: GPR, rs: GPR, imm: i32 },
    Ori { rd: GPR, rs: GPR, imm: i32 },
    Slli { rd: GPR, rs: GPR, shamt: u32 },
    Slliw { rd: GPR, rs: GPR, shamt: u32 },
    Beqz { rs: GPR, label: Label },
    Bnez { rs: GPR, label: Label },
    Bgez { rs: GPR, label: Label },
    Bltz { rs: GPR, label: Label },
    Bne { rs1: GPR, rs2: GPR, label: Label },
    J { label: Label },
    Jr { rs: GPR },
    Jalr { rs: GPR },
    Ret,
    Unimp,
    LrW { rd: GPR, base: GPR, order: AqRl },
    ScW { rd: GPR, src: GPR, base: GPR, order: AqRl },
    Bind { label: Label },
}

impl Insn {
    /// The label this instruction branches to, if any.
    pub fn branch_target(&self) -> Option<Label> {
        match *self {
            Insn::Beqz { label, .. }
            | Insn::Bnez { label, .. }
            | Insn::Bgez { label, .. }
            | Insn::Bltz { label, .. }
            | Insn::Bne { label, .. }
            | Insn::J { label } => Some(label),
            _ => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Insn::Lb { rd, base, offset } => write!(f, "lb {rd}, {offset}({base})"),
            Insn::Lw { rd, base, offset } => write!(f, "lw {rd}, {offset}({base})"),
            Insn::Lwu { rd, base, offset } => write!(f, "lwu {rd}, {offset}({base})"),
            Insn::Ld { rd, base, offset } => write!(f, "ld {rd}, {offset}({base})"),
            Insn::Sw { rs, base, offset } => write!(f, "sw {rs}, {offset}({base})"),
            Insn::Sd { rs, base, offset } => write!(f, "sd {rs}, {offset}({base})"),
            Insn::Flw { rd, base, offset } => write!(f, "flw {rd}, {offset}({base})"),
            Insn::Fld { rd, base, offset } => write!(f, "fld {rd}, {offset}({base})"),
            Insn::Fsw { rs, base, offset } => write!(f, "fsw {rs}, {offset}({base})"),
            Insn::Fsd { rs, base, offset } => write!(f, "fsd {rs}, {offset}({base})"),
            Insn::Mv { rd, rs } => write!(f, "mv {rd}, {rs}"),
            Insn::Li { rd, imm } => write!(f, "li {rd}, {imm}"),
            Insn::Lui { rd, imm20 } => write!(f, "lui {rd}, {imm20}"),
            Insn::Addi { rd, rs, imm } => write!(f, "addi {rd}, {rs}, {imm}"),
            Insn::Addiw { rd, rs, imm } => write!(f, "addiw {rd}, {rs}, {imm}"),
            Insn::Add { rd, rs1, rs2 } => write!(f, "add {rd}, {rs1}, {rs2}"),
            Insn::Andi { rd, rs, imm } => write!(f, "andi {rd}, {rs}, {imm}"),
            Insn::Ori { rd, rs, imm } => write!(f, "ori {rd}, {rs}, {imm}"),
            Insn::Slli { rd, rs, shamt } => write!(f, "slli {rd}, {rs}, {shamt}"),
            Insn::Slliw { rd, rs, shamt } => write!(f, "slliw {rd}, {rs}, {shamt}"),
            Insn::Beqz { rs, label } => write!(f, "beqz {rs}, {label}"),
            Insn::Bnez { rs, label } => write!(f, "bnez {rs}, {label}"),
            Insn::Bgez { rs, label } => write!(f, "bgez {rs}, {label}"),
            Insn::Bltz { rs, label } => write!(f, "bltz {rs}, {label}"),
            Insn::Bne { rs1, rs2, label } => write!(f, "bne {rs1}, {rs2}, {label}"),
            Insn::J { label } => write!(f, "j {label}"),
            Insn::Jr { rs } => write!(f, "jr {rs}"),
            Insn::Jalr { rs } => write!(f, "jalr {rs}"),
            Insn::Ret => write!(f, "ret"),
            Insn::Unimp => write!(f, "unimp"),
            Insn::LrW { rd, base, order } => {
                write!(f, "lr.w{} {rd}, ({base})", order.suffix())
            }
            Insn::ScW { rd, src, base, order } => {
                write!(f, "sc.w{} {rd}, {src}, ({base})", order.suffix())
            }
            Insn::Bind { label } => write!(f, "{label}:"),
        }
    }
}

/// An emitter backend that records instructions instead of encoding them.
#[derive(Default)]
pub struct RecordingAssembler {
    insns: Vec<Insn>,
    next_label: u32,
    bound: Vec<bool>,
    unwind_ops: Vec<(usize, UnwindOp)>,
}

impl RecordingAssembler {
    /// Create an empty recording assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded instruction stream.
    pub fn insns(&self) -> &[Insn] {
        &self.insns
    }

    /// The recorded unwind directives, with their code offsets.
    pub fn unwind_ops(&self) -> &[(usize, UnwindOp)] {
        &self.unwind_ops
    }

    /// The rendered disassembly, one instruction per line.
    pub fn disassembly(&self) -> String {
        let mut out = String::new();
        for insn in &self.insns {
            out.push_str(&insn.to_string());
            out.push('\n');
        }
        out
    }

    fn push(&mut self, insn: Insn) {
        self.insns.push(insn);
    }
}

impl EmitterRiscv64 for RecordingAssembler {
    fn get_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        self.bound.push(false);
        label
    }

    fn emit_label(&mut self, label: Label) -> Result<(), CompileError> {
        if self.bound[label.0 as usize] {
            codegen_error!("label {label} bound twice");
        }
        self.bound[label.0 as usize] = true;
        self.push(Insn::Bind { label });
        Ok(())
    }

    fn get_offset(&self) -> usize {
        // Label bindings occupy no code.
        4 * self
            .insns
            .iter()
            .filter(|i| !matches!(i, Insn::Bind { .. }))
            .count()
    }

    fn finalize_code(&mut self) -> Result<(), CompileError> {
        for insn in &self.insns {
            if let Some(label) = insn.branch_target()
                && !self.bound[label.0 as usize]
            {
                codegen_error!("branch to {label}, which was never bound");
            }
        }
        Ok(())
    }

    fn emit_lb(&mut self, rd: GPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        self.push(Insn::Lb { rd, base, offset });
        Ok(())
    }

    fn emit_lw(&mut self, rd: GPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        self.push(Insn::Lw { rd, base, offset });
        Ok(())
    }

    fn emit_lwu(&mut self, rd: GPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        self.push(Insn::Lwu { rd, base, offset });
        Ok(())
    }

    fn emit_ld(&mut self, rd: GPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        self.push(Insn::Ld { rd, base, offset });
        Ok(())
    }

    fn emit_sw(&mut self, rs: GPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        self.push(Insn::Sw { rs, base, offset });
        Ok(())
    }

    fn emit_sd(&mut self, rs: GPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        self.push(Insn::Sd { rs, base, offset });
        Ok(())
    }

    fn emit_flw(&mut self, rd: FPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        self.push(Insn::Flw { rd, base, offset });
        Ok(())
    }

    fn emit_fld(&mut self, rd: FPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        self.push(Insn::Fld { rd, base, offset });
        Ok(())
    }

    fn emit_fsw(&mut self, rs: FPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        self.push(Insn::Fsw { rs, base, offset });
        Ok(())
    }

    fn emit_fsd(&mut self, rs: FPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        self.push(Insn::Fsd { rs, base, offset });
        Ok(())
    }

    fn emit_mv(&mut self, rd: GPR, rs: GPR) -> Result<(), CompileError> {
        self.push(Insn::Mv { rd, rs });
        Ok(())
    }

    fn emit_li(&mut self, rd: GPR, imm: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(imm as i64));
        self.push(Insn::Li { rd, imm });
        Ok(())
    }

    fn emit_lui(&mut self, rd: GPR, imm20: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits20.compatible_imm(imm20 as i64));
        self.push(Insn::Lui { rd, imm20 });
        Ok(())
    }

    fn emit_addi(&mut self, rd: GPR, rs: GPR, imm: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(imm as i64));
        self.push(Insn::Addi { rd, rs, imm });
        Ok(())
    }

    fn emit_addiw(&mut self, rd: GPR, rs: GPR, imm: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(imm as i64));
        self.push(Insn::Addiw { rd, rs, imm });
        Ok(())
    }

    fn emit_add(&mut self, rd: GPR, rs1: GPR, rs2: GPR) -> Result<(), CompileError> {
        self.push(Insn::Add { rd, rs1, rs2 });
        Ok(())
    }

    fn emit_andi(&mut self, rd: GPR, rs: GPR, imm: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(imm as i64));
        self.push(Insn::Andi { rd, rs, imm });
        Ok(())
    }

    fn emit_ori(&mut self, rd: GPR, rs: GPR, imm: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(imm as i64));
        self.push(Insn::Ori { rd, rs, imm });
        Ok(())
    }

    fn emit_slli(&mut self, rd: GPR, rs: GPR, shamt: u32) -> Result<(), CompileError> {
        debug_assert!(shamt < 64);
        self.push(Insn::Slli { rd, rs, shamt });
        Ok(())
    }

    fn emit_slliw(&mut self, rd: GPR, rs: GPR, shamt: u32) -> Result<(), CompileError> {
        debug_assert!(shamt < 32);
        self.push(Insn::Slliw { rd, rs, shamt });
        Ok(())
    }

    fn emit_beqz(&mut self, rs: GPR, label: Label) -> Result<(), CompileError> {
        self.push(Insn::Beqz { rs, label });
        Ok(())
    }

    fn emit_bnez(&mut self, rs: GPR, label: Label) -> Result<(), CompileError> {
        self.push(Insn::Bnez { rs, label });
        Ok(())
    }

    fn emit_bgez(&mut self, rs: GPR, label: Label) -> Result<(), CompileError> {
        self.push(Insn::Bgez { rs, label });
        Ok(())
    }

    fn emit_bltz(&mut self, rs: GPR, label: Label) -> Result<(), CompileError> {
        self.push(Insn::Bltz { rs, label });
        Ok(())
    }

    fn emit_bne(&mut self, rs1: GPR, rs2: GPR, label: Label) -> Result<(), CompileError> {
        self.push(Insn::Bne { rs1, rs2, label });
        Ok(())
    }

    fn emit_j(&mut self, label: Label) -> Result<(), CompileError> {
        self.push(Insn::J { label });
        Ok(())
    }

    fn emit_jr(&mut self, rs: GPR) -> Result<(), CompileError> {
        self.push(Insn::Jr { rs });
        Ok(())
    }

    fn emit_jalr(&mut self, rs: GPR) -> Result<(), CompileError> {
        self.push(Insn::Jalr { rs });
        Ok(())
    }

    fn emit_ret(&mut self) -> Result<(), CompileError> {
        self.push(Insn::Ret);
        Ok(())
    }

    fn emit_unimp(&mut self) -> Result<(), CompileError> {
        self.push(Insn::Unimp);
        Ok(())
    }

    fn emit_lr_w(&mut self, rd: GPR, base: GPR, order: AqRl) -> Result<(), CompileError> {
        self.push(Insn::LrW { rd, base, order });
        Ok(())
    }

    fn emit_sc_w(
        &mut self,
        rd: GPR,
        src: GPR,
        base: GPR,
        order: AqRl,
    ) -> Result<(), CompileError> {
        self.push(Insn::ScW {
            rd,
            src,
            base,
            order,
        });
        Ok(())
    }

    fn cfi_adjust_cfa_offset(&mut self, delta: i32) {
        let offset = self.get_offset();
        self.unwind_ops.push((offset, UnwindOp::AdjustCfaOffset(delta)));
    }

    fn cfi_def_cfa_offset(&mut self, offset: i32) {
        let at = self.get_offset();
        self.unwind_ops.push((at, UnwindOp::DefCfaOffset(offset)));
    }

    fn cfi_rel_offset(&mut self, reg: Riscv64Register, offset: i32) {
        let at = self.get_offset();
        self.unwind_ops.push((at, UnwindOp::RelOffset(reg, offset)));
    }

    fn cfi_restore(&mut self, reg: Riscv64Register) {
        let at = self.get_offset();
        self.unwind_ops.push((at, UnwindOp::Restore(reg)));
    }

    fn cfi_remember_state(&mut self) {
        let at = self.get_offset();
        self.unwind_ops.push((at, UnwindOp::RememberState));
    }

    fn cfi_restore_state(&mut self) {
        let at = self.get_offset();
        self.unwind_ops.push((at, UnwindOp::RestoreState));
    }
}
