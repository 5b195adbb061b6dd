//! Riscv64 emitter.
//!
//! [`EmitterRiscv64`] is the narrow interface between the macro-assembler
//! and the single-instruction encoder. The production backend below sits on
//! a dynasm [`VecAssembler`]; the recording backend lives in
//! [`crate::recorder`].

use crate::machine_riscv64::ImmType;
use crate::riscv64_decl::{FPR, GPR, Riscv64Register};
use crate::unwind::UnwindOp;
use dynasm::dynasm;
use dynasmrt::{DynamicLabel, DynasmApi, DynasmLabelApi, VecAssembler, riscv::RiscvRelocation};
use mira_types::CompileError;

type Inner = VecAssembler<RiscvRelocation>;

/// Force `dynasm!` to use the correct arch (riscv64) when cross-compiling.
/// `dynasm!` proc-macro tries to auto-detect it by default by looking at the
/// `target_arch`, but it sees the `target_arch` of the proc-macro itself,
/// which is always equal to host, even when cross-compiling.
macro_rules! dynasm {
    ($a:expr ; $($tt:tt)*) => {
        dynasm::dynasm!(
            $a
            ; .arch riscv64
            ; .feature f, d
            ; $($tt)*
        )
    };
}

/// A branch target. Minted by the emitter, bound exactly once; branches to a
/// label may be emitted before it is bound.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Label(pub(crate) u32);

/// Acquire/release ordering bits of an LR/SC instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AqRl {
    /// No ordering.
    None,
    /// Acquire ordering.
    Acquire,
    /// Release ordering.
    Release,
    /// Both acquire and release.
    AqRl,
}

impl AqRl {
    /// The (aq, rl) instruction bits.
    pub const fn bits(self) -> (u32, u32) {
        match self {
            AqRl::None => (0, 0),
            AqRl::Acquire => (1, 0),
            AqRl::Release => (0, 1),
            AqRl::AqRl => (1, 1),
        }
    }

    /// The mnemonic suffix (".aq", ".rl", ".aqrl" or empty).
    pub const fn suffix(self) -> &'static str {
        match self {
            AqRl::None => "",
            AqRl::Acquire => ".aq",
            AqRl::Release => ".rl",
            AqRl::AqRl => ".aqrl",
        }
    }
}

/// Emitter trait for riscv64.
///
/// One method per instruction form the macro-assembler uses; displacements
/// must already fit their encoding (the macro-assembler splits larger ones
/// through a scratch register before calling in here).
pub trait EmitterRiscv64 {
    /// Generates a new label.
    fn get_label(&mut self) -> Label;
    /// Binds `label` at the current position.
    fn emit_label(&mut self, label: Label) -> Result<(), CompileError>;
    /// Gets the current code offset in bytes.
    fn get_offset(&self) -> usize;
    /// Finalize the instruction stream, e.g. check label consistency.
    fn finalize_code(&mut self) -> Result<(), CompileError>;

    /// `lb rd, offset(base)`
    fn emit_lb(&mut self, rd: GPR, base: GPR, offset: i32) -> Result<(), CompileError>;
    /// `lw rd, offset(base)`
    fn emit_lw(&mut self, rd: GPR, base: GPR, offset: i32) -> Result<(), CompileError>;
    /// `lwu rd, offset(base)`
    fn emit_lwu(&mut self, rd: GPR, base: GPR, offset: i32) -> Result<(), CompileError>;
    /// `ld rd, offset(base)`
    fn emit_ld(&mut self, rd: GPR, base: GPR, offset: i32) -> Result<(), CompileError>;
    /// `sw rs, offset(base)`
    fn emit_sw(&mut self, rs: GPR, base: GPR, offset: i32) -> Result<(), CompileError>;
    /// `sd rs, offset(base)`
    fn emit_sd(&mut self, rs: GPR, base: GPR, offset: i32) -> Result<(), CompileError>;
    /// `flw rd, offset(base)`
    fn emit_flw(&mut self, rd: FPR, base: GPR, offset: i32) -> Result<(), CompileError>;
    /// `fld rd, offset(base)`
    fn emit_fld(&mut self, rd: FPR, base: GPR, offset: i32) -> Result<(), CompileError>;
    /// `fsw rs, offset(base)`
    fn emit_fsw(&mut self, rs: FPR, base: GPR, offset: i32) -> Result<(), CompileError>;
    /// `fsd rs, offset(base)`
    fn emit_fsd(&mut self, rs: FPR, base: GPR, offset: i32) -> Result<(), CompileError>;

    /// `mv rd, rs`
    fn emit_mv(&mut self, rd: GPR, rs: GPR) -> Result<(), CompileError>;
    /// `li rd, imm` for a 12-bit immediate (single instruction).
    fn emit_li(&mut self, rd: GPR, imm: i32) -> Result<(), CompileError>;
    /// `lui rd, imm20`, with `imm20` the raw (signed) 20-bit upper value.
    fn emit_lui(&mut self, rd: GPR, imm20: i32) -> Result<(), CompileError>;
    /// `addi rd, rs, imm`
    fn emit_addi(&mut self, rd: GPR, rs: GPR, imm: i32) -> Result<(), CompileError>;
    /// `addiw rd, rs, imm`
    fn emit_addiw(&mut self, rd: GPR, rs: GPR, imm: i32) -> Result<(), CompileError>;
    /// `add rd, rs1, rs2`
    fn emit_add(&mut self, rd: GPR, rs1: GPR, rs2: GPR) -> Result<(), CompileError>;
    /// `andi rd, rs, imm`
    fn emit_andi(&mut self, rd: GPR, rs: GPR, imm: i32) -> Result<(), CompileError>;
    /// `ori rd, rs, imm`
    fn emit_ori(&mut self, rd: GPR, rs: GPR, imm: i32) -> Result<(), CompileError>;
    /// `slli rd, rs, shamt`
    fn emit_slli(&mut self, rd: GPR, rs: GPR, shamt: u32) -> Result<(), CompileError>;
    /// `slliw rd, rs, shamt`
    fn emit_slliw(&mut self, rd: GPR, rs: GPR, shamt: u32) -> Result<(), CompileError>;

    /// `beqz rs, label`
    fn emit_beqz(&mut self, rs: GPR, label: Label) -> Result<(), CompileError>;
    /// `bnez rs, label`
    fn emit_bnez(&mut self, rs: GPR, label: Label) -> Result<(), CompileError>;
    /// `bgez rs, label`
    fn emit_bgez(&mut self, rs: GPR, label: Label) -> Result<(), CompileError>;
    /// `bltz rs, label`
    fn emit_bltz(&mut self, rs: GPR, label: Label) -> Result<(), CompileError>;
    /// `bne rs1, rs2, label`
    fn emit_bne(&mut self, rs1: GPR, rs2: GPR, label: Label) -> Result<(), CompileError>;
    /// `j label`
    fn emit_j(&mut self, label: Label) -> Result<(), CompileError>;
    /// `jr rs`
    fn emit_jr(&mut self, rs: GPR) -> Result<(), CompileError>;
    /// `jalr ra, 0(rs)` — call through `rs`, linking in `ra`.
    fn emit_jalr(&mut self, rs: GPR) -> Result<(), CompileError>;
    /// `ret`
    fn emit_ret(&mut self) -> Result<(), CompileError>;
    /// Trap word marking unreachable code.
    fn emit_unimp(&mut self) -> Result<(), CompileError>;

    /// `lr.w[.aq|.rl|.aqrl] rd, (base)`
    fn emit_lr_w(&mut self, rd: GPR, base: GPR, order: AqRl) -> Result<(), CompileError>;
    /// `sc.w[.aq|.rl|.aqrl] rd, src, (base)`
    fn emit_sc_w(&mut self, rd: GPR, src: GPR, base: GPR, order: AqRl)
    -> Result<(), CompileError>;

    /// The CFA moved by `delta` bytes (frame grown by `delta`).
    fn cfi_adjust_cfa_offset(&mut self, delta: i32);
    /// The CFA is at `offset` bytes above SP.
    fn cfi_def_cfa_offset(&mut self, offset: i32);
    /// `reg` was saved at `offset` bytes above SP.
    fn cfi_rel_offset(&mut self, reg: Riscv64Register, offset: i32);
    /// `reg` was restored to its pre-frame value.
    fn cfi_restore(&mut self, reg: Riscv64Register);
    /// Snapshot the current unwind state.
    fn cfi_remember_state(&mut self);
    /// Restore the last snapshotted unwind state.
    fn cfi_restore_state(&mut self);
}

/// The production emitter backend: encodes into a dynasm [`VecAssembler`].
pub struct Assembler {
    inner: Inner,
    labels: Vec<DynamicLabel>,
    unwind_ops: Vec<(usize, UnwindOp)>,
}

impl Assembler {
    /// Create a new riscv64 assembler.
    pub fn new(base_addr: usize) -> Self {
        Self {
            inner: Inner::new(base_addr),
            labels: Vec::new(),
            unwind_ops: Vec::new(),
        }
    }

    /// The unwind directives recorded so far, with their code offsets.
    pub fn unwind_ops(&self) -> &[(usize, UnwindOp)] {
        &self.unwind_ops
    }

    /// Finalize to machine code bytes.
    pub fn finalize(self) -> Result<Vec<u8>, CompileError> {
        self.inner
            .finalize()
            .map_err(|e| CompileError::Codegen(format!("cannot finalize assembly: {e}")))
    }

    fn dyn_label(&self, label: Label) -> DynamicLabel {
        self.labels[label.0 as usize]
    }

    fn push_word(&mut self, insn: u32) {
        for byte in insn.to_le_bytes() {
            self.inner.push(byte);
        }
    }

    fn record_unwind(&mut self, op: UnwindOp) {
        let offset = self.inner.offset().0;
        self.unwind_ops.push((offset, op));
    }
}

// LR.W and SC.W live in the A extension, outside the feature set the dynasm
// front end is configured with above; their words are packed here.
fn encode_amo(funct5: u32, order: AqRl, rs2: u32, rs1: u32, rd: u32) -> u32 {
    let (aq, rl) = order.bits();
    (funct5 << 27) | (aq << 26) | (rl << 25) | (rs2 << 20) | (rs1 << 15) | (0b010 << 12)
        | (rd << 7)
        | 0b0101111
}

const UNIMP: u32 = 0xc000_1073;

impl EmitterRiscv64 for Assembler {
    fn get_label(&mut self) -> Label {
        let label = self.inner.new_dynamic_label();
        self.labels.push(label);
        Label((self.labels.len() - 1) as u32)
    }

    fn emit_label(&mut self, label: Label) -> Result<(), CompileError> {
        let label = self.dyn_label(label);
        dynasm!(self.inner ; => label);
        Ok(())
    }

    fn get_offset(&self) -> usize {
        self.inner.offset().0
    }

    fn finalize_code(&mut self) -> Result<(), CompileError> {
        // Label resolution happens when the buffer is finalized.
        Ok(())
    }

    fn emit_lb(&mut self, rd: GPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        let rd = rd.into_index() as u8;
        let base = base.into_index() as u8;
        dynasm!(self.inner ; lb X(rd), [X(base), offset]);
        Ok(())
    }

    fn emit_lw(&mut self, rd: GPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        let rd = rd.into_index() as u8;
        let base = base.into_index() as u8;
        dynasm!(self.inner ; lw X(rd), [X(base), offset]);
        Ok(())
    }

    fn emit_lwu(&mut self, rd: GPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        let rd = rd.into_index() as u8;
        let base = base.into_index() as u8;
        dynasm!(self.inner ; lwu X(rd), [X(base), offset]);
        Ok(())
    }

    fn emit_ld(&mut self, rd: GPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        let rd = rd.into_index() as u8;
        let base = base.into_index() as u8;
        dynasm!(self.inner ; ld X(rd), [X(base), offset]);
        Ok(())
    }

    fn emit_sw(&mut self, rs: GPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        let rs = rs.into_index() as u8;
        let base = base.into_index() as u8;
        dynasm!(self.inner ; sw X(rs), [X(base), offset]);
        Ok(())
    }

    fn emit_sd(&mut self, rs: GPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        let rs = rs.into_index() as u8;
        let base = base.into_index() as u8;
        dynasm!(self.inner ; sd X(rs), [X(base), offset]);
        Ok(())
    }

    fn emit_flw(&mut self, rd: FPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        let rd = rd.into_index() as u8;
        let base = base.into_index() as u8;
        dynasm!(self.inner ; flw F(rd), [X(base), offset]);
        Ok(())
    }

    fn emit_fld(&mut self, rd: FPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        let rd = rd.into_index() as u8;
        let base = base.into_index() as u8;
        dynasm!(self.inner ; fld F(rd), [X(base), offset]);
        Ok(())
    }

    fn emit_fsw(&mut self, rs: FPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        let rs = rs.into_index() as u8;
        let base = base.into_index() as u8;
        dynasm!(self.inner ; fsw F(rs), [X(base), offset]);
        Ok(())
    }

    fn emit_fsd(&mut self, rs: FPR, base: GPR, offset: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(offset as i64));
        let rs = rs.into_index() as u8;
        let base = base.into_index() as u8;
        dynasm!(self.inner ; fsd F(rs), [X(base), offset]);
        Ok(())
    }

    fn emit_mv(&mut self, rd: GPR, rs: GPR) -> Result<(), CompileError> {
        let rd = rd.into_index() as u8;
        let rs = rs.into_index() as u8;
        dynasm!(self.inner ; mv X(rd), X(rs));
        Ok(())
    }

    fn emit_li(&mut self, rd: GPR, imm: i32) -> Result<(), CompileError> {
        // Encoded as `addi rd, zero, imm` so that `li` is always exactly one
        // instruction; wider constants are synthesized by the caller.
        debug_assert!(ImmType::Bits12.compatible_imm(imm as i64));
        let rd = rd.into_index() as u8;
        dynasm!(self.inner ; addi X(rd), zero, imm);
        Ok(())
    }

    fn emit_lui(&mut self, rd: GPR, imm20: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits20.compatible_imm(imm20 as i64));
        let rd = rd.into_index() as u8;
        // dynasm takes the already-shifted upper value, not the raw field.
        let upper = ((imm20 as i64) << 12) as i32;
        dynasm!(self.inner ; lui X(rd), upper);
        Ok(())
    }

    fn emit_addi(&mut self, rd: GPR, rs: GPR, imm: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(imm as i64));
        let rd = rd.into_index() as u8;
        let rs = rs.into_index() as u8;
        dynasm!(self.inner ; addi X(rd), X(rs), imm);
        Ok(())
    }

    fn emit_addiw(&mut self, rd: GPR, rs: GPR, imm: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(imm as i64));
        let rd = rd.into_index() as u8;
        let rs = rs.into_index() as u8;
        dynasm!(self.inner ; addiw X(rd), X(rs), imm);
        Ok(())
    }

    fn emit_add(&mut self, rd: GPR, rs1: GPR, rs2: GPR) -> Result<(), CompileError> {
        let rd = rd.into_index() as u8;
        let rs1 = rs1.into_index() as u8;
        let rs2 = rs2.into_index() as u8;
        dynasm!(self.inner ; add X(rd), X(rs1), X(rs2));
        Ok(())
    }

    fn emit_andi(&mut self, rd: GPR, rs: GPR, imm: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(imm as i64));
        let rd = rd.into_index() as u8;
        let rs = rs.into_index() as u8;
        dynasm!(self.inner ; andi X(rd), X(rs), imm);
        Ok(())
    }

    fn emit_ori(&mut self, rd: GPR, rs: GPR, imm: i32) -> Result<(), CompileError> {
        debug_assert!(ImmType::Bits12.compatible_imm(imm as i64));
        let rd = rd.into_index() as u8;
        let rs = rs.into_index() as u8;
        dynasm!(self.inner ; ori X(rd), X(rs), imm);
        Ok(())
    }

    fn emit_slli(&mut self, rd: GPR, rs: GPR, shamt: u32) -> Result<(), CompileError> {
        debug_assert!(shamt < 64);
        let rd = rd.into_index() as u8;
        let rs = rs.into_index() as u8;
        dynasm!(self.inner ; slli X(rd), X(rs), shamt);
        Ok(())
    }

    fn emit_slliw(&mut self, rd: GPR, rs: GPR, shamt: u32) -> Result<(), CompileError> {
        debug_assert!(shamt < 32);
        let rd = rd.into_index() as u8;
        let rs = rs.into_index() as u8;
        dynasm!(self.inner ; slliw X(rd), X(rs), shamt);
        Ok(())
    }

    fn emit_beqz(&mut self, rs: GPR, label: Label) -> Result<(), CompileError> {
        let rs = rs.into_index() as u8;
        let label = self.dyn_label(label);
        dynasm!(self.inner ; beqz X(rs), => label);
        Ok(())
    }

    fn emit_bnez(&mut self, rs: GPR, label: Label) -> Result<(), CompileError> {
        let rs = rs.into_index() as u8;
        let label = self.dyn_label(label);
        dynasm!(self.inner ; bnez X(rs), => label);
        Ok(())
    }

    fn emit_bgez(&mut self, rs: GPR, label: Label) -> Result<(), CompileError> {
        let rs = rs.into_index() as u8;
        let label = self.dyn_label(label);
        dynasm!(self.inner ; bgez X(rs), => label);
        Ok(())
    }

    fn emit_bltz(&mut self, rs: GPR, label: Label) -> Result<(), CompileError> {
        let rs = rs.into_index() as u8;
        let label = self.dyn_label(label);
        dynasm!(self.inner ; bltz X(rs), => label);
        Ok(())
    }

    fn emit_bne(&mut self, rs1: GPR, rs2: GPR, label: Label) -> Result<(), CompileError> {
        let rs1 = rs1.into_index() as u8;
        let rs2 = rs2.into_index() as u8;
        let label = self.dyn_label(label);
        dynasm!(self.inner ; bne X(rs1), X(rs2), => label);
        Ok(())
    }

    fn emit_j(&mut self, label: Label) -> Result<(), CompileError> {
        let label = self.dyn_label(label);
        dynasm!(self.inner ; j => label);
        Ok(())
    }

    fn emit_jr(&mut self, rs: GPR) -> Result<(), CompileError> {
        let rs = rs.into_index() as u8;
        dynasm!(self.inner ; jalr zero, X(rs), 0);
        Ok(())
    }

    fn emit_jalr(&mut self, rs: GPR) -> Result<(), CompileError> {
        let rs = rs.into_index() as u8;
        dynasm!(self.inner ; jalr ra, X(rs), 0);
        Ok(())
    }

    fn emit_ret(&mut self) -> Result<(), CompileError> {
        dynasm!(self.inner ; ret);
        Ok(())
    }

    fn emit_unimp(&mut self) -> Result<(), CompileError> {
        self.push_word(UNIMP);
        Ok(())
    }

    fn emit_lr_w(&mut self, rd: GPR, base: GPR, order: AqRl) -> Result<(), CompileError> {
        self.push_word(encode_amo(
            0b00010,
            order,
            0,
            base.into_index() as u32,
            rd.into_index() as u32,
        ));
        Ok(())
    }

    fn emit_sc_w(
        &mut self,
        rd: GPR,
        src: GPR,
        base: GPR,
        order: AqRl,
    ) -> Result<(), CompileError> {
        self.push_word(encode_amo(
            0b00011,
            order,
            src.into_index() as u32,
            base.into_index() as u32,
            rd.into_index() as u32,
        ));
        Ok(())
    }

    fn cfi_adjust_cfa_offset(&mut self, delta: i32) {
        self.record_unwind(UnwindOp::AdjustCfaOffset(delta));
    }

    fn cfi_def_cfa_offset(&mut self, offset: i32) {
        self.record_unwind(UnwindOp::DefCfaOffset(offset));
    }

    fn cfi_rel_offset(&mut self, reg: Riscv64Register, offset: i32) {
        self.record_unwind(UnwindOp::RelOffset(reg, offset));
    }

    fn cfi_restore(&mut self, reg: Riscv64Register) {
        self.record_unwind(UnwindOp::Restore(reg));
    }

    fn cfi_remember_state(&mut self) {
        self.record_unwind(UnwindOp::RememberState);
    }

    fn cfi_restore_state(&mut self) {
        self.record_unwind(UnwindOp::RestoreState);
    }
}
