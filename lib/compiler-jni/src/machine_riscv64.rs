//! The riscv64 JNI stub machine.
//!
//! [`MachineRiscv64`] drives an [`EmitterRiscv64`] backend to produce the
//! body of a JNI transition stub: frame construction and tear-down with
//! callee-save spills, argument shuffling between the managed and native
//! conventions, reference-to-`jobject` conversion, the lock-free
//! Runnable/Native state transitions, and the suspend/exception/GC fast-path
//! tests. All register choices are fixed functions of the input, so the
//! emitted sequence is reproducible instruction for instruction.

use crate::codegen_error;
use crate::common_decl::{ArgumentLocation, JniUnaryCondition, Size};
use crate::emitter_riscv64::{AqRl, EmitterRiscv64, Label};
use crate::riscv64_decl::{
    FPR, FTMP, GPR, Riscv64Register, TMP, TMP2, TR, bits_high_to_low, bits_low_to_high,
    core_and_fp_spill_masks,
};
use mira_types::{CompileError, FrameOffset, MemberOffset, STACK_ALIGNMENT, ThreadOffset};
use mira_types::{object, reference, thread};
use more_asserts::{assert_ge, debug_assert_ge};
use smallvec::{SmallVec, smallvec};

/// Spill slot size for both GPRs and FPRs.
const SPILL_SIZE: usize = 8;

/// Immediate-operand classes of the encodings we emit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImmType {
    /// 12-bit signed immediates (I- and S-type).
    Bits12,
    /// 20-bit signed upper immediates (U-type).
    Bits20,
}

impl ImmType {
    /// Whether `imm` fits this immediate class.
    pub const fn compatible_imm(self, imm: i64) -> bool {
        match self {
            ImmType::Bits12 => imm >= -2048 && imm <= 2047,
            ImmType::Bits20 => imm >= -(1 << 19) && imm < (1 << 19),
        }
    }
}

const fn is_int12(imm: i64) -> bool {
    ImmType::Bits12.compatible_imm(imm)
}

fn gpr(reg: Riscv64Register) -> Result<GPR, CompileError> {
    match reg {
        Riscv64Register::GPR(r) => Ok(r),
        Riscv64Register::FPR(r) => Err(CompileError::Codegen(format!(
            "expected a core register, got {r}"
        ))),
    }
}

/// The riscv64 macro-assembler for JNI transition stubs.
pub struct MachineRiscv64<E: EmitterRiscv64> {
    asm: E,
    scratch_gprs: SmallVec<[GPR; 2]>,
    scratch_fprs: SmallVec<[FPR; 1]>,
    acquired: SmallVec<[Riscv64Register; 3]>,
}

impl<E: EmitterRiscv64> MachineRiscv64<E> {
    /// Creates a new machine emitting through `asm`.
    pub fn new(asm: E) -> Self {
        Self {
            asm,
            scratch_gprs: smallvec![TMP2, TMP],
            scratch_fprs: smallvec![FTMP],
            acquired: SmallVec::new(),
        }
    }

    /// The underlying emitter.
    pub fn emitter(&self) -> &E {
        &self.asm
    }

    /// Consumes the machine and returns the emitter.
    pub fn into_emitter(self) -> E {
        self.asm
    }

    /// Finalizes the emitted code.
    pub fn finalize(&mut self) -> Result<(), CompileError> {
        self.asm.finalize_code()
    }

    // ------------------------------------------------------------------
    // Scratch registers.
    //
    // The pool is strictly stack-disciplined: releases must mirror
    // acquisitions. Violations are programming errors in the stub
    // compiler, not runtime conditions, and panic immediately.

    /// Acquires the next scratch GPR ([`TMP`], then [`TMP2`]).
    pub fn acquire_scratch_gpr(&mut self) -> GPR {
        let reg = self
            .scratch_gprs
            .pop()
            .expect("scratch GPR pool exhausted");
        self.acquired.push(Riscv64Register::GPR(reg));
        reg
    }

    /// Releases a scratch GPR; must be the most recently acquired scratch.
    pub fn release_scratch_gpr(&mut self, reg: GPR) {
        match self.acquired.pop() {
            Some(Riscv64Register::GPR(r)) if r == reg => self.scratch_gprs.push(reg),
            _ => panic!("scratch registers must be released in LIFO order"),
        }
    }

    /// Acquires the scratch FPR ([`FTMP`]).
    pub fn acquire_scratch_fpr(&mut self) -> FPR {
        let reg = self
            .scratch_fprs
            .pop()
            .expect("scratch FPR pool exhausted");
        self.acquired.push(Riscv64Register::FPR(reg));
        reg
    }

    /// Releases a scratch FPR; must be the most recently acquired scratch.
    pub fn release_scratch_fpr(&mut self, reg: FPR) {
        match self.acquired.pop() {
            Some(Riscv64Register::FPR(r)) if r == reg => self.scratch_fprs.push(reg),
            _ => panic!("scratch registers must be released in LIFO order"),
        }
    }

    // ------------------------------------------------------------------
    // Labels.

    /// Creates a new label for later `bind`/`jump` calls.
    pub fn create_label(&mut self) -> Label {
        self.asm.get_label()
    }

    /// Binds `label` at the current position.
    pub fn bind(&mut self, label: Label) -> Result<(), CompileError> {
        self.asm.emit_label(label)
    }

    /// Emits an unconditional jump to `label`.
    pub fn jump(&mut self, label: Label) -> Result<(), CompileError> {
        self.asm.emit_j(label)
    }

    // ------------------------------------------------------------------
    // Frame manager.

    /// Emits code that creates an activation on the stack.
    ///
    /// Saves walk from the frame top downward: RA first (if present),
    /// remaining GPR saves from highest index to lowest, then FPR saves the
    /// same way. The layout is a fixed function of the save set, so two call
    /// sites with the same set produce identical code.
    pub fn build_frame(
        &mut self,
        frame_size: u32,
        method_reg: Option<GPR>,
        callee_saves: &[Riscv64Register],
    ) -> Result<(), CompileError> {
        // Must at least have space for the method pointer if we are going to
        // spill it.
        debug_assert_ge!(
            frame_size as usize,
            (callee_saves.len() + usize::from(method_reg.is_some())) * SPILL_SIZE
        );
        self.increase_frame_size(frame_size)?;

        let (core_mask, fp_mask) = core_and_fp_spill_masks(callee_saves);
        let ra_bit = 1u32 << GPR::Ra.into_index();
        let mut offset = frame_size as i32;
        if core_mask & ra_bit != 0 {
            offset -= SPILL_SIZE as i32;
            self.store_to_base(GPR::Sp, offset, GPR::Ra.into(), Size::S64)?;
            self.asm.cfi_rel_offset(GPR::Ra.into(), offset);
        }
        for index in bits_high_to_low(core_mask & !ra_bit) {
            let reg = GPR::from_index(index).unwrap();
            offset -= SPILL_SIZE as i32;
            self.store_to_base(GPR::Sp, offset, reg.into(), Size::S64)?;
            self.asm.cfi_rel_offset(reg.into(), offset);
        }
        for index in bits_high_to_low(fp_mask) {
            let reg = FPR::from_index(index).unwrap();
            offset -= SPILL_SIZE as i32;
            self.store_to_base(GPR::Sp, offset, reg.into(), Size::S64)?;
            self.asm.cfi_rel_offset(reg.into(), offset);
        }

        if let Some(method) = method_reg {
            // The method pointer arrives in the first argument register.
            debug_assert_eq!(method, GPR::A0);
            self.store_to_base(GPR::Sp, 0, method.into(), Size::S64)?;
        }
        Ok(())
    }

    /// Emits code that removes an activation from the stack: the exact
    /// mirror of [`MachineRiscv64::build_frame`], followed by `ret`.
    pub fn remove_frame(
        &mut self,
        frame_size: u32,
        callee_saves: &[Riscv64Register],
        _may_suspend: bool,
    ) -> Result<(), CompileError> {
        self.asm.cfi_remember_state();

        let (core_mask, fp_mask) = core_and_fp_spill_masks(callee_saves);
        let ra_bit = 1u32 << GPR::Ra.into_index();
        let mut offset = frame_size as i32 - (callee_saves.len() * SPILL_SIZE) as i32;
        for index in bits_low_to_high(fp_mask) {
            let reg = FPR::from_index(index).unwrap();
            self.load_from_base(reg.into(), GPR::Sp, offset, Size::S64)?;
            self.asm.cfi_restore(reg.into());
            offset += SPILL_SIZE as i32;
        }
        for index in bits_low_to_high(core_mask & !ra_bit) {
            let reg = GPR::from_index(index).unwrap();
            self.load_from_base(reg.into(), GPR::Sp, offset, Size::S64)?;
            self.asm.cfi_restore(reg.into());
            offset += SPILL_SIZE as i32;
        }
        if core_mask & ra_bit != 0 {
            self.load_from_base(GPR::Ra.into(), GPR::Sp, offset, Size::S64)?;
            self.asm.cfi_restore(GPR::Ra.into());
            offset += SPILL_SIZE as i32;
        }
        debug_assert_eq!(offset, frame_size as i32);

        self.decrease_frame_size(frame_size)?;
        self.asm.emit_ret()?;

        // Keep valid unwind info for any code that follows the exit block.
        self.asm.cfi_restore_state();
        self.asm.cfi_def_cfa_offset(frame_size as i32);
        Ok(())
    }

    /// Grows the frame by `adjust` bytes (no-op for zero).
    pub fn increase_frame_size(&mut self, adjust: u32) -> Result<(), CompileError> {
        if adjust != 0 {
            if adjust as usize % STACK_ALIGNMENT != 0 {
                codegen_error!("frame adjustment {adjust} is not stack-aligned");
            }
            self.add_const64(GPR::Sp, GPR::Sp, -i64::from(adjust))?;
            self.asm.cfi_adjust_cfa_offset(adjust as i32);
        }
        Ok(())
    }

    /// Shrinks the frame by `adjust` bytes (no-op for zero).
    pub fn decrease_frame_size(&mut self, adjust: u32) -> Result<(), CompileError> {
        if adjust != 0 {
            if adjust as usize % STACK_ALIGNMENT != 0 {
                codegen_error!("frame adjustment {adjust} is not stack-aligned");
            }
            self.add_const64(GPR::Sp, GPR::Sp, i64::from(adjust))?;
            self.asm.cfi_adjust_cfa_offset(-(adjust as i32));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stores and loads.

    /// Stores `src` to a slot of the current frame.
    pub fn store(
        &mut self,
        offs: FrameOffset,
        src: Riscv64Register,
        size: Size,
    ) -> Result<(), CompileError> {
        self.store_to_base(GPR::Sp, offs.value(), src, size)
    }

    /// Stores `src` to a field of the object held in `base`.
    pub fn store_to(
        &mut self,
        base: Riscv64Register,
        offs: MemberOffset,
        src: Riscv64Register,
        size: Size,
    ) -> Result<(), CompileError> {
        let base = gpr(base)?;
        self.store_to_base(base, offs.value(), src, size)
    }

    /// Stores a native pointer to a slot of the current frame.
    pub fn store_raw_ptr(
        &mut self,
        offs: FrameOffset,
        src: Riscv64Register,
    ) -> Result<(), CompileError> {
        self.store_to_base(GPR::Sp, offs.value(), src, Size::S64)
    }

    /// Publishes SP in the thread control block, optionally tagged to mark
    /// the frame as a JNI stub frame.
    pub fn store_stack_pointer_to_thread(
        &mut self,
        offs: ThreadOffset,
        tag_sp: bool,
    ) -> Result<(), CompileError> {
        if tag_sp {
            let tmp = self.acquire_scratch_gpr();
            self.asm.emit_ori(tmp, GPR::Sp, 0x2)?;
            self.store_to_base(TR, offs.value(), tmp.into(), Size::S64)?;
            self.release_scratch_gpr(tmp);
        } else {
            self.store_to_base(TR, offs.value(), GPR::Sp.into(), Size::S64)?;
        }
        Ok(())
    }

    /// Loads `dest` from a slot of the current frame.
    pub fn load(
        &mut self,
        dest: Riscv64Register,
        offs: FrameOffset,
        size: Size,
    ) -> Result<(), CompileError> {
        self.load_from_base(dest, GPR::Sp, offs.value(), size)
    }

    /// Loads `dest` from a field of the object held in `base`.
    pub fn load_from(
        &mut self,
        dest: Riscv64Register,
        base: Riscv64Register,
        offs: MemberOffset,
        size: Size,
    ) -> Result<(), CompileError> {
        let base = gpr(base)?;
        self.load_from_base(dest, base, offs.value(), size)
    }

    /// Loads a native pointer from the thread control block.
    pub fn load_raw_ptr_from_thread(
        &mut self,
        dest: Riscv64Register,
        offs: ThreadOffset,
    ) -> Result<(), CompileError> {
        self.load_from_base(dest, TR, offs.value(), Size::S64)
    }

    /// Loads a GC root without a read barrier (zero-extending 32-bit load).
    pub fn load_gc_root_without_read_barrier(
        &mut self,
        dest: Riscv64Register,
        base: Riscv64Register,
        offs: MemberOffset,
    ) -> Result<(), CompileError> {
        let dest = gpr(dest)?;
        let base = gpr(base)?;
        self.load_unsigned_word(dest, base, offs.value())
    }

    // ------------------------------------------------------------------
    // Moves.

    /// Register-to-register move; no-op when `dest` equals `src`.
    ///
    /// Only used for moving between GPRs: FP argument registers hold the
    /// same arguments in the managed and native ABIs.
    pub fn mov(
        &mut self,
        dest: Riscv64Register,
        src: Riscv64Register,
        _size: Size,
    ) -> Result<(), CompileError> {
        let dest = gpr(dest)?;
        let src = gpr(src)?;
        if dest != src {
            self.asm.emit_mv(dest, src)?;
        }
        Ok(())
    }

    /// Materializes a constant in a GPR.
    pub fn move_const(&mut self, dest: Riscv64Register, value: u64) -> Result<(), CompileError> {
        let dest = gpr(dest)?;
        self.load_immediate(dest, value as i64)
    }

    /// The native ABI already sign-extends integral returns.
    pub fn sign_extend(
        &mut self,
        _reg: Riscv64Register,
        _size: Size,
    ) -> Result<(), CompileError> {
        Err(CompileError::Unsupported(
            "sign_extend: the result is already sign-extended in the native ABI".to_string(),
        ))
    }

    /// The native ABI already zero-extends narrow unsigned returns.
    pub fn zero_extend(
        &mut self,
        _reg: Riscv64Register,
        _size: Size,
    ) -> Result<(), CompileError> {
        Err(CompileError::Unsupported(
            "zero_extend: the result is already zero-extended in the native ABI".to_string(),
        ))
    }

    /// Copies the thread pointer into `dest`.
    pub fn get_current_thread(&mut self, dest: Riscv64Register) -> Result<(), CompileError> {
        self.mov(dest, TR.into(), Size::S64)
    }

    /// Spills the thread pointer to a slot of the current frame.
    pub fn store_current_thread(&mut self, offs: FrameOffset) -> Result<(), CompileError> {
        self.store_to_base(GPR::Sp, offs.value(), TR.into(), Size::S64)
    }

    // ------------------------------------------------------------------
    // Calls.

    /// Tail-calls the code pointer held at `base + offs`.
    pub fn jump_indirect(
        &mut self,
        base: Riscv64Register,
        offs: MemberOffset,
    ) -> Result<(), CompileError> {
        let base = gpr(base)?;
        let tmp = self.acquire_scratch_gpr();
        // The target register doubles as the adjustment register.
        let offset = offs.value();
        if is_int12(offset as i64) {
            self.asm.emit_ld(tmp, base, offset)?;
        } else {
            let (adjusted_base, remainder) = self.adjust_into(tmp, base, offset)?;
            self.asm.emit_ld(tmp, adjusted_base, remainder)?;
        }
        self.asm.emit_jr(tmp)?;
        self.release_scratch_gpr(tmp);
        Ok(())
    }

    /// Calls the code pointer held at `base + offs`, linking through RA.
    pub fn call(
        &mut self,
        base: Riscv64Register,
        offs: MemberOffset,
    ) -> Result<(), CompileError> {
        let base = gpr(base)?;
        self.load_from_base(GPR::Ra.into(), base, offs.value(), Size::S64)?;
        self.asm.emit_jalr(GPR::Ra)
    }

    /// Calls the entry point held in the thread control block.
    pub fn call_from_thread(&mut self, offs: ThreadOffset) -> Result<(), CompileError> {
        self.load_from_base(GPR::Ra.into(), TR, offs.value(), Size::S64)?;
        self.asm.emit_jalr(GPR::Ra)
    }

    // ------------------------------------------------------------------
    // Argument mover.

    /// Relocates every argument from its managed-convention location to its
    /// native-convention location, converting marked references to
    /// `jobject` handles.
    ///
    /// Stack destinations resolve immediately (stack slots are never read as
    /// later sources). Register destinations fill in passes that only write
    /// a register once it is no longer needed as a source; the calling
    /// conventions guarantee the mapping has no true register cycle, so
    /// every pass makes progress.
    pub fn move_arguments(
        &mut self,
        dests: &[ArgumentLocation],
        srcs: &[ArgumentLocation],
        refs: &[Option<FrameOffset>],
    ) -> Result<(), CompileError> {
        let arg_count = dests.len();
        if srcs.len() != arg_count || refs.len() != arg_count {
            codegen_error!(
                "argument location slices differ in length: {} dests, {} srcs, {} refs",
                arg_count,
                srcs.len(),
                refs.len()
            );
        }

        // Collect registers to move while storing/copying args to stack
        // slots. Convert processed references to `jobject`.
        let mut src_regs = 0u64;
        let mut dest_regs = 0u64;
        for i in 0..arg_count {
            let src = srcs[i];
            let dest = dests[i];
            let reference = refs[i];
            if reference.is_some() {
                if src.size() != Size::S32 || dest.size() != Size::S64 {
                    codegen_error!("reference argument {i} must widen from 4 to 8 bytes");
                }
            } else if src.size().bytes() > dest.size().bytes() {
                codegen_error!("narrowing move for argument {i}");
            }
            match dest {
                ArgumentLocation::Register { reg: dest_reg, .. } => {
                    let same = matches!(src, ArgumentLocation::Register { reg, .. } if reg == dest_reg);
                    if same {
                        // No move needed, but the reference still becomes a
                        // `jobject`. Argument 0 is the non-null `this`.
                        if let Some(ref_offset) = reference {
                            self.create_jobject(dest_reg, ref_offset, dest_reg, i != 0)?;
                        }
                    } else {
                        if let ArgumentLocation::Register { reg, .. } = src {
                            src_regs |= reg.mask();
                        }
                        dest_regs |= dest_reg.mask();
                    }
                }
                ArgumentLocation::Stack {
                    offset: dest_offset,
                    size: dest_size,
                } => {
                    let (reg, tmp) = match src {
                        ArgumentLocation::Register { reg, .. } => (reg, None),
                        ArgumentLocation::Stack {
                            offset: src_offset,
                            size: src_size,
                        } => {
                            let tmp = self.acquire_scratch_gpr();
                            if reference.is_some() {
                                // Loaded only for the null check; zero-extend
                                // the reference.
                                self.load_unsigned_word(tmp, GPR::Sp, src_offset.value())?;
                            } else {
                                self.load_from_base(
                                    tmp.into(),
                                    GPR::Sp,
                                    src_offset.value(),
                                    src_size,
                                )?;
                            }
                            (Riscv64Register::GPR(tmp), Some(tmp))
                        }
                    };
                    if let Some(ref_offset) = reference {
                        debug_assert_ne!(i, 0);
                        self.create_jobject(reg, ref_offset, reg, true)?;
                    }
                    self.store_to_base(GPR::Sp, dest_offset.value(), reg, dest_size)?;
                    if let Some(tmp) = tmp {
                        self.release_scratch_gpr(tmp);
                    }
                }
            }
        }

        // Fill destination registers. There are no cycles, so this simple
        // algorithm makes progress on every pass.
        while dest_regs != 0 {
            let old_dest_regs = dest_regs;
            for i in 0..arg_count {
                let src = srcs[i];
                let dest = dests[i];
                let reference = refs[i];
                let ArgumentLocation::Register {
                    reg: dest_reg,
                    size: dest_size,
                } = dest
                else {
                    continue; // Stored in the first loop above.
                };
                let dest_mask = dest_reg.mask();
                if dest_mask & dest_regs == 0 {
                    continue; // Equals source, or already filled.
                }
                if dest_mask & src_regs != 0 {
                    continue; // Cannot clobber this register yet.
                }
                match src {
                    ArgumentLocation::Register { reg: src_reg, .. } => {
                        if let Some(ref_offset) = reference {
                            // The `this` argument stays in its register and
                            // was handled above.
                            debug_assert_ne!(i, 0);
                            self.create_jobject(dest_reg, ref_offset, src_reg, true)?;
                        } else {
                            self.mov(dest_reg, src_reg, dest_size)?;
                        }
                        src_regs &= !src_reg.mask(); // The source is consumed.
                    }
                    ArgumentLocation::Stack { offset, size } => {
                        self.load_from_base(dest_reg, GPR::Sp, offset.value(), size)?;
                        // The managed ABI has enough argument registers to
                        // hold every reference that ends up in a native
                        // register, so a stack source is never a reference.
                        debug_assert!(reference.is_none());
                    }
                }
                dest_regs &= !dest_mask; // The destination is filled.
            }
            if dest_regs == old_dest_regs {
                codegen_error!("cyclic argument mapping; no progress in the register fill loop");
            }
            debug_assert_eq!(dest_regs & !old_dest_regs, 0);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reference/handle conversion.

    /// Turns the spilled reference at `spilled_reference_offset` into a
    /// `jobject` in `dest`: the address of the spill slot, or null if the
    /// reference register holds null and `null_allowed`.
    pub fn create_jobject(
        &mut self,
        dest: Riscv64Register,
        spilled_reference_offset: FrameOffset,
        ref_reg: Riscv64Register,
        null_allowed: bool,
    ) -> Result<(), CompileError> {
        let dest = gpr(dest)?;
        let ref_reg = gpr(ref_reg)?;
        let mut null_label = None;
        if null_allowed {
            if dest != ref_reg {
                self.asm.emit_li(dest, 0)?;
            }
            let label = self.asm.get_label();
            self.asm.emit_beqz(ref_reg, label)?;
            null_label = Some(label);
        }
        self.add_const64(dest, GPR::Sp, i64::from(spilled_reference_offset.value()))?;
        if let Some(label) = null_label {
            self.asm.emit_label(label)?;
        }
        Ok(())
    }

    /// Fast-path decode of a `jobject` back into an object reference: null
    /// passes through to `resume`, (weak) global handles go to `slow_path`,
    /// anything else is a transition or local handle whose kind tag is
    /// stripped before one indirection fetches the referent.
    pub fn decode_jni_transition_or_local_jobject(
        &mut self,
        reg: Riscv64Register,
        slow_path: Label,
        resume: Label,
    ) -> Result<(), CompileError> {
        let reg = gpr(reg)?;
        self.asm.emit_beqz(reg, resume)?;
        let tmp = self.acquire_scratch_gpr();
        self.asm
            .emit_andi(tmp, reg, reference::GLOBAL_OR_WEAK_GLOBAL_MASK as i32)?;
        self.asm.emit_bnez(tmp, slow_path)?;
        self.release_scratch_gpr(tmp);
        self.asm.emit_andi(reg, reg, !reference::KIND_MASK as i32)?;
        self.asm.emit_lw(reg, reg, 0)
    }

    // ------------------------------------------------------------------
    // Thread state transitions.

    /// Fast path for leaving managed code: CAS the thread state from
    /// Runnable (zero) to Native with release ordering, then clear the
    /// held-mutator-lock slot. Any set flag routes to `label`.
    ///
    /// `scratch_regs` must be at least two callee-save core registers,
    /// already spilled; argument registers are preserved.
    pub fn try_to_transition_from_runnable_to_native(
        &mut self,
        label: Label,
        scratch_regs: &[Riscv64Register],
    ) -> Result<(), CompileError> {
        debug_assert_ge!(scratch_regs.len(), 2);
        let scratch = gpr(scratch_regs[0])?;
        let scratch2 = gpr(scratch_regs[1])?;

        self.transition_state_cas(
            scratch,
            scratch2,
            thread::ThreadState::Runnable.stored_value(),
            thread::ThreadState::Native.stored_value(),
            AqRl::None,
            AqRl::Release,
            label,
        )?;

        // Clear the held-mutator-lock slot; a plain store, after the CAS
        // committed.
        self.store_to_base(
            TR,
            thread::HELD_MUTEX_MUTATOR_LOCK_OFFSET.value(),
            GPR::Zero.into(),
            Size::S64,
        )
    }

    /// Fast path for re-entering managed code: CAS the thread state from
    /// Native back to Runnable (zero) with acquire ordering, then record the
    /// mutator lock as held. Any other state or flag routes to `label`.
    ///
    /// `scratch_regs` must be core argument registers disjoint from
    /// `return_reg`, which is preserved.
    pub fn try_to_transition_from_native_to_runnable(
        &mut self,
        label: Label,
        scratch_regs: &[Riscv64Register],
        return_reg: Option<Riscv64Register>,
    ) -> Result<(), CompileError> {
        debug_assert_ge!(scratch_regs.len(), 2);
        let scratch = gpr(scratch_regs[0])?;
        let scratch2 = gpr(scratch_regs[1])?;
        if let Some(ret) = return_reg {
            debug_assert_ne!(Riscv64Register::GPR(scratch), ret);
            debug_assert_ne!(Riscv64Register::GPR(scratch2), ret);
        }

        self.transition_state_cas(
            scratch,
            scratch2,
            thread::ThreadState::Native.stored_value(),
            thread::ThreadState::Runnable.stored_value(),
            AqRl::Acquire,
            AqRl::None,
            label,
        )?;

        // Record the mutator lock as held again.
        self.load_from_base(
            scratch.into(),
            TR,
            thread::MUTATOR_LOCK_OFFSET.value(),
            Size::S64,
        )?;
        self.store_to_base(
            TR,
            thread::HELD_MUTEX_MUTATOR_LOCK_OFFSET.value(),
            scratch.into(),
            Size::S64,
        )
    }

    /// The reusable CAS fast path over the thread's `state_and_flags` word.
    ///
    /// Exactly one of `old_state`/`new_state` is nonzero; the nonzero
    /// encoding is materialized in `scratch2`. A word that does not match
    /// the expected old state (for Runnable, any nonzero word; otherwise any
    /// word other than the exact encoding, other suspended states included)
    /// branches to `slow_path`. A failed store-conditional retries.
    fn transition_state_cas(
        &mut self,
        scratch: GPR,
        scratch2: GPR,
        old_state: u32,
        new_state: u32,
        load_order: AqRl,
        store_order: AqRl,
        slow_path: Label,
    ) -> Result<(), CompileError> {
        debug_assert!(old_state == 0 || new_state == 0);
        // LR/SC address the flags word through the bare thread register.
        debug_assert_eq!(thread::FLAGS_OFFSET.value(), 0);

        let state = old_state | new_state;
        let retry = self.asm.get_label();
        self.asm.emit_label(retry)?;
        self.asm.emit_lr_w(scratch, TR, load_order)?;
        self.asm.emit_li(scratch2, state as i32)?;
        if old_state == 0 {
            self.asm.emit_bnez(scratch, slow_path)?;
        } else {
            self.asm.emit_bne(scratch, scratch2, slow_path)?;
        }
        let new_value = if new_state == 0 { GPR::Zero } else { scratch2 };
        self.asm.emit_sc_w(scratch, new_value, TR, store_order)?;
        self.asm.emit_bnez(scratch, retry)
    }

    // ------------------------------------------------------------------
    // Fast-path tests.

    /// Branches to `label` if a suspend or checkpoint request is pending.
    pub fn suspend_check(&mut self, label: Label) -> Result<(), CompileError> {
        let tmp = self.acquire_scratch_gpr();
        self.load_from_base(tmp.into(), TR, thread::FLAGS_OFFSET.value(), Size::S32)?;
        self.asm
            .emit_andi(tmp, tmp, thread::SUSPEND_OR_CHECKPOINT_REQUEST_FLAGS as i32)?;
        self.asm.emit_bnez(tmp, label)?;
        self.release_scratch_gpr(tmp);
        Ok(())
    }

    /// Branches to `label` if the thread has a pending exception.
    pub fn exception_poll(&mut self, label: Label) -> Result<(), CompileError> {
        let tmp = self.acquire_scratch_gpr();
        self.load_from_base(tmp.into(), TR, thread::EXCEPTION_OFFSET.value(), Size::S64)?;
        self.asm.emit_bnez(tmp, label)?;
        self.release_scratch_gpr(tmp);
        Ok(())
    }

    /// Hands the pending exception to the runtime's delivery entry point.
    /// The call does not return; the following stream is unreachable.
    pub fn deliver_pending_exception(&mut self) -> Result<(), CompileError> {
        // Pass the exception as the argument. A0 need not be preserved.
        self.load_from_base(
            GPR::A0.into(),
            TR,
            thread::EXCEPTION_OFFSET.value(),
            Size::S64,
        )?;
        self.load_from_base(
            GPR::Ra.into(),
            TR,
            thread::DELIVER_EXCEPTION_ENTRYPOINT_OFFSET.value(),
            Size::S64,
        )?;
        self.asm.emit_jalr(GPR::Ra)?;
        self.asm.emit_unimp()
    }

    /// Branches to `label` on the thread-local "is GC marking" flag.
    pub fn test_gc_marking(
        &mut self,
        label: Label,
        cond: JniUnaryCondition,
    ) -> Result<(), CompileError> {
        debug_assert_eq!(thread::IS_GC_MARKING_SIZE, 4);
        let tmp = self.acquire_scratch_gpr();
        self.load_from_base(
            tmp.into(),
            TR,
            thread::IS_GC_MARKING_OFFSET.value(),
            Size::S32,
        )?;
        match cond {
            JniUnaryCondition::Zero => self.asm.emit_beqz(tmp, label)?,
            JniUnaryCondition::NotZero => self.asm.emit_bnez(tmp, label)?,
        }
        self.release_scratch_gpr(tmp);
        Ok(())
    }

    /// Branches to `label` on the mark bit of `ref_reg`'s monitor word.
    pub fn test_mark_bit(
        &mut self,
        ref_reg: Riscv64Register,
        label: Label,
        cond: JniUnaryCondition,
    ) -> Result<(), CompileError> {
        let ref_reg = gpr(ref_reg)?;
        let tmp = self.acquire_scratch_gpr();
        self.load_from_base(
            tmp.into(),
            ref_reg,
            object::MONITOR_OFFSET.value(),
            Size::S32,
        )?;
        // Move the bit into the sign position so that one BGEZ/BLTZ tests
        // it; extracting it for BEQZ/BNEZ would take one more instruction.
        self.asm
            .emit_slliw(tmp, tmp, 31 - object::lock_word::MARK_BIT_STATE_SHIFT)?;
        match cond {
            JniUnaryCondition::Zero => self.asm.emit_bgez(tmp, label)?,
            JniUnaryCondition::NotZero => self.asm.emit_bltz(tmp, label)?,
        }
        self.release_scratch_gpr(tmp);
        Ok(())
    }

    /// Branches to `label` if the byte at the absolute `address` is nonzero.
    pub fn test_byte_and_jump_if_not_zero(
        &mut self,
        address: u64,
        label: Label,
    ) -> Result<(), CompileError> {
        let address = address as i64;
        // Sign-adjusted low 12 bits; the remainder is 4 KiB aligned-ish and
        // cheap to synthesize.
        let small_offset = (address & 0xfff) - ((address & 0x800) << 1);
        let remainder = address - small_offset;
        let tmp = self.acquire_scratch_gpr();
        self.load_immediate(tmp, remainder)?;
        self.asm.emit_lb(tmp, tmp, small_offset as i32)?;
        self.asm.emit_bnez(tmp, label)?;
        self.release_scratch_gpr(tmp);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Addressing and immediate synthesis.

    /// `rd = rs + imm` for an arbitrary 64-bit `imm`. The destination is
    /// written exactly once, by the final instruction, so an interrupted
    /// sequence never leaves SP adjusted halfway.
    fn add_const64(&mut self, rd: GPR, rs: GPR, imm: i64) -> Result<(), CompileError> {
        if is_int12(imm) {
            self.asm.emit_addi(rd, rs, imm as i32)
        } else if (-4096..=4094).contains(&imm) {
            // Two `addi`s via a scratch register.
            let tmp = self.acquire_scratch_gpr();
            let half = if imm > 0 { 2047 } else { -2048 };
            self.asm.emit_addi(tmp, rs, half)?;
            self.asm.emit_addi(rd, tmp, (imm - i64::from(half)) as i32)?;
            self.release_scratch_gpr(tmp);
            Ok(())
        } else if imm & 0xfff == 0 && ImmType::Bits20.compatible_imm(imm >> 12) {
            let tmp = self.acquire_scratch_gpr();
            self.asm.emit_lui(tmp, (imm >> 12) as i32)?;
            self.asm.emit_add(rd, rs, tmp)?;
            self.release_scratch_gpr(tmp);
            Ok(())
        } else {
            let tmp = self.acquire_scratch_gpr();
            self.load_immediate(tmp, imm)?;
            self.asm.emit_add(rd, rs, tmp)?;
            self.release_scratch_gpr(tmp);
            Ok(())
        }
    }

    /// Materializes `imm` in `rd` with the shortest sequence this layer
    /// knows: `li`, `li`+`slli` for shifted 12-bit values, `lui`(+`addiw`)
    /// for 32-bit values, 12-bit chunking beyond that.
    fn load_immediate(&mut self, rd: GPR, imm: i64) -> Result<(), CompileError> {
        if is_int12(imm) {
            self.asm.emit_li(rd, imm as i32)
        } else if is_int12(imm >> imm.trailing_zeros()) {
            let shift = imm.trailing_zeros();
            self.asm.emit_li(rd, (imm >> shift) as i32)?;
            self.asm.emit_slli(rd, rd, shift)
        } else if i64::from(imm as i32) == imm {
            let lo12 = (imm << 52) >> 52;
            let hi20 = (((imm - lo12) >> 12) << 44) >> 44;
            self.asm.emit_lui(rd, hi20 as i32)?;
            if lo12 != 0 {
                self.asm.emit_addiw(rd, rd, lo12 as i32)?;
            }
            Ok(())
        } else {
            let lo12 = (imm << 52) >> 52;
            self.load_immediate(rd, (imm - lo12) >> 12)?;
            self.asm.emit_slli(rd, rd, 12)?;
            if lo12 != 0 {
                self.asm.emit_addi(rd, rd, lo12 as i32)?;
            }
            Ok(())
        }
    }

    /// Folds an out-of-range displacement into `tmp`, returning the new
    /// base and the in-range remainder. Adjustments keep the remainder
    /// 8-byte aligned where possible so aligned slots stay aligned.
    fn adjust_into(
        &mut self,
        tmp: GPR,
        base: GPR,
        offset: i32,
    ) -> Result<(GPR, i32), CompileError> {
        debug_assert!(!is_int12(offset as i64));
        if (0..=4094).contains(&offset) {
            let adjustment = if offset - 2040 <= 2047 {
                2040
            } else if offset - 2044 <= 2047 {
                2044
            } else {
                offset / 2
            };
            self.asm.emit_addi(tmp, base, adjustment)?;
            Ok((tmp, offset - adjustment))
        } else if (-4096..0).contains(&offset) {
            self.asm.emit_addi(tmp, base, -2048)?;
            Ok((tmp, offset + 2048))
        } else {
            let lo12 = ((i64::from(offset) << 52) >> 52) as i32;
            let hi20 = (i64::from(offset) - i64::from(lo12)) >> 12;
            self.asm.emit_lui(tmp, hi20 as i32)?;
            self.asm.emit_add(tmp, tmp, base)?;
            Ok((tmp, lo12))
        }
    }

    /// Resolves `base + offset` into an addressable operand, acquiring a
    /// scratch register for the adjustment when the displacement does not
    /// fit 12 bits. The caller releases the returned scratch after use.
    fn mem_operand(
        &mut self,
        base: GPR,
        offset: i32,
    ) -> Result<(GPR, i32, Option<GPR>), CompileError> {
        if is_int12(offset as i64) {
            return Ok((base, offset, None));
        }
        let tmp = self.acquire_scratch_gpr();
        let (base, remainder) = self.adjust_into(tmp, base, offset)?;
        Ok((base, remainder, Some(tmp)))
    }

    fn store_to_base(
        &mut self,
        base: GPR,
        offset: i32,
        src: Riscv64Register,
        size: Size,
    ) -> Result<(), CompileError> {
        let (base, offset, tmp) = self.mem_operand(base, offset)?;
        match (src, size) {
            (Riscv64Register::GPR(r), Size::S32) => self.asm.emit_sw(r, base, offset)?,
            (Riscv64Register::GPR(r), Size::S64) => self.asm.emit_sd(r, base, offset)?,
            (Riscv64Register::FPR(r), Size::S32) => self.asm.emit_fsw(r, base, offset)?,
            (Riscv64Register::FPR(r), Size::S64) => self.asm.emit_fsd(r, base, offset)?,
        }
        if let Some(tmp) = tmp {
            self.release_scratch_gpr(tmp);
        }
        Ok(())
    }

    fn load_from_base(
        &mut self,
        dest: Riscv64Register,
        base: GPR,
        offset: i32,
        size: Size,
    ) -> Result<(), CompileError> {
        let (base, offset, tmp) = self.mem_operand(base, offset)?;
        match (dest, size) {
            // The native convention widens integers narrower than XLEN
            // "according to the sign of their type up to 32 bits, then
            // sign-extended to XLEN bits"; a plain `lw` gives exactly that,
            // and the upper half of a `float` argument is undefined anyway.
            (Riscv64Register::GPR(r), Size::S32) => self.asm.emit_lw(r, base, offset)?,
            (Riscv64Register::GPR(r), Size::S64) => self.asm.emit_ld(r, base, offset)?,
            (Riscv64Register::FPR(r), Size::S32) => self.asm.emit_flw(r, base, offset)?,
            (Riscv64Register::FPR(r), Size::S64) => self.asm.emit_fld(r, base, offset)?,
        }
        if let Some(tmp) = tmp {
            self.release_scratch_gpr(tmp);
        }
        Ok(())
    }

    fn load_unsigned_word(
        &mut self,
        dest: GPR,
        base: GPR,
        offset: i32,
    ) -> Result<(), CompileError> {
        let (base, offset, tmp) = self.mem_operand(base, offset)?;
        self.asm.emit_lwu(dest, base, offset)?;
        if let Some(tmp) = tmp {
            self.release_scratch_gpr(tmp);
        }
        Ok(())
    }
}
