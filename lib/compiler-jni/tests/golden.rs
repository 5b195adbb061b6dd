//! Golden-output tests: every sequence the stub machine emits is compared
//! instruction for instruction against its expected disassembly.

use mira_compiler_jni::recorder::RecordingAssembler;
use mira_compiler_jni::{
    ArgumentLocation, FPR, GPR, JniUnaryCondition, MachineRiscv64, Riscv64Register, Size,
};
use mira_types::{FrameOffset, MemberOffset, ThreadOffset};
use pretty_assertions::assert_eq;

fn machine() -> MachineRiscv64<RecordingAssembler> {
    MachineRiscv64::new(RecordingAssembler::new())
}

fn disasm(mut m: MachineRiscv64<RecordingAssembler>) -> String {
    m.finalize().unwrap();
    m.into_emitter().disassembly()
}

fn gpr(r: GPR) -> Riscv64Register {
    Riscv64Register::GPR(r)
}

fn fpr(r: FPR) -> Riscv64Register {
    Riscv64Register::FPR(r)
}

/// The callee-save set of the JNI stub calling convention: RA, S0-S11 and
/// FS0-FS11 (25 registers).
fn jni_callee_saves() -> Vec<Riscv64Register> {
    let mut saves = vec![gpr(GPR::Ra)];
    saves.extend(
        [
            GPR::S0,
            GPR::S1,
            GPR::S2,
            GPR::S3,
            GPR::S4,
            GPR::S5,
            GPR::S6,
            GPR::S7,
            GPR::S8,
            GPR::S9,
            GPR::S10,
            GPR::S11,
        ]
        .map(gpr),
    );
    saves.extend(
        [
            FPR::Fs0,
            FPR::Fs1,
            FPR::Fs2,
            FPR::Fs3,
            FPR::Fs4,
            FPR::Fs5,
            FPR::Fs6,
            FPR::Fs7,
            FPR::Fs8,
            FPR::Fs9,
            FPR::Fs10,
            FPR::Fs11,
        ]
        .map(fpr),
    );
    saves
}

#[test]
fn stack_frame() {
    let mut m = machine();
    let saves = jni_callee_saves();
    // 25 spill slots plus the method pointer slot.
    let frame_size = 208;

    m.build_frame(frame_size, Some(GPR::A0), &saves).unwrap();
    let mut expected = String::from(
        "addi sp, sp, -208\n\
         sd ra, 200(sp)\n\
         sd s11, 192(sp)\n\
         sd s10, 184(sp)\n\
         sd s9, 176(sp)\n\
         sd s8, 168(sp)\n\
         sd s7, 160(sp)\n\
         sd s6, 152(sp)\n\
         sd s5, 144(sp)\n\
         sd s4, 136(sp)\n\
         sd s3, 128(sp)\n\
         sd s2, 120(sp)\n\
         sd s1, 112(sp)\n\
         sd s0, 104(sp)\n\
         fsd fs11, 96(sp)\n\
         fsd fs10, 88(sp)\n\
         fsd fs9, 80(sp)\n\
         fsd fs8, 72(sp)\n\
         fsd fs7, 64(sp)\n\
         fsd fs6, 56(sp)\n\
         fsd fs5, 48(sp)\n\
         fsd fs4, 40(sp)\n\
         fsd fs3, 32(sp)\n\
         fsd fs2, 24(sp)\n\
         fsd fs1, 16(sp)\n\
         fsd fs0, 8(sp)\n\
         sd a0, 0(sp)\n",
    );

    m.remove_frame(frame_size, &saves, false).unwrap();
    expected.push_str(
        "fld fs0, 8(sp)\n\
         fld fs1, 16(sp)\n\
         fld fs2, 24(sp)\n\
         fld fs3, 32(sp)\n\
         fld fs4, 40(sp)\n\
         fld fs5, 48(sp)\n\
         fld fs6, 56(sp)\n\
         fld fs7, 64(sp)\n\
         fld fs8, 72(sp)\n\
         fld fs9, 80(sp)\n\
         fld fs10, 88(sp)\n\
         fld fs11, 96(sp)\n\
         ld s0, 104(sp)\n\
         ld s1, 112(sp)\n\
         ld s2, 120(sp)\n\
         ld s3, 128(sp)\n\
         ld s4, 136(sp)\n\
         ld s5, 144(sp)\n\
         ld s6, 152(sp)\n\
         ld s7, 160(sp)\n\
         ld s8, 168(sp)\n\
         ld s9, 176(sp)\n\
         ld s10, 184(sp)\n\
         ld s11, 192(sp)\n\
         ld ra, 200(sp)\n\
         addi sp, sp, 208\n\
         ret\n",
    );

    assert_eq!(disasm(m), expected);
}

#[test]
fn change_frame_size() {
    let mut m = machine();
    let mut expected = String::new();

    m.increase_frame_size(128).unwrap();
    expected.push_str("addi sp, sp, -128\n");
    m.decrease_frame_size(128).unwrap();
    expected.push_str("addi sp, sp, 128\n");

    // No-ops.
    m.increase_frame_size(0).unwrap();
    m.decrease_frame_size(0).unwrap();

    m.increase_frame_size(2048).unwrap();
    expected.push_str("addi sp, sp, -2048\n");
    m.decrease_frame_size(2048).unwrap();
    expected.push_str("addi t6, sp, 2047\naddi sp, t6, 1\n");

    m.increase_frame_size(4096).unwrap();
    expected.push_str("addi t6, sp, -2048\naddi sp, t6, -2048\n");
    m.decrease_frame_size(4096).unwrap();
    expected.push_str("lui t6, 1\nadd sp, sp, t6\n");

    m.increase_frame_size(6 * 1024).unwrap();
    expected.push_str("li t6, -3\nslli t6, t6, 11\nadd sp, sp, t6\n");
    m.decrease_frame_size(6 * 1024).unwrap();
    expected.push_str("li t6, 3\nslli t6, t6, 11\nadd sp, sp, t6\n");

    m.increase_frame_size(6 * 1024 + 16).unwrap();
    expected.push_str("li t6, -385\nslli t6, t6, 4\nadd sp, sp, t6\n");
    m.decrease_frame_size(6 * 1024 + 16).unwrap();
    expected.push_str("li t6, 385\nslli t6, t6, 4\nadd sp, sp, t6\n");

    assert_eq!(disasm(m), expected);
}

#[test]
fn stores() {
    let mut m = machine();
    let mut expected = String::new();

    m.store(FrameOffset(0), gpr(GPR::A0), Size::S32).unwrap();
    expected.push_str("sw a0, 0(sp)\n");
    m.store(FrameOffset(2048), gpr(GPR::S0), Size::S64).unwrap();
    expected.push_str("addi t6, sp, 2040\nsd s0, 8(t6)\n");

    m.store_to(gpr(GPR::A1), MemberOffset(256), gpr(GPR::S2), Size::S64)
        .unwrap();
    expected.push_str("sd s2, 256(a1)\n");
    m.store_to(gpr(GPR::S3), MemberOffset(4096), gpr(GPR::T1), Size::S32)
        .unwrap();
    expected.push_str("lui t6, 1\nadd t6, t6, s3\nsw t1, 0(t6)\n");

    m.store_to(gpr(GPR::A3), MemberOffset(384), fpr(FPR::Fa5), Size::S64)
        .unwrap();
    expected.push_str("fsd fa5, 384(a3)\n");
    m.store_to(gpr(GPR::S4), MemberOffset(4096 + 16), fpr(FPR::Ft10), Size::S32)
        .unwrap();
    expected.push_str("lui t6, 1\nadd t6, t6, s4\nfsw ft10, 16(t6)\n");

    m.store_raw_ptr(FrameOffset(128), gpr(GPR::A7)).unwrap();
    expected.push_str("sd a7, 128(sp)\n");
    m.store_raw_ptr(FrameOffset(6 * 1024), gpr(GPR::S11)).unwrap();
    expected.push_str("lui t6, 2\nadd t6, t6, sp\nsd s11, -2048(t6)\n");

    m.store_stack_pointer_to_thread(ThreadOffset(512), false)
        .unwrap();
    expected.push_str("sd sp, 512(s1)\n");
    m.store_stack_pointer_to_thread(ThreadOffset(3 * 1024), true)
        .unwrap();
    expected.push_str("ori t6, sp, 2\naddi t5, s1, 2040\nsd t6, 1032(t5)\n");

    assert_eq!(disasm(m), expected);
}

#[test]
fn loads() {
    let mut m = machine();
    let mut expected = String::new();

    m.load(gpr(GPR::A0), FrameOffset(0), Size::S32).unwrap();
    expected.push_str("lw a0, 0(sp)\n");
    m.load(gpr(GPR::S0), FrameOffset(2048), Size::S64).unwrap();
    expected.push_str("addi t6, sp, 2040\nld s0, 8(t6)\n");

    m.load_from(gpr(GPR::S2), gpr(GPR::A1), MemberOffset(256), Size::S64)
        .unwrap();
    expected.push_str("ld s2, 256(a1)\n");
    m.load_from(gpr(GPR::T1), gpr(GPR::S3), MemberOffset(4096), Size::S32)
        .unwrap();
    expected.push_str("lui t6, 1\nadd t6, t6, s3\nlw t1, 0(t6)\n");

    m.load_from(fpr(FPR::Fa5), gpr(GPR::A3), MemberOffset(384), Size::S64)
        .unwrap();
    expected.push_str("fld fa5, 384(a3)\n");
    m.load_from(fpr(FPR::Ft10), gpr(GPR::S4), MemberOffset(4096 + 16), Size::S32)
        .unwrap();
    expected.push_str("lui t6, 1\nadd t6, t6, s4\nflw ft10, 16(t6)\n");

    m.load_raw_ptr_from_thread(gpr(GPR::A7), ThreadOffset(512))
        .unwrap();
    expected.push_str("ld a7, 512(s1)\n");
    m.load_raw_ptr_from_thread(gpr(GPR::S11), ThreadOffset(3 * 1024))
        .unwrap();
    expected.push_str("addi t6, s1, 2040\nld s11, 1032(t6)\n");

    m.load_gc_root_without_read_barrier(gpr(GPR::T0), gpr(GPR::A0), MemberOffset(0))
        .unwrap();
    expected.push_str("lwu t0, 0(a0)\n");
    m.load_gc_root_without_read_barrier(gpr(GPR::T1), gpr(GPR::S2), MemberOffset(2048))
        .unwrap();
    expected.push_str("addi t6, s2, 2040\nlwu t1, 8(t6)\n");

    assert_eq!(disasm(m), expected);
}

#[test]
fn moves() {
    let mut m = machine();
    let mut expected = String::new();

    m.mov(gpr(GPR::A0), gpr(GPR::A1), Size::S32).unwrap();
    expected.push_str("mv a0, a1\n");
    m.mov(gpr(GPR::A2), gpr(GPR::A3), Size::S64).unwrap();
    expected.push_str("mv a2, a3\n");

    // Same-register moves are no-ops.
    m.mov(gpr(GPR::A4), gpr(GPR::A4), Size::S32).unwrap();
    m.mov(gpr(GPR::A5), gpr(GPR::A5), Size::S64).unwrap();

    m.move_const(gpr(GPR::A0), 0x1234).unwrap();
    expected.push_str("li a0, 1165\nslli a0, a0, 2\n");

    assert_eq!(disasm(m), expected);
}

#[test]
fn current_thread() {
    let mut m = machine();
    let mut expected = String::new();

    m.get_current_thread(gpr(GPR::A0)).unwrap();
    expected.push_str("mv a0, s1\n");

    m.store_current_thread(FrameOffset(256)).unwrap();
    expected.push_str("sd s1, 256(sp)\n");
    m.store_current_thread(FrameOffset(3 * 1024)).unwrap();
    expected.push_str("addi t6, sp, 2040\nsd s1, 1032(t6)\n");

    assert_eq!(disasm(m), expected);
}

#[test]
fn create_jobject() {
    let mut m = machine();
    let mut expected = String::new();

    m.create_jobject(gpr(GPR::A0), FrameOffset(8), gpr(GPR::A0), true)
        .unwrap();
    expected.push_str("beqz a0, L0\naddi a0, sp, 8\nL0:\n");

    m.create_jobject(gpr(GPR::A1), FrameOffset(12), gpr(GPR::A1), false)
        .unwrap();
    expected.push_str("addi a1, sp, 12\n");

    m.create_jobject(gpr(GPR::A2), FrameOffset(16), gpr(GPR::A3), true)
        .unwrap();
    expected.push_str("li a2, 0\nbeqz a3, L1\naddi a2, sp, 16\nL1:\n");

    m.create_jobject(gpr(GPR::A4), FrameOffset(2048), gpr(GPR::A5), false)
        .unwrap();
    expected.push_str("addi t6, sp, 2047\naddi a4, t6, 1\n");

    assert_eq!(disasm(m), expected);
}

#[test]
fn jumps_and_calls() {
    let mut m = machine();
    let mut expected = String::new();

    m.jump_indirect(gpr(GPR::A0), MemberOffset(24)).unwrap();
    expected.push_str("ld t6, 24(a0)\njr t6\n");
    m.jump_indirect(gpr(GPR::S2), MemberOffset(2048)).unwrap();
    expected.push_str("addi t6, s2, 2040\nld t6, 8(t6)\njr t6\n");

    m.call(gpr(GPR::A0), MemberOffset(32)).unwrap();
    expected.push_str("ld ra, 32(a0)\njalr ra\n");
    m.call(gpr(GPR::S2), MemberOffset(2048)).unwrap();
    expected.push_str("addi t6, s2, 2040\nld ra, 8(t6)\njalr ra\n");

    m.call_from_thread(ThreadOffset(256)).unwrap();
    expected.push_str("ld ra, 256(s1)\njalr ra\n");

    assert_eq!(disasm(m), expected);
}

#[test]
fn jump_label() {
    let mut m = machine();
    let mut expected = String::new();

    let target = m.create_label();
    let back = m.create_label();

    m.jump(target).unwrap();
    expected.push_str("j L0\n");

    m.bind(back).unwrap();
    expected.push_str("L1:\n");

    m.mov(gpr(GPR::A0), gpr(GPR::A1), Size::S64).unwrap();
    expected.push_str("mv a0, a1\n");

    m.bind(target).unwrap();
    expected.push_str("L0:\n");

    m.jump(back).unwrap();
    expected.push_str("j L1\n");

    assert_eq!(disasm(m), expected);
}

#[test]
fn move_arguments_static_with_references() {
    // Static method with parameters "LIJIJILJI": the class reference and an
    // object reference, mixed with ints and longs, spilling past A7.
    let xlen = Size::S64;
    let vreg = Size::S32;
    let dests = [
        ArgumentLocation::Register { reg: gpr(GPR::A1), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A2), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A3), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A4), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A5), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A6), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A7), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(0), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(8), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(16), size: xlen },
    ];
    let srcs = [
        ArgumentLocation::Register { reg: gpr(GPR::A0), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A1), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A2), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A3), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A4), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A5), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A6), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A7), size: vreg },
        ArgumentLocation::Stack { offset: FrameOffset(76), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(84), size: vreg },
    ];
    let refs = [
        None,
        Some(FrameOffset(40)),
        None,
        None,
        None,
        None,
        None,
        Some(FrameOffset(72)),
        None,
        None,
    ];

    let mut m = machine();
    m.move_arguments(&dests, &srcs, &refs).unwrap();
    let expected = "beqz a7, L0\n\
                    addi a7, sp, 72\n\
                    L0:\n\
                    sd a7, 0(sp)\n\
                    ld t6, 76(sp)\n\
                    sd t6, 8(sp)\n\
                    lw t6, 84(sp)\n\
                    sd t6, 16(sp)\n\
                    mv a7, a6\n\
                    mv a6, a5\n\
                    mv a5, a4\n\
                    mv a4, a3\n\
                    mv a3, a2\n\
                    li a2, 0\n\
                    beqz a1, L1\n\
                    addi a2, sp, 40\n\
                    L1:\n\
                    mv a1, a0\n";
    assert_eq!(disasm(m), expected);
}

#[test]
fn move_arguments_spill_references() {
    // The initial reference-spilling pass: plain 32-bit stores, no handles.
    let vreg = Size::S32;
    let dests = [
        ArgumentLocation::Stack { offset: FrameOffset(40), size: vreg },
        ArgumentLocation::Stack { offset: FrameOffset(72), size: vreg },
    ];
    let srcs = [
        ArgumentLocation::Register { reg: gpr(GPR::A1), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A7), size: vreg },
    ];
    let refs = [None, None];

    let mut m = machine();
    m.move_arguments(&dests, &srcs, &refs).unwrap();
    assert_eq!(disasm(m), "sw a1, 40(sp)\nsw a7, 72(sp)\n");
}

#[test]
fn move_arguments_instance_in_place() {
    // Instance method "LLIJIJIJLI": every register argument is already in
    // place; only references convert, including one loaded from the stack.
    let xlen = Size::S64;
    let vreg = Size::S32;
    let dests = [
        ArgumentLocation::Register { reg: gpr(GPR::A1), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A2), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A3), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A4), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A5), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A6), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A7), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(0), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(8), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(16), size: xlen },
    ];
    let srcs = [
        ArgumentLocation::Register { reg: gpr(GPR::A1), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A2), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A3), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A4), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A5), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A6), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A7), size: vreg },
        ArgumentLocation::Stack { offset: FrameOffset(76), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(84), size: vreg },
        ArgumentLocation::Stack { offset: FrameOffset(88), size: vreg },
    ];
    let refs = [
        Some(FrameOffset(40)),
        Some(FrameOffset(44)),
        None,
        None,
        None,
        None,
        None,
        None,
        Some(FrameOffset(84)),
        None,
    ];

    let mut m = machine();
    m.move_arguments(&dests, &srcs, &refs).unwrap();
    let expected = "addi a1, sp, 40\n\
                    beqz a2, L0\n\
                    addi a2, sp, 44\n\
                    L0:\n\
                    ld t6, 76(sp)\n\
                    sd t6, 0(sp)\n\
                    lwu t6, 84(sp)\n\
                    beqz t6, L1\n\
                    addi t6, sp, 84\n\
                    L1:\n\
                    sd t6, 8(sp)\n\
                    lw t6, 88(sp)\n\
                    sd t6, 16(sp)\n";
    assert_eq!(disasm(m), expected);
}

#[test]
fn move_arguments_fp_and_gpr_mix() {
    // Static "FDFDFDFDFDIJIJIJL": FP arguments stay put, integer arguments
    // rotate through the A registers with two stack reloads.
    let xlen = Size::S64;
    let vreg = Size::S32;
    let float = Size::S32;
    let dests = [
        ArgumentLocation::Register { reg: gpr(GPR::A1), size: xlen },
        ArgumentLocation::Register { reg: fpr(FPR::Fa0), size: float },
        ArgumentLocation::Register { reg: fpr(FPR::Fa1), size: xlen },
        ArgumentLocation::Register { reg: fpr(FPR::Fa2), size: float },
        ArgumentLocation::Register { reg: fpr(FPR::Fa3), size: xlen },
        ArgumentLocation::Register { reg: fpr(FPR::Fa4), size: float },
        ArgumentLocation::Register { reg: fpr(FPR::Fa5), size: xlen },
        ArgumentLocation::Register { reg: fpr(FPR::Fa6), size: float },
        ArgumentLocation::Register { reg: fpr(FPR::Fa7), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A2), size: float },
        ArgumentLocation::Register { reg: gpr(GPR::A3), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A4), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A5), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A6), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A7), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(0), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(8), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(16), size: xlen },
    ];
    let srcs = [
        ArgumentLocation::Register { reg: gpr(GPR::A0), size: vreg },
        ArgumentLocation::Register { reg: fpr(FPR::Fa0), size: vreg },
        ArgumentLocation::Register { reg: fpr(FPR::Fa1), size: xlen },
        ArgumentLocation::Register { reg: fpr(FPR::Fa2), size: vreg },
        ArgumentLocation::Register { reg: fpr(FPR::Fa3), size: xlen },
        ArgumentLocation::Register { reg: fpr(FPR::Fa4), size: vreg },
        ArgumentLocation::Register { reg: fpr(FPR::Fa5), size: xlen },
        ArgumentLocation::Register { reg: fpr(FPR::Fa6), size: vreg },
        ArgumentLocation::Register { reg: fpr(FPR::Fa7), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(88), size: vreg },
        ArgumentLocation::Stack { offset: FrameOffset(92), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A1), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A2), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A3), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A4), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A5), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A6), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A7), size: vreg },
    ];
    let mut refs = vec![None; 18];
    refs[17] = Some(FrameOffset(88));

    let mut m = machine();
    m.move_arguments(&dests, &srcs, &refs).unwrap();
    let expected = "sd a5, 0(sp)\n\
                    sd a6, 8(sp)\n\
                    beqz a7, L0\n\
                    addi a7, sp, 88\n\
                    L0:\n\
                    sd a7, 16(sp)\n\
                    mv a5, a2\n\
                    mv a6, a3\n\
                    mv a7, a4\n\
                    lw a2, 88(sp)\n\
                    ld a3, 92(sp)\n\
                    mv a4, a1\n\
                    mv a1, a0\n";
    assert_eq!(disasm(m), expected);
}

#[test]
fn move_arguments_critical_native() {
    // "DFDFDFDFIDJIJFDIIJ" without a JNIEnv/jclass: FP arguments in place,
    // A0 becomes live, three stack reloads interleave with register moves.
    let xlen = Size::S64;
    let vreg = Size::S32;
    let float = Size::S32;
    let dests = [
        ArgumentLocation::Register { reg: fpr(FPR::Fa0), size: xlen },
        ArgumentLocation::Register { reg: fpr(FPR::Fa1), size: float },
        ArgumentLocation::Register { reg: fpr(FPR::Fa2), size: xlen },
        ArgumentLocation::Register { reg: fpr(FPR::Fa3), size: float },
        ArgumentLocation::Register { reg: fpr(FPR::Fa4), size: xlen },
        ArgumentLocation::Register { reg: fpr(FPR::Fa5), size: float },
        ArgumentLocation::Register { reg: fpr(FPR::Fa6), size: xlen },
        ArgumentLocation::Register { reg: fpr(FPR::Fa7), size: float },
        ArgumentLocation::Register { reg: gpr(GPR::A0), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A1), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A2), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A3), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A4), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A5), size: float },
        ArgumentLocation::Register { reg: gpr(GPR::A6), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A7), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(0), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(8), size: xlen },
    ];
    let srcs = [
        ArgumentLocation::Register { reg: fpr(FPR::Fa0), size: xlen },
        ArgumentLocation::Register { reg: fpr(FPR::Fa1), size: vreg },
        ArgumentLocation::Register { reg: fpr(FPR::Fa2), size: xlen },
        ArgumentLocation::Register { reg: fpr(FPR::Fa3), size: vreg },
        ArgumentLocation::Register { reg: fpr(FPR::Fa4), size: xlen },
        ArgumentLocation::Register { reg: fpr(FPR::Fa5), size: vreg },
        ArgumentLocation::Register { reg: fpr(FPR::Fa6), size: xlen },
        ArgumentLocation::Register { reg: fpr(FPR::Fa7), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A1), size: vreg },
        ArgumentLocation::Stack { offset: FrameOffset(92), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A2), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A3), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A4), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(112), size: vreg },
        ArgumentLocation::Stack { offset: FrameOffset(116), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A5), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A6), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A7), size: xlen },
    ];
    let refs = [None; 18];

    let mut m = machine();
    m.move_arguments(&dests, &srcs, &refs).unwrap();
    let expected = "sd a6, 0(sp)\n\
                    sd a7, 8(sp)\n\
                    mv a0, a1\n\
                    ld a1, 92(sp)\n\
                    ld a6, 116(sp)\n\
                    mv a7, a5\n\
                    lw a5, 112(sp)\n";
    assert_eq!(disasm(m), expected);
}

#[test]
fn move_arguments_register_shift_chain() {
    // "JIJIJIJIJI" without a JNIEnv: a pure shift chain A0 <- A1 <- ... A7,
    // with the tail reloaded from the stack.
    let xlen = Size::S64;
    let vreg = Size::S32;
    let dests = [
        ArgumentLocation::Register { reg: gpr(GPR::A0), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A1), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A2), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A3), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A4), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A5), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A6), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A7), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(0), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(8), size: xlen },
    ];
    let srcs = [
        ArgumentLocation::Register { reg: gpr(GPR::A1), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A2), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A3), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A4), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A5), size: xlen },
        ArgumentLocation::Register { reg: gpr(GPR::A6), size: vreg },
        ArgumentLocation::Register { reg: gpr(GPR::A7), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(84), size: vreg },
        ArgumentLocation::Stack { offset: FrameOffset(88), size: xlen },
        ArgumentLocation::Stack { offset: FrameOffset(96), size: vreg },
    ];
    let refs = [None; 10];

    let mut m = machine();
    m.move_arguments(&dests, &srcs, &refs).unwrap();
    let expected = "ld t6, 88(sp)\n\
                    sd t6, 0(sp)\n\
                    lw t6, 96(sp)\n\
                    sd t6, 8(sp)\n\
                    mv a0, a1\n\
                    mv a1, a2\n\
                    mv a2, a3\n\
                    mv a3, a4\n\
                    mv a4, a5\n\
                    mv a5, a6\n\
                    mv a6, a7\n\
                    lw a7, 84(sp)\n";
    assert_eq!(disasm(m), expected);
}

#[test]
fn transitions() {
    let mut m = machine();
    let mut expected = String::new();

    let slow_path = m.create_label();
    let resume = m.create_label();
    let scratch = [gpr(GPR::T0), gpr(GPR::T1)];

    m.try_to_transition_from_runnable_to_native(slow_path, &scratch)
        .unwrap();
    expected.push_str(
        "L2:\n\
         lr.w t0, (s1)\n\
         li t1, 1\n\
         bnez t0, L0\n\
         sc.w.rl t0, t1, (s1)\n\
         bnez t0, L2\n\
         addi t6, s1, 2040\n\
         sd zero, 56(t6)\n",
    );

    m.try_to_transition_from_native_to_runnable(slow_path, &scratch, Some(gpr(GPR::A0)))
        .unwrap();
    expected.push_str(
        "L3:\n\
         lr.w.aq t0, (s1)\n\
         li t1, 1\n\
         bne t0, t1, L0\n\
         sc.w t0, zero, (s1)\n\
         bnez t0, L3\n\
         ld t0, 16(s1)\n\
         addi t6, s1, 2040\n\
         sd t0, 56(t6)\n",
    );

    m.bind(resume).unwrap();
    expected.push_str("L1:\n");

    m.remove_frame(0, &[], false).unwrap();
    expected.push_str("ret\n");

    m.bind(slow_path).unwrap();
    expected.push_str("L0:\n");

    m.jump(resume).unwrap();
    expected.push_str("j L1\n");

    assert_eq!(disasm(m), expected);
}

#[test]
fn suspend_check() {
    let mut m = machine();
    let mut expected = String::new();

    let slow_path = m.create_label();
    let resume = m.create_label();

    m.suspend_check(slow_path).unwrap();
    expected.push_str("lw t6, 0(s1)\nandi t6, t6, 1792\nbnez t6, L0\n");

    m.bind(resume).unwrap();
    expected.push_str("L1:\n");

    m.remove_frame(0, &[], false).unwrap();
    expected.push_str("ret\n");

    m.bind(slow_path).unwrap();
    expected.push_str("L0:\n");

    m.jump(resume).unwrap();
    expected.push_str("j L1\n");

    assert_eq!(disasm(m), expected);
}

#[test]
fn exception_poll_and_delivery() {
    let mut m = machine();
    let mut expected = String::new();

    let slow_path = m.create_label();

    m.exception_poll(slow_path).unwrap();
    expected.push_str("ld t6, 8(s1)\nbnez t6, L0\n");

    m.remove_frame(0, &[], false).unwrap();
    expected.push_str("ret\n");

    m.bind(slow_path).unwrap();
    expected.push_str("L0:\n");

    m.deliver_pending_exception().unwrap();
    expected.push_str("ld a0, 8(s1)\nld ra, 192(s1)\njalr ra\nunimp\n");

    assert_eq!(disasm(m), expected);
}

#[test]
fn read_barrier_tests() {
    let mut m = machine();
    let mut expected = String::new();

    let slow_path = m.create_label();
    let resume = m.create_label();

    m.test_gc_marking(slow_path, JniUnaryCondition::NotZero)
        .unwrap();
    expected.push_str("lw t6, 4(s1)\nbnez t6, L0\n");
    m.test_gc_marking(slow_path, JniUnaryCondition::Zero).unwrap();
    expected.push_str("lw t6, 4(s1)\nbeqz t6, L0\n");

    m.bind(resume).unwrap();
    expected.push_str("L1:\n");

    m.remove_frame(0, &[], false).unwrap();
    expected.push_str("ret\n");

    m.bind(slow_path).unwrap();
    expected.push_str("L0:\n");

    m.test_mark_bit(gpr(GPR::A0), resume, JniUnaryCondition::NotZero)
        .unwrap();
    expected.push_str("lw t6, 4(a0)\nslliw t6, t6, 2\nbltz t6, L1\n");
    m.test_mark_bit(gpr(GPR::T0), resume, JniUnaryCondition::Zero)
        .unwrap();
    expected.push_str("lw t6, 4(t0)\nslliw t6, t6, 2\nbgez t6, L1\n");

    assert_eq!(disasm(m), expected);
}

#[test]
fn test_byte_and_jump_if_not_zero() {
    let mut m = machine();
    let mut expected = String::new();

    let slow_path = m.create_label();
    let resume = m.create_label();

    m.test_byte_and_jump_if_not_zero(0x1234_5678, slow_path)
        .unwrap();
    expected.push_str("lui t6, 74565\nlb t6, 1656(t6)\nbnez t6, L0\n");

    m.test_byte_and_jump_if_not_zero(0x8765_4321, slow_path)
        .unwrap();
    expected.push_str(
        "lui t6, 135\n\
         addiw t6, t6, 1620\n\
         slli t6, t6, 12\n\
         lb t6, 801(t6)\n\
         bnez t6, L0\n",
    );

    m.bind(resume).unwrap();
    expected.push_str("L1:\n");

    m.remove_frame(0, &[], false).unwrap();
    expected.push_str("ret\n");

    m.bind(slow_path).unwrap();
    expected.push_str("L0:\n");

    m.test_byte_and_jump_if_not_zero(0x4567_89ab, resume).unwrap();
    expected.push_str("lui t6, 284281\nlb t6, -1621(t6)\nbnez t6, L1\n");

    assert_eq!(disasm(m), expected);
}

#[test]
fn decode_jni_transition_or_local_jobject() {
    let mut m = machine();
    let mut expected = String::new();

    let slow_path = m.create_label();
    let resume = m.create_label();

    m.decode_jni_transition_or_local_jobject(gpr(GPR::A0), slow_path, resume)
        .unwrap();
    expected.push_str(
        "beqz a0, L1\n\
         andi t6, a0, 2\n\
         bnez t6, L0\n\
         andi a0, a0, -4\n\
         lw a0, 0(a0)\n",
    );

    m.bind(resume).unwrap();
    expected.push_str("L1:\n");

    m.remove_frame(0, &[], false).unwrap();
    expected.push_str("ret\n");

    m.bind(slow_path).unwrap();
    expected.push_str("L0:\n");

    m.jump(resume).unwrap();
    expected.push_str("j L1\n");

    assert_eq!(disasm(m), expected);
}
