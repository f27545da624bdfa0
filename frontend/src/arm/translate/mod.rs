//! Translation of decoded A32/Thumb instructions into IR.
//!
//! A block is laid out as
//!
//! ```text
//! prologue        halt flag check, budget check and charge
//! insn 0..n       per-instruction bodies, conditional ones behind a
//!                 brcond that skips them
//! epilogue        fall-through goto_tb/exit_tb
//! stubs           out-of-line exits: halt, budget, exceptions,
//!                 memory faults and pending-exit requests
//! ```
//!
//! Guest registers and flags are IR globals over `JitState`; every
//! exit leaves the env holding the exact state at that point.

mod alu;
mod branch;
mod mem;

use std::marker::PhantomData;

use super::insn::{Condition, Instruction, Operation};
use super::state::*;
use super::{fetch_decode, CodeFetch, DecodeError, Fetched};
use crate::{translator_loop, DisasContextBase, DisasJumpType, TranslatorOps};
use dbt_core::{BlockKey, Cond, Context, ExitKind, HelperFn, TempIdx, Type};

/// Host helpers called by generated code.
///
/// Read helpers take `(env, addr, align_mask)` and return the value.
/// Write helpers take `(env, addr, value, align_mask)`. An address
/// with any `align_mask` bit set raises an alignment fault. On a fault
/// a helper stores the exception kind and address into the env and
/// returns 0. Write helpers also set `exit_request` when the store
/// hit translated code.
#[derive(Debug, Clone, Copy)]
pub struct HelperTable {
    pub read8: HelperFn,
    pub read16: HelperFn,
    pub read32: HelperFn,
    pub read64: HelperFn,
    pub write8: HelperFn,
    pub write16: HelperFn,
    pub write32: HelperFn,
    pub write64: HelperFn,
    /// `(env, addr, size)`: read and open an exclusive reservation.
    pub exclusive_read: HelperFn,
    /// `(env, addr, value, size)`: store if the reservation holds.
    /// Returns 0 on success and 1 on failure.
    pub exclusive_write: HelperFn,
}

/// Per-block translation parameters.
#[derive(Debug, Clone, Copy)]
pub struct TranslateConfig {
    pub max_insns: u32,
    /// Check natural alignment of every access.
    pub strict_alignment: bool,
    /// Raise `DivideByZero` instead of producing 0.
    pub div_by_zero_trap: bool,
    pub helpers: HelperTable,
}

/// Summary of a translated block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub pc: u32,
    pub mode: ModeFlags,
    /// Guest bytes covered, starting at `pc`.
    pub guest_len: u32,
    /// Instructions charged against the budget on entry.
    pub icount: u32,
    /// Direct-branch targets reachable through chain slots, by slot.
    pub targets: [Option<u32>; 2],
}

// ---------------------------------------------------------------
// Disassembly context
// ---------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum StubKind {
    Halt,
    Budget,
    /// Store an exception and exit.
    Raise { kind: ExceptionKind, info: u32 },
    /// A helper already stored the exception.
    Fault,
    /// A store hit translated code: leave after the instruction.
    PendingExit,
}

/// Out-of-line exit emitted after the block's main terminator.
#[derive(Debug, Clone, Copy)]
struct Stub {
    label: u32,
    kind: StubKind,
    /// Guest PC stored before exiting.
    pc: u32,
    /// Instructions that count as executed when the stub runs.
    executed: u32,
}

/// ARM disassembly context (extends `DisasContextBase`).
pub struct ArmDisasContext<'a> {
    pub base: DisasContextBase,
    cfg: &'a TranslateConfig,
    fetch: &'a dyn CodeFetch,
    mode: ModeFlags,
    /// IR temp for the env pointer (fixed to host RBP).
    env: TempIdx,
    /// Guest r0-r15 (globals).
    regs: [TempIdx; NUM_REGS],
    nf: TempIdx,
    zf: TempIdx,
    cf: TempIdx,
    vf: TempIdx,
    /// Instruction count charged by the prologue, patched in `tb_stop`.
    icount: TempIdx,
    fetched: Option<Fetched>,
    /// Address and length of the instruction being translated.
    insn_pc: u32,
    insn_len: u32,
    stubs: Vec<Stub>,
    /// Memory-fault stub of the current instruction, created lazily.
    fault_label: Option<u32>,
    targets: [Option<u32>; 2],
}

impl<'a> ArmDisasContext<'a> {
    pub fn new(key: BlockKey, cfg: &'a TranslateConfig, fetch: &'a dyn CodeFetch) -> Self {
        let mode = ModeFlags::from_bits_truncate(key.mode);
        let max_insns = if mode.contains(ModeFlags::SINGLE_STEP) {
            1
        } else {
            cfg.max_insns.max(1)
        };
        Self {
            base: DisasContextBase::new(key.pc, max_insns),
            cfg,
            fetch,
            mode,
            env: TempIdx(0),
            regs: [TempIdx(0); NUM_REGS],
            nf: TempIdx(0),
            zf: TempIdx(0),
            cf: TempIdx(0),
            vf: TempIdx(0),
            icount: TempIdx(0),
            fetched: None,
            insn_pc: key.pc,
            insn_len: 0,
            stubs: Vec::new(),
            fault_label: None,
            targets: [None; 2],
        }
    }

    fn thumb(&self) -> bool {
        self.mode.contains(ModeFlags::THUMB)
    }

    fn big_endian(&self) -> bool {
        self.mode.contains(ModeFlags::BIG_ENDIAN)
    }

    /// Address of the instruction after the current one.
    fn next_pc(&self) -> u32 {
        self.insn_pc.wrapping_add(self.insn_len)
    }

    /// Value a PC read yields in the current instruction.
    fn pc_read(&self) -> u32 {
        self.insn_pc.wrapping_add(if self.thumb() { 4 } else { 8 })
    }

    /// Value written to LR by a linking branch.
    fn link_value(&self) -> u32 {
        self.next_pc() | self.thumb() as u32
    }

    fn index(&self) -> u32 {
        self.base.num_insns - 1
    }

    // -- Register access --

    fn read_reg(&self, ir: &mut Context, r: u8) -> TempIdx {
        if r as usize == REG_PC {
            c32(ir, self.pc_read())
        } else {
            self.regs[r as usize]
        }
    }

    /// Base register of an address computation: PC reads as
    /// `Align(PC, 4)`.
    fn read_base(&self, ir: &mut Context, r: u8) -> TempIdx {
        if r as usize == REG_PC {
            c32(ir, self.pc_read() & !3)
        } else {
            self.regs[r as usize]
        }
    }

    /// Write a non-PC register.
    fn write_reg(&self, ir: &mut Context, r: u8, v: TempIdx) {
        debug_assert!(r as usize != REG_PC);
        ir.gen_mov(Type::I32, self.regs[r as usize], v);
    }

    /// Data-processing write: A32 interworks, Thumb does not.
    fn write_reg_alu(&mut self, ir: &mut Context, r: u8, v: TempIdx) {
        if r as usize != REG_PC {
            self.write_reg(ir, r, v);
        } else if self.thumb() {
            self.gen_branch_write_pc(ir, v);
        } else {
            self.gen_bx_write_pc(ir, v);
        }
    }

    /// Load write: both instruction sets interwork.
    fn write_reg_load(&mut self, ir: &mut Context, r: u8, v: TempIdx) {
        if r as usize != REG_PC {
            self.write_reg(ir, r, v);
        } else {
            self.gen_bx_write_pc(ir, v);
        }
    }

    // -- Exits --

    fn set_pc(&self, ir: &mut Context, pc: u32) {
        let v = c32(ir, pc);
        ir.gen_mov(Type::I32, self.regs[REG_PC], v);
    }

    fn exit(&mut self, ir: &mut Context, kind: ExitKind) {
        ir.gen_exit_tb(kind as u32);
        self.base.is_jmp = DisasJumpType::NoReturn;
    }

    /// Direct jump to `pc` through chain slot `slot`.
    fn gen_goto(&mut self, ir: &mut Context, slot: u32, pc: u32) {
        self.set_pc(ir, pc);
        if self.mode.contains(ModeFlags::SINGLE_STEP) {
            self.exit(ir, ExitKind::NoChain);
            return;
        }
        self.targets[slot as usize] = Some(pc);
        ir.gen_goto_tb(slot);
        let kind = if slot == 0 { ExitKind::Chain0 } else { ExitKind::Chain1 };
        self.exit(ir, kind);
    }

    /// BXWritePC: bit 0 selects the instruction set.
    fn gen_bx_write_pc(&mut self, ir: &mut Context, v: TempIdx) {
        let one = c32(ir, 1);
        let t = bin32(ir, Context::gen_and, v, one);
        ir.gen_st32(Type::I32, t, self.env, THUMB_OFFSET);
        let zero = c32(ir, 0);
        let arm_mask = c32(ir, 0xffff_fffc);
        let thumb_mask = c32(ir, 0xffff_fffe);
        let mask = ir.new_temp(Type::I32);
        ir.gen_movcond(Type::I32, mask, t, zero, arm_mask, thumb_mask, Cond::Eq);
        ir.gen_and(Type::I32, self.regs[REG_PC], v, mask);
        self.exit(ir, ExitKind::NoChain);
    }

    /// BranchWritePC: stay in the current instruction set.
    fn gen_branch_write_pc(&mut self, ir: &mut Context, v: TempIdx) {
        let mask = c32(ir, if self.thumb() { !1 } else { !3 });
        ir.gen_and(Type::I32, self.regs[REG_PC], v, mask);
        self.exit(ir, ExitKind::NoChain);
    }

    fn add_stub(&mut self, ir: &mut Context, kind: StubKind, pc: u32, executed: u32) -> u32 {
        let label = ir.new_label();
        self.stubs.push(Stub { label, kind, pc, executed });
        label
    }

    /// Unconditionally raise `kind` for the current instruction.
    /// `completed` instructions count as executed and resume at the
    /// next one (SVC); others resume at the instruction itself.
    fn gen_raise(&mut self, ir: &mut Context, kind: ExceptionKind, info: u32, completed: bool) {
        let (pc, executed) = if completed {
            (self.next_pc(), self.index() + 1)
        } else {
            (self.insn_pc, self.index())
        };
        let label = self.add_stub(ir, StubKind::Raise { kind, info }, pc, executed);
        ir.gen_br(label);
        self.base.is_jmp = DisasJumpType::NoReturn;
    }

    /// Branch to a stub raising `kind` when `a cond b`.
    fn gen_raise_if(&mut self, ir: &mut Context, a: TempIdx, b: TempIdx, cond: Cond, kind: ExceptionKind) {
        let label = self.add_stub(ir, StubKind::Raise { kind, info: self.insn_pc }, self.insn_pc, self.index());
        ir.gen_brcond(Type::I32, a, b, cond, label);
    }

    /// Leave through the fault stub if the last helper raised.
    fn gen_fault_check(&mut self, ir: &mut Context) {
        let label = match self.fault_label {
            Some(l) => l,
            None => {
                let l = self.add_stub(ir, StubKind::Fault, self.insn_pc, self.index());
                self.fault_label = Some(l);
                l
            }
        };
        let e = ir.new_temp(Type::I32);
        ir.gen_ld32u(Type::I32, e, self.env, EXCEPTION_OFFSET);
        let zero = c32(ir, 0);
        ir.gen_brcond(Type::I32, e, zero, Cond::Ne, label);
    }

    /// After a store: leave once the instruction completes if the
    /// store wrote translated code.
    fn gen_pending_exit_check(&mut self, ir: &mut Context) {
        let label = self.add_stub(ir, StubKind::PendingExit, self.next_pc(), self.index() + 1);
        let e = ir.new_temp(Type::I32);
        ir.gen_ld32u(Type::I32, e, self.env, EXIT_REQUEST_OFFSET);
        let zero = c32(ir, 0);
        ir.gen_brcond(Type::I32, e, zero, Cond::Ne, label);
    }

    fn emit_stub(&self, ir: &mut Context, stub: Stub, icount: u32) {
        ir.gen_set_label(stub.label);
        let kind = match stub.kind {
            StubKind::Halt => {
                ir.gen_exit_tb(ExitKind::Halt as u32);
                return;
            }
            StubKind::Budget => {
                ir.gen_exit_tb(ExitKind::Budget as u32);
                return;
            }
            StubKind::Raise { .. } | StubKind::Fault => ExitKind::Exception,
            StubKind::PendingExit => ExitKind::NoChain,
        };

        let refund = icount.saturating_sub(stub.executed);
        if refund > 0 {
            let b = ir.new_temp(Type::I64);
            ir.gen_ld(Type::I64, b, self.env, BUDGET_OFFSET);
            let r = c64(ir, refund as u64);
            let nb = bin64(ir, Context::gen_add, b, r);
            ir.gen_st(Type::I64, nb, self.env, BUDGET_OFFSET);
        }
        match stub.kind {
            StubKind::Raise { kind, info } => {
                let k = c32(ir, kind as u32);
                ir.gen_st32(Type::I32, k, self.env, EXCEPTION_OFFSET);
                let i = c32(ir, info);
                ir.gen_st32(Type::I32, i, self.env, EXCEPTION_INFO_OFFSET);
            }
            StubKind::PendingExit => {
                let zero = c32(ir, 0);
                ir.gen_st32(Type::I32, zero, self.env, EXIT_REQUEST_OFFSET);
            }
            _ => {}
        }
        self.set_pc(ir, stub.pc);
        ir.gen_exit_tb(kind as u32);
    }

    // -- Conditions --

    /// `(a, b, cond)` such that `cond` holds exactly when guest
    /// condition `cc` passes. `None` for AL.
    fn gen_test_cc(&self, ir: &mut Context, cc: Condition) -> Option<(TempIdx, TempIdx, Cond)> {
        let zero = c32(ir, 0);
        let flag = |f: TempIdx, set: bool| Some((f, zero, if set { Cond::Ne } else { Cond::Eq }));
        match cc {
            Condition::Eq => flag(self.zf, true),
            Condition::Ne => flag(self.zf, false),
            Condition::Cs => flag(self.cf, true),
            Condition::Cc => flag(self.cf, false),
            Condition::Mi => flag(self.nf, true),
            Condition::Pl => flag(self.nf, false),
            Condition::Vs => flag(self.vf, true),
            Condition::Vc => flag(self.vf, false),
            Condition::Hi | Condition::Ls => {
                let t = bin32(ir, Context::gen_andc, self.cf, self.zf);
                flag(t, cc == Condition::Hi)
            }
            Condition::Ge => Some((self.nf, self.vf, Cond::Eq)),
            Condition::Lt => Some((self.nf, self.vf, Cond::Ne)),
            Condition::Gt | Condition::Le => {
                let x = bin32(ir, Context::gen_xor, self.nf, self.vf);
                let t = bin32(ir, Context::gen_or, x, self.zf);
                flag(t, cc == Condition::Le)
            }
            Condition::Al => None,
        }
    }

    // -- Per-instruction dispatch --

    fn translate(&mut self, ir: &mut Context, insn: &Instruction) {
        let skip = match self.gen_test_cc(ir, insn.cond) {
            Some((a, b, cond)) => {
                let label = ir.new_label();
                ir.gen_brcond(Type::I32, a, b, cond.invert(), label);
                Some(label)
            }
            None => None,
        };

        self.translate_op(ir, insn);

        if let Some(label) = skip {
            ir.gen_set_label(label);
            if self.base.is_jmp == DisasJumpType::NoReturn {
                self.base.is_jmp = DisasJumpType::Stop;
            }
        }
    }

    fn translate_op(&mut self, ir: &mut Context, insn: &Instruction) {
        use Operation::*;
        match insn.op {
            DataProc { op, s, rd, rn, op2 } => self.trans_data_proc(ir, op, s, rd, rn, op2),
            MovW { rd, imm } => {
                let v = c32(ir, imm as u32);
                self.write_reg(ir, rd, v);
            }
            MovT { rd, imm } => self.trans_movt(ir, rd, imm),
            Adr { rd, value } => {
                let v = c32(ir, value);
                self.write_reg_alu(ir, rd, v);
            }
            Clz { rd, rm } => {
                let v = self.read_reg(ir, rm);
                let d = un32(ir, Context::gen_clz, v);
                self.write_reg(ir, rd, d);
            }
            Mul { s, rd, rn, rm } => self.trans_mul(ir, s, rd, rn, rm, None),
            Mla { s, rd, rn, rm, ra } => self.trans_mul(ir, s, rd, rn, rm, Some((ra, false))),
            Mls { rd, rn, rm, ra } => self.trans_mul(ir, false, rd, rn, rm, Some((ra, true))),
            MulLong { op, s, rdlo, rdhi, rn, rm } => self.trans_mul_long(ir, op, s, rdlo, rdhi, rn, rm),
            Div { signed, rd, rn, rm } => self.trans_div(ir, signed, rd, rn, rm),
            Extend { signed, half, rd, rn, rm, rot } => self.trans_extend(ir, signed, half, rd, rn, rm, rot),
            Rev { op, rd, rm } => self.trans_rev(ir, op, rd, rm),
            Bfx { signed, rd, rn, lsb, width } => self.trans_bfx(ir, signed, rd, rn, lsb, width),
            Bfi { rd, rn, lsb, msb } => self.trans_bfi(ir, rd, rn, lsb, msb),
            Mem { load, size, signed, rt, rn, offset, index, add, wback } => {
                self.trans_mem(ir, load, size, signed, rt, rn, offset, index, add, wback)
            }
            Block { load, rn, regs, mode, wback } => self.trans_block(ir, load, rn, regs, mode, wback),
            LoadExclusive { size, rt, rn } => self.trans_ldrex(ir, size, rt, rn),
            StoreExclusive { size, rd, rt, rn } => self.trans_strex(ir, size, rd, rt, rn),
            Clrex => {
                let zero = c32(ir, 0);
                ir.gen_st32(Type::I32, zero, self.env, EXCLUSIVE_STATE_OFFSET);
            }
            Branch { target, link } => self.trans_branch(ir, target, link),
            BlxImm { target } => self.trans_blx_imm(ir, target),
            Bx { rm } => {
                let v = self.read_reg(ir, rm);
                self.gen_bx_write_pc(ir, v);
            }
            BlxReg { rm } => self.trans_blx_reg(ir, rm),
            CompareBranch { nonzero, rn, target } => self.trans_cbz(ir, nonzero, rn, target),
            Svc { imm } => self.gen_raise(ir, ExceptionKind::Svc, imm, true),
            Bkpt { imm } => self.gen_raise(ir, ExceptionKind::Bkpt, imm, false),
            Udf { .. } => self.gen_raise(ir, ExceptionKind::Undefined, insn.raw, false),
            SetEnd { big } => self.trans_setend(ir, big),
            Mrs { rd } => self.trans_mrs(ir, rd),
            Msr { src } => self.trans_msr(ir, src),
            Barrier(_) => ir.gen_mb(0),
            Hint(_) | Pld => {}
        }
    }
}

// ---------------------------------------------------------------
// TranslatorOps implementation
// ---------------------------------------------------------------

/// Marker type for the ARM translator.
pub struct ArmTranslator<'a>(PhantomData<&'a ()>);

const FLAG_NAMES: [(&str, i64); 4] = [
    ("nf", NF_OFFSET),
    ("zf", ZF_OFFSET),
    ("cf", CF_OFFSET),
    ("vf", VF_OFFSET),
];

const REG_NAMES: [&str; NUM_REGS] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr", "pc",
];

impl<'a> TranslatorOps for ArmTranslator<'a> {
    type DisasContext = ArmDisasContext<'a>;

    fn init_disas_context(ctx: &mut ArmDisasContext<'a>, ir: &mut Context) {
        // Globals survive `Context::reset`; register them on first use
        // only and rely on the fixed layout afterwards.
        if ir.nb_globals() == 0 {
            // env pointer, fixed to host RBP = reg 5.
            ir.new_fixed(Type::I64, 5, "env");
            for (i, name) in REG_NAMES.iter().enumerate() {
                ir.new_global(Type::I32, TempIdx(0), reg_offset(i), *name);
            }
            for (name, offset) in FLAG_NAMES {
                ir.new_global(Type::I32, TempIdx(0), offset, name);
            }
        }
        ctx.env = TempIdx(0);
        for (i, r) in ctx.regs.iter_mut().enumerate() {
            *r = TempIdx(1 + i as u32);
        }
        let flags = 1 + NUM_REGS as u32;
        ctx.nf = TempIdx(flags);
        ctx.zf = TempIdx(flags + 1);
        ctx.cf = TempIdx(flags + 2);
        ctx.vf = TempIdx(flags + 3);
    }

    fn tb_start(ctx: &mut ArmDisasContext<'a>, ir: &mut Context) {
        let zero = c32(ir, 0);

        let halt = ctx.add_stub(ir, StubKind::Halt, ctx.base.pc_first, 0);
        let hp = ir.new_temp(Type::I64);
        ir.gen_ld(Type::I64, hp, ctx.env, HALT_PTR_OFFSET);
        let h = ir.new_temp(Type::I32);
        ir.gen_ld32u(Type::I32, h, hp, 0);
        ir.gen_brcond(Type::I32, h, zero, Cond::Ne, halt);

        let budget = ctx.add_stub(ir, StubKind::Budget, ctx.base.pc_first, 0);
        ctx.icount = ir.new_const_unshared(Type::I64, 0);
        let b = ir.new_temp(Type::I64);
        ir.gen_ld(Type::I64, b, ctx.env, BUDGET_OFFSET);
        ir.gen_brcond(Type::I64, b, ctx.icount, Cond::Ltu, budget);
        let nb = bin64(ir, Context::gen_sub, b, ctx.icount);
        ir.gen_st(Type::I64, nb, ctx.env, BUDGET_OFFSET);
    }

    fn insn_start(ctx: &mut ArmDisasContext<'a>, ir: &mut Context) {
        let pc = ctx.base.pc_next;
        let fetched = fetch_decode(ctx.fetch, pc, ctx.thumb());
        if matches!(fetched, Fetched::Abort { .. }) && ctx.base.num_insns > 0 {
            // Let the next block start at the unreadable address.
            ctx.base.is_jmp = DisasJumpType::TooMany;
            return;
        }
        ctx.insn_pc = pc;
        ctx.insn_len = fetched.len(ctx.thumb());
        ctx.fetched = Some(fetched);
        ctx.fault_label = None;
        ir.gen_insn_start(pc, ctx.base.num_insns);
        ctx.base.num_insns += 1;
    }

    fn translate_insn(ctx: &mut ArmDisasContext<'a>, ir: &mut Context) {
        match ctx.fetched.take() {
            Some(Fetched::Insn(insn)) => {
                ctx.translate(ir, &insn);
                if insn.ends_block() && ctx.base.is_jmp == DisasJumpType::Next {
                    ctx.base.is_jmp = DisasJumpType::Stop;
                }
            }
            Some(Fetched::Undefined(DecodeError::Undefined { raw, .. })) => {
                ctx.gen_raise(ir, ExceptionKind::Undefined, raw, false);
            }
            Some(Fetched::Abort { addr }) => {
                ctx.gen_raise(ir, ExceptionKind::PrefetchAbort, addr, false);
            }
            None => {}
        }
        ctx.base.pc_next = ctx.next_pc();
    }

    fn tb_stop(ctx: &mut ArmDisasContext<'a>, ir: &mut Context) {
        match ctx.base.is_jmp {
            DisasJumpType::NoReturn => {}
            DisasJumpType::Next | DisasJumpType::TooMany | DisasJumpType::Stop => {
                let pc = ctx.base.pc_next;
                ctx.gen_goto(ir, 1, pc);
            }
        }

        let icount = ctx.base.num_insns;
        ir.patch_const(ctx.icount, icount as u64);
        for stub in std::mem::take(&mut ctx.stubs) {
            ctx.emit_stub(ir, stub, icount);
        }
    }

    fn base<'c>(ctx: &'c ArmDisasContext<'a>) -> &'c DisasContextBase {
        &ctx.base
    }

    fn base_mut<'c>(ctx: &'c mut ArmDisasContext<'a>) -> &'c mut DisasContextBase {
        &mut ctx.base
    }
}

/// Translate the block identified by `key` into `ir`.
///
/// `ir` must be freshly reset. Translation never fails: undecodable
/// encodings become undefined-instruction exits and unreadable code a
/// prefetch-abort exit.
pub fn translate_block(ir: &mut Context, key: BlockKey, cfg: &TranslateConfig, fetch: &dyn CodeFetch) -> BlockInfo {
    let mut ctx = ArmDisasContext::new(key, cfg, fetch);
    translator_loop::<ArmTranslator<'_>>(&mut ctx, ir);
    tracing::trace!(
        pc = key.pc,
        insns = ctx.base.num_insns,
        ops = ir.num_ops(),
        "translated block"
    );
    BlockInfo {
        pc: key.pc,
        mode: ctx.mode,
        guest_len: ctx.base.pc_next.wrapping_sub(ctx.base.pc_first),
        icount: ctx.base.num_insns,
        targets: ctx.targets,
    }
}

// ---------------------------------------------------------------
// IR shorthands
// ---------------------------------------------------------------

type BinOp = fn(&mut Context, Type, TempIdx, TempIdx, TempIdx) -> TempIdx;
type UnOp = fn(&mut Context, Type, TempIdx, TempIdx) -> TempIdx;

fn c32(ir: &mut Context, v: u32) -> TempIdx {
    ir.new_const(Type::I32, v as u64)
}

fn c64(ir: &mut Context, v: u64) -> TempIdx {
    ir.new_const(Type::I64, v)
}

fn bin32(ir: &mut Context, f: BinOp, a: TempIdx, b: TempIdx) -> TempIdx {
    let d = ir.new_temp(Type::I32);
    f(ir, Type::I32, d, a, b)
}

fn bin64(ir: &mut Context, f: BinOp, a: TempIdx, b: TempIdx) -> TempIdx {
    let d = ir.new_temp(Type::I64);
    f(ir, Type::I64, d, a, b)
}

fn un32(ir: &mut Context, f: UnOp, a: TempIdx) -> TempIdx {
    let d = ir.new_temp(Type::I32);
    f(ir, Type::I32, d, a)
}

/// `a <op> #imm` on I32.
fn bini32(ir: &mut Context, f: BinOp, a: TempIdx, imm: u32) -> TempIdx {
    let b = c32(ir, imm);
    bin32(ir, f, a, b)
}

fn extract32(ir: &mut Context, v: TempIdx, ofs: u32, len: u32) -> TempIdx {
    let d = ir.new_temp(Type::I32);
    ir.gen_extract(Type::I32, d, v, ofs, len)
}

fn zext64(ir: &mut Context, v: TempIdx) -> TempIdx {
    let d = ir.new_temp(Type::I64);
    ir.gen_ext_u32_i64(d, v)
}

fn sext64(ir: &mut Context, v: TempIdx) -> TempIdx {
    let d = ir.new_temp(Type::I64);
    ir.gen_ext_i32_i64(d, v)
}

fn lo32(ir: &mut Context, v: TempIdx) -> TempIdx {
    let d = ir.new_temp(Type::I32);
    ir.gen_extrl_i64_i32(d, v)
}

fn hi32(ir: &mut Context, v: TempIdx) -> TempIdx {
    let d = ir.new_temp(Type::I32);
    ir.gen_extrh_i64_i32(d, v)
}
