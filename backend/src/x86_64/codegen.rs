use crate::code_buffer::CodeBuffer;
use crate::constraint::OpConstraint;
use crate::translate::ChainSite;
use crate::x86_64::emitter::*;
use crate::x86_64::regs::{
    Reg, AREG0, CALLEE_SAVED, CALL_ARG_REGS, RESERVED_REGS, SCRATCH, SPILL_AREA_SIZE,
    STACK_ADDEND, STATIC_CALL_ARGS_SIZE,
};
use crate::HostCodeGen;
use dbt_core::{Cond, Context, Op, Opcode, Type};

/// x86-64 backend code generator.
///
/// Holds the offsets of the shared prologue and return path, which are
/// emitted once at the start of the code region.
pub struct X86_64CodeGen {
    pub prologue_offset: usize,
    pub tb_ret_offset: usize,
    pub code_gen_start: usize,
}

impl X86_64CodeGen {
    pub fn new() -> Self {
        Self {
            prologue_offset: 0,
            tb_ret_offset: 0,
            code_gen_start: 0,
        }
    }
}

impl Default for X86_64CodeGen {
    fn default() -> Self {
        Self::new()
    }
}

/// Compare two registers for `cond`: TEST for the bit-test
/// conditions, CMP otherwise.
fn emit_compare(buf: &mut CodeBuffer, cond: Cond, rexw: bool, a: Reg, b: Reg) {
    if cond.is_tst() {
        emit_test_rr(buf, rexw, a, b);
    } else if matches!(cond, Cond::Always | Cond::Never) {
        // ZF=1: "always" maps to JE, "never" to JNE.
        emit_arith_rr(buf, ArithOp::Cmp, rexw, a, a);
    } else {
        emit_arith_rr(buf, ArithOp::Cmp, rexw, a, b);
    }
}

fn cond_arg(raw: u32) -> Cond {
    // Conditions are written by the IR builder from `Cond` values.
    Cond::from_raw(raw).unwrap_or(Cond::Never)
}

impl HostCodeGen for X86_64CodeGen {
    fn op_constraint(&self, opc: Opcode) -> &'static OpConstraint {
        crate::x86_64::constraints::op_constraint(opc)
    }

    fn emit_prologue(&mut self, buf: &mut CodeBuffer) {
        self.prologue_offset = buf.offset();
        for &reg in CALLEE_SAVED {
            emit_push(buf, reg);
        }
        // mov rbp, rdi (env)
        emit_mov_rr(buf, true, AREG0, CALL_ARG_REGS[0]);
        // sub rsp, STACK_ADDEND: leaves rsp 16-byte aligned
        emit_arith_ri(buf, ArithOp::Sub, true, Reg::Rsp, STACK_ADDEND as i32);
        // jmp *rsi (block entry)
        emit_jmp_reg(buf, CALL_ARG_REGS[1]);
        self.code_gen_start = buf.offset();
    }

    fn emit_epilogue(&mut self, buf: &mut CodeBuffer) {
        // block return path: rax already holds the exit value
        self.tb_ret_offset = buf.offset();
        emit_arith_ri(buf, ArithOp::Add, true, Reg::Rsp, STACK_ADDEND as i32);
        for &reg in CALLEE_SAVED.iter().rev() {
            emit_pop(buf, reg);
        }
        emit_ret(buf);
    }

    fn prologue_offset(&self) -> usize {
        self.prologue_offset
    }

    fn epilogue_offset(&self) -> usize {
        self.tb_ret_offset
    }

    fn patch_jump(&self, buf: &CodeBuffer, site: ChainSite, target_offset: usize) {
        let disp = (target_offset as i64) - (site.jump as i64 + 5);
        debug_assert!((i32::MIN as i64..=i32::MAX as i64).contains(&disp));
        buf.patch_u32_atomic(site.jump + 1, disp as u32);
    }

    fn init_context(&self, ctx: &mut Context) {
        ctx.reserved_regs = RESERVED_REGS;
        ctx.set_frame(
            Reg::Rsp as u8,
            STATIC_CALL_ARGS_SIZE as i64,
            SPILL_AREA_SIZE as i64,
        );
    }

    fn out_mov(&self, buf: &mut CodeBuffer, ty: Type, dst: u8, src: u8) {
        if dst == src {
            return;
        }
        emit_mov_rr(buf, ty == Type::I64, Reg::from_u8(dst), Reg::from_u8(src));
    }

    fn out_movi(&self, buf: &mut CodeBuffer, ty: Type, dst: u8, val: u64) {
        emit_mov_ri(buf, ty == Type::I64, Reg::from_u8(dst), val);
    }

    fn out_ld(&self, buf: &mut CodeBuffer, ty: Type, dst: u8, base: u8, offset: i64) {
        emit_load(
            buf,
            ty == Type::I64,
            Reg::from_u8(dst),
            Reg::from_u8(base),
            offset as i32,
        );
    }

    fn out_st(&self, buf: &mut CodeBuffer, ty: Type, src: u8, base: u8, offset: i64) {
        emit_store(
            buf,
            ty == Type::I64,
            Reg::from_u8(src),
            Reg::from_u8(base),
            offset as i32,
        );
    }

    fn out_op(&self, buf: &mut CodeBuffer, op: &Op, oregs: &[u8], iregs: &[u8], cargs: &[u32]) {
        let rexw = op.op_type == Type::I64;
        let bits = op.op_type.size_bits() as u8;
        let d = || Reg::from_u8(oregs[0]);
        let a = || Reg::from_u8(iregs[0]);
        let b = || Reg::from_u8(iregs[1]);
        match op.opc {
            Opcode::Add => {
                if oregs[0] == iregs[0] {
                    emit_arith_rr(buf, ArithOp::Add, rexw, d(), b());
                } else if oregs[0] == iregs[1] {
                    emit_arith_rr(buf, ArithOp::Add, rexw, d(), a());
                } else {
                    emit_lea_sib(buf, rexw, d(), a(), b(), 0, 0);
                }
            }
            // Constraints guarantee oregs[0] == iregs[0]
            Opcode::Sub => emit_arith_rr(buf, ArithOp::Sub, rexw, d(), b()),
            Opcode::Mul => emit_imul_rr(buf, rexw, d(), b()),
            Opcode::And => emit_arith_rr(buf, ArithOp::And, rexw, d(), b()),
            Opcode::Or => emit_arith_rr(buf, ArithOp::Or, rexw, d(), b()),
            Opcode::Xor => emit_arith_rr(buf, ArithOp::Xor, rexw, d(), b()),
            Opcode::Neg => emit_neg(buf, rexw, d()),
            Opcode::Not => emit_not(buf, rexw, d()),
            Opcode::AndC => {
                // d may overlap b, so invert b in the scratch first
                emit_mov_rr(buf, rexw, SCRATCH, b());
                emit_not(buf, rexw, SCRATCH);
                if oregs[0] != iregs[0] {
                    emit_mov_rr(buf, rexw, d(), a());
                }
                emit_arith_rr(buf, ArithOp::And, rexw, d(), SCRATCH);
            }
            // Constraints guarantee oregs[0] == iregs[0]
            // and iregs[1] == RCX.
            Opcode::Shl | Opcode::Shr | Opcode::Sar | Opcode::RotL | Opcode::RotR => {
                let sop = match op.opc {
                    Opcode::Shl => ShiftOp::Shl,
                    Opcode::Shr => ShiftOp::Shr,
                    Opcode::Sar => ShiftOp::Sar,
                    Opcode::RotL => ShiftOp::Rol,
                    _ => ShiftOp::Ror,
                };
                emit_shift_cl(buf, sop, rexw, d());
            }
            // oregs[0] == iregs[0] == RAX, RDX is free to clobber.
            Opcode::DivS => {
                emit_sign_extend_ax(buf, rexw);
                emit_idiv(buf, rexw, b());
            }
            Opcode::DivU => {
                emit_mov_ri(buf, false, Reg::Rdx, 0);
                emit_div(buf, rexw, b());
            }
            Opcode::SetCond => {
                let cond = cond_arg(cargs[0]);
                emit_compare(buf, cond, rexw, a(), b());
                emit_setcc(buf, X86Cond::from_ir(cond), d());
                emit_movzx(buf, OPC_MOVZBL | P_REXB_RM, d(), d());
            }
            Opcode::MovCond => {
                // d == v1 (alias), v2 = iregs[3]
                let cond = cond_arg(cargs[0]);
                emit_compare(buf, cond, rexw, a(), b());
                // if cond is false, move v2 over v1
                let v2 = Reg::from_u8(iregs[3]);
                emit_cmovcc(buf, X86Cond::from_ir(cond).invert(), rexw, d(), v2);
            }
            Opcode::Extract | Opcode::SExtract => {
                let (ofs, len) = (cargs[0] as u8, cargs[1] as u8);
                let signed = op.opc == Opcode::SExtract;
                let w = if rexw { P_REXW } else { 0 };
                match (ofs, len, signed) {
                    (0, 8, false) => emit_movzx(buf, OPC_MOVZBL, d(), a()),
                    (0, 16, false) => emit_movzx(buf, OPC_MOVZWL, d(), a()),
                    (0, 32, false) => emit_mov_rr(buf, false, d(), a()),
                    (0, 8, true) => emit_movsx(buf, OPC_MOVSBL | w, d(), a()),
                    (0, 16, true) => emit_movsx(buf, OPC_MOVSWL | w, d(), a()),
                    (0, 32, true) if rexw => emit_movsx(buf, OPC_MOVSLQ, d(), a()),
                    _ => {
                        if oregs[0] != iregs[0] {
                            emit_mov_rr(buf, rexw, d(), a());
                        }
                        let left = bits - ofs - len;
                        if left != 0 {
                            emit_shift_ri(buf, ShiftOp::Shl, rexw, d(), left);
                        }
                        let right = bits - len;
                        if right != 0 {
                            let sop = if signed { ShiftOp::Sar } else { ShiftOp::Shr };
                            emit_shift_ri(buf, sop, rexw, d(), right);
                        }
                    }
                }
            }
            Opcode::Bswap16 => {
                emit_rolw_8(buf, d());
                emit_movzx(buf, OPC_MOVZWL, d(), d());
            }
            Opcode::Bswap32 => emit_bswap(buf, false, d()),
            Opcode::Clz => {
                // bsr leaves ZF set and dst undefined for a zero input;
                // 2*bits-1 xor (bits-1) == bits.
                emit_mov_ri(buf, false, SCRATCH, (2 * bits as u64) - 1);
                emit_bsr(buf, rexw, d(), a());
                emit_cmovcc(buf, X86Cond::Je, rexw, d(), SCRATCH);
                emit_arith_ri(buf, ArithOp::Xor, rexw, d(), bits as i32 - 1);
            }
            // -- Type conversions --
            Opcode::ExtI32I64 => emit_movsx(buf, OPC_MOVSLQ, d(), a()),
            Opcode::ExtUI32I64 | Opcode::ExtrlI64I32 => {
                // MOV r32, r32 zero-extends to 64 bits
                emit_mov_rr(buf, false, d(), a());
            }
            Opcode::ExtrhI64I32 => {
                if oregs[0] != iregs[0] {
                    emit_mov_rr(buf, true, d(), a());
                }
                emit_shift_ri(buf, ShiftOp::Shr, true, d(), 32);
            }
            // -- Env loads and stores --
            Opcode::Ld => emit_load(buf, rexw, d(), a(), cargs[0] as i32),
            Opcode::Ld8U => emit_load_zx(buf, OPC_MOVZBL, d(), a(), cargs[0] as i32),
            Opcode::Ld16U => emit_load_zx(buf, OPC_MOVZWL, d(), a(), cargs[0] as i32),
            // MOV r32, [mem] implicitly zero-extends
            Opcode::Ld32U => emit_load(buf, false, d(), a(), cargs[0] as i32),
            Opcode::St => emit_store(buf, rexw, a(), b(), cargs[0] as i32),
            Opcode::St8 => emit_store_byte(buf, a(), b(), cargs[0] as i32),
            Opcode::St16 => emit_store_word(buf, a(), b(), cargs[0] as i32),
            Opcode::St32 => emit_store(buf, false, a(), b(), cargs[0] as i32),
            Opcode::Mov
            | Opcode::BrCond
            | Opcode::Br
            | Opcode::SetLabel
            | Opcode::GotoTb
            | Opcode::ExitTb
            | Opcode::Mb
            | Opcode::Call
            | Opcode::Nop
            | Opcode::InsnStart
            | Opcode::Count => {
                debug_assert!(false, "out_op: {:?} is lowered by the allocator", op.opc);
            }
        }
    }

    fn out_brcond(
        &self,
        buf: &mut CodeBuffer,
        ty: Type,
        a: u8,
        b: u8,
        cond: Cond,
        target: Option<usize>,
    ) -> Option<usize> {
        emit_compare(buf, cond, ty == Type::I64, Reg::from_u8(a), Reg::from_u8(b));
        let at = emit_jcc_placeholder(buf, X86Cond::from_ir(cond));
        match target {
            Some(t) => {
                self.patch_rel32(buf, at, t);
                None
            }
            None => Some(at),
        }
    }

    fn out_br(&self, buf: &mut CodeBuffer, target: Option<usize>) -> Option<usize> {
        match target {
            Some(t) => {
                emit_jmp(buf, t);
                None
            }
            None => Some(emit_jmp_placeholder(buf)),
        }
    }

    fn patch_rel32(&self, buf: &mut CodeBuffer, at: usize, target: usize) {
        let disp = target as i64 - (at as i64 + 4);
        buf.patch_u32(at, disp as u32);
    }

    /// A 5-byte `jmp rel32` whose displacement field is 4-aligned, so
    /// relinking is one atomic store. It starts out jumping to the
    /// instruction right after it.
    fn out_goto_tb(&self, buf: &mut CodeBuffer) -> ChainSite {
        let target_align = (buf.offset() + 1 + 3) & !3;
        let nop_count = target_align - (buf.offset() + 1);
        emit_nops(buf, nop_count);

        let jump = buf.offset();
        buf.emit_u8(0xE9);
        buf.emit_u32(0);
        ChainSite {
            jump,
            reset: buf.offset(),
        }
    }

    fn out_exit_tb(&self, buf: &mut CodeBuffer, val: u64) {
        emit_mov_ri(buf, true, Reg::Rax, val);
        emit_jmp(buf, self.tb_ret_offset);
    }

    fn out_call(&self, buf: &mut CodeBuffer, addr: u64) {
        emit_mov_ri64(buf, SCRATCH, addr);
        emit_call_reg(buf, SCRATCH);
    }

    fn out_mb(&self, buf: &mut CodeBuffer) {
        emit_mfence(buf);
    }
}
