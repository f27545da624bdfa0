use crate::context::Context;
use crate::op::Op;
use crate::opcode::Opcode;
use crate::temp::TempIdx;
use crate::types::{Cond, Type};

// Constant args are encoded as TempIdx(raw_value as u32).
fn carg(val: u32) -> TempIdx {
    TempIdx(val)
}

/// Signature shared by every helper called from generated code:
/// `(env, a, b, c) -> result`.
pub type HelperFn = unsafe extern "C" fn(*mut u8, u64, u64, u64) -> u64;

impl Context {
    // -- Internal helpers --

    fn emit(&mut self, opc: Opcode, ty: Type, args: &[TempIdx]) {
        let idx = self.next_op_idx();
        let op = Op::with_args(idx, opc, ty, args);
        self.emit_op(op);
    }

    fn emit_binary(
        &mut self,
        opc: Opcode,
        ty: Type,
        dst: TempIdx,
        a: TempIdx,
        b: TempIdx,
    ) -> TempIdx {
        self.emit(opc, ty, &[dst, a, b]);
        dst
    }

    fn emit_unary(
        &mut self,
        opc: Opcode,
        ty: Type,
        dst: TempIdx,
        src: TempIdx,
    ) -> TempIdx {
        self.emit(opc, ty, &[dst, src]);
        dst
    }

    // -- Binary ALU (1 oarg, 2 iargs) --

    pub fn gen_add(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
        self.emit_binary(Opcode::Add, ty, d, a, b)
    }

    pub fn gen_sub(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
        self.emit_binary(Opcode::Sub, ty, d, a, b)
    }

    pub fn gen_mul(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
        self.emit_binary(Opcode::Mul, ty, d, a, b)
    }

    /// Signed division. Division by zero is undefined at the IR level;
    /// the frontend guards the divisor.
    pub fn gen_divs(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
        self.emit_binary(Opcode::DivS, ty, d, a, b)
    }

    pub fn gen_divu(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
        self.emit_binary(Opcode::DivU, ty, d, a, b)
    }

    pub fn gen_and(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
        self.emit_binary(Opcode::And, ty, d, a, b)
    }

    pub fn gen_or(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
        self.emit_binary(Opcode::Or, ty, d, a, b)
    }

    pub fn gen_xor(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
        self.emit_binary(Opcode::Xor, ty, d, a, b)
    }

    /// `d = a & !b`
    pub fn gen_andc(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
        self.emit_binary(Opcode::AndC, ty, d, a, b)
    }

    // Shift counts are taken modulo the type width.

    pub fn gen_shl(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
        self.emit_binary(Opcode::Shl, ty, d, a, b)
    }

    pub fn gen_shr(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
        self.emit_binary(Opcode::Shr, ty, d, a, b)
    }

    pub fn gen_sar(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
        self.emit_binary(Opcode::Sar, ty, d, a, b)
    }

    pub fn gen_rotl(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
        self.emit_binary(Opcode::RotL, ty, d, a, b)
    }

    pub fn gen_rotr(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
        self.emit_binary(Opcode::RotR, ty, d, a, b)
    }

    // -- Unary (1 oarg, 1 iarg) --

    pub fn gen_neg(&mut self, ty: Type, d: TempIdx, s: TempIdx) -> TempIdx {
        self.emit_unary(Opcode::Neg, ty, d, s)
    }

    pub fn gen_not(&mut self, ty: Type, d: TempIdx, s: TempIdx) -> TempIdx {
        self.emit_unary(Opcode::Not, ty, d, s)
    }

    pub fn gen_mov(&mut self, ty: Type, d: TempIdx, s: TempIdx) -> TempIdx {
        self.emit_unary(Opcode::Mov, ty, d, s)
    }

    /// Swap the two low bytes; the upper bits of the result are zero.
    pub fn gen_bswap16(&mut self, ty: Type, d: TempIdx, s: TempIdx) -> TempIdx {
        self.emit_unary(Opcode::Bswap16, ty, d, s)
    }

    /// Reverse the four low bytes; the upper bits of the result are zero.
    pub fn gen_bswap32(&mut self, ty: Type, d: TempIdx, s: TempIdx) -> TempIdx {
        self.emit_unary(Opcode::Bswap32, ty, d, s)
    }

    /// Count leading zeros; a zero input yields the type width.
    pub fn gen_clz(&mut self, ty: Type, d: TempIdx, s: TempIdx) -> TempIdx {
        self.emit_unary(Opcode::Clz, ty, d, s)
    }

    // -- Bit field --

    pub fn gen_extract(
        &mut self,
        ty: Type,
        d: TempIdx,
        src: TempIdx,
        ofs: u32,
        len: u32,
    ) -> TempIdx {
        self.emit(Opcode::Extract, ty, &[d, src, carg(ofs), carg(len)]);
        d
    }

    pub fn gen_sextract(
        &mut self,
        ty: Type,
        d: TempIdx,
        src: TempIdx,
        ofs: u32,
        len: u32,
    ) -> TempIdx {
        self.emit(Opcode::SExtract, ty, &[d, src, carg(ofs), carg(len)]);
        d
    }

    // -- Type conversion (1 oarg, 1 iarg) --

    /// Sign-extend i32 → i64.
    pub fn gen_ext_i32_i64(&mut self, d: TempIdx, s: TempIdx) -> TempIdx {
        self.emit_unary(Opcode::ExtI32I64, Type::I64, d, s)
    }

    /// Zero-extend i32 → i64.
    pub fn gen_ext_u32_i64(&mut self, d: TempIdx, s: TempIdx) -> TempIdx {
        self.emit_unary(Opcode::ExtUI32I64, Type::I64, d, s)
    }

    /// Truncate i64 → i32 (low 32 bits).
    pub fn gen_extrl_i64_i32(&mut self, d: TempIdx, s: TempIdx) -> TempIdx {
        self.emit_unary(Opcode::ExtrlI64I32, Type::I32, d, s)
    }

    /// Extract i64 → i32 (high 32 bits).
    pub fn gen_extrh_i64_i32(&mut self, d: TempIdx, s: TempIdx) -> TempIdx {
        self.emit_unary(Opcode::ExtrhI64I32, Type::I32, d, s)
    }

    // -- Conditionals --

    /// `d = (a cond b) ? 1 : 0`
    pub fn gen_setcond(
        &mut self,
        ty: Type,
        d: TempIdx,
        a: TempIdx,
        b: TempIdx,
        cond: Cond,
    ) -> TempIdx {
        self.emit(Opcode::SetCond, ty, &[d, a, b, carg(cond as u32)]);
        d
    }

    /// `d = (c1 cond c2) ? v1 : v2`
    #[allow(clippy::too_many_arguments)]
    pub fn gen_movcond(
        &mut self,
        ty: Type,
        d: TempIdx,
        c1: TempIdx,
        c2: TempIdx,
        v1: TempIdx,
        v2: TempIdx,
        cond: Cond,
    ) -> TempIdx {
        self.emit(Opcode::MovCond, ty, &[d, c1, c2, v1, v2, carg(cond as u32)]);
        d
    }

    // -- Host Ld/St (env field access) --

    /// Load: `dst = *(base + offset)`.
    pub fn gen_ld(&mut self, ty: Type, dst: TempIdx, base: TempIdx, offset: i64) -> TempIdx {
        self.emit(Opcode::Ld, ty, &[dst, base, carg(offset as u32)]);
        dst
    }

    /// Store: `*(base + offset) = src`.
    pub fn gen_st(&mut self, ty: Type, src: TempIdx, base: TempIdx, offset: i64) {
        self.emit(Opcode::St, ty, &[src, base, carg(offset as u32)]);
    }

    /// Load unsigned byte.
    pub fn gen_ld8u(&mut self, ty: Type, dst: TempIdx, base: TempIdx, offset: i64) -> TempIdx {
        self.emit(Opcode::Ld8U, ty, &[dst, base, carg(offset as u32)]);
        dst
    }

    /// Load unsigned halfword.
    pub fn gen_ld16u(&mut self, ty: Type, dst: TempIdx, base: TempIdx, offset: i64) -> TempIdx {
        self.emit(Opcode::Ld16U, ty, &[dst, base, carg(offset as u32)]);
        dst
    }

    /// Load unsigned word.
    pub fn gen_ld32u(&mut self, ty: Type, dst: TempIdx, base: TempIdx, offset: i64) -> TempIdx {
        self.emit(Opcode::Ld32U, ty, &[dst, base, carg(offset as u32)]);
        dst
    }

    pub fn gen_st8(&mut self, ty: Type, src: TempIdx, base: TempIdx, offset: i64) {
        self.emit(Opcode::St8, ty, &[src, base, carg(offset as u32)]);
    }

    pub fn gen_st16(&mut self, ty: Type, src: TempIdx, base: TempIdx, offset: i64) {
        self.emit(Opcode::St16, ty, &[src, base, carg(offset as u32)]);
    }

    pub fn gen_st32(&mut self, ty: Type, src: TempIdx, base: TempIdx, offset: i64) {
        self.emit(Opcode::St32, ty, &[src, base, carg(offset as u32)]);
    }

    // -- Control flow --

    /// Unconditional branch to label.
    pub fn gen_br(&mut self, label_id: u32) {
        self.emit(Opcode::Br, Type::I64, &[carg(label_id)]);
    }

    /// Branch to `label_id` when `a cond b`.
    pub fn gen_brcond(
        &mut self,
        ty: Type,
        a: TempIdx,
        b: TempIdx,
        cond: Cond,
        label_id: u32,
    ) {
        self.emit(
            Opcode::BrCond,
            ty,
            &[a, b, carg(cond as u32), carg(label_id)],
        );
    }

    /// Place a label.
    pub fn gen_set_label(&mut self, label_id: u32) {
        self.label_mut(label_id).placements += 1;
        self.emit(Opcode::SetLabel, Type::I64, &[carg(label_id)]);
    }

    /// Patchable direct jump through chain slot `n` (0 or 1).
    pub fn gen_goto_tb(&mut self, n: u32) {
        self.emit(Opcode::GotoTb, Type::I64, &[carg(n)]);
    }

    /// Return to the dispatcher with exit kind `kind`.
    pub fn gen_exit_tb(&mut self, kind: u32) {
        self.emit(Opcode::ExitTb, Type::I64, &[carg(kind)]);
    }

    pub fn gen_mb(&mut self, bar: u32) {
        self.emit(Opcode::Mb, Type::I64, &[carg(bar)]);
    }

    /// Start of guest instruction `index` at address `pc`.
    pub fn gen_insn_start(&mut self, pc: u32, index: u32) {
        self.emit(Opcode::InsnStart, Type::I64, &[carg(pc), carg(index)]);
    }

    // -- Call --

    /// Call `helper(env, args...)` and place its result in `dst`.
    ///
    /// At most three arguments follow `env`; missing ones are zero.
    pub fn gen_call(
        &mut self,
        dst: TempIdx,
        helper: HelperFn,
        env: TempIdx,
        args: &[TempIdx],
    ) -> TempIdx {
        assert!(args.len() <= 3, "helpers take at most three arguments");
        let zero = self.new_const(Type::I64, 0);
        let mut iargs = [zero; 3];
        iargs[..args.len()].copy_from_slice(args);
        let addr = helper as usize as u64;
        self.emit(
            Opcode::Call,
            Type::I64,
            &[
                dst,
                env,
                iargs[0],
                iargs[1],
                iargs[2],
                carg(addr as u32),
                carg((addr >> 32) as u32),
            ],
        );
        dst
    }
}
