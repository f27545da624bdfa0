// Data processing, multiplies, divides, extends, bit-field ops and
// status register moves.

use super::*;
use crate::arm::insn::{DpOp, MsrSrc, MulLongOp, Operand2, RevOp, ShiftType};

/// Carry-in of an adder.
#[derive(Clone, Copy)]
enum CarryIn {
    Zero,
    One,
    Flag,
}

impl ArmDisasContext<'_> {
    fn carry_in(&self, ir: &mut Context, cin: CarryIn) -> TempIdx {
        match cin {
            CarryIn::Zero => c32(ir, 0),
            CarryIn::One => c32(ir, 1),
            CarryIn::Flag => self.cf,
        }
    }

    /// Evaluate a shifter operand. The carry-out is produced only
    /// when `want_carry`; `None` leaves C unchanged.
    pub(super) fn shifter(&mut self, ir: &mut Context, op2: Operand2, want_carry: bool) -> (TempIdx, Option<TempIdx>) {
        match op2 {
            Operand2::Imm { value, carry } => {
                let v = c32(ir, value);
                let c = carry.filter(|_| want_carry).map(|c| c32(ir, c as u32));
                (v, c)
            }
            Operand2::ShiftImm { rm, shift, amount } => {
                let v = self.read_reg(ir, rm);
                self.shift_imm(ir, v, shift, amount as u32, want_carry)
            }
            Operand2::ShiftReg { rm, shift, rs } => {
                let v = self.read_reg(ir, rm);
                let s = self.read_reg(ir, rs);
                self.shift_reg(ir, v, shift, s, want_carry)
            }
        }
    }

    /// Shift by an immediate with A32 encoding rules.
    pub(super) fn shift_imm(
        &mut self,
        ir: &mut Context,
        v: TempIdx,
        shift: ShiftType,
        amount: u32,
        want_carry: bool,
    ) -> (TempIdx, Option<TempIdx>) {
        let bit_of = |ir: &mut Context, n: u32| want_carry.then(|| extract32(ir, v, n, 1));
        match (shift, amount) {
            (ShiftType::Lsl, 0) => (v, None),
            (ShiftType::Lsl, n) => {
                let c = bit_of(ir, 32 - n);
                (bini32(ir, Context::gen_shl, v, n), c)
            }
            (ShiftType::Lsr, 0) => {
                let c = bit_of(ir, 31);
                (c32(ir, 0), c)
            }
            (ShiftType::Lsr, n) => {
                let c = bit_of(ir, n - 1);
                (bini32(ir, Context::gen_shr, v, n), c)
            }
            (ShiftType::Asr, n) => {
                let n = if n == 0 { 32 } else { n };
                let c = bit_of(ir, n - 1);
                (bini32(ir, Context::gen_sar, v, n.min(31)), c)
            }
            (ShiftType::Ror, 0) => {
                // RRX
                let c = bit_of(ir, 0);
                let hi = bini32(ir, Context::gen_shl, self.cf, 31);
                let lo = bini32(ir, Context::gen_shr, v, 1);
                (bin32(ir, Context::gen_or, hi, lo), c)
            }
            (ShiftType::Ror, n) => {
                let c = bit_of(ir, n - 1);
                (bini32(ir, Context::gen_rotr, v, n), c)
            }
        }
    }

    /// Shift by the bottom byte of `s`. LSL/LSR/ASR go through 64 bits
    /// with the amount clamped so that host shift masking never
    /// applies.
    fn shift_reg(
        &mut self,
        ir: &mut Context,
        v: TempIdx,
        shift: ShiftType,
        s: TempIdx,
        want_carry: bool,
    ) -> (TempIdx, Option<TempIdx>) {
        let amt = bini32(ir, Context::gen_and, s, 0xff);
        let clamp = |ir: &mut Context, limit: u64| {
            let a = zext64(ir, amt);
            let lim = c64(ir, limit);
            let d = ir.new_temp(Type::I64);
            ir.gen_movcond(Type::I64, d, a, lim, lim, a, Cond::Gtu)
        };
        let one = c64(ir, 1);

        let (val, carry) = match shift {
            ShiftType::Lsl => {
                let x = zext64(ir, v);
                let a = clamp(ir, 40);
                let r = bin64(ir, Context::gen_shl, x, a);
                let val = lo32(ir, r);
                let carry = want_carry.then(|| {
                    let h = hi32(ir, r);
                    bini32(ir, Context::gen_and, h, 1)
                });
                (val, carry)
            }
            ShiftType::Lsr | ShiftType::Asr => {
                let (x, limit, f): (_, _, BinOp) = if shift == ShiftType::Lsr {
                    (zext64(ir, v), 40, Context::gen_shr)
                } else {
                    (sext64(ir, v), 33, Context::gen_sar)
                };
                let x1 = bin64(ir, Context::gen_shl, x, one);
                let a = clamp(ir, limit);
                let r = bin64(ir, f, x1, a);
                let carry = want_carry.then(|| {
                    let l = lo32(ir, r);
                    bini32(ir, Context::gen_and, l, 1)
                });
                let r1 = bin64(ir, f, r, one);
                (lo32(ir, r1), carry)
            }
            ShiftType::Ror => {
                let r = bini32(ir, Context::gen_and, amt, 31);
                let val = bin32(ir, Context::gen_rotr, v, r);
                let carry = want_carry.then(|| bini32(ir, Context::gen_shr, val, 31));
                (val, carry)
            }
        };

        // Amount 0 leaves C unchanged.
        let carry = carry.map(|c| {
            let zero = c32(ir, 0);
            let d = ir.new_temp(Type::I32);
            ir.gen_movcond(Type::I32, d, amt, zero, self.cf, c, Cond::Eq)
        });
        (val, carry)
    }

    fn set_nz(&self, ir: &mut Context, res: TempIdx) {
        let sh = c32(ir, 31);
        ir.gen_shr(Type::I32, self.nf, res, sh);
        let zero = c32(ir, 0);
        ir.gen_setcond(Type::I32, self.zf, res, zero, Cond::Eq);
    }

    /// `a + b + cin` with carry and signed overflow.
    fn add_with_carry(&self, ir: &mut Context, a: TempIdx, b: TempIdx, cin: TempIdx) -> (TempIdx, TempIdx, TempIdx) {
        let a64 = zext64(ir, a);
        let b64 = zext64(ir, b);
        let c64 = zext64(ir, cin);
        let s = bin64(ir, Context::gen_add, a64, b64);
        let sum = bin64(ir, Context::gen_add, s, c64);
        let res = lo32(ir, sum);
        let carry = hi32(ir, sum);
        let ra = bin32(ir, Context::gen_xor, res, a);
        let rb = bin32(ir, Context::gen_xor, res, b);
        let both = bin32(ir, Context::gen_and, ra, rb);
        let overflow = bini32(ir, Context::gen_shr, both, 31);
        (res, carry, overflow)
    }

    pub(super) fn trans_data_proc(&mut self, ir: &mut Context, op: DpOp, s: bool, rd: u8, rn: u8, op2: Operand2) {
        let (b, carry) = self.shifter(ir, op2, s && op.is_logical());
        let a = if op.is_move() { b } else { self.read_reg(ir, rn) };

        use DpOp::*;
        let arith = match op {
            Add | Cmn => Some((a, b, false, CarryIn::Zero)),
            Sub | Cmp => Some((a, b, true, CarryIn::One)),
            Rsb => Some((b, a, true, CarryIn::One)),
            Adc => Some((a, b, false, CarryIn::Flag)),
            Sbc => Some((a, b, true, CarryIn::Flag)),
            Rsc => Some((b, a, true, CarryIn::Flag)),
            _ => None,
        };

        let res = match arith {
            Some((x, y, invert, cin)) => {
                if s {
                    let ny = if invert { un32(ir, Context::gen_not, y) } else { y };
                    let ci = self.carry_in(ir, cin);
                    let (res, c, v) = self.add_with_carry(ir, x, ny, ci);
                    self.set_nz(ir, res);
                    ir.gen_mov(Type::I32, self.cf, c);
                    ir.gen_mov(Type::I32, self.vf, v);
                    res
                } else {
                    match (invert, cin) {
                        (false, CarryIn::Zero) => bin32(ir, Context::gen_add, x, y),
                        (true, CarryIn::One) => bin32(ir, Context::gen_sub, x, y),
                        _ => {
                            let ny = if invert { un32(ir, Context::gen_not, y) } else { y };
                            let t = bin32(ir, Context::gen_add, x, ny);
                            let ci = self.carry_in(ir, cin);
                            bin32(ir, Context::gen_add, t, ci)
                        }
                    }
                }
            }
            None => {
                let res = match op {
                    And | Tst => bin32(ir, Context::gen_and, a, b),
                    Eor | Teq => bin32(ir, Context::gen_xor, a, b),
                    Orr => bin32(ir, Context::gen_or, a, b),
                    Bic => bin32(ir, Context::gen_andc, a, b),
                    Mvn => un32(ir, Context::gen_not, b),
                    _ => b,
                };
                if s {
                    self.set_nz(ir, res);
                    if let Some(c) = carry {
                        ir.gen_mov(Type::I32, self.cf, c);
                    }
                }
                res
            }
        };

        if !op.is_test() {
            self.write_reg_alu(ir, rd, res);
        }
    }

    pub(super) fn trans_movt(&mut self, ir: &mut Context, rd: u8, imm: u16) {
        let v = self.read_reg(ir, rd);
        let low = bini32(ir, Context::gen_and, v, 0xffff);
        let res = bini32(ir, Context::gen_or, low, (imm as u32) << 16);
        self.write_reg(ir, rd, res);
    }

    /// MUL, MLA (`acc = Some((ra, false))`) and MLS (`Some((ra, true))`).
    pub(super) fn trans_mul(&mut self, ir: &mut Context, s: bool, rd: u8, rn: u8, rm: u8, acc: Option<(u8, bool)>) {
        let a = self.read_reg(ir, rn);
        let b = self.read_reg(ir, rm);
        let p = bin32(ir, Context::gen_mul, a, b);
        let res = match acc {
            None => p,
            Some((ra, sub)) => {
                let r = self.read_reg(ir, ra);
                let f: BinOp = if sub { Context::gen_sub } else { Context::gen_add };
                bin32(ir, f, r, p)
            }
        };
        if s {
            self.set_nz(ir, res);
        }
        self.write_reg(ir, rd, res);
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn trans_mul_long(
        &mut self,
        ir: &mut Context,
        op: MulLongOp,
        s: bool,
        rdlo: u8,
        rdhi: u8,
        rn: u8,
        rm: u8,
    ) {
        let widen = if op.is_signed() { sext64 } else { zext64 };
        let a = widen(ir, self.regs[rn as usize]);
        let b = widen(ir, self.regs[rm as usize]);
        let mut p = bin64(ir, Context::gen_mul, a, b);
        if op.accumulates() {
            let lo = zext64(ir, self.regs[rdlo as usize]);
            let hi = zext64(ir, self.regs[rdhi as usize]);
            let sh = c64(ir, 32);
            let hi = bin64(ir, Context::gen_shl, hi, sh);
            let acc = bin64(ir, Context::gen_or, hi, lo);
            p = bin64(ir, Context::gen_add, p, acc);
        }
        let lo = lo32(ir, p);
        let hi = hi32(ir, p);
        if s {
            let sh = c32(ir, 31);
            ir.gen_shr(Type::I32, self.nf, hi, sh);
            let any = bin32(ir, Context::gen_or, lo, hi);
            let zero = c32(ir, 0);
            ir.gen_setcond(Type::I32, self.zf, any, zero, Cond::Eq);
        }
        self.write_reg(ir, rdlo, lo);
        self.write_reg(ir, rdhi, hi);
    }

    /// SDIV/UDIV. Division runs on 64-bit operands so that
    /// `INT_MIN / -1` cannot trap on the host; a zero divisor yields 0
    /// or raises when trapping is enabled.
    pub(super) fn trans_div(&mut self, ir: &mut Context, signed: bool, rd: u8, rn: u8, rm: u8) {
        let n = self.regs[rn as usize];
        let m = self.regs[rm as usize];
        if self.cfg.div_by_zero_trap {
            let zero = c32(ir, 0);
            self.gen_raise_if(ir, m, zero, Cond::Eq, ExceptionKind::DivideByZero);
        }
        let widen = if signed { sext64 } else { zext64 };
        let a = widen(ir, n);
        let b = widen(ir, m);
        let zero = c64(ir, 0);
        let one = c64(ir, 1);
        let divisor = ir.new_temp(Type::I64);
        ir.gen_movcond(Type::I64, divisor, b, zero, one, b, Cond::Eq);
        let f: BinOp = if signed { Context::gen_divs } else { Context::gen_divu };
        let q = bin64(ir, f, a, divisor);
        let r = ir.new_temp(Type::I64);
        ir.gen_movcond(Type::I64, r, b, zero, zero, q, Cond::Eq);
        let res = lo32(ir, r);
        self.write_reg(ir, rd, res);
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn trans_extend(
        &mut self,
        ir: &mut Context,
        signed: bool,
        half: bool,
        rd: u8,
        rn: Option<u8>,
        rm: u8,
        rot: u8,
    ) {
        let mut v = self.regs[rm as usize];
        if rot != 0 {
            v = bini32(ir, Context::gen_rotr, v, rot as u32 * 8);
        }
        let len = if half { 16 } else { 8 };
        let d = ir.new_temp(Type::I32);
        let ext = if signed {
            ir.gen_sextract(Type::I32, d, v, 0, len)
        } else {
            ir.gen_extract(Type::I32, d, v, 0, len)
        };
        let res = match rn {
            Some(rn) => bin32(ir, Context::gen_add, self.regs[rn as usize], ext),
            None => ext,
        };
        self.write_reg(ir, rd, res);
    }

    pub(super) fn trans_rev(&mut self, ir: &mut Context, op: RevOp, rd: u8, rm: u8) {
        let v = self.regs[rm as usize];
        let res = match op {
            RevOp::Rev => un32(ir, Context::gen_bswap32, v),
            RevOp::Rev16 => {
                let hi = bini32(ir, Context::gen_shl, v, 8);
                let hi = bini32(ir, Context::gen_and, hi, 0xff00_ff00);
                let lo = bini32(ir, Context::gen_shr, v, 8);
                let lo = bini32(ir, Context::gen_and, lo, 0x00ff_00ff);
                bin32(ir, Context::gen_or, hi, lo)
            }
            RevOp::Revsh => {
                let b = un32(ir, Context::gen_bswap16, v);
                let d = ir.new_temp(Type::I32);
                ir.gen_sextract(Type::I32, d, b, 0, 16)
            }
        };
        self.write_reg(ir, rd, res);
    }

    pub(super) fn trans_bfx(&mut self, ir: &mut Context, signed: bool, rd: u8, rn: u8, lsb: u8, width: u8) {
        let v = self.regs[rn as usize];
        let d = ir.new_temp(Type::I32);
        let res = if signed {
            ir.gen_sextract(Type::I32, d, v, lsb as u32, width as u32)
        } else {
            ir.gen_extract(Type::I32, d, v, lsb as u32, width as u32)
        };
        self.write_reg(ir, rd, res);
    }

    pub(super) fn trans_bfi(&mut self, ir: &mut Context, rd: u8, rn: Option<u8>, lsb: u8, msb: u8) {
        let width = (msb - lsb + 1) as u32;
        let mask = ((((1u64 << width) - 1) << lsb) & 0xffff_ffff) as u32;
        let dst = self.regs[rd as usize];
        let kept = bini32(ir, Context::gen_and, dst, !mask);
        let res = match rn {
            Some(rn) => {
                let ins = bini32(ir, Context::gen_shl, self.regs[rn as usize], lsb as u32);
                let ins = bini32(ir, Context::gen_and, ins, mask);
                bin32(ir, Context::gen_or, kept, ins)
            }
            None => kept,
        };
        self.write_reg(ir, rd, res);
    }

    pub(super) fn trans_mrs(&mut self, ir: &mut Context, rd: u8) {
        let flags = [(self.nf, 31), (self.zf, 30), (self.cf, 29), (self.vf, 28)];
        let mut acc = c32(ir, 0);
        for (f, sh) in flags {
            let t = bini32(ir, Context::gen_shl, f, sh);
            acc = bin32(ir, Context::gen_or, acc, t);
        }
        self.write_reg(ir, rd, acc);
    }

    pub(super) fn trans_msr(&mut self, ir: &mut Context, src: MsrSrc) {
        let v = match src {
            MsrSrc::Reg(rn) => self.regs[rn as usize],
            MsrSrc::Imm(imm) => c32(ir, imm),
        };
        for (f, bit) in [(self.nf, 31), (self.zf, 30), (self.cf, 29), (self.vf, 28)] {
            ir.gen_extract(Type::I32, f, v, bit, 1);
        }
    }
}
