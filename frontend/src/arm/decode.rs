//! Table-driven A32 decoder.
//!
//! Each table entry is a bit-string pattern compiled to a mask/value
//! pair at compile time. Entries are tried in order and the first
//! match decides the instruction class; a class decoder may still
//! reject the encoding (UNPREDICTABLE or unsupported forms), which
//! makes the instruction undefined.

use super::insn::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Unallocated or unsupported encoding. `len` is the number of
    /// bytes the encoding occupies.
    #[error("undefined instruction {raw:#010x} at {addr:#010x}")]
    Undefined { addr: u32, raw: u32, len: u32 },
}

/// Compiled form of a bit-string pattern: `raw & mask == bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pattern {
    pub mask: u32,
    pub bits: u32,
}

impl Pattern {
    pub const fn matches(&self, raw: u32) -> bool {
        raw & self.mask == self.bits
    }
}

/// Compile `"cccc 0011 0000 ..."` into a [`Pattern`].
///
/// `0` and `1` are fixed bits, any other letter is a wildcard and
/// spaces are ignored. The pattern must describe 16 or 32 bits.
pub const fn pattern(s: &str) -> Pattern {
    let b = s.as_bytes();
    let mut mask = 0u32;
    let mut bits = 0u32;
    let mut n = 0;
    let mut i = 0;
    while i < b.len() {
        let c = b[i];
        i += 1;
        if c == b' ' {
            continue;
        }
        mask <<= 1;
        bits <<= 1;
        if c == b'0' || c == b'1' {
            mask |= 1;
            bits |= (c - b'0') as u32;
        }
        n += 1;
    }
    assert!(n == 16 || n == 32, "pattern must have 16 or 32 bits");
    Pattern { mask, bits }
}

/// Class decoder: `(raw, addr)` to operation, `None` if the encoding
/// is undefined within its class.
pub(crate) type DecodeFn = fn(u32, u32) -> Option<Operation>;

pub(crate) struct Entry {
    pub pat: Pattern,
    pub name: &'static str,
    pub decode: DecodeFn,
}

pub(crate) const fn entry(pat: &str, name: &'static str, decode: DecodeFn) -> Entry {
    Entry {
        pat: pattern(pat),
        name,
        decode,
    }
}

/// First-hit lookup.
pub(crate) fn lookup(table: &[Entry], raw: u32) -> Option<&Entry> {
    table.iter().find(|e| e.pat.matches(raw))
}

// Field helpers.

#[inline]
pub(crate) const fn bits(v: u32, hi: u32, lo: u32) -> u32 {
    (v >> lo) & ((1u32 << (hi - lo + 1)) - 1)
}

#[inline]
pub(crate) const fn bit(v: u32, n: u32) -> bool {
    (v >> n) & 1 != 0
}

#[inline]
fn reg(v: u32, lo: u32) -> u8 {
    bits(v, lo + 3, lo) as u8
}

/// Sign-extend the low `width` bits of `v`.
#[inline]
pub(crate) const fn sext(v: u32, width: u32) -> u32 {
    let sh = 32 - width;
    (((v << sh) as i32) >> sh) as u32
}

fn arm_expand_imm(raw: u32) -> Operand2 {
    let rot = bits(raw, 11, 8) * 2;
    let value = bits(raw, 7, 0).rotate_right(rot);
    let carry = (rot != 0).then_some(value >> 31 != 0);
    Operand2::Imm { value, carry }
}

// ---------------------------------------------------------------
// Conditional instruction space (cond != 1111)
// ---------------------------------------------------------------

static A32: &[Entry] = &[
    entry("cccc 0011 0000 xxxx xxxx xxxx xxxx xxxx", "movw", dec_movw),
    entry("cccc 0011 0100 xxxx xxxx xxxx xxxx xxxx", "movt", dec_movt),
    entry("cccc 0011 0010 0000 1111 0000 xxxx xxxx", "hint", dec_hint),
    entry("cccc 0011 0x10 xx00 1111 xxxx xxxx xxxx", "msr_imm", dec_msr_imm),
    entry("cccc 0001 0000 1111 xxxx 0000 0000 0000", "mrs", dec_mrs),
    entry("cccc 0001 0010 xx00 1111 0000 0000 xxxx", "msr_reg", dec_msr_reg),
    entry("cccc 0001 0010 1111 1111 1111 0001 xxxx", "bx", dec_bx),
    entry("cccc 0001 0010 1111 1111 1111 0011 xxxx", "blx_reg", dec_blx_reg),
    entry("cccc 0001 0110 1111 xxxx 1111 0001 xxxx", "clz", dec_clz),
    entry("cccc 0001 0010 xxxx xxxx xxxx 0111 xxxx", "bkpt", dec_bkpt),
    entry("cccc 0000 000x xxxx 0000 xxxx 1001 xxxx", "mul", dec_mul),
    entry("cccc 0000 001x xxxx xxxx xxxx 1001 xxxx", "mla", dec_mla),
    entry("cccc 0000 0110 xxxx xxxx xxxx 1001 xxxx", "mls", dec_mls),
    entry("cccc 0000 1xxx xxxx xxxx xxxx 1001 xxxx", "mul_long", dec_mul_long),
    entry("cccc 0111 00x1 xxxx 1111 xxxx 0001 xxxx", "div", dec_div),
    entry("cccc 0001 1xxx xxxx xxxx 1111 1001 xxxx", "exclusive", dec_exclusive),
    entry("cccc 000x xxxx xxxx xxxx xxxx 1xx1 xxxx", "extra_ldst", dec_extra_ldst),
    entry("cccc 000x xxxx xxxx xxxx xxxx 0xx1 xxxx", "dp_reg_shift", dec_dp_reg_shift),
    entry("cccc 000x xxxx xxxx xxxx xxxx xxx0 xxxx", "dp_imm_shift", dec_dp_imm_shift),
    entry("cccc 001x xxxx xxxx xxxx xxxx xxxx xxxx", "dp_imm", dec_dp_imm),
    entry("1110 0111 1111 xxxx xxxx xxxx 1111 xxxx", "udf", dec_udf),
    entry("cccc 0110 1x11 1111 xxxx 1111 x011 xxxx", "rev", dec_rev),
    entry("cccc 0110 1xxx xxxx xxxx xx00 0111 xxxx", "extend", dec_extend),
    entry("cccc 0111 1x1x xxxx xxxx xxxx x101 xxxx", "bfx", dec_bfx),
    entry("cccc 0111 110x xxxx xxxx xxxx x001 xxxx", "bfi", dec_bfi),
    entry("cccc 010x xxxx xxxx xxxx xxxx xxxx xxxx", "ldst_imm", dec_ldst_imm),
    entry("cccc 011x xxxx xxxx xxxx xxxx xxx0 xxxx", "ldst_reg", dec_ldst_reg),
    entry("cccc 100x xxxx xxxx xxxx xxxx xxxx xxxx", "ldm_stm", dec_block),
    entry("cccc 101x xxxx xxxx xxxx xxxx xxxx xxxx", "b", dec_branch),
    entry("cccc 1111 xxxx xxxx xxxx xxxx xxxx xxxx", "svc", dec_svc),
];

fn dec_movw(raw: u32, _: u32) -> Option<Operation> {
    let rd = reg(raw, 12);
    let imm = (bits(raw, 19, 16) << 12 | bits(raw, 11, 0)) as u16;
    (rd != 15).then_some(Operation::MovW { rd, imm })
}

fn dec_movt(raw: u32, _: u32) -> Option<Operation> {
    let rd = reg(raw, 12);
    let imm = (bits(raw, 19, 16) << 12 | bits(raw, 11, 0)) as u16;
    (rd != 15).then_some(Operation::MovT { rd, imm })
}

pub(crate) fn hint_from(op: u32) -> Hint {
    match op {
        1 => Hint::Yield,
        2 => Hint::Wfe,
        3 => Hint::Wfi,
        4 => Hint::Sev,
        _ => Hint::Nop,
    }
}

fn dec_hint(raw: u32, _: u32) -> Option<Operation> {
    Some(Operation::Hint(hint_from(bits(raw, 7, 0))))
}

/// MSR writes APSR NZCV(Q) when mask bit 1 is set; GE bits are not
/// modelled, so a GE-only write is rejected.
fn msr_writes_nzcv(raw: u32) -> bool {
    bit(raw, 19)
}

fn dec_msr_imm(raw: u32, _: u32) -> Option<Operation> {
    if bit(raw, 22) || !msr_writes_nzcv(raw) {
        return None;
    }
    let Operand2::Imm { value, .. } = arm_expand_imm(raw) else {
        return None;
    };
    Some(Operation::Msr { src: MsrSrc::Imm(value) })
}

fn dec_mrs(raw: u32, _: u32) -> Option<Operation> {
    let rd = reg(raw, 12);
    (rd != 15).then_some(Operation::Mrs { rd })
}

fn dec_msr_reg(raw: u32, _: u32) -> Option<Operation> {
    let rn = reg(raw, 0);
    (msr_writes_nzcv(raw) && rn != 15).then_some(Operation::Msr { src: MsrSrc::Reg(rn) })
}

fn dec_bx(raw: u32, _: u32) -> Option<Operation> {
    Some(Operation::Bx { rm: reg(raw, 0) })
}

fn dec_blx_reg(raw: u32, _: u32) -> Option<Operation> {
    let rm = reg(raw, 0);
    (rm != 15).then_some(Operation::BlxReg { rm })
}

fn dec_clz(raw: u32, _: u32) -> Option<Operation> {
    let (rd, rm) = (reg(raw, 12), reg(raw, 0));
    (rd != 15 && rm != 15).then_some(Operation::Clz { rd, rm })
}

fn dec_bkpt(raw: u32, _: u32) -> Option<Operation> {
    if bits(raw, 31, 28) != 0b1110 {
        return None;
    }
    let imm = bits(raw, 19, 8) << 4 | bits(raw, 3, 0);
    Some(Operation::Bkpt { imm })
}

fn dec_mul(raw: u32, _: u32) -> Option<Operation> {
    let (rd, rm, rn) = (reg(raw, 16), reg(raw, 8), reg(raw, 0));
    if rd == 15 || rm == 15 || rn == 15 {
        return None;
    }
    Some(Operation::Mul { s: bit(raw, 20), rd, rn, rm })
}

fn dec_mla(raw: u32, _: u32) -> Option<Operation> {
    let (rd, ra, rm, rn) = (reg(raw, 16), reg(raw, 12), reg(raw, 8), reg(raw, 0));
    if [rd, ra, rm, rn].contains(&15) {
        return None;
    }
    Some(Operation::Mla { s: bit(raw, 20), rd, rn, rm, ra })
}

fn dec_mls(raw: u32, _: u32) -> Option<Operation> {
    let (rd, ra, rm, rn) = (reg(raw, 16), reg(raw, 12), reg(raw, 8), reg(raw, 0));
    if [rd, ra, rm, rn].contains(&15) {
        return None;
    }
    Some(Operation::Mls { rd, rn, rm, ra })
}

fn dec_mul_long(raw: u32, _: u32) -> Option<Operation> {
    let (rdhi, rdlo, rm, rn) = (reg(raw, 16), reg(raw, 12), reg(raw, 8), reg(raw, 0));
    if [rdhi, rdlo, rm, rn].contains(&15) || rdhi == rdlo {
        return None;
    }
    let op = match bits(raw, 22, 21) {
        0 => MulLongOp::Umull,
        1 => MulLongOp::Umlal,
        2 => MulLongOp::Smull,
        _ => MulLongOp::Smlal,
    };
    Some(Operation::MulLong { op, s: bit(raw, 20), rdlo, rdhi, rn, rm })
}

fn dec_div(raw: u32, _: u32) -> Option<Operation> {
    let (rd, rm, rn) = (reg(raw, 16), reg(raw, 8), reg(raw, 0));
    if [rd, rm, rn].contains(&15) {
        return None;
    }
    Some(Operation::Div { signed: !bit(raw, 21), rd, rn, rm })
}

fn dec_exclusive(raw: u32, _: u32) -> Option<Operation> {
    let size = match bits(raw, 22, 21) {
        0 => MemSize::Word,
        2 => MemSize::Byte,
        3 => MemSize::Half,
        _ => return None,
    };
    let rn = reg(raw, 16);
    if rn == 15 {
        return None;
    }
    if bit(raw, 20) {
        let rt = reg(raw, 12);
        (rt != 15 && bits(raw, 3, 0) == 0xf).then_some(Operation::LoadExclusive { size, rt, rn })
    } else {
        let (rd, rt) = (reg(raw, 12), reg(raw, 0));
        if rd == 15 || rt == 15 || rd == rn || rd == rt {
            return None;
        }
        Some(Operation::StoreExclusive { size, rd, rt, rn })
    }
}

fn dec_extra_ldst(raw: u32, _: u32) -> Option<Operation> {
    let index = bit(raw, 24);
    let add = bit(raw, 23);
    let imm_form = bit(raw, 22);
    let w = bit(raw, 21);
    let load = bit(raw, 20);
    let (rn, rt) = (reg(raw, 16), reg(raw, 12));
    if !index && w {
        return None;
    }
    let wback = !index || w;

    let (load, size, signed) = match (bits(raw, 6, 5), load) {
        (1, l) => (l, MemSize::Half, false),
        (2, true) => (true, MemSize::Byte, true),
        (3, true) => (true, MemSize::Half, true),
        (2, false) => (true, MemSize::Double, false),
        (3, false) => (false, MemSize::Double, false),
        _ => return None,
    };

    let offset = if imm_form {
        MemOffset::Imm(bits(raw, 11, 8) << 4 | bits(raw, 3, 0))
    } else {
        let rm = reg(raw, 0);
        if rm == 15 || bits(raw, 11, 8) != 0 {
            return None;
        }
        if size == MemSize::Double && load && (rm == rt || rm == rt + 1) {
            return None;
        }
        MemOffset::Reg { rm, shift: ShiftType::Lsl, amount: 0 }
    };

    if size == MemSize::Double {
        if rt % 2 != 0 || rt == 14 {
            return None;
        }
        if wback && (rn == 15 || rn == rt || rn == rt + 1) {
            return None;
        }
    } else {
        if rt == 15 {
            return None;
        }
        if wback && (rn == 15 || rn == rt) {
            return None;
        }
    }
    Some(Operation::Mem { load, size, signed, rt, rn, offset, index, add, wback })
}

/// Shared checks for the three data-processing encodings.
fn dp(raw: u32, op2: Operand2) -> Option<Operation> {
    let op = DpOp::from_bits(bits(raw, 24, 21));
    let s = bit(raw, 20);
    let (rn, rd) = (reg(raw, 16), reg(raw, 12));
    if op.is_test() && !s {
        return None;
    }
    if rd == 15 && s && !op.is_test() {
        return None;
    }
    let rd = if op.is_test() { 0 } else { rd };
    let rn = if op.is_move() { 0 } else { rn };
    Some(Operation::DataProc { op, s, rd, rn, op2 })
}

fn dec_dp_reg_shift(raw: u32, _: u32) -> Option<Operation> {
    let (rm, rs) = (reg(raw, 0), reg(raw, 8));
    let op = DpOp::from_bits(bits(raw, 24, 21));
    let uses_rn = !op.is_move();
    let rd_written = !op.is_test();
    if rm == 15 || rs == 15 || (uses_rn && reg(raw, 16) == 15) || (rd_written && reg(raw, 12) == 15) {
        return None;
    }
    let shift = ShiftType::from_bits(bits(raw, 6, 5));
    dp(raw, Operand2::ShiftReg { rm, shift, rs })
}

fn dec_dp_imm_shift(raw: u32, _: u32) -> Option<Operation> {
    let rm = reg(raw, 0);
    let shift = ShiftType::from_bits(bits(raw, 6, 5));
    let amount = bits(raw, 11, 7) as u8;
    dp(raw, Operand2::ShiftImm { rm, shift, amount })
}

fn dec_dp_imm(raw: u32, _: u32) -> Option<Operation> {
    dp(raw, arm_expand_imm(raw))
}

fn dec_udf(raw: u32, _: u32) -> Option<Operation> {
    Some(Operation::Udf { imm: bits(raw, 19, 8) << 4 | bits(raw, 3, 0) })
}

fn dec_rev(raw: u32, _: u32) -> Option<Operation> {
    let op = match (bit(raw, 22), bit(raw, 7)) {
        (false, false) => RevOp::Rev,
        (false, true) => RevOp::Rev16,
        (true, true) => RevOp::Revsh,
        (true, false) => return None,
    };
    let (rd, rm) = (reg(raw, 12), reg(raw, 0));
    (rd != 15 && rm != 15).then_some(Operation::Rev { op, rd, rm })
}

fn dec_extend(raw: u32, _: u32) -> Option<Operation> {
    let (signed, half) = match bits(raw, 22, 20) {
        0b010 => (true, false),
        0b011 => (true, true),
        0b110 => (false, false),
        0b111 => (false, true),
        _ => return None,
    };
    let (rn, rd, rm) = (reg(raw, 16), reg(raw, 12), reg(raw, 0));
    if rd == 15 || rm == 15 {
        return None;
    }
    let rn = (rn != 15).then_some(rn);
    let rot = bits(raw, 11, 10) as u8;
    Some(Operation::Extend { signed, half, rd, rn, rm, rot })
}

fn dec_bfx(raw: u32, _: u32) -> Option<Operation> {
    let widthm1 = bits(raw, 20, 16);
    let lsb = bits(raw, 11, 7);
    let (rd, rn) = (reg(raw, 12), reg(raw, 0));
    if rd == 15 || rn == 15 || lsb + widthm1 > 31 {
        return None;
    }
    Some(Operation::Bfx {
        signed: !bit(raw, 22),
        rd,
        rn,
        lsb: lsb as u8,
        width: (widthm1 + 1) as u8,
    })
}

fn dec_bfi(raw: u32, _: u32) -> Option<Operation> {
    let msb = bits(raw, 20, 16);
    let lsb = bits(raw, 11, 7);
    let (rd, rn) = (reg(raw, 12), reg(raw, 0));
    if rd == 15 || msb < lsb {
        return None;
    }
    Some(Operation::Bfi {
        rd,
        rn: (rn != 15).then_some(rn),
        lsb: lsb as u8,
        msb: msb as u8,
    })
}

fn ldst(raw: u32, offset: MemOffset) -> Option<Operation> {
    let index = bit(raw, 24);
    let add = bit(raw, 23);
    let byte = bit(raw, 22);
    let w = bit(raw, 21);
    let load = bit(raw, 20);
    let (rn, rt) = (reg(raw, 16), reg(raw, 12));
    if !index && w {
        return None;
    }
    let wback = !index || w;
    if wback && (rn == 15 || rn == rt) {
        return None;
    }
    if byte && rt == 15 {
        return None;
    }
    let size = if byte { MemSize::Byte } else { MemSize::Word };
    Some(Operation::Mem { load, size, signed: false, rt, rn, offset, index, add, wback })
}

fn dec_ldst_imm(raw: u32, _: u32) -> Option<Operation> {
    ldst(raw, MemOffset::Imm(bits(raw, 11, 0)))
}

fn dec_ldst_reg(raw: u32, _: u32) -> Option<Operation> {
    let rm = reg(raw, 0);
    if rm == 15 {
        return None;
    }
    let shift = ShiftType::from_bits(bits(raw, 6, 5));
    let amount = bits(raw, 11, 7) as u8;
    ldst(raw, MemOffset::Reg { rm, shift, amount })
}

fn dec_block(raw: u32, _: u32) -> Option<Operation> {
    if bit(raw, 22) {
        return None;
    }
    let mode = match (bit(raw, 24), bit(raw, 23)) {
        (false, true) => BlockMode::Ia,
        (true, true) => BlockMode::Ib,
        (false, false) => BlockMode::Da,
        (true, false) => BlockMode::Db,
    };
    let wback = bit(raw, 21);
    let load = bit(raw, 20);
    let rn = reg(raw, 16);
    let regs = bits(raw, 15, 0) as u16;
    if rn == 15 || regs == 0 {
        return None;
    }
    if wback && load && regs & (1 << rn) != 0 {
        return None;
    }
    Some(Operation::Block { load, rn, regs, mode, wback })
}

fn dec_branch(raw: u32, addr: u32) -> Option<Operation> {
    let offset = sext(bits(raw, 23, 0), 24) << 2;
    Some(Operation::Branch {
        target: addr.wrapping_add(8).wrapping_add(offset),
        link: bit(raw, 24),
    })
}

fn dec_svc(raw: u32, _: u32) -> Option<Operation> {
    Some(Operation::Svc { imm: bits(raw, 23, 0) })
}

// ---------------------------------------------------------------
// Unconditional instruction space (cond == 1111)
// ---------------------------------------------------------------

static A32_UNCOND: &[Entry] = &[
    entry("1111 101x xxxx xxxx xxxx xxxx xxxx xxxx", "blx_imm", dec_blx_imm),
    entry("1111 0101 0111 1111 1111 0000 0001 1111", "clrex", dec_clrex),
    entry("1111 0101 0111 1111 1111 0000 0100 xxxx", "dsb", dec_dsb),
    entry("1111 0101 0111 1111 1111 0000 0101 xxxx", "dmb", dec_dmb),
    entry("1111 0101 0111 1111 1111 0000 0110 xxxx", "isb", dec_isb),
    entry("1111 0001 0000 0001 0000 00x0 0000 0000", "setend", dec_setend),
    entry("1111 0101 x101 xxxx 1111 xxxx xxxx xxxx", "pld_imm", dec_pld),
    entry("1111 0111 x101 xxxx 1111 xxxx xxx0 xxxx", "pld_reg", dec_pld),
];

fn dec_blx_imm(raw: u32, addr: u32) -> Option<Operation> {
    let offset = sext(bits(raw, 23, 0), 24) << 2 | (bit(raw, 24) as u32) << 1;
    Some(Operation::BlxImm { target: addr.wrapping_add(8).wrapping_add(offset) })
}

fn dec_clrex(_: u32, _: u32) -> Option<Operation> {
    Some(Operation::Clrex)
}

fn dec_dsb(_: u32, _: u32) -> Option<Operation> {
    Some(Operation::Barrier(Barrier::Dsb))
}

fn dec_dmb(_: u32, _: u32) -> Option<Operation> {
    Some(Operation::Barrier(Barrier::Dmb))
}

fn dec_isb(_: u32, _: u32) -> Option<Operation> {
    Some(Operation::Barrier(Barrier::Isb))
}

fn dec_setend(raw: u32, _: u32) -> Option<Operation> {
    Some(Operation::SetEnd { big: bit(raw, 9) })
}

fn dec_pld(_: u32, _: u32) -> Option<Operation> {
    Some(Operation::Pld)
}

/// Decode one A32 instruction fetched at `addr`.
pub fn decode_arm(raw: u32, addr: u32) -> Result<Instruction, DecodeError> {
    let undefined = DecodeError::Undefined { addr, raw, len: 4 };
    let (table, cond) = match Condition::from_bits(raw >> 28) {
        Some(cond) => (A32, cond),
        None => (A32_UNCOND, Condition::Al),
    };
    let entry = lookup(table, raw).ok_or(undefined)?;
    let op = (entry.decode)(raw, addr).ok_or(undefined)?;
    Ok(Instruction { addr, raw, len: 4, cond, op })
}

/// Name of the table entry an A32 encoding falls into, for
/// diagnostics.
pub fn arm_class(raw: u32) -> Option<&'static str> {
    let table = if raw >> 28 == 0xf { A32_UNCOND } else { A32 };
    lookup(table, raw).map(|e| e.name)
}
