//! Thumb decoder: the 16-bit instruction set plus the 32-bit BL/BLX
//! immediate pair. Other 32-bit encodings are undefined.

use super::decode::{bit, bits, entry, lookup, sext, DecodeError, Entry};
use super::insn::*;

/// Whether `hw1` is the first halfword of a 32-bit encoding.
pub const fn is_thumb32(hw1: u16) -> bool {
    matches!(hw1 >> 11, 0b11101 | 0b11110 | 0b11111)
}

#[inline]
fn lo(v: u32, at: u32) -> u8 {
    bits(v, at + 2, at) as u8
}

const fn shifted(rm: u8) -> Operand2 {
    Operand2::ShiftImm { rm, shift: ShiftType::Lsl, amount: 0 }
}

const fn imm(value: u32) -> Operand2 {
    Operand2::Imm { value, carry: None }
}

const fn data(op: DpOp, s: bool, rd: u8, rn: u8, op2: Operand2) -> Operation {
    Operation::DataProc { op, s, rd, rn, op2 }
}

fn mem(load: bool, size: MemSize, signed: bool, rt: u8, rn: u8, offset: MemOffset) -> Operation {
    Operation::Mem {
        load,
        size,
        signed,
        rt,
        rn,
        offset,
        index: true,
        add: true,
        wback: false,
    }
}

static T16: &[Entry] = &[
    entry("0001 1xxx xxxx xxxx", "add_sub", dec_add_sub),
    entry("000x xxxx xxxx xxxx", "shift_imm", dec_shift_imm),
    entry("001x xxxx xxxx xxxx", "imm8", dec_imm8),
    entry("0100 00xx xxxx xxxx", "alu", dec_alu),
    entry("0100 0111 xxxx xxxx", "bx_blx", dec_bx_blx),
    entry("0100 01xx xxxx xxxx", "hireg", dec_hireg),
    entry("0100 1xxx xxxx xxxx", "ldr_lit", dec_ldr_literal),
    entry("0101 xxxx xxxx xxxx", "ldst_reg", dec_ldst_reg),
    entry("011x xxxx xxxx xxxx", "ldst_imm", dec_ldst_imm),
    entry("1000 xxxx xxxx xxxx", "ldst_half", dec_ldst_half),
    entry("1001 xxxx xxxx xxxx", "ldst_sp", dec_ldst_sp),
    entry("1010 xxxx xxxx xxxx", "adr_add_sp", dec_adr_add_sp),
    entry("1011 0000 xxxx xxxx", "adj_sp", dec_adjust_sp),
    entry("1011 x0x1 xxxx xxxx", "cbz", dec_cbz),
    entry("1011 0010 xxxx xxxx", "extend", dec_extend),
    entry("1011 010x xxxx xxxx", "push", dec_push),
    entry("1011 110x xxxx xxxx", "pop", dec_pop),
    entry("1011 0110 0101 x000", "setend", dec_setend),
    entry("1011 1010 xxxx xxxx", "rev", dec_rev),
    entry("1011 1110 xxxx xxxx", "bkpt", dec_bkpt),
    entry("1011 1111 xxxx 0000", "hint", dec_hint),
    entry("1100 xxxx xxxx xxxx", "ldm_stm", dec_ldm_stm),
    entry("1101 1110 xxxx xxxx", "udf", dec_udf),
    entry("1101 1111 xxxx xxxx", "svc", dec_svc),
    entry("1101 xxxx xxxx xxxx", "b_cond", dec_b_cond),
    entry("1110 0xxx xxxx xxxx", "b", dec_b),
];

fn dec_add_sub(raw: u32, _: u32) -> Option<Operation> {
    let op = if bit(raw, 9) { DpOp::Sub } else { DpOp::Add };
    let op2 = if bit(raw, 10) {
        imm(bits(raw, 8, 6))
    } else {
        shifted(lo(raw, 6))
    };
    Some(data(op, true, lo(raw, 0), lo(raw, 3), op2))
}

fn dec_shift_imm(raw: u32, _: u32) -> Option<Operation> {
    let op2 = Operand2::ShiftImm {
        rm: lo(raw, 3),
        shift: ShiftType::from_bits(bits(raw, 12, 11)),
        amount: bits(raw, 10, 6) as u8,
    };
    Some(data(DpOp::Mov, true, lo(raw, 0), 0, op2))
}

fn dec_imm8(raw: u32, _: u32) -> Option<Operation> {
    let rd = lo(raw, 8);
    let v = imm(bits(raw, 7, 0));
    Some(match bits(raw, 12, 11) {
        0 => data(DpOp::Mov, true, rd, 0, v),
        1 => data(DpOp::Cmp, true, 0, rd, v),
        2 => data(DpOp::Add, true, rd, rd, v),
        _ => data(DpOp::Sub, true, rd, rd, v),
    })
}

fn dec_alu(raw: u32, _: u32) -> Option<Operation> {
    let rm = lo(raw, 3);
    let rdn = lo(raw, 0);
    let by_reg = |shift| Operand2::ShiftReg { rm: rdn, shift, rs: rm };
    Some(match bits(raw, 9, 6) {
        0 => data(DpOp::And, true, rdn, rdn, shifted(rm)),
        1 => data(DpOp::Eor, true, rdn, rdn, shifted(rm)),
        2 => data(DpOp::Mov, true, rdn, 0, by_reg(ShiftType::Lsl)),
        3 => data(DpOp::Mov, true, rdn, 0, by_reg(ShiftType::Lsr)),
        4 => data(DpOp::Mov, true, rdn, 0, by_reg(ShiftType::Asr)),
        5 => data(DpOp::Adc, true, rdn, rdn, shifted(rm)),
        6 => data(DpOp::Sbc, true, rdn, rdn, shifted(rm)),
        7 => data(DpOp::Mov, true, rdn, 0, by_reg(ShiftType::Ror)),
        8 => data(DpOp::Tst, true, 0, rdn, shifted(rm)),
        9 => data(DpOp::Rsb, true, rdn, rm, imm(0)),
        10 => data(DpOp::Cmp, true, 0, rdn, shifted(rm)),
        11 => data(DpOp::Cmn, true, 0, rdn, shifted(rm)),
        12 => data(DpOp::Orr, true, rdn, rdn, shifted(rm)),
        13 => Operation::Mul { s: true, rd: rdn, rn: rm, rm: rdn },
        14 => data(DpOp::Bic, true, rdn, rdn, shifted(rm)),
        _ => data(DpOp::Mvn, true, rdn, 0, shifted(rm)),
    })
}

fn dec_bx_blx(raw: u32, _: u32) -> Option<Operation> {
    let rm = bits(raw, 6, 3) as u8;
    if bits(raw, 2, 0) != 0 {
        return None;
    }
    if bit(raw, 7) {
        (rm != 15).then_some(Operation::BlxReg { rm })
    } else {
        Some(Operation::Bx { rm })
    }
}

fn dec_hireg(raw: u32, _: u32) -> Option<Operation> {
    let rd = ((bit(raw, 7) as u32) << 3 | bits(raw, 2, 0)) as u8;
    let rm = bits(raw, 6, 3) as u8;
    match bits(raw, 9, 8) {
        0 => (rd != 15 || rm != 15).then_some(data(DpOp::Add, false, rd, rd, shifted(rm))),
        1 => (rd != 15 && rm != 15).then_some(data(DpOp::Cmp, true, 0, rd, shifted(rm))),
        _ => Some(data(DpOp::Mov, false, rd, 0, shifted(rm))),
    }
}

fn dec_ldr_literal(raw: u32, _: u32) -> Option<Operation> {
    Some(mem(true, MemSize::Word, false, lo(raw, 8), 15, MemOffset::Imm(bits(raw, 7, 0) * 4)))
}

fn dec_ldst_reg(raw: u32, _: u32) -> Option<Operation> {
    let offset = MemOffset::Reg { rm: lo(raw, 6), shift: ShiftType::Lsl, amount: 0 };
    let (rn, rt) = (lo(raw, 3), lo(raw, 0));
    let (load, size, signed) = match bits(raw, 11, 9) {
        0 => (false, MemSize::Word, false),
        1 => (false, MemSize::Half, false),
        2 => (false, MemSize::Byte, false),
        3 => (true, MemSize::Byte, true),
        4 => (true, MemSize::Word, false),
        5 => (true, MemSize::Half, false),
        6 => (true, MemSize::Byte, false),
        _ => (true, MemSize::Half, true),
    };
    Some(mem(load, size, signed, rt, rn, offset))
}

fn dec_ldst_imm(raw: u32, _: u32) -> Option<Operation> {
    let imm5 = bits(raw, 10, 6);
    let (size, offset) = if bit(raw, 12) {
        (MemSize::Byte, imm5)
    } else {
        (MemSize::Word, imm5 * 4)
    };
    Some(mem(bit(raw, 11), size, false, lo(raw, 0), lo(raw, 3), MemOffset::Imm(offset)))
}

fn dec_ldst_half(raw: u32, _: u32) -> Option<Operation> {
    let offset = MemOffset::Imm(bits(raw, 10, 6) * 2);
    Some(mem(bit(raw, 11), MemSize::Half, false, lo(raw, 0), lo(raw, 3), offset))
}

fn dec_ldst_sp(raw: u32, _: u32) -> Option<Operation> {
    let offset = MemOffset::Imm(bits(raw, 7, 0) * 4);
    Some(mem(bit(raw, 11), MemSize::Word, false, lo(raw, 8), 13, offset))
}

fn dec_adr_add_sp(raw: u32, addr: u32) -> Option<Operation> {
    let rd = lo(raw, 8);
    let offset = bits(raw, 7, 0) * 4;
    if bit(raw, 11) {
        Some(data(DpOp::Add, false, rd, 13, imm(offset)))
    } else {
        let value = (addr.wrapping_add(4) & !3).wrapping_add(offset);
        Some(Operation::Adr { rd, value })
    }
}

fn dec_adjust_sp(raw: u32, _: u32) -> Option<Operation> {
    let op = if bit(raw, 7) { DpOp::Sub } else { DpOp::Add };
    Some(data(op, false, 13, 13, imm(bits(raw, 6, 0) * 4)))
}

fn dec_cbz(raw: u32, addr: u32) -> Option<Operation> {
    let offset = (bit(raw, 9) as u32) << 6 | bits(raw, 7, 3) << 1;
    Some(Operation::CompareBranch {
        nonzero: bit(raw, 11),
        rn: lo(raw, 0),
        target: addr.wrapping_add(4).wrapping_add(offset),
    })
}

fn dec_extend(raw: u32, _: u32) -> Option<Operation> {
    let (signed, half) = match bits(raw, 7, 6) {
        0 => (true, true),
        1 => (true, false),
        2 => (false, true),
        _ => (false, false),
    };
    Some(Operation::Extend { signed, half, rd: lo(raw, 0), rn: None, rm: lo(raw, 3), rot: 0 })
}

fn dec_push(raw: u32, _: u32) -> Option<Operation> {
    let regs = (bits(raw, 7, 0) | (bit(raw, 8) as u32) << 14) as u16;
    (regs != 0).then_some(Operation::Block {
        load: false,
        rn: 13,
        regs,
        mode: BlockMode::Db,
        wback: true,
    })
}

fn dec_pop(raw: u32, _: u32) -> Option<Operation> {
    let regs = (bits(raw, 7, 0) | (bit(raw, 8) as u32) << 15) as u16;
    (regs != 0).then_some(Operation::Block {
        load: true,
        rn: 13,
        regs,
        mode: BlockMode::Ia,
        wback: true,
    })
}

fn dec_setend(raw: u32, _: u32) -> Option<Operation> {
    Some(Operation::SetEnd { big: bit(raw, 3) })
}

fn dec_rev(raw: u32, _: u32) -> Option<Operation> {
    let op = match bits(raw, 7, 6) {
        0 => RevOp::Rev,
        1 => RevOp::Rev16,
        3 => RevOp::Revsh,
        _ => return None,
    };
    Some(Operation::Rev { op, rd: lo(raw, 0), rm: lo(raw, 3) })
}

fn dec_bkpt(raw: u32, _: u32) -> Option<Operation> {
    Some(Operation::Bkpt { imm: bits(raw, 7, 0) })
}

fn dec_hint(raw: u32, _: u32) -> Option<Operation> {
    Some(Operation::Hint(super::decode::hint_from(bits(raw, 7, 4))))
}

fn dec_ldm_stm(raw: u32, _: u32) -> Option<Operation> {
    let load = bit(raw, 11);
    let rn = lo(raw, 8);
    let regs = bits(raw, 7, 0) as u16;
    if regs == 0 {
        return None;
    }
    let wback = !load || regs & (1 << rn) == 0;
    Some(Operation::Block { load, rn, regs, mode: BlockMode::Ia, wback })
}

fn dec_udf(raw: u32, _: u32) -> Option<Operation> {
    Some(Operation::Udf { imm: bits(raw, 7, 0) })
}

fn dec_svc(raw: u32, _: u32) -> Option<Operation> {
    Some(Operation::Svc { imm: bits(raw, 7, 0) })
}

fn dec_b_cond(raw: u32, addr: u32) -> Option<Operation> {
    let offset = sext(bits(raw, 7, 0) << 1, 9);
    Some(Operation::Branch { target: addr.wrapping_add(4).wrapping_add(offset), link: false })
}

fn dec_b(raw: u32, addr: u32) -> Option<Operation> {
    let offset = sext(bits(raw, 10, 0) << 1, 12);
    Some(Operation::Branch { target: addr.wrapping_add(4).wrapping_add(offset), link: false })
}

static T32: &[Entry] = &[
    entry("11110 xxxxxxxxxxx 11x1 xxxxxxxxxxxx", "bl", dec_bl),
    entry("11110 xxxxxxxxxxx 11x0 xxxxxxxxxxxx", "blx_imm", dec_bl),
];

/// BL and BLX immediate share the offset layout; bit 12 of the second
/// halfword selects BL.
fn dec_bl(raw: u32, addr: u32) -> Option<Operation> {
    let s = bits(raw, 26, 26);
    let j1 = bits(raw, 13, 13);
    let j2 = bits(raw, 11, 11);
    let i1 = !(j1 ^ s) & 1;
    let i2 = !(j2 ^ s) & 1;
    let imm10 = bits(raw, 25, 16);
    let imm11 = bits(raw, 10, 0);
    let offset = sext(s << 24 | i1 << 23 | i2 << 22 | imm10 << 12 | imm11 << 1, 25);
    if bit(raw, 12) {
        Some(Operation::Branch { target: addr.wrapping_add(4).wrapping_add(offset), link: true })
    } else {
        if imm11 & 1 != 0 {
            return None;
        }
        let base = addr.wrapping_add(4) & !3;
        Some(Operation::BlxImm { target: base.wrapping_add(offset) })
    }
}

/// Decode one Thumb instruction. `raw` holds a 16-bit encoding in its
/// low half, or `hw1 << 16 | hw2` for a 32-bit encoding.
pub fn decode_thumb(raw: u32, addr: u32) -> Result<Instruction, DecodeError> {
    let wide = is_thumb32((if raw > 0xffff { raw >> 16 } else { raw }) as u16);
    let len = if wide { 4 } else { 2 };
    let undefined = DecodeError::Undefined { addr, raw, len };
    let table = if wide { T32 } else { T16 };
    let entry = lookup(table, raw).ok_or(undefined)?;
    let op = (entry.decode)(raw, addr).ok_or(undefined)?;

    let cond = match op {
        Operation::Branch { link: false, .. } if !wide && raw >> 12 == 0xd => {
            Condition::from_bits(bits(raw, 11, 8)).ok_or(undefined)?
        }
        _ => Condition::Al,
    };
    Ok(Instruction { addr, raw, len, cond, op })
}
