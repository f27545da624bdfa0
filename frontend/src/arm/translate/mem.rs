// Loads, stores, load/store multiple and exclusives.
//
// Every guest access is a helper call followed by a fault check.
// Register writes are emitted only after the last access of an
// instruction, so a faulting instruction leaves no partial state.

use super::*;
use crate::arm::insn::{BlockMode, MemOffset, MemSize};

impl ArmDisasContext<'_> {
    fn align_mask(&self, size: MemSize) -> u32 {
        match size {
            MemSize::Double => 3,
            _ if self.cfg.strict_alignment => size.bytes() - 1,
            _ => 0,
        }
    }

    /// Byte-swap a loaded or to-be-stored value in big-endian state.
    fn swap_data(&self, ir: &mut Context, v: TempIdx, size: MemSize) -> TempIdx {
        if !self.big_endian() {
            return v;
        }
        match size {
            MemSize::Byte => v,
            MemSize::Half => un32(ir, Context::gen_bswap16, v),
            MemSize::Word | MemSize::Double => un32(ir, Context::gen_bswap32, v),
        }
    }

    /// Read `size` bytes at `addr`; returns the raw 64-bit helper result.
    fn gen_read(&mut self, ir: &mut Context, size: MemSize, addr: TempIdx, align: u32) -> TempIdx {
        let h = &self.cfg.helpers;
        let helper = match size {
            MemSize::Byte => h.read8,
            MemSize::Half => h.read16,
            MemSize::Word => h.read32,
            MemSize::Double => h.read64,
        };
        let a = zext64(ir, addr);
        let m = c64(ir, align as u64);
        let d = ir.new_temp(Type::I64);
        ir.gen_call(d, helper, self.env, &[a, m]);
        self.gen_fault_check(ir);
        d
    }

    fn gen_write(&mut self, ir: &mut Context, size: MemSize, addr: TempIdx, value: TempIdx, align: u32) {
        let h = &self.cfg.helpers;
        let helper = match size {
            MemSize::Byte => h.write8,
            MemSize::Half => h.write16,
            MemSize::Word => h.write32,
            MemSize::Double => h.write64,
        };
        let a = zext64(ir, addr);
        let m = c64(ir, align as u64);
        let d = ir.new_temp(Type::I64);
        ir.gen_call(d, helper, self.env, &[a, value, m]);
        self.gen_fault_check(ir);
    }

    /// Load a word pair as `(first, second)` in guest byte order.
    fn split_pair(&self, ir: &mut Context, v: TempIdx) -> (TempIdx, TempIdx) {
        let lo = lo32(ir, v);
        let hi = hi32(ir, v);
        (self.swap_data(ir, lo, MemSize::Word), self.swap_data(ir, hi, MemSize::Word))
    }

    fn join_pair(&self, ir: &mut Context, first: TempIdx, second: TempIdx) -> TempIdx {
        let lo = self.swap_data(ir, first, MemSize::Word);
        let hi = self.swap_data(ir, second, MemSize::Word);
        let lo = zext64(ir, lo);
        let hi = zext64(ir, hi);
        let sh = c64(ir, 32);
        let hi = bin64(ir, Context::gen_shl, hi, sh);
        bin64(ir, Context::gen_or, hi, lo)
    }

    /// Narrow a single loaded value to its guest register value.
    fn load_value(&self, ir: &mut Context, raw: TempIdx, size: MemSize, signed: bool) -> TempIdx {
        let v = lo32(ir, raw);
        let v = self.swap_data(ir, v, size);
        if !signed {
            return v;
        }
        let len = if size == MemSize::Byte { 8 } else { 16 };
        let d = ir.new_temp(Type::I32);
        ir.gen_sextract(Type::I32, d, v, 0, len)
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn trans_mem(
        &mut self,
        ir: &mut Context,
        load: bool,
        size: MemSize,
        signed: bool,
        rt: u8,
        rn: u8,
        offset: MemOffset,
        index: bool,
        add: bool,
        wback: bool,
    ) {
        let base = self.read_base(ir, rn);
        let off = match offset {
            MemOffset::Imm(v) => c32(ir, v),
            MemOffset::Reg { rm, shift, amount } => {
                let v = self.read_reg(ir, rm);
                self.shift_imm(ir, v, shift, amount as u32, false).0
            }
        };
        let f: BinOp = if add { Context::gen_add } else { Context::gen_sub };
        let offset_addr = bin32(ir, f, base, off);
        let addr = if index { offset_addr } else { base };
        let writeback = (wback || !index) && rn as usize != REG_PC;
        let align = self.align_mask(size);

        if load {
            let raw = self.gen_read(ir, size, addr, align);
            let loaded = if size == MemSize::Double {
                let (first, second) = self.split_pair(ir, raw);
                vec![(rt, first), (rt + 1, second)]
            } else {
                vec![(rt, self.load_value(ir, raw, size, signed))]
            };
            if writeback && loaded.iter().all(|&(r, _)| r != rn) {
                self.write_reg(ir, rn, offset_addr);
            }
            for (r, v) in loaded {
                self.write_reg_load(ir, r, v);
            }
        } else {
            let value = if size == MemSize::Double {
                let first = self.read_reg(ir, rt);
                let second = self.read_reg(ir, rt + 1);
                self.join_pair(ir, first, second)
            } else {
                let v = self.read_reg(ir, rt);
                let v = self.swap_data(ir, v, size);
                zext64(ir, v)
            };
            self.gen_write(ir, size, addr, value, align);
            if writeback {
                self.write_reg(ir, rn, offset_addr);
            }
            self.gen_pending_exit_check(ir);
        }
    }

    /// LDM/STM. Loaded values are held in temps until every access
    /// has succeeded; a loaded PC is written last and interworks.
    pub(super) fn trans_block(&mut self, ir: &mut Context, load: bool, rn: u8, regs: u16, mode: BlockMode, wback: bool) {
        let n = regs.count_ones();
        if n == 0 {
            return;
        }
        let base = self.read_reg(ir, rn);
        let size = 4 * n;
        let start = match mode {
            BlockMode::Ia => 0u32,
            BlockMode::Ib => 4,
            BlockMode::Da => 4u32.wrapping_sub(size),
            BlockMode::Db => size.wrapping_neg(),
        };
        let list: Vec<u8> = (0..NUM_REGS as u8).filter(|r| regs & (1 << r) != 0).collect();

        let mut loaded = Vec::with_capacity(list.len());
        for (i, &r) in list.iter().enumerate() {
            let addr = bini32(ir, Context::gen_add, base, start.wrapping_add(4 * i as u32));
            if load {
                let raw = self.gen_read(ir, MemSize::Word, addr, 3);
                loaded.push((r, self.load_value(ir, raw, MemSize::Word, false)));
            } else {
                let v = self.read_reg(ir, r);
                let v = self.swap_data(ir, v, MemSize::Word);
                let v = zext64(ir, v);
                self.gen_write(ir, MemSize::Word, addr, v, 3);
            }
        }

        let rn_in_list = regs & (1 << rn) != 0;
        if wback && !(load && rn_in_list) {
            let delta = match mode {
                BlockMode::Ia | BlockMode::Ib => size,
                BlockMode::Da | BlockMode::Db => size.wrapping_neg(),
            };
            let nb = bini32(ir, Context::gen_add, base, delta);
            self.write_reg(ir, rn, nb);
        }

        if load {
            // Ascending order puts PC last.
            for (r, v) in loaded {
                self.write_reg_load(ir, r, v);
            }
        } else {
            self.gen_pending_exit_check(ir);
        }
    }

    pub(super) fn trans_ldrex(&mut self, ir: &mut Context, size: MemSize, rt: u8, rn: u8) {
        let addr = self.read_reg(ir, rn);
        let a = zext64(ir, addr);
        let sz = c64(ir, size.bytes() as u64);
        let raw = ir.new_temp(Type::I64);
        ir.gen_call(raw, self.cfg.helpers.exclusive_read, self.env, &[a, sz]);
        self.gen_fault_check(ir);
        if size == MemSize::Double {
            let (first, second) = self.split_pair(ir, raw);
            self.write_reg(ir, rt, first);
            self.write_reg(ir, rt + 1, second);
        } else {
            let v = self.load_value(ir, raw, size, false);
            self.write_reg(ir, rt, v);
        }
    }

    pub(super) fn trans_strex(&mut self, ir: &mut Context, size: MemSize, rd: u8, rt: u8, rn: u8) {
        let addr = self.read_reg(ir, rn);
        let value = if size == MemSize::Double {
            let first = self.read_reg(ir, rt);
            let second = self.read_reg(ir, rt + 1);
            self.join_pair(ir, first, second)
        } else {
            let v = self.read_reg(ir, rt);
            let v = self.swap_data(ir, v, size);
            zext64(ir, v)
        };
        let a = zext64(ir, addr);
        let sz = c64(ir, size.bytes() as u64);
        let status = ir.new_temp(Type::I64);
        ir.gen_call(status, self.cfg.helpers.exclusive_write, self.env, &[a, value, sz]);
        self.gen_fault_check(ir);
        let s = lo32(ir, status);
        self.write_reg(ir, rd, s);
        self.gen_pending_exit_check(ir);
    }
}
