// Branches and instruction-set/endianness switches.

use super::*;

impl ArmDisasContext<'_> {
    pub(super) fn trans_branch(&mut self, ir: &mut Context, target: u32, link: bool) {
        if link {
            let lr = c32(ir, self.link_value());
            self.write_reg(ir, REG_LR as u8, lr);
        }
        self.gen_goto(ir, 0, target);
    }

    /// BLX immediate always switches instruction set.
    pub(super) fn trans_blx_imm(&mut self, ir: &mut Context, target: u32) {
        let lr = c32(ir, self.link_value());
        self.write_reg(ir, REG_LR as u8, lr);
        let t = c32(ir, !self.thumb() as u32);
        ir.gen_st32(Type::I32, t, self.env, THUMB_OFFSET);
        self.set_pc(ir, target);
        self.exit(ir, ExitKind::NoChain);
    }

    pub(super) fn trans_blx_reg(&mut self, ir: &mut Context, rm: u8) {
        // Copy first: `blx lr` reads the old LR.
        let v = self.read_reg(ir, rm);
        let target = ir.new_temp(Type::I32);
        ir.gen_mov(Type::I32, target, v);
        let lr = c32(ir, self.link_value());
        self.write_reg(ir, REG_LR as u8, lr);
        self.gen_bx_write_pc(ir, target);
    }

    pub(super) fn trans_cbz(&mut self, ir: &mut Context, nonzero: bool, rn: u8, target: u32) {
        let v = self.regs[rn as usize];
        let zero = c32(ir, 0);
        let not_taken = ir.new_label();
        let skip = if nonzero { Cond::Eq } else { Cond::Ne };
        ir.gen_brcond(Type::I32, v, zero, skip, not_taken);
        self.gen_goto(ir, 0, target);
        ir.gen_set_label(not_taken);
        self.base.is_jmp = DisasJumpType::Stop;
    }

    pub(super) fn trans_setend(&mut self, ir: &mut Context, big: bool) {
        let e = c32(ir, big as u32);
        ir.gen_st32(Type::I32, e, self.env, BIG_ENDIAN_OFFSET);
        let next = self.next_pc();
        self.set_pc(ir, next);
        self.exit(ir, ExitKind::NoChain);
    }
}
