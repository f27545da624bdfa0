//! Reference interpreter for block IR.
//!
//! Executes the ops of one block against a live env, calling helpers by
//! address exactly as generated code does. `goto_tb` is a no-op, so a
//! block always returns through its `exit_tb`. The same evaluation
//! routine backs constant folding, which keeps the optimizer and the
//! oracle in agreement on every op's semantics.

use crate::block::{encode_exit, ExitKind};
use crate::context::Context;
use crate::error::IrError;
use crate::ir_builder::HelperFn;
use crate::opcode::Opcode;
use crate::temp::{TempIdx, TempKind};
use crate::types::{Cond, Type};

/// Sign-extend the low `bits` of `v`.
fn sext(v: u64, bits: u32) -> i64 {
    let sh = 64 - bits;
    ((v << sh) as i64) >> sh
}

/// Evaluate a pure op on constant inputs.
///
/// Returns `None` for ops that are not pure or whose result is
/// undefined (division by zero).
pub fn eval_pure(opc: Opcode, ty: Type, inputs: &[u64], cargs: &[u32]) -> Option<u64> {
    let bits = ty.size_bits();
    let m = ty.mask();
    let a = inputs.first().copied().unwrap_or(0) & m;
    let b = inputs.get(1).copied().unwrap_or(0) & m;
    let sh = (b as u32) & (bits - 1);
    let r = match opc {
        Opcode::Mov => a,
        Opcode::Add => a.wrapping_add(b),
        Opcode::Sub => a.wrapping_sub(b),
        Opcode::Mul => a.wrapping_mul(b),
        Opcode::Neg => a.wrapping_neg(),
        Opcode::And => a & b,
        Opcode::Or => a | b,
        Opcode::Xor => a ^ b,
        Opcode::Not => !a,
        Opcode::AndC => a & !b,
        Opcode::Shl => a << sh,
        Opcode::Shr => a >> sh,
        Opcode::Sar => (sext(a, bits) >> sh) as u64,
        Opcode::RotL | Opcode::RotR => {
            let left = if opc == Opcode::RotL { sh } else { (bits - sh) % bits };
            match ty {
                Type::I32 => (a as u32).rotate_left(left) as u64,
                Type::I64 => a.rotate_left(left),
            }
        }
        Opcode::DivS => {
            if b == 0 {
                return None;
            }
            sext(a, bits).wrapping_div(sext(b, bits)) as u64
        }
        Opcode::DivU => {
            if b == 0 {
                return None;
            }
            a / b
        }
        Opcode::Extract | Opcode::SExtract => {
            let (ofs, len) = (*cargs.first()?, *cargs.get(1)?);
            if len == 0 || ofs + len > bits {
                return None;
            }
            let field = (a >> ofs) & (u64::MAX >> (64 - len));
            if opc == Opcode::SExtract {
                sext(field, len) as u64
            } else {
                field
            }
        }
        Opcode::Bswap16 => ((a & 0xff) << 8) | ((a >> 8) & 0xff),
        Opcode::Bswap32 => (a as u32).swap_bytes() as u64,
        Opcode::Clz => match ty {
            Type::I32 => (a as u32).leading_zeros() as u64,
            Type::I64 => a.leading_zeros() as u64,
        },
        Opcode::ExtI32I64 => a as u32 as i32 as i64 as u64,
        Opcode::ExtUI32I64 => a as u32 as u64,
        Opcode::ExtrlI64I32 => inputs.first().copied().unwrap_or(0) as u32 as u64,
        Opcode::ExtrhI64I32 => inputs.first().copied().unwrap_or(0) >> 32,
        Opcode::SetCond => {
            let cond = Cond::from_raw(*cargs.first()?)?;
            cond.test(ty, a, b) as u64
        }
        Opcode::MovCond => {
            let cond = Cond::from_raw(*cargs.first()?)?;
            if cond.test(ty, a, b) {
                *inputs.get(2)?
            } else {
                *inputs.get(3)?
            }
        }
        _ => return None,
    };
    // Conversion ops produce their own fixed type.
    let out_ty = opc.fixed_type().unwrap_or(ty);
    Some(r & out_ty.mask())
}

struct Frame<'a> {
    ctx: &'a Context,
    env: *mut u8,
    vals: Vec<u64>,
}

impl Frame<'_> {
    /// Read a temp's current value.
    ///
    /// # Safety
    /// Globals read the env through its raw pointer.
    unsafe fn get(&self, t: TempIdx) -> u64 {
        let temp = self.ctx.temp(t);
        match temp.kind {
            TempKind::Const => temp.val,
            TempKind::Fixed => self.env as u64,
            TempKind::Global => read_mem(self.env.offset(temp.mem_offset as isize), temp.ty.size_bytes()),
            TempKind::Ebb => self.vals[t.0 as usize],
        }
    }

    unsafe fn set(&mut self, t: TempIdx, v: u64) {
        let temp = self.ctx.temp(t);
        let v = v & temp.ty.mask();
        match temp.kind {
            TempKind::Global => {
                write_mem(self.env.offset(temp.mem_offset as isize), temp.ty.size_bytes(), v)
            }
            _ => self.vals[t.0 as usize] = v,
        }
    }
}

unsafe fn read_mem(p: *const u8, size: u32) -> u64 {
    match size {
        1 => p.read() as u64,
        2 => (p as *const u16).read_unaligned() as u64,
        4 => (p as *const u32).read_unaligned() as u64,
        _ => (p as *const u64).read_unaligned(),
    }
}

unsafe fn write_mem(p: *mut u8, size: u32, v: u64) {
    match size {
        1 => p.write(v as u8),
        2 => (p as *mut u16).write_unaligned(v as u16),
        4 => (p as *mut u32).write_unaligned(v as u32),
        _ => (p as *mut u64).write_unaligned(v),
    }
}

/// Run the block in `ctx` against `env` and return its exit value.
///
/// # Safety
/// `env` must point to the env structure the block's globals and env
/// loads/stores were laid out for, and every `call` target must be a
/// valid helper for that env.
pub unsafe fn interpret(ctx: &Context, env: *mut u8) -> Result<u64, IrError> {
    let ops = ctx.ops();
    let mut label_pos = vec![usize::MAX; ctx.labels().len()];
    for (i, op) in ops.iter().enumerate() {
        if op.opc == Opcode::SetLabel {
            label_pos[op.carg(0) as usize] = i;
        }
    }
    let jump = |op: u32, label: u32| -> Result<usize, IrError> {
        match label_pos.get(label as usize) {
            Some(&p) if p != usize::MAX => Ok(p),
            _ => Err(IrError::UnknownLabel { op, label }),
        }
    };

    let mut f = Frame {
        ctx,
        env,
        vals: vec![0; ctx.nb_temps() as usize],
    };
    let mut pc = 0;
    while pc < ops.len() {
        let op = &ops[pc];
        let opi = op.idx.0;
        pc += 1;
        match op.opc {
            Opcode::Nop | Opcode::InsnStart | Opcode::SetLabel | Opcode::GotoTb => {}
            Opcode::Mb => std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst),
            Opcode::Br => pc = jump(opi, op.carg(0))?,
            Opcode::BrCond => {
                let cond = Cond::from_raw(op.carg(0))
                    .ok_or(IrError::BadConstArg { op: opi, value: op.carg(0) })?;
                let a = f.get(op.iargs()[0]);
                let b = f.get(op.iargs()[1]);
                if cond.test(op.op_type, a, b) {
                    pc = jump(opi, op.carg(1))?;
                }
            }
            Opcode::ExitTb => {
                let kind = ExitKind::from_raw(op.carg(0))
                    .ok_or(IrError::BadConstArg { op: opi, value: op.carg(0) })?;
                return Ok(encode_exit(ctx.block_id, kind));
            }
            Opcode::Ld8U | Opcode::Ld16U | Opcode::Ld32U | Opcode::Ld => {
                let size = op.opc.mem_size(op.op_type).unwrap_or(8);
                let base = f.get(op.iargs()[0]) as *const u8;
                let ofs = op.carg(0) as i32 as isize;
                let v = read_mem(base.offset(ofs), size);
                f.set(op.oargs()[0], v);
            }
            Opcode::St8 | Opcode::St16 | Opcode::St32 | Opcode::St => {
                let size = op.opc.mem_size(op.op_type).unwrap_or(8);
                let v = f.get(op.iargs()[0]);
                let base = f.get(op.iargs()[1]) as *mut u8;
                let ofs = op.carg(0) as i32 as isize;
                write_mem(base.offset(ofs), size, v);
            }
            Opcode::Call => {
                let addr = ((op.carg(1) as u64) << 32) | op.carg(0) as u64;
                let helper: HelperFn = std::mem::transmute(addr as usize);
                let ia = op.iargs();
                let r = helper(
                    f.get(ia[0]) as *mut u8,
                    f.get(ia[1]),
                    f.get(ia[2]),
                    f.get(ia[3]),
                );
                f.set(op.oargs()[0], r);
            }
            Opcode::Count => return Err(IrError::BadConstArg { op: opi, value: op.opc as u32 }),
            opc => {
                let inputs: Vec<u64> = op.iargs().iter().map(|&t| f.get(t)).collect();
                let cargs: Vec<u32> = op.cargs().iter().map(|c| c.0).collect();
                let r = eval_pure(opc, op.op_type, &inputs, &cargs).ok_or(match opc {
                    Opcode::DivS | Opcode::DivU => IrError::DivideByZero { op: opi },
                    _ => IrError::BadConstArg { op: opi, value: cargs.first().copied().unwrap_or(0) },
                })?;
                f.set(op.oargs()[0], r);
            }
        }
    }
    Err(IrError::MissingExit)
}
