// Constant folding, copy propagation, algebraic simplification and
// branch folding in one forward pass.

use super::{make_nop, replace_with_const, replace_with_mov};
use dbt_core::interp::eval_pure;
use dbt_core::{Cond, Context, OpIdx, Opcode, TempIdx, Type};

/// Per-temp optimization info tracked during the pass.
#[derive(Clone, Copy, Default)]
struct TempInfo {
    known: Option<u64>,
    /// Canonical copy source (None = no known copy).
    copy_of: Option<TempIdx>,
}

struct Info {
    temps: Vec<TempInfo>,
}

impl Info {
    fn new(ctx: &Context) -> Self {
        let mut info = Self { temps: Vec::new() };
        info.reset(ctx);
        info
    }

    /// Forget everything except the values of constant temps.
    fn reset(&mut self, ctx: &Context) {
        self.temps.clear();
        self.temps.extend(ctx.temps().iter().map(|t| TempInfo {
            known: t.is_const().then_some(t.val),
            copy_of: None,
        }));
    }

    fn get(&self, t: TempIdx) -> TempInfo {
        self.temps.get(t.0 as usize).copied().unwrap_or_default()
    }

    fn slot(&mut self, t: TempIdx) -> &mut TempInfo {
        let i = t.0 as usize;
        if i >= self.temps.len() {
            self.temps.resize(i + 1, TempInfo::default());
        }
        &mut self.temps[i]
    }

    /// `t` is being redefined: drop what is known about it and every
    /// copy that refers to its old value.
    fn invalidate(&mut self, t: TempIdx) {
        *self.slot(t) = TempInfo::default();
        for ti in self.temps.iter_mut() {
            if ti.copy_of == Some(t) {
                ti.copy_of = None;
            }
        }
    }

    fn set_const(&mut self, t: TempIdx, val: u64) {
        self.invalidate(t);
        self.slot(t).known = Some(val);
    }

    fn set_copy(&mut self, dst: TempIdx, src: TempIdx) {
        self.invalidate(dst);
        let si = self.get(src);
        let d = self.slot(dst);
        match si.known {
            Some(v) => d.known = Some(v),
            None => d.copy_of = Some(src),
        }
    }
}

/// Returns true if any op was rewritten.
pub(super) fn fold(ctx: &mut Context) -> bool {
    let mut info = Info::new(ctx);
    let mut changed = false;
    let mut reachable = true;

    for oi in 0..ctx.num_ops() {
        let idx = OpIdx(oi as u32);
        let opc = ctx.op(idx).opc;

        if opc == Opcode::SetLabel {
            reachable = true;
            info.reset(ctx);
            continue;
        }
        if !reachable {
            if opc != Opcode::Nop {
                make_nop(ctx, idx);
                changed = true;
            }
            continue;
        }
        match opc {
            Opcode::Nop | Opcode::InsnStart | Opcode::GotoTb | Opcode::Mb => continue,
            Opcode::Br | Opcode::ExitTb => {
                reachable = false;
                continue;
            }
            _ => {}
        }

        changed |= propagate_inputs(ctx, &info, idx);

        let op = ctx.op(idx);
        let ty = op.op_type;
        match opc {
            Opcode::Mov => {
                let (dst, src) = (op.args[0], op.args[1]);
                if dst == src {
                    make_nop(ctx, idx);
                    changed = true;
                } else {
                    info.set_copy(dst, src);
                }
            }
            Opcode::BrCond => {
                let (a, b) = (op.args[0], op.args[1]);
                let cond = Cond::from_raw(op.carg(0));
                let label = op.carg(1);
                let taken = match (cond, info.get(a).known, info.get(b).known) {
                    (Some(Cond::Always), ..) => Some(true),
                    (Some(Cond::Never), ..) => Some(false),
                    (Some(c), Some(x), Some(y)) => Some(c.test(ty, x, y)),
                    _ => None,
                };
                match taken {
                    Some(true) => {
                        ctx.op_mut(idx).rewrite(Opcode::Br, Type::I64, &[TempIdx(label)]);
                        reachable = false;
                        changed = true;
                    }
                    Some(false) => {
                        make_nop(ctx, idx);
                        changed = true;
                    }
                    None => {}
                }
            }
            opc if opc.is_pure() => {
                changed |= fold_pure(ctx, &mut info, idx);
            }
            _ => {
                let outs: Vec<TempIdx> = ctx.op(idx).oargs().to_vec();
                for t in outs {
                    info.invalidate(t);
                }
            }
        }
    }
    changed
}

/// Substitute known constants and canonical copies into the op's
/// inputs.
fn propagate_inputs(ctx: &mut Context, info: &Info, idx: OpIdx) -> bool {
    let op = ctx.op(idx);
    let def = op.opc.def();
    let start = def.nb_oargs as usize;
    let end = start + def.nb_iargs as usize;
    let mut changed = false;
    for slot in start..end {
        let t = ctx.op(idx).args[slot];
        let temp = ctx.temp(t);
        if temp.is_const() || temp.is_fixed() {
            continue;
        }
        let ti = info.get(t);
        let replacement = match (ti.known, ti.copy_of) {
            (Some(v), _) => {
                let ty = temp.ty;
                ctx.new_const(ty, v)
            }
            (None, Some(src)) => src,
            (None, None) => continue,
        };
        if replacement != t {
            ctx.op_mut(idx).args[slot] = replacement;
            changed = true;
        }
    }
    changed
}

fn fold_pure(ctx: &mut Context, info: &mut Info, idx: OpIdx) -> bool {
    let op = ctx.op(idx).clone();
    let dst = op.args[0];
    let iargs = op.iargs();
    let known: Option<Vec<u64>> = iargs.iter().map(|&t| info.get(t).known).collect();

    if let Some(vals) = known {
        let cargs: Vec<u32> = op.cargs().iter().map(|c| c.0).collect();
        if let Some(v) = eval_pure(op.opc, op.op_type, &vals, &cargs) {
            replace_with_const(ctx, idx, dst, v);
            info.set_const(dst, v);
            return true;
        }
    }

    match simplify(ctx, info, &op) {
        Some(Simplified::Const(v)) => {
            replace_with_const(ctx, idx, dst, v);
            info.set_const(dst, v);
            true
        }
        Some(Simplified::Copy(src)) => {
            replace_with_mov(ctx, idx, dst, src);
            if dst != src {
                info.set_copy(dst, src);
            }
            true
        }
        Some(Simplified::Neg(src)) => {
            let ty = op.op_type;
            ctx.op_mut(idx).rewrite(Opcode::Neg, ty, &[dst, src]);
            info.invalidate(dst);
            true
        }
        None => {
            info.invalidate(dst);
            false
        }
    }
}

enum Simplified {
    Const(u64),
    Copy(TempIdx),
    Neg(TempIdx),
}

/// Algebraic identities with one constant or two equal operands.
fn simplify(ctx: &Context, info: &Info, op: &dbt_core::Op) -> Option<Simplified> {
    use Simplified::*;

    let iargs = op.iargs();
    if iargs.len() != 2 || op.opc == Opcode::SetCond {
        return None;
    }
    let (a, b) = (iargs[0], iargs[1]);
    let mask = op.op_type.mask();
    let av = info.get(a).known.map(|v| v & mask);
    let bv = info.get(b).known.map(|v| v & mask);
    // Only identities whose result keeps the op's type.
    if ctx.temp(op.args[0]).ty != op.op_type {
        return None;
    }

    if let Some(b) = bv {
        match op.opc {
            // x + 0, x - 0, x | 0, x ^ 0, x << 0, x >> 0, x rot 0 -> x
            Opcode::Add
            | Opcode::Sub
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Sar
            | Opcode::RotL
            | Opcode::RotR
            | Opcode::AndC
                if b == 0 =>
            {
                return Some(Copy(a))
            }
            Opcode::Mul | Opcode::And if b == 0 => return Some(Const(0)),
            Opcode::Mul | Opcode::DivS | Opcode::DivU if b == 1 => return Some(Copy(a)),
            Opcode::And if b == mask => return Some(Copy(a)),
            Opcode::Or if b == mask => return Some(Const(mask)),
            Opcode::AndC if b == mask => return Some(Const(0)),
            _ => {}
        }
    }

    if let Some(a_val) = av {
        match op.opc {
            Opcode::Add | Opcode::Or | Opcode::Xor if a_val == 0 => return Some(Copy(b)),
            Opcode::Sub if a_val == 0 => return Some(Neg(b)),
            Opcode::Mul if a_val == 1 => return Some(Copy(b)),
            Opcode::Mul
            | Opcode::And
            | Opcode::AndC
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Sar
            | Opcode::RotL
            | Opcode::RotR
                if a_val == 0 =>
            {
                return Some(Const(0))
            }
            Opcode::And if a_val == mask => return Some(Copy(b)),
            Opcode::Or if a_val == mask => return Some(Const(mask)),
            _ => {}
        }
    }

    if a == b {
        match op.opc {
            Opcode::And | Opcode::Or => return Some(Copy(a)),
            Opcode::Xor | Opcode::Sub | Opcode::AndC => return Some(Const(0)),
            _ => {}
        }
    }
    None
}
