// Common subexpression elimination over pure ops, local to each EBB.

use std::collections::HashMap;

use super::replace_with_mov;
use dbt_core::{Context, OpIdx, Opcode, TempIdx, Type, MAX_OP_ARGS};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    opc: Opcode,
    ty: Type,
    /// Inputs followed by constant args.
    args: [TempIdx; MAX_OP_ARGS],
}

fn is_commutative(opc: Opcode) -> bool {
    matches!(
        opc,
        Opcode::Add | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor
    )
}

pub(super) fn cse(ctx: &mut Context) -> bool {
    let mut table: HashMap<Key, TempIdx> = HashMap::new();
    let mut changed = false;

    for oi in 0..ctx.num_ops() {
        let idx = OpIdx(oi as u32);
        let op = ctx.op(idx);
        let opc = op.opc;
        if opc == Opcode::SetLabel {
            table.clear();
            continue;
        }

        let def = opc.def();
        let outs: Vec<TempIdx> = op.oargs().to_vec();
        if opc.is_pure() && opc != Opcode::Mov && def.nb_oargs == 1 {
            let start = def.nb_oargs as usize;
            let n = (def.nb_iargs + def.nb_cargs) as usize;
            let mut args = [TempIdx(u32::MAX); MAX_OP_ARGS];
            args[..n].copy_from_slice(&op.args[start..start + n]);
            if is_commutative(opc) && args[0] > args[1] {
                args.swap(0, 1);
            }
            let key = Key {
                opc,
                ty: op.op_type,
                args,
            };
            let dst = outs[0];
            match table.get(&key) {
                Some(&prev) if prev != dst => {
                    replace_with_mov(ctx, idx, dst, prev);
                    changed = true;
                }
                Some(_) => {}
                None => {
                    if !ctx.temp(dst).is_global() && !args[..def.nb_iargs as usize].contains(&dst) {
                        table.insert(key, dst);
                    }
                }
            }
        }

        // A redefined global invalidates every expression reading it.
        for t in outs {
            if ctx.temp(t).is_global() {
                table.retain(|k, _| {
                    let nb_in = k.opc.def().nb_iargs as usize;
                    !k.args[..nb_in].contains(&t)
                });
            }
        }
    }
    changed
}
