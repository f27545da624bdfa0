// Dead code elimination for pure ops whose results are never read.
// Globals are left to `prune`; ops with side effects are never touched.

use super::make_nop;
use dbt_core::{Context, OpIdx, Opcode};

pub(super) fn dce(ctx: &mut Context) -> bool {
    let mut live = vec![false; ctx.nb_temps() as usize];
    let mut changed = false;

    for oi in (0..ctx.num_ops()).rev() {
        let idx = OpIdx(oi as u32);
        let op = ctx.op(idx);
        if matches!(op.opc, Opcode::Nop | Opcode::InsnStart) {
            continue;
        }

        let outs = op.oargs();
        let dead = op.opc.is_pure()
            && !outs.is_empty()
            && outs.iter().all(|&t| {
                let temp = ctx.temp(t);
                !temp.is_global_or_fixed() && !live[t.0 as usize]
            });
        if dead {
            make_nop(ctx, idx);
            changed = true;
            continue;
        }

        let ins: Vec<_> = op.iargs().to_vec();
        for &t in op.oargs() {
            live[t.0 as usize] = false;
        }
        for t in ins {
            live[t.0 as usize] = true;
        }
    }
    changed
}
