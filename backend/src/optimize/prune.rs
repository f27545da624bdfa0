// Removal of guest-state writes that are overwritten before anything
// reads them. Most of these are flag computations: N and Z are set by
// nearly every flag-setting instruction and only the last one in a
// block survives.

use super::make_nop;
use dbt_core::{Context, OpFlags, OpIdx, Opcode};

pub(super) fn prune(ctx: &mut Context) -> bool {
    let nb_globals = ctx.nb_globals() as usize;
    // overwritten[g]: the next access to global g after this point is a
    // write.
    let mut overwritten = vec![false; nb_globals];
    let mut changed = false;

    for oi in (0..ctx.num_ops()).rev() {
        let idx = OpIdx(oi as u32);
        let op = ctx.op(idx);
        let def = op.opc.def();
        if def
            .flags
            .intersects(OpFlags::BB_END.union(OpFlags::BB_EXIT))
        {
            overwritten.fill(false);
        }
        if matches!(op.opc, Opcode::Nop | Opcode::InsnStart) {
            continue;
        }

        let is_global = |t: dbt_core::TempIdx| (t.0 as usize) < nb_globals && ctx.temp(t).is_global();
        let outs = op.oargs();
        let removable = op.opc.is_pure()
            && !outs.is_empty()
            && outs
                .iter()
                .all(|&t| is_global(t) && overwritten[t.0 as usize]);
        if removable {
            make_nop(ctx, idx);
            changed = true;
            continue;
        }

        let ins: Vec<_> = op.iargs().to_vec();
        let outs: Vec<_> = outs.to_vec();
        for t in outs {
            if is_global(t) {
                overwritten[t.0 as usize] = true;
            }
        }
        for t in ins {
            if is_global(t) {
                overwritten[t.0 as usize] = false;
            }
        }
    }
    changed
}
