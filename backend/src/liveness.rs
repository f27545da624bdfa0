use dbt_core::op::LifeData;
use dbt_core::{Context, OpFlags, Opcode, TempIdx};

/// Per-temp read positions, used by the allocator to pick the value
/// whose next use is furthest away.
#[derive(Debug, Default)]
pub struct NextUse {
    uses: Vec<Vec<u32>>,
}

impl NextUse {
    /// Op index of the first read of `t` strictly after `now`, or
    /// `u32::MAX` when the value is never read again.
    pub fn after(&self, t: TempIdx, now: u32) -> u32 {
        let Some(list) = self.uses.get(t.0 as usize) else {
            return u32::MAX;
        };
        let i = list.partition_point(|&p| p <= now);
        list.get(i).copied().unwrap_or(u32::MAX)
    }
}

/// Perform backward liveness analysis over the IR ops in `ctx`.
///
/// Sets `LifeData` on each op marking the arguments that are dead
/// after it, and returns the forward read positions of every temp.
/// Globals are live at every block-ending op; Ebb temps never are.
pub fn liveness_analysis(ctx: &mut Context) -> NextUse {
    let nb_temps = ctx.nb_temps() as usize;
    let nb_globals = ctx.nb_globals() as usize;

    // temp_state[i] = true means temp i is live
    let mut temp_state = vec![false; nb_temps];
    for s in temp_state.iter_mut().take(nb_globals) {
        *s = true;
    }

    let mut uses: Vec<Vec<u32>> = vec![Vec::new(); nb_temps];

    for oi in (0..ctx.num_ops()).rev() {
        let op = ctx.ops()[oi].clone();
        let def = op.opc.def();

        if def.flags.contains(OpFlags::BB_END) {
            for s in temp_state.iter_mut().take(nb_globals) {
                *s = true;
            }
        }
        if op.opc == Opcode::SetLabel {
            // Nothing local survives a label.
            for s in temp_state.iter_mut().skip(nb_globals) {
                *s = false;
            }
        }

        if op.opc == Opcode::Nop || op.opc == Opcode::InsnStart {
            continue;
        }

        let mut life = LifeData(0);
        let nb_oargs = def.nb_oargs as usize;
        let nb_iargs = def.nb_iargs as usize;

        for i in 0..nb_oargs {
            let tidx = op.args[i].0 as usize;
            if tidx >= nb_temps {
                continue;
            }
            if !temp_state[tidx] {
                life.set_dead(i as u32);
            }
            temp_state[tidx] = false;
        }

        for i in 0..nb_iargs {
            let arg_pos = nb_oargs + i;
            let tidx = op.args[arg_pos].0 as usize;
            if tidx >= nb_temps {
                continue;
            }
            if !temp_state[tidx] {
                // Last use
                life.set_dead(arg_pos as u32);
            }
            temp_state[tidx] = true;
            uses[tidx].push(oi as u32);
        }

        ctx.op_mut(op.idx).life = life;
    }

    // Collected backwards; the same temp may appear twice in one op.
    for list in &mut uses {
        list.reverse();
        list.dedup();
    }
    NextUse { uses }
}
