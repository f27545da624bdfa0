//! IR optimizer: constant folding, CSE, dead guest-state store pruning
//! and dead code elimination, run to a fixpoint before liveness.
//!
//! Every pass reports whether it rewrote anything. The pipeline stops
//! at the first round in which no pass did, so running it again on its
//! own output leaves the IR untouched.

mod cse;
mod dce;
mod fold;
mod prune;

use dbt_core::{Context, OpIdx, Opcode, TempIdx};

/// Upper bound on pipeline rounds for a single block.
const MAX_ROUNDS: usize = 8;

/// Run the full pass pipeline on `ctx`. Returns the number of rounds
/// that changed the IR.
pub fn optimize(ctx: &mut Context) -> usize {
    let mut rounds = 0;
    while rounds < MAX_ROUNDS {
        let mut changed = fold::fold(ctx);
        changed |= cse::cse(ctx);
        changed |= prune::prune(ctx);
        changed |= dce::dce(ctx);
        if !changed {
            break;
        }
        rounds += 1;
    }
    ctx.compact_ops();
    tracing::trace!(rounds, ops = ctx.num_ops(), "optimized block");
    rounds
}

// -- Rewrites shared by the passes --

fn make_nop(ctx: &mut Context, idx: OpIdx) {
    ctx.op_mut(idx).rewrite(Opcode::Nop, dbt_core::Type::I64, &[]);
}

/// Replace the op with `mov dst, src`, or drop it when `dst == src`.
fn replace_with_mov(ctx: &mut Context, idx: OpIdx, dst: TempIdx, src: TempIdx) {
    if dst == src {
        make_nop(ctx, idx);
        return;
    }
    let ty = ctx.temp(dst).ty;
    ctx.op_mut(idx).rewrite(Opcode::Mov, ty, &[dst, src]);
}

/// Replace the op with `mov dst, $val`. Returns the constant temp.
fn replace_with_const(ctx: &mut Context, idx: OpIdx, dst: TempIdx, val: u64) -> TempIdx {
    let ty = ctx.temp(dst).ty;
    let c = ctx.new_const(ty, val);
    ctx.op_mut(idx).rewrite(Opcode::Mov, ty, &[dst, c]);
    c
}
