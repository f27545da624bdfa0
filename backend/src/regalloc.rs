use crate::code_buffer::CodeBuffer;
use crate::constraint::OpConstraint;
use crate::error::BackendError;
use crate::liveness::NextUse;
use crate::translate::ChainSite;
use crate::x86_64::regs::{ALLOCATABLE_REGS, CALL_ARG_REGS, CALL_CLOBBERED};
use crate::HostCodeGen;
use dbt_core::label::RelocKind;
use dbt_core::temp::TempKind;
use dbt_core::types::{RegSet, TempVal};
use dbt_core::{encode_exit, Cond, Context, ExitKind, Op, OpIdx, Opcode, TempIdx};

type Result<T> = std::result::Result<T, BackendError>;

/// Where a value lives after an op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Reg(u8),
    /// Spill slot, as an offset from the frame register.
    Stack(i64),
}

/// Location of every value held by the allocator after each op.
#[derive(Debug, Default, Clone)]
pub struct AllocTrace {
    pub entries: Vec<(OpIdx, Vec<(TempIdx, Location)>)>,
}

impl AllocTrace {
    /// First point where two values share a location, if any.
    pub fn first_conflict(&self) -> Option<(OpIdx, Location)> {
        for (op, locs) in &self.entries {
            let mut seen = std::collections::HashSet::new();
            for &(_, loc) in locs {
                if !seen.insert(loc) {
                    return Some((*op, loc));
                }
            }
        }
        None
    }
}

/// Result of allocating and emitting one block.
#[derive(Debug, Default)]
pub struct RegAllocOutput {
    pub chain_sites: [Option<ChainSite>; 2],
    /// High-water mark of the spill frame in bytes.
    pub spill_bytes: u32,
    pub trace: Option<AllocTrace>,
}

/// Reusable 8-byte spill slots in the block frame.
struct SpillSlots {
    free: Vec<i64>,
    next: i64,
    start: i64,
    end: i64,
}

impl SpillSlots {
    fn new(start: i64, end: i64) -> Self {
        Self {
            free: Vec::new(),
            next: start,
            start,
            end,
        }
    }

    fn alloc(&mut self) -> Result<i64> {
        if let Some(off) = self.free.pop() {
            return Ok(off);
        }
        if self.next + 8 > self.end {
            return Err(BackendError::SpillAreaExhausted {
                capacity: (self.end - self.start) as u32,
            });
        }
        let off = self.next;
        self.next += 8;
        Ok(off)
    }

    fn release(&mut self, off: i64) {
        self.free.push(off);
    }

    fn high_water(&self) -> u32 {
        (self.next - self.start) as u32
    }
}

/// Register allocator state.
struct RegAllocState {
    reg_to_temp: [Option<TempIdx>; 16],
    free_regs: RegSet,
    allocatable: RegSet,
    /// Registers held for the current op only (operand copies,
    /// clobbers); owned by no temp.
    op_scratch: RegSet,
    slots: SpillSlots,
    next_use: NextUse,
    /// Index of the op being allocated.
    now: u32,
}

impl RegAllocState {
    fn free_reg(&mut self, reg: u8) {
        self.reg_to_temp[reg as usize] = None;
        if self.allocatable.contains(reg) {
            self.free_regs = self.free_regs.set(reg);
        }
    }

    fn assign(&mut self, reg: u8, tidx: TempIdx) {
        self.reg_to_temp[reg as usize] = Some(tidx);
        self.free_regs = self.free_regs.clear(reg);
    }

    fn reserve(&mut self, reg: u8) {
        self.reg_to_temp[reg as usize] = None;
        self.free_regs = self.free_regs.clear(reg);
        self.op_scratch = self.op_scratch.set(reg);
    }

    fn release_scratch(&mut self) {
        for r in self.op_scratch.iter() {
            if self.reg_to_temp[r as usize].is_none() {
                self.free_reg(r);
            }
        }
        self.op_scratch = RegSet::EMPTY;
    }
}

// -- Helper functions --

/// Base register and offset backing a temp's memory copy.
fn mem_home(ctx: &Context, tidx: TempIdx) -> (u8, i64) {
    let t = ctx.temp(tidx);
    let base = match t.mem_base {
        Some(b) => ctx.temp(b).reg,
        None => ctx.frame_reg,
    };
    // The env pointer and the frame register are always set up by
    // `init_context` before allocation starts.
    (base.unwrap_or(0), t.mem_offset)
}

/// Sync a global back to the env if its register copy is newer.
fn temp_sync(ctx: &mut Context, backend: &impl HostCodeGen, buf: &mut CodeBuffer, tidx: TempIdx) {
    let temp = ctx.temp(tidx);
    if temp.mem_coherent || temp.val_type != TempVal::Reg {
        return;
    }
    if let Some(reg) = temp.reg {
        let ty = temp.ty;
        let (base, offset) = mem_home(ctx, tidx);
        backend.out_st(buf, ty, reg, base, offset);
    }
    ctx.temp_mut(tidx).mem_coherent = true;
}

/// Sync all live globals back to memory, keeping their registers.
fn sync_globals(ctx: &mut Context, backend: &impl HostCodeGen, buf: &mut CodeBuffer) {
    for i in 0..ctx.nb_globals() {
        let tidx = TempIdx(i);
        if ctx.temp(tidx).kind == TempKind::Global {
            temp_sync(ctx, backend, buf, tidx);
        }
    }
}

/// Forget every register binding. Globals must be synced already.
fn drop_all(ctx: &mut Context, state: &mut RegAllocState) {
    for r in 0..16u8 {
        let Some(tidx) = state.reg_to_temp[r as usize] else {
            continue;
        };
        let t = ctx.temp_mut(tidx);
        match t.kind {
            TempKind::Fixed => continue,
            TempKind::Global => t.val_type = TempVal::Mem,
            TempKind::Const => t.val_type = TempVal::Const,
            TempKind::Ebb => {
                t.val_type = if t.mem_allocated {
                    TempVal::Mem
                } else {
                    TempVal::Dead
                }
            }
        }
        t.reg = None;
        state.free_reg(r);
    }
}

/// Evict the current occupant of `reg`. Globals are synced to the env,
/// Ebb temps are spilled to a stack slot, constants are simply dropped.
fn evict_reg(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeBuffer,
    reg: u8,
) -> Result<()> {
    let Some(tidx) = state.reg_to_temp[reg as usize] else {
        return Ok(());
    };
    let kind = ctx.temp(tidx).kind;
    match kind {
        TempKind::Fixed => return Ok(()),
        TempKind::Const => {
            ctx.temp_mut(tidx).val_type = TempVal::Const;
        }
        TempKind::Global => {
            temp_sync(ctx, backend, buf, tidx);
            ctx.temp_mut(tidx).val_type = TempVal::Mem;
        }
        TempKind::Ebb => {
            let t = ctx.temp(tidx);
            if !t.mem_allocated {
                let off = state.slots.alloc()?;
                let t = ctx.temp_mut(tidx);
                t.mem_allocated = true;
                t.mem_offset = off;
                t.mem_coherent = false;
            }
            if !ctx.temp(tidx).mem_coherent {
                let ty = ctx.temp(tidx).ty;
                let (base, offset) = mem_home(ctx, tidx);
                backend.out_st(buf, ty, reg, base, offset);
            }
            let t = ctx.temp_mut(tidx);
            t.mem_coherent = true;
            t.val_type = TempVal::Mem;
        }
    }
    ctx.temp_mut(tidx).reg = None;
    state.free_reg(reg);
    Ok(())
}

/// Move the occupant of `reg` into another register outside `avoid`.
fn relocate_reg(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeBuffer,
    reg: u8,
    avoid: RegSet,
) -> Result<()> {
    let Some(tidx) = state.reg_to_temp[reg as usize] else {
        return Ok(());
    };
    let ty = ctx.temp(tidx).ty;
    let dst = reg_alloc(
        ctx,
        state,
        backend,
        buf,
        state.allocatable,
        avoid.set(reg),
        RegSet::EMPTY,
    )?;
    backend.out_mov(buf, ty, dst, reg);
    state.free_reg(reg);
    state.assign(dst, tidx);
    ctx.temp_mut(tidx).reg = Some(dst);
    Ok(())
}

/// Pick the occupied register in `candidates` whose value is needed
/// furthest in the future. Ties prefer values that are free to drop.
fn pick_victim(ctx: &Context, state: &RegAllocState, candidates: RegSet) -> Option<u8> {
    candidates
        .iter()
        .filter_map(|r| state.reg_to_temp[r as usize].map(|t| (r, t)))
        .max_by_key(|&(r, t)| {
            let temp = ctx.temp(t);
            let cheap = match temp.kind {
                TempKind::Const => 2,
                _ if temp.mem_coherent => 1,
                _ => 0,
            };
            // lower register number wins remaining ties
            (state.next_use.after(t, state.now), cheap, 16 - r)
        })
        .map(|(r, _)| r)
}

/// Allocate a register from `required & ~forbidden`, preferring
/// `preferred`. Evicts an occupant if necessary. If all required
/// registers are forbidden (a pinned constraint conflicting with a
/// prior input), that input is moved out of the way first.
fn reg_alloc(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeBuffer,
    required: RegSet,
    forbidden: RegSet,
    preferred: RegSet,
) -> Result<u8> {
    let usable = required
        .intersect(state.allocatable)
        .subtract(state.op_scratch);
    let candidates = usable.subtract(forbidden);
    let pref_free = candidates.intersect(state.free_regs).intersect(preferred);
    if let Some(r) = pref_free.first() {
        return Ok(r);
    }
    if let Some(r) = candidates.intersect(state.free_regs).first() {
        return Ok(r);
    }
    if let Some(r) = pick_victim(ctx, state, candidates) {
        evict_reg(ctx, state, backend, buf, r)?;
        return Ok(r);
    }
    let Some(r) = usable.first() else {
        return Err(BackendError::Unallocatable { opc: "?" });
    };
    relocate_reg(ctx, state, backend, buf, r, forbidden)?;
    Ok(r)
}

/// Load a temp into a register satisfying the constraint.
/// Returns the allocated host register.
#[allow(clippy::too_many_arguments)]
fn temp_load_to(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeBuffer,
    tidx: TempIdx,
    required: RegSet,
    forbidden: RegSet,
    preferred: RegSet,
) -> Result<u8> {
    let temp = ctx.temp(tidx);
    let ty = temp.ty;
    match temp.val_type {
        TempVal::Reg => {
            let Some(cur) = temp.reg else {
                return Err(BackendError::DeadInput {
                    op: state.now,
                    temp: tidx.0,
                });
            };
            if temp.is_fixed() || (required.contains(cur) && !forbidden.contains(cur)) {
                return Ok(cur);
            }
            if forbidden.contains(cur) {
                // Already claimed by another operand of this op: give
                // this operand its own copy.
                let dst = reg_alloc(ctx, state, backend, buf, required, forbidden, preferred)?;
                backend.out_mov(buf, ty, dst, cur);
                state.reserve(dst);
                return Ok(dst);
            }
            let dst = reg_alloc(
                ctx,
                state,
                backend,
                buf,
                required,
                forbidden.set(cur),
                preferred,
            )?;
            backend.out_mov(buf, ty, dst, cur);
            state.free_reg(cur);
            state.assign(dst, tidx);
            ctx.temp_mut(tidx).reg = Some(dst);
            Ok(dst)
        }
        TempVal::Const => {
            let val = temp.val;
            let reg = reg_alloc(ctx, state, backend, buf, required, forbidden, preferred)?;
            state.assign(reg, tidx);
            backend.out_movi(buf, ty, reg, val);
            let t = ctx.temp_mut(tidx);
            t.val_type = TempVal::Reg;
            t.reg = Some(reg);
            Ok(reg)
        }
        TempVal::Mem => {
            let reg = reg_alloc(ctx, state, backend, buf, required, forbidden, preferred)?;
            state.assign(reg, tidx);
            let (base, offset) = mem_home(ctx, tidx);
            backend.out_ld(buf, ty, reg, base, offset);
            let t = ctx.temp_mut(tidx);
            t.val_type = TempVal::Reg;
            t.reg = Some(reg);
            t.mem_coherent = true;
            Ok(reg)
        }
        TempVal::Dead => Err(BackendError::DeadInput {
            op: state.now,
            temp: tidx.0,
        }),
    }
}

/// Release a temp after its last use.
fn temp_dead(ctx: &mut Context, state: &mut RegAllocState, tidx: TempIdx) {
    let temp = ctx.temp(tidx);
    if temp.is_global_or_fixed() {
        return;
    }
    if let Some(reg) = temp.reg {
        if state.reg_to_temp[reg as usize] == Some(tidx) {
            state.free_reg(reg);
        }
    }
    let is_const = temp.is_const();
    let slot = temp.mem_allocated.then_some(temp.mem_offset);
    let t = ctx.temp_mut(tidx);
    t.reg = None;
    if is_const {
        // later blocks of the same EBB may load it again
        t.val_type = TempVal::Const;
        return;
    }
    t.val_type = TempVal::Dead;
    t.mem_allocated = false;
    t.mem_coherent = false;
    if let Some(off) = slot {
        state.slots.release(off);
    }
}

/// Bind an op's output to `reg`, releasing any older register of the
/// same temp.
fn assign_output(ctx: &mut Context, state: &mut RegAllocState, tidx: TempIdx, reg: u8) {
    if let Some(old) = ctx.temp(tidx).reg {
        if old != reg && state.reg_to_temp[old as usize] == Some(tidx) {
            state.free_reg(old);
        }
    }
    state.op_scratch = state.op_scratch.clear(reg);
    state.assign(reg, tidx);
    let t = ctx.temp_mut(tidx);
    t.val_type = TempVal::Reg;
    t.reg = Some(reg);
    t.mem_coherent = false;
}

fn collect_cargs(op: &Op) -> Vec<u32> {
    op.cargs().iter().map(|c| c.0).collect()
}

/// Load the inputs of `op` under `ct`, pinned operands first.
/// Returns the input registers and which aliased inputs may be
/// overwritten by their output.
fn load_inputs(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeBuffer,
    op: &Op,
    ct: &OpConstraint,
) -> Result<([u8; 8], [bool; 8])> {
    let def = op.opc.def();
    let nb_oargs = def.nb_oargs as usize;
    let nb_iargs = def.nb_iargs as usize;
    let life = op.life;

    let mut i_regs = [0u8; 8];
    let mut i_reusable = [false; 8];
    let mut i_allocated = RegSet::EMPTY;

    let mut order: Vec<usize> = (0..nb_iargs).collect();
    order.sort_by_key(|&i| !ct.args[nb_oargs + i].is_pinned());

    let mut done = [false; 8];
    for &i in &order {
        let arg_ct = &ct.args[nb_oargs + i];
        let tidx = op.args[nb_oargs + i];
        let required = arg_ct.regs;

        // The same temp in two unpinned slots shares one register.
        let shared = (0..nb_iargs)
            .find(|&j| done[j] && op.args[nb_oargs + j] == tidx && required.contains(i_regs[j]));
        if let Some(j) = shared {
            i_regs[i] = i_regs[j];
            done[i] = true;
            continue;
        }

        let temp = ctx.temp(tidx);
        let is_readonly = temp.is_global_or_fixed() || temp.is_const();
        let is_dead = life.is_dead((nb_oargs + i) as u32);
        let reg = temp_load_to(ctx, state, backend, buf, tidx, required, i_allocated, RegSet::EMPTY)?;
        if arg_ct.ialias && is_dead && !is_readonly {
            i_reusable[i] = true;
        }
        i_regs[i] = reg;
        i_allocated = i_allocated.set(reg);
        done[i] = true;
    }

    // Re-read registers: relocation may have moved an earlier input.
    for i in 0..nb_iargs {
        if state.op_scratch.contains(i_regs[i]) {
            continue;
        }
        if let Some(r) = ctx.temp(op.args[nb_oargs + i]).reg {
            i_regs[i] = r;
        }
    }
    Ok((i_regs, i_reusable))
}

/// Generic constraint-driven register allocation for one op.
fn regalloc_op(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeBuffer,
    op: &Op,
    ct: &OpConstraint,
) -> Result<()> {
    let def = op.opc.def();
    let nb_oargs = def.nb_oargs as usize;
    let nb_iargs = def.nb_iargs as usize;
    let life = op.life;

    // 0. Clear registers the host sequence clobbers
    for r in ct.clobbers.iter() {
        evict_reg(ctx, state, backend, buf, r)?;
        state.reserve(r);
    }

    // 1. Process inputs
    let (i_regs, i_reusable) = load_inputs(ctx, state, backend, buf, op, ct)?;
    let mut i_allocated = RegSet::EMPTY;
    for &r in &i_regs[..nb_iargs] {
        i_allocated = i_allocated.set(r);
    }

    // 2. Free dead inputs
    for i in 0..nb_iargs {
        if life.is_dead((nb_oargs + i) as u32) {
            temp_dead(ctx, state, op.args[nb_oargs + i]);
        }
    }

    // 3. Process outputs
    let mut o_regs = [0u8; 8];
    let mut o_allocated = RegSet::EMPTY;
    for k in 0..nb_oargs {
        let arg_ct = &ct.args[k];
        let dst_tidx = op.args[k];

        let reg = if arg_ct.oalias {
            let ai = arg_ct.alias_index as usize;
            let old_reg = i_regs[ai];
            let src_tidx = op.args[nb_oargs + ai];
            if i_reusable[ai] || state.op_scratch.contains(old_reg) {
                old_reg
            } else {
                // Input is still live: copy it away and take its
                // register for the output.
                let keep_owner = state.reg_to_temp[old_reg as usize] == Some(src_tidx);
                if keep_owner && ctx.temp(src_tidx).is_const() {
                    state.reg_to_temp[old_reg as usize] = None;
                    let t = ctx.temp_mut(src_tidx);
                    t.val_type = TempVal::Const;
                    t.reg = None;
                } else if keep_owner && src_tidx != dst_tidx {
                    let ty = ctx.temp(src_tidx).ty;
                    let copy_reg = reg_alloc(
                        ctx,
                        state,
                        backend,
                        buf,
                        state.allocatable,
                        i_allocated.union(o_allocated),
                        RegSet::EMPTY,
                    )?;
                    backend.out_mov(buf, ty, copy_reg, old_reg);
                    state.reg_to_temp[old_reg as usize] = None;
                    state.assign(copy_reg, src_tidx);
                    ctx.temp_mut(src_tidx).reg = Some(copy_reg);
                }
                old_reg
            }
        } else if arg_ct.newreg {
            reg_alloc(
                ctx,
                state,
                backend,
                buf,
                arg_ct.regs,
                i_allocated.union(o_allocated),
                RegSet::EMPTY,
            )?
        } else {
            reg_alloc(ctx, state, backend, buf, arg_ct.regs, o_allocated, RegSet::EMPTY)?
        };

        assign_output(ctx, state, dst_tidx, reg);
        o_regs[k] = reg;
        o_allocated = o_allocated.set(reg);
    }

    // 4. Emit host code
    let cargs = collect_cargs(op);
    backend.out_op(buf, op, &o_regs[..nb_oargs], &i_regs[..nb_iargs], &cargs);
    state.release_scratch();

    // 5. Free dead outputs
    for k in 0..nb_oargs {
        if life.is_dead(k as u32) {
            temp_dead(ctx, state, op.args[k]);
        }
    }
    Ok(())
}

fn regalloc_mov(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeBuffer,
    op: &Op,
) -> Result<()> {
    let dst = op.args[0];
    let src = op.args[1];
    let ty = op.op_type;
    let life = op.life;
    let allocatable = state.allocatable;
    if dst == src {
        return Ok(());
    }

    if ctx.temp(src).val_type == TempVal::Const {
        let val = ctx.temp(src).val;
        let reg = reg_alloc(ctx, state, backend, buf, allocatable, RegSet::EMPTY, RegSet::EMPTY)?;
        backend.out_movi(buf, ty, reg, val);
        assign_output(ctx, state, dst, reg);
    } else {
        let src_reg = temp_load_to(
            ctx,
            state,
            backend,
            buf,
            src,
            allocatable,
            RegSet::EMPTY,
            RegSet::EMPTY,
        )?;
        if life.is_dead(1) && ctx.temp(src).is_ebb() {
            // Hand the register over without a copy.
            temp_dead(ctx, state, src);
            assign_output(ctx, state, dst, src_reg);
        } else {
            let reg = reg_alloc(
                ctx,
                state,
                backend,
                buf,
                allocatable,
                RegSet::EMPTY.set(src_reg),
                RegSet::EMPTY,
            )?;
            backend.out_mov(buf, ty, reg, src_reg);
            if life.is_dead(1) {
                temp_dead(ctx, state, src);
            }
            assign_output(ctx, state, dst, reg);
        }
    }
    if life.is_dead(0) {
        temp_dead(ctx, state, dst);
    }
    Ok(())
}

/// Lower a helper call: arguments in RDI/RSI/RDX/RCX (env first),
/// result in RAX, every caller-saved register clobbered.
fn regalloc_call(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeBuffer,
    op: &Op,
) -> Result<()> {
    let life = op.life;
    let dst = op.args[0];
    let args = &op.args[2..5];
    let is_arg = |t: Option<TempIdx>| t.is_some_and(|t| args.contains(&t));

    // 1. Values not passed to the helper leave the caller-saved
    // registers; RDI is taken for the env pointer.
    let rdi = CALL_ARG_REGS[0] as u8;
    for r in CALL_CLOBBERED.intersect(state.allocatable).iter() {
        if r == rdi || !is_arg(state.reg_to_temp[r as usize]) {
            evict_reg(ctx, state, backend, buf, r)?;
        }
    }
    state.reserve(rdi);

    // 2. Place the arguments.
    let mut placed = RegSet::EMPTY.set(rdi);
    for (i, &tidx) in args.iter().enumerate() {
        let pinned = CALL_ARG_REGS[i + 1] as u8;
        let reg = temp_load_to(
            ctx,
            state,
            backend,
            buf,
            tidx,
            RegSet::EMPTY.set(pinned),
            placed,
            RegSet::EMPTY,
        )?;
        debug_assert_eq!(reg, pinned);
        placed = placed.set(reg);
    }
    let env = op.args[1];
    if let Some(env_reg) = ctx.temp(env).reg {
        backend.out_mov(buf, dbt_core::Type::I64, rdi, env_reg);
    }

    // 3. Arguments still needed after the call are saved; the rest die.
    for r in CALL_CLOBBERED.intersect(state.allocatable).iter() {
        let Some(tidx) = state.reg_to_temp[r as usize] else {
            continue;
        };
        let dies = (0..3).any(|i| args[i] == tidx && life.is_dead(2 + i as u32));
        if dies && !ctx.temp(tidx).is_global_or_fixed() {
            temp_dead(ctx, state, tidx);
        } else {
            evict_reg(ctx, state, backend, buf, r)?;
        }
    }
    for (i, &tidx) in args.iter().enumerate() {
        if life.is_dead(2 + i as u32) {
            temp_dead(ctx, state, tidx);
        }
    }

    // 4. Call.
    let addr = ((op.carg(1) as u64) << 32) | op.carg(0) as u64;
    backend.out_call(buf, addr);
    state.release_scratch();
    for r in CALL_CLOBBERED.intersect(state.allocatable).iter() {
        if state.reg_to_temp[r as usize].is_none() {
            state.free_reg(r);
        }
    }

    // 5. Result in RAX.
    assign_output(ctx, state, dst, crate::x86_64::Reg::Rax as u8);
    if life.is_dead(0) {
        temp_dead(ctx, state, dst);
    }
    Ok(())
}

fn regalloc_brcond(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeBuffer,
    op: &Op,
) -> Result<()> {
    let ct = backend.op_constraint(op.opc);
    let (i_regs, _) = load_inputs(ctx, state, backend, buf, op, ct)?;
    for i in 0..2 {
        if op.life.is_dead(i as u32) {
            temp_dead(ctx, state, op.args[i]);
        }
    }
    sync_globals(ctx, backend, buf);

    let cond = Cond::from_raw(op.carg(0)).unwrap_or(Cond::Never);
    let label_id = op.carg(1);
    let target = ctx.label(label_id).value;
    let pending = backend.out_brcond(buf, op.op_type, i_regs[0], i_regs[1], cond, target);
    state.release_scratch();
    if let Some(at) = pending {
        ctx.label_mut(label_id).add_use(at, RelocKind::Rel32);
    }
    Ok(())
}

fn record_trace(ctx: &Context, state: &RegAllocState, op: OpIdx, trace: &mut AllocTrace) {
    let mut locs = Vec::new();
    for r in 0..16u8 {
        if let Some(t) = state.reg_to_temp[r as usize] {
            if !ctx.temp(t).is_fixed() {
                locs.push((t, Location::Reg(r)));
            }
        }
    }
    for t in &ctx.temps()[ctx.nb_globals() as usize..] {
        if t.is_ebb() && t.mem_allocated && t.val_type != TempVal::Dead {
            locs.push((t.idx, Location::Stack(t.mem_offset)));
        }
    }
    trace.entries.push((op, locs));
}

/// Main register allocation + code generation pass.
///
/// Emits host code for every op of `ctx` at the current offset of
/// `buf`. Liveness data must be up to date.
pub fn regalloc_and_codegen(
    ctx: &mut Context,
    backend: &impl HostCodeGen,
    buf: &mut CodeBuffer,
    next_use: NextUse,
    want_trace: bool,
) -> Result<RegAllocOutput> {
    let allocatable = ALLOCATABLE_REGS.subtract(ctx.reserved_regs);
    let mut state = RegAllocState {
        reg_to_temp: [None; 16],
        free_regs: allocatable,
        allocatable,
        op_scratch: RegSet::EMPTY,
        slots: SpillSlots::new(ctx.frame_start, ctx.frame_end),
        next_use,
        now: 0,
    };
    let mut out = RegAllocOutput {
        trace: want_trace.then(AllocTrace::default),
        ..Default::default()
    };

    // Fixed temps are always in their register
    for i in 0..ctx.nb_globals() {
        let tidx = TempIdx(i);
        let temp = ctx.temp(tidx);
        if temp.kind == TempKind::Fixed {
            if let Some(reg) = temp.reg {
                state.assign(reg, tidx);
            }
        }
    }

    for oi in 0..ctx.num_ops() {
        let op = ctx.ops()[oi].clone();
        state.now = oi as u32;

        match op.opc {
            Opcode::Nop | Opcode::InsnStart => continue,

            Opcode::Mov => regalloc_mov(ctx, &mut state, backend, buf, &op)?,

            Opcode::Call => regalloc_call(ctx, &mut state, backend, buf, &op)?,

            Opcode::BrCond => regalloc_brcond(ctx, &mut state, backend, buf, &op)?,

            Opcode::SetLabel => {
                let label_id = op.carg(0);
                sync_globals(ctx, backend, buf);
                drop_all(ctx, &mut state);
                let offset = buf.offset();
                let label = ctx.label_mut(label_id);
                label.set_value(offset);
                let uses: Vec<_> = label.uses.drain(..).collect();
                for u in uses {
                    match u.kind {
                        RelocKind::Rel32 => backend.patch_rel32(buf, u.offset, offset),
                    }
                }
            }

            Opcode::Br => {
                let label_id = op.carg(0);
                sync_globals(ctx, backend, buf);
                let target = ctx.label(label_id).value;
                if let Some(at) = backend.out_br(buf, target) {
                    ctx.label_mut(label_id).add_use(at, RelocKind::Rel32);
                }
            }

            Opcode::GotoTb => {
                sync_globals(ctx, backend, buf);
                let site = backend.out_goto_tb(buf);
                let slot = op.carg(0) as usize;
                if let Some(s) = out.chain_sites.get_mut(slot) {
                    *s = Some(site);
                }
            }

            Opcode::ExitTb => {
                sync_globals(ctx, backend, buf);
                let kind = ExitKind::from_raw(op.carg(0)).unwrap_or(ExitKind::NoChain);
                backend.out_exit_tb(buf, encode_exit(ctx.block_id, kind));
            }

            Opcode::Mb => backend.out_mb(buf),

            _ => {
                let ct = backend.op_constraint(op.opc);
                regalloc_op(ctx, &mut state, backend, buf, &op, ct).map_err(|e| match e {
                    BackendError::Unallocatable { .. } => BackendError::Unallocatable {
                        opc: op.opc.def().name,
                    },
                    other => other,
                })?;
            }
        }

        if let Some(trace) = out.trace.as_mut() {
            record_trace(ctx, &state, op.idx, trace);
        }
    }

    out.spill_bytes = state.slots.high_water();
    Ok(out)
}
