use std::collections::HashMap;

use crate::label::Label;
use crate::op::{Op, OpIdx};
use crate::opcode::Opcode;
use crate::temp::{Temp, TempIdx, TempKind};
use crate::types::{RegSet, TempVal, Type, TYPE_COUNT};

/// Maximum number of guest instructions per block.
pub const MAX_INSNS: usize = 512;

/// Per-thread translation context.
///
/// Holds everything needed while translating one block: temporaries,
/// IR ops, labels and register allocation metadata. Globals and fixed
/// temps are registered once and survive `reset`.
#[derive(Clone)]
pub struct Context {
    temps: Vec<Temp>,
    ops: Vec<Op>,
    labels: Vec<Label>,

    /// Number of global and fixed temps (always at the front of `temps`).
    nb_globals: u32,

    /// Unique id of the block being translated, carried in exit codes.
    pub block_id: u64,

    // -- Stack frame for spilling --
    /// Host register used as the frame pointer for spill slots.
    pub frame_reg: Option<u8>,
    /// Start offset of the spill area in the stack frame.
    pub frame_start: i64,
    /// End offset of the physical spill area.
    pub frame_end: i64,

    /// Registers reserved by the backend (not available for allocation).
    pub reserved_regs: RegSet,

    const_table: [HashMap<u64, TempIdx>; TYPE_COUNT],
}

impl Context {
    pub fn new() -> Self {
        Self {
            temps: Vec::with_capacity(256),
            ops: Vec::with_capacity(512),
            labels: Vec::with_capacity(32),
            nb_globals: 0,
            block_id: 0,
            frame_reg: None,
            frame_start: 0,
            frame_end: 0,
            reserved_regs: RegSet::EMPTY,
            const_table: Default::default(),
        }
    }

    /// Reset for translating a new block. Preserves globals but returns
    /// them to their in-memory state so the next codegen pass starts
    /// with every global coherent in the env.
    pub fn reset(&mut self) {
        self.temps.truncate(self.nb_globals as usize);
        for t in &mut self.temps {
            match t.kind {
                TempKind::Fixed => t.mem_coherent = false,
                TempKind::Global => {
                    t.val_type = TempVal::Mem;
                    t.reg = None;
                    t.mem_coherent = true;
                }
                _ => {}
            }
        }
        self.ops.clear();
        self.labels.clear();
        for table in &mut self.const_table {
            table.clear();
        }
        self.block_id = 0;
    }

    /// Restore every non-global temp to its pre-allocation state, so the
    /// same IR can be lowered again.
    pub fn reset_alloc_state(&mut self) {
        let nb_globals = self.nb_globals as usize;
        for (i, t) in self.temps.iter_mut().enumerate() {
            match t.kind {
                TempKind::Global => {
                    t.val_type = TempVal::Mem;
                    t.reg = None;
                    t.mem_coherent = true;
                }
                TempKind::Fixed => {}
                TempKind::Const => {
                    t.val_type = TempVal::Const;
                    t.reg = None;
                }
                TempKind::Ebb if i >= nb_globals => {
                    t.val_type = TempVal::Dead;
                    t.reg = None;
                    t.mem_coherent = false;
                    t.mem_allocated = false;
                    t.mem_offset = 0;
                }
                TempKind::Ebb => {}
            }
        }
        for op in &mut self.ops {
            op.life = Default::default();
        }
        for l in &mut self.labels {
            l.value = None;
            l.uses.clear();
        }
    }

    // -- Temp allocation --

    pub fn nb_globals(&self) -> u32 {
        self.nb_globals
    }

    pub fn nb_temps(&self) -> u32 {
        self.temps.len() as u32
    }

    /// Allocate a new EBB-scoped temporary.
    pub fn new_temp(&mut self, ty: Type) -> TempIdx {
        let idx = TempIdx(self.temps.len() as u32);
        self.temps.push(Temp::new_ebb(idx, ty));
        idx
    }

    /// Get or create a constant temp (deduplicated per type).
    pub fn new_const(&mut self, ty: Type, val: u64) -> TempIdx {
        let val = val & ty.mask();
        if let Some(&existing) = self.const_table[ty as usize].get(&val) {
            return existing;
        }
        let idx = TempIdx(self.temps.len() as u32);
        self.temps.push(Temp::new_const(idx, ty, val));
        self.const_table[ty as usize].insert(val, idx);
        idx
    }

    /// Create a constant that is never shared, so its value can be
    /// patched once translation knows it (instruction counts).
    pub fn new_const_unshared(&mut self, ty: Type, val: u64) -> TempIdx {
        let idx = TempIdx(self.temps.len() as u32);
        self.temps.push(Temp::new_const(idx, ty, val));
        idx
    }

    /// Overwrite the value of a constant created by `new_const_unshared`.
    pub fn patch_const(&mut self, idx: TempIdx, val: u64) {
        let t = self.temp_mut(idx);
        debug_assert!(t.is_const());
        t.val = val & t.ty.mask();
    }

    /// Register a global temp backed by `base + offset`. Must be called
    /// before any non-global allocation.
    pub fn new_global(
        &mut self,
        ty: Type,
        base: TempIdx,
        offset: i64,
        name: &'static str,
    ) -> TempIdx {
        assert_eq!(
            self.temps.len() as u32,
            self.nb_globals,
            "globals must be registered before locals"
        );
        let idx = TempIdx(self.temps.len() as u32);
        self.temps
            .push(Temp::new_global(idx, ty, base, offset, name));
        self.nb_globals += 1;
        idx
    }

    /// Register a fixed-register temp. Must be called before any
    /// non-global allocation.
    pub fn new_fixed(
        &mut self,
        ty: Type,
        reg: u8,
        name: &'static str,
    ) -> TempIdx {
        assert_eq!(
            self.temps.len() as u32,
            self.nb_globals,
            "fixed temps must be registered before locals"
        );
        let idx = TempIdx(self.temps.len() as u32);
        self.temps.push(Temp::new_fixed(idx, ty, reg, name));
        self.nb_globals += 1;
        idx
    }

    pub fn temp(&self, idx: TempIdx) -> &Temp {
        &self.temps[idx.0 as usize]
    }

    pub fn temp_mut(&mut self, idx: TempIdx) -> &mut Temp {
        &mut self.temps[idx.0 as usize]
    }

    pub fn temps(&self) -> &[Temp] {
        &self.temps
    }

    /// Global and fixed temps only.
    pub fn globals(&self) -> &[Temp] {
        &self.temps[..self.nb_globals as usize]
    }

    // -- Op emission --

    pub fn emit_op(&mut self, op: Op) -> OpIdx {
        let idx = op.idx;
        self.ops.push(op);
        idx
    }

    pub fn next_op_idx(&self) -> OpIdx {
        OpIdx(self.ops.len() as u32)
    }

    pub fn op(&self, idx: OpIdx) -> &Op {
        &self.ops[idx.0 as usize]
    }

    pub fn op_mut(&mut self, idx: OpIdx) -> &mut Op {
        &mut self.ops[idx.0 as usize]
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn ops_mut(&mut self) -> &mut [Op] {
        &mut self.ops
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    /// Drop `nop` ops and renumber the remainder.
    pub fn compact_ops(&mut self) {
        self.ops.retain(|op| op.opc != Opcode::Nop);
        for (i, op) in self.ops.iter_mut().enumerate() {
            op.idx = OpIdx(i as u32);
        }
    }

    // -- Labels --

    pub fn new_label(&mut self) -> u32 {
        let id = self.labels.len() as u32;
        self.labels.push(Label::new(id));
        id
    }

    pub fn label(&self, id: u32) -> &Label {
        &self.labels[id as usize]
    }

    pub fn label_mut(&mut self, id: u32) -> &mut Label {
        &mut self.labels[id as usize]
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    // -- Frame management --

    /// Configure the stack area used for spill slots.
    pub fn set_frame(&mut self, reg: u8, start: i64, size: i64) {
        self.frame_reg = Some(reg);
        self.frame_start = start;
        self.frame_end = start + size;
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
