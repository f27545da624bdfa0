use crate::types::{TempVal, Type};

/// Lifetime/scope of an IR temporary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TempKind {
    /// Defined once and live within a single extended basic block.
    Ebb,
    /// Guest state persisting across blocks, backed by an env field.
    Global,
    /// Fixed to a specific host register.
    Fixed,
    /// Compile-time constant.
    Const,
}

/// Index into the Context's temp pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempIdx(pub u32);

/// An IR temporary.
///
/// Carries both the IR-level properties (kind, type) and the register
/// allocator state (val_type, reg).
#[derive(Debug, Clone)]
pub struct Temp {
    pub idx: TempIdx,
    pub ty: Type,
    pub kind: TempKind,

    // -- Register allocator state --
    /// Where the value currently lives.
    pub val_type: TempVal,
    /// Allocated host register (valid when val_type == Reg).
    pub reg: Option<u8>,
    /// Whether the in-memory copy is up-to-date with the register.
    pub mem_coherent: bool,
    /// Whether a memory slot is backing this temp. Always true for
    /// globals; set for Ebb temps once they are given a spill slot.
    pub mem_allocated: bool,

    // -- Constant / memory info --
    /// For `Const` temps, the immediate value.
    pub val: u64,
    /// For `Global` temps, the base temp (env pointer) index.
    pub mem_base: Option<TempIdx>,
    /// For `Global` temps, the offset from mem_base into the env; for a
    /// spilled Ebb temp, the offset of its slot from the frame register.
    pub mem_offset: i64,

    /// Debug name (e.g. "r0", "nf").
    pub name: Option<&'static str>,
}

impl Temp {
    pub fn new_ebb(idx: TempIdx, ty: Type) -> Self {
        Self {
            idx,
            ty,
            kind: TempKind::Ebb,
            val_type: TempVal::Dead,
            reg: None,
            mem_coherent: false,
            mem_allocated: false,
            val: 0,
            mem_base: None,
            mem_offset: 0,
            name: None,
        }
    }

    pub fn new_const(idx: TempIdx, ty: Type, val: u64) -> Self {
        Self {
            val_type: TempVal::Const,
            kind: TempKind::Const,
            val: val & ty.mask(),
            ..Self::new_ebb(idx, ty)
        }
    }

    pub fn new_global(
        idx: TempIdx,
        ty: Type,
        base: TempIdx,
        offset: i64,
        name: &'static str,
    ) -> Self {
        Self {
            kind: TempKind::Global,
            val_type: TempVal::Mem,
            mem_coherent: true,
            mem_allocated: true,
            mem_base: Some(base),
            mem_offset: offset,
            name: Some(name),
            ..Self::new_ebb(idx, ty)
        }
    }

    pub fn new_fixed(idx: TempIdx, ty: Type, reg: u8, name: &'static str) -> Self {
        Self {
            kind: TempKind::Fixed,
            val_type: TempVal::Reg,
            reg: Some(reg),
            name: Some(name),
            ..Self::new_ebb(idx, ty)
        }
    }

    pub fn is_const(&self) -> bool {
        self.kind == TempKind::Const
    }

    pub fn is_global(&self) -> bool {
        self.kind == TempKind::Global
    }

    pub fn is_fixed(&self) -> bool {
        self.kind == TempKind::Fixed
    }

    pub fn is_ebb(&self) -> bool {
        self.kind == TempKind::Ebb
    }

    /// Whether this temp outlives the block (never freed by the allocator).
    pub fn is_global_or_fixed(&self) -> bool {
        matches!(self.kind, TempKind::Global | TempKind::Fixed)
    }
}
