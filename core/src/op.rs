use crate::opcode::Opcode;
use crate::temp::TempIdx;
use crate::types::Type;

/// Maximum number of arguments per IR operation.
pub const MAX_OP_ARGS: usize = 8;

/// Index into the Context's op list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpIdx(pub u32);

/// Liveness data for an op's arguments: bit `n` is set when argument
/// `n` is dead after this op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LifeData(pub u32);

impl LifeData {
    pub const fn dead_arg(n: u32) -> u32 {
        1 << n
    }

    pub fn is_dead(&self, n: u32) -> bool {
        self.0 & Self::dead_arg(n) != 0
    }

    pub fn set_dead(&mut self, n: u32) {
        self.0 |= Self::dead_arg(n);
    }
}

/// A single IR operation.
///
/// Arguments are laid out as outputs, then inputs, then constant
/// arguments, with counts given by the opcode definition. Constant
/// arguments hold raw values (label ids, offsets, conditions) in the
/// `TempIdx` slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    pub idx: OpIdx,
    pub opc: Opcode,
    /// Operand type for type-polymorphic ops (I32 or I64).
    pub op_type: Type,
    /// Liveness analysis results.
    pub life: LifeData,
    pub args: [TempIdx; MAX_OP_ARGS],
    pub nargs: u8,
}

impl Op {
    pub fn new(idx: OpIdx, opc: Opcode, op_type: Type) -> Self {
        Self {
            idx,
            opc,
            op_type,
            life: LifeData::default(),
            args: [TempIdx(0); MAX_OP_ARGS],
            nargs: 0,
        }
    }

    pub fn with_args(idx: OpIdx, opc: Opcode, op_type: Type, args: &[TempIdx]) -> Self {
        let mut op = Self::new(idx, opc, op_type);
        op.set_args(args);
        op
    }

    /// Replace the opcode and arguments in place, keeping the index.
    pub fn rewrite(&mut self, opc: Opcode, op_type: Type, args: &[TempIdx]) {
        self.opc = opc;
        self.op_type = op_type;
        self.life = LifeData::default();
        self.args = [TempIdx(0); MAX_OP_ARGS];
        self.set_args(args);
    }

    fn set_args(&mut self, args: &[TempIdx]) {
        let n = args.len().min(MAX_OP_ARGS);
        self.args[..n].copy_from_slice(&args[..n]);
        self.nargs = n as u8;
    }

    /// Get the output arguments slice (based on opcode definition).
    pub fn oargs(&self) -> &[TempIdx] {
        let n = self.opc.def().nb_oargs as usize;
        &self.args[..n]
    }

    /// Get the input arguments slice.
    pub fn iargs(&self) -> &[TempIdx] {
        let def = self.opc.def();
        let start = def.nb_oargs as usize;
        let end = start + def.nb_iargs as usize;
        &self.args[start..end]
    }

    /// Get the constant arguments slice.
    pub fn cargs(&self) -> &[TempIdx] {
        let def = self.opc.def();
        let start = (def.nb_oargs + def.nb_iargs) as usize;
        let end = start + def.nb_cargs as usize;
        &self.args[start..end]
    }

    /// Constant argument `n` as a raw value.
    pub fn carg(&self, n: usize) -> u32 {
        self.cargs()[n].0
    }
}
