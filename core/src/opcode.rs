use bitflags::bitflags;

use crate::types::Type;

/// IR opcodes.
///
/// Integer ops (marked `INT`) work on both I32 and I64; the actual type
/// is carried in `Op::op_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // -- Data movement --
    Mov = 0,
    SetCond,
    MovCond,

    // -- Arithmetic --
    Add,
    Sub,
    Mul,
    Neg,
    DivS,
    DivU,

    // -- Logic --
    And,
    Or,
    Xor,
    Not,
    AndC, // a & ~b

    // -- Shift/rotate --
    Shl,
    Shr,
    Sar,
    RotL,
    RotR,

    // -- Bit field --
    Extract,  // unsigned bit-field extract
    SExtract, // signed bit-field extract

    // -- Byte swap / bit counting --
    Bswap16,
    Bswap32,
    Clz,

    // -- Type conversion --
    ExtI32I64,   // sign-extend i32 -> i64
    ExtUI32I64,  // zero-extend i32 -> i64
    ExtrlI64I32, // truncate i64 -> i32 (low)
    ExtrhI64I32, // extract i64 -> i32 (high)

    // -- Host memory load/store (env fields) --
    Ld8U,
    Ld16U,
    Ld32U,
    Ld, // native-width load
    St8,
    St16,
    St32,
    St, // native-width store

    // -- Control flow --
    Br,
    BrCond,
    SetLabel,
    GotoTb, // patchable direct jump to another block
    ExitTb, // return to the dispatcher
    Mb,

    // -- Call --
    Call,

    // -- Misc --
    Nop,
    InsnStart, // guest instruction boundary

    Count,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpFlags: u16 {
        /// Leaves the block.
        const BB_EXIT = 0x01;
        /// Ends a basic block: globals must be in memory afterwards.
        const BB_END = 0x02;
        /// Clobbers caller-saved host registers.
        const CALL_CLOBBER = 0x04;
        /// Has an effect beyond its outputs; never removed as dead.
        const SIDE_EFFECTS = 0x08;
        /// Type-polymorphic integer op.
        const INT = 0x10;
        /// Not lowered through the generic constraint path.
        const NOT_PRESENT = 0x20;
        const COND_BRANCH = 0x40;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OpDef {
    pub name: &'static str,
    pub nb_oargs: u8,
    pub nb_iargs: u8,
    pub nb_cargs: u8,
    pub flags: OpFlags,
}

impl OpDef {
    pub const fn nb_args(&self) -> u8 {
        self.nb_oargs + self.nb_iargs + self.nb_cargs
    }
}

const fn def(name: &'static str, o: u8, i: u8, c: u8, flags: OpFlags) -> OpDef {
    OpDef {
        name,
        nb_oargs: o,
        nb_iargs: i,
        nb_cargs: c,
        flags,
    }
}

const INT: OpFlags = OpFlags::INT;
const NP: OpFlags = OpFlags::NOT_PRESENT;
const SE: OpFlags = OpFlags::SIDE_EFFECTS;
const CC: OpFlags = OpFlags::CALL_CLOBBER;
const BE: OpFlags = OpFlags::BB_END;
const BX: OpFlags = OpFlags::BB_EXIT;
const CB: OpFlags = OpFlags::COND_BRANCH;

pub static OPCODE_DEFS: [OpDef; Opcode::Count as usize] = [
    def("mov", 1, 1, 0, INT.union(NP)),
    def("setcond", 1, 2, 1, INT),
    def("movcond", 1, 4, 1, INT),
    def("add", 1, 2, 0, INT),
    def("sub", 1, 2, 0, INT),
    def("mul", 1, 2, 0, INT),
    def("neg", 1, 1, 0, INT),
    def("divs", 1, 2, 0, INT),
    def("divu", 1, 2, 0, INT),
    def("and", 1, 2, 0, INT),
    def("or", 1, 2, 0, INT),
    def("xor", 1, 2, 0, INT),
    def("not", 1, 1, 0, INT),
    def("andc", 1, 2, 0, INT),
    def("shl", 1, 2, 0, INT),
    def("shr", 1, 2, 0, INT),
    def("sar", 1, 2, 0, INT),
    def("rotl", 1, 2, 0, INT),
    def("rotr", 1, 2, 0, INT),
    def("extract", 1, 1, 2, INT),
    def("sextract", 1, 1, 2, INT),
    def("bswap16", 1, 1, 0, INT),
    def("bswap32", 1, 1, 0, INT),
    def("clz", 1, 1, 0, INT),
    def("ext_i32_i64", 1, 1, 0, OpFlags::empty()),
    def("extu_i32_i64", 1, 1, 0, OpFlags::empty()),
    def("extrl_i64_i32", 1, 1, 0, OpFlags::empty()),
    def("extrh_i64_i32", 1, 1, 0, OpFlags::empty()),
    def("ld8u", 1, 1, 1, INT),
    def("ld16u", 1, 1, 1, INT),
    def("ld32u", 1, 1, 1, INT),
    def("ld", 1, 1, 1, INT),
    def("st8", 0, 2, 1, INT.union(SE)),
    def("st16", 0, 2, 1, INT.union(SE)),
    def("st32", 0, 2, 1, INT.union(SE)),
    def("st", 0, 2, 1, INT.union(SE)),
    def("br", 0, 0, 1, BE.union(NP)),
    def("brcond", 0, 2, 2, BE.union(CB).union(INT)),
    def("set_label", 0, 0, 1, BE.union(NP)),
    def("goto_tb", 0, 0, 1, BE.union(SE).union(NP)),
    def("exit_tb", 0, 0, 1, BX.union(BE).union(NP)),
    def("mb", 0, 0, 1, SE.union(NP)),
    def("call", 1, 4, 2, CC.union(SE).union(NP)),
    def("nop", 0, 0, 0, NP),
    def("insn_start", 0, 0, 2, NP),
];

impl Opcode {
    /// Look up the static definition for this opcode.
    pub fn def(self) -> &'static OpDef {
        &OPCODE_DEFS[self as usize]
    }

    /// Return the fixed IR type this opcode operates on, if not type-polymorphic.
    pub fn fixed_type(self) -> Option<Type> {
        match self {
            Opcode::ExtI32I64 | Opcode::ExtUI32I64 => Some(Type::I64),
            Opcode::ExtrlI64I32 | Opcode::ExtrhI64I32 => Some(Type::I32),
            _ => None,
        }
    }

    /// Whether this opcode is type-polymorphic (works on I32 or I64).
    pub fn is_int_polymorphic(self) -> bool {
        self.def().flags.contains(OpFlags::INT)
    }

    /// Pure value computation: no memory access, no control flow, no
    /// side effects. Candidates for folding, CSE and DCE.
    pub fn is_pure(self) -> bool {
        !matches!(
            self,
            Opcode::Ld8U
                | Opcode::Ld16U
                | Opcode::Ld32U
                | Opcode::Ld
                | Opcode::St8
                | Opcode::St16
                | Opcode::St32
                | Opcode::St
                | Opcode::Br
                | Opcode::BrCond
                | Opcode::SetLabel
                | Opcode::GotoTb
                | Opcode::ExitTb
                | Opcode::Mb
                | Opcode::Call
                | Opcode::Nop
                | Opcode::InsnStart
                | Opcode::Count
        )
    }

    /// Width in bytes of an env load or store, if this is one.
    pub fn mem_size(self, ty: Type) -> Option<u32> {
        match self {
            Opcode::Ld8U | Opcode::St8 => Some(1),
            Opcode::Ld16U | Opcode::St16 => Some(2),
            Opcode::Ld32U | Opcode::St32 => Some(4),
            Opcode::Ld | Opcode::St => Some(ty.size_bytes()),
            _ => None,
        }
    }
}

/// All opcodes with a definition, in discriminant order.
pub const ALL_OPCODES: [Opcode; Opcode::Count as usize] = [
    Opcode::Mov,
    Opcode::SetCond,
    Opcode::MovCond,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Neg,
    Opcode::DivS,
    Opcode::DivU,
    Opcode::And,
    Opcode::Or,
    Opcode::Xor,
    Opcode::Not,
    Opcode::AndC,
    Opcode::Shl,
    Opcode::Shr,
    Opcode::Sar,
    Opcode::RotL,
    Opcode::RotR,
    Opcode::Extract,
    Opcode::SExtract,
    Opcode::Bswap16,
    Opcode::Bswap32,
    Opcode::Clz,
    Opcode::ExtI32I64,
    Opcode::ExtUI32I64,
    Opcode::ExtrlI64I32,
    Opcode::ExtrhI64I32,
    Opcode::Ld8U,
    Opcode::Ld16U,
    Opcode::Ld32U,
    Opcode::Ld,
    Opcode::St8,
    Opcode::St16,
    Opcode::St32,
    Opcode::St,
    Opcode::Br,
    Opcode::BrCond,
    Opcode::SetLabel,
    Opcode::GotoTb,
    Opcode::ExitTb,
    Opcode::Mb,
    Opcode::Call,
    Opcode::Nop,
    Opcode::InsnStart,
];
