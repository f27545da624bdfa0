//! Decoded ARMv7 instruction representation shared by the A32 and
//! Thumb decoders.

use std::fmt;

/// Condition field of a conditional instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Condition {
    Eq = 0,
    Ne = 1,
    Cs = 2,
    Cc = 3,
    Mi = 4,
    Pl = 5,
    Vs = 6,
    Vc = 7,
    Hi = 8,
    Ls = 9,
    Ge = 10,
    Lt = 11,
    Gt = 12,
    Le = 13,
    Al = 14,
}

impl Condition {
    /// Condition from a 4-bit field. `0b1111` is not a condition.
    pub const fn from_bits(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Eq,
            1 => Self::Ne,
            2 => Self::Cs,
            3 => Self::Cc,
            4 => Self::Mi,
            5 => Self::Pl,
            6 => Self::Vs,
            7 => Self::Vc,
            8 => Self::Hi,
            9 => Self::Ls,
            10 => Self::Ge,
            11 => Self::Lt,
            12 => Self::Gt,
            13 => Self::Le,
            14 => Self::Al,
            _ => return None,
        })
    }

    /// Evaluate against NZCV values (each 0 or 1).
    pub fn passes(self, n: bool, z: bool, c: bool, v: bool) -> bool {
        match self {
            Self::Eq => z,
            Self::Ne => !z,
            Self::Cs => c,
            Self::Cc => !c,
            Self::Mi => n,
            Self::Pl => !n,
            Self::Vs => v,
            Self::Vc => !v,
            Self::Hi => c && !z,
            Self::Ls => !c || z,
            Self::Ge => n == v,
            Self::Lt => n != v,
            Self::Gt => !z && n == v,
            Self::Le => z || n != v,
            Self::Al => true,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Cs => "cs",
            Self::Cc => "cc",
            Self::Mi => "mi",
            Self::Pl => "pl",
            Self::Vs => "vs",
            Self::Vc => "vc",
            Self::Hi => "hi",
            Self::Ls => "ls",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::Le => "le",
            Self::Al => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftType {
    Lsl,
    Lsr,
    Asr,
    /// Rotate right; an immediate amount of 0 encodes RRX.
    Ror,
}

impl ShiftType {
    pub const fn from_bits(v: u32) -> Self {
        match v & 3 {
            0 => Self::Lsl,
            1 => Self::Lsr,
            2 => Self::Asr,
            _ => Self::Ror,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Lsl => "lsl",
            Self::Lsr => "lsr",
            Self::Asr => "asr",
            Self::Ror => "ror",
        }
    }
}

/// Flexible second operand of a data-processing instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand2 {
    /// Immediate. `carry` is the shifter carry-out when the encoding
    /// defines one (a rotated A32 immediate); `None` leaves C alone.
    Imm { value: u32, carry: Option<bool> },
    /// Register shifted by an immediate, with A32 encoding rules
    /// (LSR/ASR #0 mean 32, ROR #0 means RRX).
    ShiftImm { rm: u8, shift: ShiftType, amount: u8 },
    /// Register shifted by the bottom byte of another register.
    ShiftReg { rm: u8, shift: ShiftType, rs: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DpOp {
    And,
    Eor,
    Sub,
    Rsb,
    Add,
    Adc,
    Sbc,
    Rsc,
    Tst,
    Teq,
    Cmp,
    Cmn,
    Orr,
    Mov,
    Bic,
    Mvn,
}

impl DpOp {
    pub const fn from_bits(v: u32) -> Self {
        match v & 15 {
            0 => Self::And,
            1 => Self::Eor,
            2 => Self::Sub,
            3 => Self::Rsb,
            4 => Self::Add,
            5 => Self::Adc,
            6 => Self::Sbc,
            7 => Self::Rsc,
            8 => Self::Tst,
            9 => Self::Teq,
            10 => Self::Cmp,
            11 => Self::Cmn,
            12 => Self::Orr,
            13 => Self::Mov,
            14 => Self::Bic,
            _ => Self::Mvn,
        }
    }

    /// Compare/test ops: set flags, write no register.
    pub const fn is_test(self) -> bool {
        matches!(self, Self::Tst | Self::Teq | Self::Cmp | Self::Cmn)
    }

    /// Ops whose flags come from the shifter carry rather than
    /// an adder.
    pub const fn is_logical(self) -> bool {
        matches!(
            self,
            Self::And | Self::Eor | Self::Tst | Self::Teq | Self::Orr | Self::Mov | Self::Bic | Self::Mvn
        )
    }

    /// Ops that ignore the first operand register.
    pub const fn is_move(self) -> bool {
        matches!(self, Self::Mov | Self::Mvn)
    }

    fn name(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Eor => "eor",
            Self::Sub => "sub",
            Self::Rsb => "rsb",
            Self::Add => "add",
            Self::Adc => "adc",
            Self::Sbc => "sbc",
            Self::Rsc => "rsc",
            Self::Tst => "tst",
            Self::Teq => "teq",
            Self::Cmp => "cmp",
            Self::Cmn => "cmn",
            Self::Orr => "orr",
            Self::Mov => "mov",
            Self::Bic => "bic",
            Self::Mvn => "mvn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MulLongOp {
    Umull,
    Umlal,
    Smull,
    Smlal,
}

impl MulLongOp {
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::Smull | Self::Smlal)
    }

    pub const fn accumulates(self) -> bool {
        matches!(self, Self::Umlal | Self::Smlal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevOp {
    Rev,
    Rev16,
    Revsh,
}

/// Access width of a load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemSize {
    Byte,
    Half,
    Word,
    /// LDRD/STRD register pair.
    Double,
}

impl MemSize {
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Half => 2,
            Self::Word => 4,
            Self::Double => 8,
        }
    }

    fn suffix(self, signed: bool) -> &'static str {
        match (self, signed) {
            (Self::Byte, false) => "b",
            (Self::Byte, true) => "sb",
            (Self::Half, false) => "h",
            (Self::Half, true) => "sh",
            (Self::Word, _) => "",
            (Self::Double, _) => "d",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOffset {
    Imm(u32),
    Reg { rm: u8, shift: ShiftType, amount: u8 },
}

/// Addressing mode of LDM/STM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockMode {
    /// Increment after.
    Ia,
    /// Increment before.
    Ib,
    /// Decrement after.
    Da,
    /// Decrement before.
    Db,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hint {
    Nop,
    Yield,
    Wfe,
    Wfi,
    Sev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Barrier {
    Dmb,
    Dsb,
    Isb,
}

/// Source of an MSR write to APSR.NZCV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsrSrc {
    Reg(u8),
    Imm(u32),
}

/// Decoded operation with its operands.
///
/// Addresses that depend on the instruction's own location (branch
/// targets, ADR) are resolved at decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    DataProc { op: DpOp, s: bool, rd: u8, rn: u8, op2: Operand2 },
    MovW { rd: u8, imm: u16 },
    MovT { rd: u8, imm: u16 },
    /// `rd = Align(PC, 4) + imm` (Thumb ADR).
    Adr { rd: u8, value: u32 },
    Clz { rd: u8, rm: u8 },
    Mul { s: bool, rd: u8, rn: u8, rm: u8 },
    Mla { s: bool, rd: u8, rn: u8, rm: u8, ra: u8 },
    Mls { rd: u8, rn: u8, rm: u8, ra: u8 },
    MulLong { op: MulLongOp, s: bool, rdlo: u8, rdhi: u8, rn: u8, rm: u8 },
    Div { signed: bool, rd: u8, rn: u8, rm: u8 },
    /// SXTB/SXTH/UXTB/UXTH, with `rn` for the accumulating forms.
    Extend { signed: bool, half: bool, rd: u8, rn: Option<u8>, rm: u8, rot: u8 },
    Rev { op: RevOp, rd: u8, rm: u8 },
    Bfx { signed: bool, rd: u8, rn: u8, lsb: u8, width: u8 },
    /// BFI, or BFC when `rn` is `None`.
    Bfi { rd: u8, rn: Option<u8>, lsb: u8, msb: u8 },
    Mem {
        load: bool,
        size: MemSize,
        signed: bool,
        rt: u8,
        rn: u8,
        offset: MemOffset,
        /// P: offset applied before the access.
        index: bool,
        /// U: add (true) or subtract the offset.
        add: bool,
        wback: bool,
    },
    Block { load: bool, rn: u8, regs: u16, mode: BlockMode, wback: bool },
    LoadExclusive { size: MemSize, rt: u8, rn: u8 },
    StoreExclusive { size: MemSize, rd: u8, rt: u8, rn: u8 },
    Clrex,
    Branch { target: u32, link: bool },
    /// BLX immediate: link and switch instruction set.
    BlxImm { target: u32 },
    Bx { rm: u8 },
    BlxReg { rm: u8 },
    /// CBZ/CBNZ.
    CompareBranch { nonzero: bool, rn: u8, target: u32 },
    Svc { imm: u32 },
    Bkpt { imm: u32 },
    Udf { imm: u32 },
    SetEnd { big: bool },
    Mrs { rd: u8 },
    Msr { src: MsrSrc },
    Hint(Hint),
    Barrier(Barrier),
    Pld,
}

/// One decoded guest instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub addr: u32,
    /// Raw encoding; a 32-bit Thumb pair is `hw1 << 16 | hw2`.
    pub raw: u32,
    /// Length in bytes (2 or 4).
    pub len: u32,
    pub cond: Condition,
    pub op: Operation,
}

impl Instruction {
    /// Whether this instruction always ends its block.
    pub fn ends_block(&self) -> bool {
        use Operation::*;
        match self.op {
            Branch { .. }
            | BlxImm { .. }
            | Bx { .. }
            | BlxReg { .. }
            | CompareBranch { .. }
            | Svc { .. }
            | Bkpt { .. }
            | Udf { .. }
            | SetEnd { .. } => true,
            DataProc { op, rd, .. } => rd == 15 && !op.is_test(),
            MovW { rd, .. } | MovT { rd, .. } | Adr { rd, .. } => rd == 15,
            Mem { load, rt, .. } => load && rt == 15,
            Block { load, regs, .. } => load && regs & (1 << 15) != 0,
            _ => false,
        }
    }
}

struct Reg(u8);

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            13 => write!(f, "sp"),
            14 => write!(f, "lr"),
            15 => write!(f, "pc"),
            r => write!(f, "r{r}"),
        }
    }
}

struct RegList(u16);

impl fmt::Display for RegList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for r in 0..16u8 {
            if self.0 & (1 << r) != 0 {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{}", Reg(r))?;
                first = false;
            }
        }
        write!(f, "}}")
    }
}

impl fmt::Display for Operand2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Operand2::Imm { value, .. } => write!(f, "#{value:#x}"),
            Operand2::ShiftImm { rm, shift: ShiftType::Lsl, amount: 0 } => write!(f, "{}", Reg(rm)),
            Operand2::ShiftImm { rm, shift: ShiftType::Ror, amount: 0 } => write!(f, "{}, rrx", Reg(rm)),
            Operand2::ShiftImm { rm, shift, amount } => {
                let amount = if amount == 0 { 32 } else { amount as u32 };
                write!(f, "{}, {} #{amount}", Reg(rm), shift.name())
            }
            Operand2::ShiftReg { rm, shift, rs } => write!(f, "{}, {} {}", Reg(rm), shift.name(), Reg(rs)),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Operation::*;
        let c = self.cond.suffix();
        let s = |s: bool| if s { "s" } else { "" };
        match self.op {
            DataProc { op, s: sf, rd, rn, op2 } => {
                if op.is_test() {
                    write!(f, "{}{c} {}, {op2}", op.name(), Reg(rn))
                } else if op.is_move() {
                    write!(f, "{}{}{c} {}, {op2}", op.name(), s(sf), Reg(rd))
                } else {
                    write!(f, "{}{}{c} {}, {}, {op2}", op.name(), s(sf), Reg(rd), Reg(rn))
                }
            }
            MovW { rd, imm } => write!(f, "movw{c} {}, #{imm:#x}", Reg(rd)),
            MovT { rd, imm } => write!(f, "movt{c} {}, #{imm:#x}", Reg(rd)),
            Adr { rd, value } => write!(f, "adr{c} {}, {value:#x}", Reg(rd)),
            Clz { rd, rm } => write!(f, "clz{c} {}, {}", Reg(rd), Reg(rm)),
            Mul { s: sf, rd, rn, rm } => write!(f, "mul{}{c} {}, {}, {}", s(sf), Reg(rd), Reg(rn), Reg(rm)),
            Mla { s: sf, rd, rn, rm, ra } => {
                write!(f, "mla{}{c} {}, {}, {}, {}", s(sf), Reg(rd), Reg(rn), Reg(rm), Reg(ra))
            }
            Mls { rd, rn, rm, ra } => write!(f, "mls{c} {}, {}, {}, {}", Reg(rd), Reg(rn), Reg(rm), Reg(ra)),
            MulLong { op, s: sf, rdlo, rdhi, rn, rm } => {
                let name = match op {
                    MulLongOp::Umull => "umull",
                    MulLongOp::Umlal => "umlal",
                    MulLongOp::Smull => "smull",
                    MulLongOp::Smlal => "smlal",
                };
                write!(f, "{name}{}{c} {}, {}, {}, {}", s(sf), Reg(rdlo), Reg(rdhi), Reg(rn), Reg(rm))
            }
            Div { signed, rd, rn, rm } => {
                let name = if signed { "sdiv" } else { "udiv" };
                write!(f, "{name}{c} {}, {}, {}", Reg(rd), Reg(rn), Reg(rm))
            }
            Extend { signed, half, rd, rn, rm, rot } => {
                let name = if signed { "sxt" } else { "uxt" };
                let acc = if rn.is_some() { "a" } else { "" };
                let sz = if half { "h" } else { "b" };
                write!(f, "{name}{acc}{sz}{c} {}", Reg(rd))?;
                if let Some(rn) = rn {
                    write!(f, ", {}", Reg(rn))?;
                }
                write!(f, ", {}", Reg(rm))?;
                if rot != 0 {
                    write!(f, ", ror #{}", rot as u32 * 8)?;
                }
                Ok(())
            }
            Rev { op, rd, rm } => {
                let name = match op {
                    RevOp::Rev => "rev",
                    RevOp::Rev16 => "rev16",
                    RevOp::Revsh => "revsh",
                };
                write!(f, "{name}{c} {}, {}", Reg(rd), Reg(rm))
            }
            Bfx { signed, rd, rn, lsb, width } => {
                let name = if signed { "sbfx" } else { "ubfx" };
                write!(f, "{name}{c} {}, {}, #{lsb}, #{width}", Reg(rd), Reg(rn))
            }
            Bfi { rd, rn: Some(rn), lsb, msb } => {
                write!(f, "bfi{c} {}, {}, #{lsb}, #{}", Reg(rd), Reg(rn), msb - lsb + 1)
            }
            Bfi { rd, rn: None, lsb, msb } => write!(f, "bfc{c} {}, #{lsb}, #{}", Reg(rd), msb - lsb + 1),
            Mem { load, size, signed, rt, rn, offset, index, add, wback } => {
                let name = if load { "ldr" } else { "str" };
                write!(f, "{name}{}{c} {}, ", size.suffix(signed), Reg(rt))?;
                if size == MemSize::Double {
                    write!(f, "{}, ", Reg(rt + 1))?;
                }
                let sign = if add { "" } else { "-" };
                let off = match offset {
                    MemOffset::Imm(0) => String::new(),
                    MemOffset::Imm(v) => format!(", #{sign}{v:#x}"),
                    MemOffset::Reg { rm, shift: ShiftType::Lsl, amount: 0 } => format!(", {sign}{}", Reg(rm)),
                    MemOffset::Reg { rm, shift, amount } => {
                        format!(", {sign}{}, {} #{amount}", Reg(rm), shift.name())
                    }
                };
                if index {
                    write!(f, "[{}{off}]{}", Reg(rn), if wback { "!" } else { "" })
                } else {
                    write!(f, "[{}]{off}", Reg(rn))
                }
            }
            Block { load, rn, regs, mode, wback } => {
                let name = if load { "ldm" } else { "stm" };
                let m = match mode {
                    BlockMode::Ia => "ia",
                    BlockMode::Ib => "ib",
                    BlockMode::Da => "da",
                    BlockMode::Db => "db",
                };
                write!(f, "{name}{m}{c} {}{}, {}", Reg(rn), if wback { "!" } else { "" }, RegList(regs))
            }
            LoadExclusive { size, rt, rn } => {
                write!(f, "ldrex{}{c} {}, [{}]", size.suffix(false), Reg(rt), Reg(rn))
            }
            StoreExclusive { size, rd, rt, rn } => {
                write!(f, "strex{}{c} {}, {}, [{}]", size.suffix(false), Reg(rd), Reg(rt), Reg(rn))
            }
            Clrex => write!(f, "clrex"),
            Branch { target, link } => write!(f, "b{}{c} {target:#x}", if link { "l" } else { "" }),
            BlxImm { target } => write!(f, "blx {target:#x}"),
            Bx { rm } => write!(f, "bx{c} {}", Reg(rm)),
            BlxReg { rm } => write!(f, "blx{c} {}", Reg(rm)),
            CompareBranch { nonzero, rn, target } => {
                let name = if nonzero { "cbnz" } else { "cbz" };
                write!(f, "{name} {}, {target:#x}", Reg(rn))
            }
            Svc { imm } => write!(f, "svc{c} #{imm:#x}"),
            Bkpt { imm } => write!(f, "bkpt #{imm:#x}"),
            Udf { imm } => write!(f, "udf #{imm:#x}"),
            SetEnd { big } => write!(f, "setend {}", if big { "be" } else { "le" }),
            Mrs { rd } => write!(f, "mrs{c} {}, apsr", Reg(rd)),
            Msr { src: MsrSrc::Reg(rn) } => write!(f, "msr{c} apsr_nzcvq, {}", Reg(rn)),
            Msr { src: MsrSrc::Imm(v) } => write!(f, "msr{c} apsr_nzcvq, #{v:#x}"),
            Hint(h) => {
                let name = match h {
                    self::Hint::Nop => "nop",
                    self::Hint::Yield => "yield",
                    self::Hint::Wfe => "wfe",
                    self::Hint::Wfi => "wfi",
                    self::Hint::Sev => "sev",
                };
                write!(f, "{name}{c}")
            }
            Barrier(b) => {
                let name = match b {
                    self::Barrier::Dmb => "dmb",
                    self::Barrier::Dsb => "dsb",
                    self::Barrier::Isb => "isb",
                };
                write!(f, "{name}")
            }
            Pld => write!(f, "pld"),
        }
    }
}
