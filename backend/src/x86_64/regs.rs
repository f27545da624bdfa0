use dbt_core::RegSet;

/// x86-64 general-purpose register indices.
///
/// Encoding matches the x86-64 ModR/M and REX register numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

const ALL: [Reg; 16] = [
    Reg::Rax,
    Reg::Rcx,
    Reg::Rdx,
    Reg::Rbx,
    Reg::Rsp,
    Reg::Rbp,
    Reg::Rsi,
    Reg::Rdi,
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
    Reg::R12,
    Reg::R13,
    Reg::R14,
    Reg::R15,
];

impl Reg {
    /// Register from its encoding number (only the low 4 bits count).
    #[inline]
    pub const fn from_u8(n: u8) -> Self {
        ALL[(n & 0xf) as usize]
    }

    /// Low 3 bits of the register encoding (for ModR/M).
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Whether this register requires a REX prefix (R8-R15).
    #[inline]
    pub const fn needs_rex(self) -> bool {
        (self as u8) >= 8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Reg::Rax => "rax",
            Reg::Rcx => "rcx",
            Reg::Rdx => "rdx",
            Reg::Rbx => "rbx",
            Reg::Rsp => "rsp",
            Reg::Rbp => "rbp",
            Reg::Rsi => "rsi",
            Reg::Rdi => "rdi",
            Reg::R8 => "r8",
            Reg::R9 => "r9",
            Reg::R10 => "r10",
            Reg::R11 => "r11",
            Reg::R12 => "r12",
            Reg::R13 => "r13",
            Reg::R14 => "r14",
            Reg::R15 => "r15",
        }
    }
}

const fn bit(r: Reg) -> u64 {
    1u64 << (r as u8)
}

/// RBP: pointer to the `JitState` env for all generated block code.
pub const AREG0: Reg = Reg::Rbp;

/// Backend scratch register, clobbered by calls, `andc` and `clz`.
pub const SCRATCH: Reg = Reg::R11;

/// Callee-saved registers that the prologue must save/restore
/// (System V ABI).
pub const CALLEE_SAVED: &[Reg] = &[Reg::Rbp, Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

/// Function argument registers (System V AMD64 ABI).
pub const CALL_ARG_REGS: &[Reg] = &[Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

/// Registers a helper call may overwrite.
pub const CALL_CLOBBERED: RegSet = RegSet::from_raw(
    bit(Reg::Rax)
        | bit(Reg::Rcx)
        | bit(Reg::Rdx)
        | bit(Reg::Rsi)
        | bit(Reg::Rdi)
        | bit(Reg::R8)
        | bit(Reg::R9)
        | bit(Reg::R10)
        | bit(Reg::R11),
);

/// Registers reserved by the backend: RSP (stack pointer), RBP (env
/// pointer) and R11 (scratch).
pub const RESERVED_REGS: RegSet =
    RegSet::from_raw(bit(Reg::Rsp) | bit(Reg::Rbp) | bit(SCRATCH));

/// Registers available to the allocator.
pub const ALLOCATABLE_REGS: RegSet = RegSet::from_raw(0xffff & !RESERVED_REGS.raw());

/// Stack frame constants.
pub const STACK_ALIGN: usize = 16;
/// Space reserved for outgoing call arguments on the stack.
pub const STATIC_CALL_ARGS_SIZE: usize = 128;
/// Number of 8-byte spill slots in the frame.
pub const SPILL_SLOTS: usize = 128;

/// Total push size: return address (implicit) + callee-saved pushes.
pub const PUSH_SIZE: usize = (1 + CALLEE_SAVED.len()) * 8;

/// Total frame size (16-byte aligned).
pub const FRAME_SIZE: usize = {
    let raw = PUSH_SIZE + STATIC_CALL_ARGS_SIZE + SPILL_SLOTS * 8;
    (raw + STACK_ALIGN - 1) & !(STACK_ALIGN - 1)
};

/// Stack adjustment after pushes.
pub const STACK_ADDEND: usize = FRAME_SIZE - PUSH_SIZE;

/// Physical spill area in bytes.
pub const SPILL_AREA_SIZE: usize = SPILL_SLOTS * 8;
