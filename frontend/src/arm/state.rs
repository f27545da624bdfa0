//! ARMv7 guest state and the env structure generated code runs
//! against.

use std::mem::offset_of;
use std::sync::atomic::AtomicU32;

use bitflags::bitflags;

/// Number of general-purpose registers (r0-r15).
pub const NUM_REGS: usize = 16;

pub const REG_SP: usize = 13;
pub const REG_LR: usize = 14;
pub const REG_PC: usize = 15;

/// Guest architectural state.
///
/// Flags are kept one per word, each holding 0 or 1, so flag-setting
/// instructions write them without read-modify-write of a packed PSR.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuState {
    pub regs: [u32; NUM_REGS],
    pub nf: u32,
    pub zf: u32,
    pub cf: u32,
    pub vf: u32,
    /// T bit: executing Thumb code.
    pub thumb: u32,
    /// E bit: big-endian data accesses.
    pub big_endian: u32,
    /// Local exclusive monitor: 1 while an LDREX reservation is open.
    pub exclusive_state: u32,
    pub exclusive_addr: u32,
    /// Value read by the LDREX that opened the reservation.
    pub exclusive_value: u64,
}

impl CpuState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pc(&self) -> u32 {
        self.regs[REG_PC]
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.regs[REG_PC] = pc;
    }

    /// Application status register view: NZCV in bits 31..28 and the T
    /// and E bits in their CPSR positions.
    pub fn cpsr(&self) -> u32 {
        (self.nf << 31)
            | (self.zf << 30)
            | (self.cf << 29)
            | (self.vf << 28)
            | ((self.big_endian & 1) << 9)
            | ((self.thumb & 1) << 5)
    }

    pub fn set_cpsr(&mut self, v: u32) {
        self.nf = (v >> 31) & 1;
        self.zf = (v >> 30) & 1;
        self.cf = (v >> 29) & 1;
        self.vf = (v >> 28) & 1;
        self.big_endian = (v >> 9) & 1;
        self.thumb = (v >> 5) & 1;
    }

    /// Discriminator bits the current state translates under.
    pub fn mode(&self) -> ModeFlags {
        let mut m = ModeFlags::empty();
        m.set(ModeFlags::THUMB, self.thumb != 0);
        m.set(ModeFlags::BIG_ENDIAN, self.big_endian != 0);
        m
    }
}

bitflags! {
    /// Context discriminator bits carried in `BlockKey::mode`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModeFlags: u32 {
        const THUMB = 1;
        const BIG_ENDIAN = 2;
        /// One-instruction block that never chains.
        const SINGLE_STEP = 4;
    }
}

/// Architectural exception raised by guest code.
///
/// The discriminants are the values generated code stores into
/// `JitState::exception`; zero means none is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ExceptionKind {
    Undefined = 1,
    Svc = 2,
    Bkpt = 3,
    DataAbort = 4,
    PrefetchAbort = 5,
    Alignment = 6,
    DivideByZero = 7,
}

impl ExceptionKind {
    pub const fn from_raw(v: u32) -> Option<Self> {
        Some(match v {
            1 => Self::Undefined,
            2 => Self::Svc,
            3 => Self::Bkpt,
            4 => Self::DataAbort,
            5 => Self::PrefetchAbort,
            6 => Self::Alignment,
            7 => Self::DivideByZero,
            _ => return None,
        })
    }
}

/// The env structure: guest state plus execution control fields.
///
/// Generated code addresses every field relative to the env pointer
/// held in the host frame register.
#[repr(C)]
#[derive(Debug)]
pub struct JitState {
    pub cpu: CpuState,
    /// Instructions left to execute.
    pub budget: u64,
    /// Halt flag polled at every block entry.
    pub halt_ptr: *const AtomicU32,
    /// Set by write helpers when a store hit translated code.
    pub exit_request: u32,
    /// Pending `ExceptionKind`, or 0.
    pub exception: u32,
    /// Fault address, SVC/BKPT immediate or faulting PC.
    pub exception_info: u32,
    pub _pad: u32,
    /// Opaque pointer handed to helpers.
    pub host: *mut u8,
}

impl JitState {
    pub fn new(cpu: CpuState, halt_ptr: *const AtomicU32, host: *mut u8) -> Self {
        Self {
            cpu,
            budget: 0,
            halt_ptr,
            exit_request: 0,
            exception: 0,
            exception_info: 0,
            _pad: 0,
            host,
        }
    }

    pub fn as_env(&mut self) -> *mut u8 {
        self as *mut Self as *mut u8
    }
}

// Field offsets (bytes) from the env pointer.

const CPU: usize = offset_of!(JitState, cpu);

pub const fn reg_offset(i: usize) -> i64 {
    (CPU + offset_of!(CpuState, regs) + i * 4) as i64
}

pub const NF_OFFSET: i64 = (CPU + offset_of!(CpuState, nf)) as i64;
pub const ZF_OFFSET: i64 = (CPU + offset_of!(CpuState, zf)) as i64;
pub const CF_OFFSET: i64 = (CPU + offset_of!(CpuState, cf)) as i64;
pub const VF_OFFSET: i64 = (CPU + offset_of!(CpuState, vf)) as i64;
pub const THUMB_OFFSET: i64 = (CPU + offset_of!(CpuState, thumb)) as i64;
pub const BIG_ENDIAN_OFFSET: i64 = (CPU + offset_of!(CpuState, big_endian)) as i64;
pub const EXCLUSIVE_STATE_OFFSET: i64 = (CPU + offset_of!(CpuState, exclusive_state)) as i64;
pub const BUDGET_OFFSET: i64 = offset_of!(JitState, budget) as i64;
pub const HALT_PTR_OFFSET: i64 = offset_of!(JitState, halt_ptr) as i64;
pub const EXIT_REQUEST_OFFSET: i64 = offset_of!(JitState, exit_request) as i64;
pub const EXCEPTION_OFFSET: i64 = offset_of!(JitState, exception) as i64;
pub const EXCEPTION_INFO_OFFSET: i64 = offset_of!(JitState, exception_info) as i64;
