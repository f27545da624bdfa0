//! Interface the host implements to give the engine memory and to
//! receive traps.

use dbt_frontend::arm::{CpuState, ExceptionKind};
use thiserror::Error;

/// A guest memory access the host could not satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("memory fault at {addr:#010x}")]
pub struct MemoryFault {
    pub addr: u32,
}

impl MemoryFault {
    pub const fn at(addr: u32) -> Self {
        Self { addr }
    }
}

/// What the dispatcher does after a trap callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapAction {
    /// Continue at this address in the current instruction set.
    Resume(u32),
    /// Continue at the PC held in the context.
    Continue,
    /// End the current `run`.
    Halt,
}

/// Exception delivered to `Callbacks::exception`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub kind: ExceptionKind,
    /// Address of the instruction that raised.
    pub pc: u32,
    /// Fault address, BKPT immediate or raw undefined encoding.
    pub info: u32,
}

/// Host services used by generated code and the dispatcher.
///
/// Memory accesses are little-endian; the engine swaps bytes itself in
/// big-endian guest state. Implementations are shared between threads.
pub trait Callbacks: Send + Sync {
    fn read8(&self, addr: u32) -> Result<u8, MemoryFault>;
    fn read16(&self, addr: u32) -> Result<u16, MemoryFault>;
    fn read32(&self, addr: u32) -> Result<u32, MemoryFault>;
    fn read64(&self, addr: u32) -> Result<u64, MemoryFault>;

    fn read128(&self, addr: u32) -> Result<u128, MemoryFault> {
        let lo = self.read64(addr)?;
        let hi = self.read64(addr.wrapping_add(8))?;
        Ok((hi as u128) << 64 | lo as u128)
    }

    fn write8(&self, addr: u32, value: u8) -> Result<(), MemoryFault>;
    fn write16(&self, addr: u32, value: u16) -> Result<(), MemoryFault>;
    fn write32(&self, addr: u32, value: u32) -> Result<(), MemoryFault>;
    fn write64(&self, addr: u32, value: u64) -> Result<(), MemoryFault>;

    fn write128(&self, addr: u32, value: u128) -> Result<(), MemoryFault> {
        self.write64(addr, value as u64)?;
        self.write64(addr.wrapping_add(8), (value >> 64) as u64)
    }

    /// Instruction fetch; defaults to the data read.
    fn read_code16(&self, addr: u32) -> Result<u16, MemoryFault> {
        self.read16(addr)
    }

    fn read_code32(&self, addr: u32) -> Result<u32, MemoryFault> {
        self.read32(addr)
    }

    /// Read `size` bytes for LDREX. The engine tracks the reservation.
    fn exclusive_read(&self, addr: u32, size: u32) -> Result<u64, MemoryFault> {
        match size {
            1 => self.read8(addr).map(u64::from),
            2 => self.read16(addr).map(u64::from),
            4 => self.read32(addr).map(u64::from),
            _ => self.read64(addr),
        }
    }

    /// Store `value` if memory still holds `expected`, atomically with
    /// respect to other exclusive writers. Returns whether it stored.
    fn exclusive_write(&self, addr: u32, size: u32, value: u64, expected: u64) -> Result<bool, MemoryFault>;

    /// SVC trap. The PC already points past the SVC.
    fn supervisor_call(&self, cpu: &mut CpuState, imm: u32) -> TrapAction;

    /// Any other exception. The PC points at the raising instruction.
    fn exception(&self, cpu: &mut CpuState, info: ExceptionInfo) -> TrapAction;
}
