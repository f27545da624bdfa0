use dbt_backend::x86_64::regs::SPILL_AREA_SIZE;

use crate::JitError;

/// How blocks are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// Run host code emitted by the backend.
    #[default]
    Compiled,
    /// Run the block IR in the reference interpreter.
    Interpreted,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitConfig {
    /// Guest instructions per block, 1..=512.
    pub max_block_insns: u32,
    /// Number of cached blocks before LRU eviction starts.
    pub max_blocks: usize,
    /// Size of the executable code region in bytes.
    pub code_region_size: usize,
    /// Emission window of a single block in bytes.
    pub max_block_code: usize,
    /// Largest spill frame a block may use.
    pub spill_limit_bytes: u32,
    /// Run the optimizer pipeline.
    pub optimize: bool,
    pub exec_mode: ExecMode,
    /// Fault on any unaligned data access.
    pub strict_alignment: bool,
    /// Raise an exception on SDIV/UDIV by zero instead of yielding 0.
    pub div_by_zero_trap: bool,
    /// Trace IR before and after optimization.
    pub dump_ir: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            max_block_insns: 64,
            max_blocks: 8192,
            code_region_size: 32 << 20,
            max_block_code: 64 << 10,
            spill_limit_bytes: 512,
            optimize: true,
            exec_mode: ExecMode::Compiled,
            strict_alignment: false,
            div_by_zero_trap: false,
            dump_ir: false,
        }
    }
}

/// Bytes reserved at the start of the region for the shared
/// prologue and epilogue.
pub(crate) const TRAMPOLINE_SIZE: usize = 256;

impl JitConfig {
    pub fn validate(&self) -> Result<(), JitError> {
        if !(1..=dbt_core::context::MAX_INSNS as u32).contains(&self.max_block_insns) {
            return Err(JitError::InvalidConfig("max_block_insns must be in 1..=512"));
        }
        if self.max_blocks == 0 {
            return Err(JitError::InvalidConfig("max_blocks must be non-zero"));
        }
        if self.max_block_code < 256 {
            return Err(JitError::InvalidConfig("max_block_code must be at least 256 bytes"));
        }
        if self.code_region_size < TRAMPOLINE_SIZE + self.max_block_code {
            return Err(JitError::InvalidConfig("code_region_size cannot hold one block"));
        }
        if self.code_region_size > i32::MAX as usize {
            return Err(JitError::InvalidConfig("code_region_size must be reachable by rel32"));
        }
        if self.spill_limit_bytes as usize > SPILL_AREA_SIZE {
            return Err(JitError::InvalidConfig("spill_limit_bytes exceeds the spill area"));
        }
        Ok(())
    }
}
