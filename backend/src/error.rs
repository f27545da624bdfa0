use thiserror::Error;

/// Failures while lowering a block to host code.
///
/// The window and spill variants are translation-limit conditions: the
/// caller reacts by translating a shorter block. The rest are internal
/// invariant violations of the IR handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("block code does not fit the {window}-byte emission window")]
    CodeWindowOverflow { window: usize },
    #[error("spill frame of {needed} bytes exceeds the {limit}-byte limit")]
    SpillLimitExceeded { needed: u32, limit: u32 },
    #[error("spill area of {capacity} bytes exhausted")]
    SpillAreaExhausted { capacity: u32 },
    #[error("no register satisfies the operands of `{opc}`")]
    Unallocatable { opc: &'static str },
    #[error("tmp{temp} is read at op {op} without a value")]
    DeadInput { op: u32, temp: u32 },
}
