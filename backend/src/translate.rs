use crate::code_buffer::CodeBuffer;
use crate::error::BackendError;
use crate::liveness::liveness_analysis;
use crate::regalloc::{regalloc_and_codegen, AllocTrace};
use crate::HostCodeGen;
use dbt_core::Context;

/// A patchable chain jump inside emitted block code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSite {
    /// Offset of the `jmp rel32` instruction.
    pub jump: usize,
    /// Offset of the unchained exit path the jump initially targets.
    pub reset: usize,
}

/// Host code produced for one block.
#[derive(Debug, Clone)]
pub struct TranslatedCode {
    /// Offset of the first byte in the code buffer.
    pub start: usize,
    pub size: usize,
    /// Chain jumps for exit slots 0 and 1.
    pub goto_tb: [Option<ChainSite>; 2],
    pub spill_bytes: u32,
    pub trace: Option<AllocTrace>,
}

#[derive(Debug, Clone, Copy)]
pub struct TranslateOptions {
    /// Largest spill frame a block may use.
    pub spill_limit: u32,
    /// Record the allocator's value locations after every op.
    pub trace: bool,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            spill_limit: crate::x86_64::regs::SPILL_AREA_SIZE as u32,
            trace: false,
        }
    }
}

/// Full translation pipeline: liveness, then register allocation and
/// code generation into the current window of `buf`.
///
/// Nothing is committed on error; the caller may reset the window and
/// retry with a shorter block.
pub fn translate(
    ctx: &mut Context,
    backend: &impl HostCodeGen,
    buf: &mut CodeBuffer,
    opts: TranslateOptions,
) -> Result<TranslatedCode, BackendError> {
    let next_use = liveness_analysis(ctx);
    let start = buf.offset();
    let out = regalloc_and_codegen(ctx, backend, buf, next_use, opts.trace)?;

    if buf.overflowed() {
        return Err(BackendError::CodeWindowOverflow {
            window: buf.capacity().saturating_sub(start),
        });
    }
    if out.spill_bytes > opts.spill_limit {
        tracing::warn!(
            block = ctx.block_id,
            needed = out.spill_bytes,
            limit = opts.spill_limit,
            "spill frame over limit"
        );
        return Err(BackendError::SpillLimitExceeded {
            needed: out.spill_bytes,
            limit: opts.spill_limit,
        });
    }

    Ok(TranslatedCode {
        start,
        size: buf.offset() - start,
        goto_tb: out.chain_sites,
        spill_bytes: out.spill_bytes,
        trace: out.trace,
    })
}
