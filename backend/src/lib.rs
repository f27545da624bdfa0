pub mod code_buffer;
pub mod constraint;
pub mod error;
pub mod liveness;
pub mod optimize;
pub mod regalloc;
pub mod translate;
pub mod x86_64;

pub use code_buffer::CodeBuffer;
pub use constraint::{ArgConstraint, OpConstraint};
pub use error::BackendError;
pub use regalloc::{AllocTrace, Location};
pub use translate::{translate, ChainSite, TranslateOptions, TranslatedCode};
pub use x86_64::X86_64CodeGen;

/// Trait for host architecture code generators.
///
/// The register allocator drives code generation through these
/// primitives; everything architecture-specific lives behind it.
pub trait HostCodeGen {
    /// Emit the prologue: save callee-saved registers, set up the env
    /// pointer, allocate the stack frame and jump to the block entry.
    fn emit_prologue(&mut self, buf: &mut CodeBuffer);

    /// Emit the epilogue: restore callee-saved registers, deallocate
    /// the stack frame and return the exit value in RAX.
    fn emit_epilogue(&mut self, buf: &mut CodeBuffer);

    /// Offset of the shared prologue (the region entry point).
    fn prologue_offset(&self) -> usize;

    /// Offset of the block return path.
    fn epilogue_offset(&self) -> usize;

    /// Retarget the chain jump at `site` to `target_offset`. Takes
    /// `&CodeBuffer` because the patch is a single atomic store into
    /// code other threads may be executing.
    fn patch_jump(&self, buf: &CodeBuffer, site: ChainSite, target_offset: usize);

    /// Point the chain jump at `site` back to its own exit path.
    fn reset_jump(&self, buf: &CodeBuffer, site: ChainSite) {
        self.patch_jump(buf, site, site.reset);
    }

    /// Initialize a translation context with backend-specific
    /// settings (reserved registers, stack frame layout).
    fn init_context(&self, ctx: &mut dbt_core::Context);

    /// Return the register constraint for an opcode.
    fn op_constraint(&self, opc: dbt_core::Opcode) -> &'static OpConstraint;

    // -- Register allocator primitives --

    /// Emit host mov between two registers.
    fn out_mov(&self, buf: &mut CodeBuffer, ty: dbt_core::Type, dst: u8, src: u8);

    /// Emit host load-immediate into a register.
    fn out_movi(&self, buf: &mut CodeBuffer, ty: dbt_core::Type, dst: u8, val: u64);

    /// Emit host load from memory [base + offset] into register.
    fn out_ld(&self, buf: &mut CodeBuffer, ty: dbt_core::Type, dst: u8, base: u8, offset: i64);

    /// Emit host store from register to memory [base + offset].
    fn out_st(&self, buf: &mut CodeBuffer, ty: dbt_core::Type, src: u8, base: u8, offset: i64);

    /// Emit host code for a value op. Called by the register allocator
    /// after inputs are loaded and outputs allocated. `oregs`/`iregs`
    /// are host register numbers; `cargs` are the raw constant args.
    fn out_op(
        &self,
        buf: &mut CodeBuffer,
        op: &dbt_core::Op,
        oregs: &[u8],
        iregs: &[u8],
        cargs: &[u32],
    );

    // -- Control flow --

    /// Compare and branch. Returns the offset of the rel32 field when
    /// `target` is not yet known.
    fn out_brcond(
        &self,
        buf: &mut CodeBuffer,
        ty: dbt_core::Type,
        a: u8,
        b: u8,
        cond: dbt_core::Cond,
        target: Option<usize>,
    ) -> Option<usize>;

    /// Unconditional branch, same contract as `out_brcond`.
    fn out_br(&self, buf: &mut CodeBuffer, target: Option<usize>) -> Option<usize>;

    /// Resolve a rel32 field recorded by a branch.
    fn patch_rel32(&self, buf: &mut CodeBuffer, at: usize, target: usize);

    /// Patchable chain jump, initially falling through to the code
    /// emitted right after it.
    fn out_goto_tb(&self, buf: &mut CodeBuffer) -> ChainSite;

    /// Return `val` to the dispatcher through the epilogue.
    fn out_exit_tb(&self, buf: &mut CodeBuffer, val: u64);

    /// Call an absolute helper address. Arguments are already in place.
    fn out_call(&self, buf: &mut CodeBuffer, addr: u64);

    /// Full memory barrier.
    fn out_mb(&self, buf: &mut CodeBuffer);
}
