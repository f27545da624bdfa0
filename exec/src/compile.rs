//! The compile pipeline: decode and emit IR, optimize, then emit host
//! code and publish under the cache writer lock.

use std::sync::Arc;

use dbt_backend::optimize::optimize;
use dbt_backend::{HostCodeGen, TranslateOptions, X86_64CodeGen};
use dbt_core::dump::dump_to_string;
use dbt_core::verify::verify;
use dbt_core::{BlockKey, Context};
use dbt_frontend::arm::{translate_block, BlockInfo, CodeFetch, TranslateConfig};

use crate::cache::{CompiledBlock, Installed};
use crate::config::{ExecMode, JitConfig};
use crate::helpers::helper_table;
use crate::{BlockCache, Callbacks, JitError};

/// Compiles that raced an invalidation are retried this many times
/// before compiling entirely under the writer lock.
const RACE_RETRIES: u32 = 3;

/// Instruction fetch through the host callbacks.
pub struct CallbackFetch<'a>(pub &'a dyn Callbacks);

impl CodeFetch for CallbackFetch<'_> {
    fn fetch16(&self, addr: u32) -> Option<u16> {
        self.0.read_code16(addr).ok()
    }

    fn fetch32(&self, addr: u32) -> Option<u32> {
        self.0.read_code32(addr).ok()
    }
}

/// Frontend parameters derived from the engine configuration.
pub fn translate_config(config: &JitConfig) -> TranslateConfig {
    TranslateConfig {
        max_insns: config.max_block_insns,
        strict_alignment: config.strict_alignment,
        div_by_zero_trap: config.div_by_zero_trap,
        helpers: helper_table(),
    }
}

/// Translation state owned by one dispatcher.
pub(crate) struct Compiler {
    ir: Context,
    tcfg: TranslateConfig,
    opts: TranslateOptions,
    optimize: bool,
    dump_ir: bool,
    mode: ExecMode,
}

impl Compiler {
    pub fn new(config: &JitConfig) -> Self {
        let mut ir = Context::new();
        X86_64CodeGen::new().init_context(&mut ir);
        Self {
            ir,
            tcfg: translate_config(config),
            opts: TranslateOptions {
                spill_limit: config.spill_limit_bytes,
                trace: false,
            },
            optimize: config.optimize,
            dump_ir: config.dump_ir,
            mode: config.exec_mode,
        }
    }

    pub fn compile(
        &mut self,
        cache: &BlockCache,
        callbacks: &dyn Callbacks,
        key: BlockKey,
    ) -> Result<Arc<CompiledBlock>, JitError> {
        let _span = tracing::debug_span!("compile", pc = key.pc, mode = key.mode).entered();
        let fetch = CallbackFetch(callbacks);
        let span = self.tcfg.max_insns * 4;
        cache.pin(key.pc, span)?;
        let result = self.compile_pinned(cache, &fetch, key);
        let unpinned = cache.unpin(key.pc, span);
        let block = result?;
        unpinned?;
        Ok(block)
    }

    fn compile_pinned(
        &mut self,
        cache: &BlockCache,
        fetch: &dyn CodeFetch,
        key: BlockKey,
    ) -> Result<Arc<CompiledBlock>, JitError> {
        let mut max_insns = self.tcfg.max_insns;
        let mut races = 0;
        loop {
            let locked = races >= RACE_RETRIES;
            let mut held = if locked { Some(cache.writer()?) } else { None };
            let gen = cache.generation();
            let info = self.build_ir(key, max_insns, fetch)?;

            let mut w = match held.take() {
                Some(w) => w,
                None => cache.writer()?,
            };
            if !locked && cache.generation() != gen {
                races += 1;
                tracing::warn!(pc = key.pc, races, "discarding compile that raced an invalidation");
                continue;
            }
            match w.install(&mut self.ir, &info, key, self.mode, self.opts)? {
                Installed::Block(block) => return Ok(block),
                Installed::TooLarge(source) => {
                    if info.icount <= 1 {
                        return Err(JitError::TranslationLimitExceeded { pc: key.pc, source });
                    }
                    max_insns = (info.icount / 2).max(1);
                    tracing::warn!(
                        pc = key.pc,
                        insns = info.icount,
                        retry = max_insns,
                        error = %source,
                        "block exceeds translation limits, retrying shorter"
                    );
                }
            }
        }
    }

    fn build_ir(&mut self, key: BlockKey, max_insns: u32, fetch: &dyn CodeFetch) -> Result<BlockInfo, JitError> {
        self.ir.reset();
        let tcfg = TranslateConfig { max_insns, ..self.tcfg };
        let info = translate_block(&mut self.ir, key, &tcfg, fetch);
        if self.dump_ir {
            tracing::trace!(pc = key.pc, "IR before optimization:\n{}", dump_to_string(&self.ir));
        }
        if self.optimize {
            let rounds = optimize(&mut self.ir);
            if self.dump_ir {
                tracing::trace!(pc = key.pc, rounds, "IR after optimization:\n{}", dump_to_string(&self.ir));
            }
        }
        if cfg!(debug_assertions) {
            verify(&self.ir)?;
        }
        Ok(info)
    }
}
