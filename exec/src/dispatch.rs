//! Execution driver.
//!
//! ```text
//! Resolve(pc) --hit/compile--> Execute(block) --> chain exit:   link, Execute(next)
//!                                             --> no-chain:     Resolve
//!                                             --> exception:    callback, Resolve
//!                                             --> halt/budget:  return
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dbt_core::interp::interpret;
use dbt_core::{decode_exit, encode_exit, BlockKey, ExitKind, JumpCache};
use dbt_frontend::arm::{CpuState, ExceptionKind, JitState, ModeFlags};

use crate::cache::{BlockCode, CompiledBlock};
use crate::callbacks::{ExceptionInfo, TrapAction};
use crate::compile::Compiler;
use crate::epoch::EpochSlot;
use crate::helpers::HostCtx;
use crate::{BlockCache, Callbacks, JitConfig, JitError};

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// The instruction budget reached zero.
    BudgetExhausted,
    /// `HaltHandle::halt` was called.
    HaltRequested,
    /// A trap callback returned `TrapAction::Halt`.
    Trap(ExceptionKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    pub reason: HaltReason,
    /// Budget left unexecuted.
    pub remaining: u64,
    pub pc: u32,
}

/// Requests a dispatcher to stop at its next block boundary. Usable
/// from any thread.
#[derive(Debug, Clone)]
pub struct HaltHandle(Arc<AtomicU32>);

impl HaltHandle {
    pub fn halt(&self) {
        self.0.store(1, Ordering::SeqCst);
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::SeqCst) != 0
    }
}

/// One execution stream. Dispatchers of the same engine share its
/// block cache; each runs on one thread at a time.
pub struct Dispatcher {
    cache: Arc<BlockCache>,
    callbacks: Arc<dyn Callbacks>,
    compiler: Compiler,
    jump_cache: JumpCache<Arc<CompiledBlock>>,
    epoch: EpochSlot,
    halt: Arc<AtomicU32>,
}

impl Dispatcher {
    pub(crate) fn new(config: &JitConfig, cache: Arc<BlockCache>, callbacks: Arc<dyn Callbacks>) -> Self {
        let epoch = cache.register_thread();
        Self {
            cache,
            callbacks,
            compiler: Compiler::new(config),
            jump_cache: JumpCache::new(),
            epoch,
            halt: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn halt_handle(&self) -> HaltHandle {
        HaltHandle(Arc::clone(&self.halt))
    }

    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    /// Execute up to `budget` guest instructions.
    pub fn run(&mut self, cpu: &mut CpuState, budget: u64) -> Result<RunResult, JitError> {
        let _span = tracing::debug_span!("run", pc = cpu.pc(), budget).entered();
        self.cache.check_poisoned()?;

        let callbacks = Arc::clone(&self.callbacks);
        let cache = Arc::clone(&self.cache);
        let host = HostCtx::new(&*callbacks, &cache);
        let mut st = JitState::new(*cpu, Arc::as_ptr(&self.halt), &host as *const HostCtx<'_> as *mut u8);
        st.budget = budget;

        let result = self.run_loop(&mut st, &host);
        self.epoch.leave();
        *cpu = st.cpu;
        let reason = result?;
        let r = RunResult {
            reason,
            remaining: st.budget,
            pc: st.cpu.pc(),
        };
        tracing::debug!(reason = ?r.reason, remaining = r.remaining, pc = r.pc, "run finished");
        Ok(r)
    }

    /// Execute exactly one instruction, or deliver one exception.
    pub fn step(&mut self, cpu: &mut CpuState) -> Result<RunResult, JitError> {
        self.run(cpu, 1)
    }

    pub fn invalidate_range(&mut self, start: u32, len: u32) -> Result<usize, JitError> {
        self.cache.invalidate_range(start, len)
    }

    pub fn flush_all(&mut self) -> Result<usize, JitError> {
        self.jump_cache.invalidate();
        self.cache.flush_all()
    }

    fn run_loop(&mut self, st: &mut JitState, host: &HostCtx<'_>) -> Result<HaltReason, JitError> {
        let mut next: Option<Arc<CompiledBlock>> = None;
        loop {
            if st.budget == 0 {
                return Ok(HaltReason::BudgetExhausted);
            }
            let block = match next.take() {
                Some(b) if b.is_valid() && b.icount as u64 <= st.budget => b,
                _ => self.resolve(st)?,
            };

            let raw = self.execute(&block, st)?;
            if let Some(e) = host.error.take() {
                return Err(e);
            }
            let (src, kind) = decode_exit(raw)
                .ok_or_else(|| JitError::CacheConsistencyViolation(format!("malformed exit value {raw:#x}")))?;

            match kind {
                ExitKind::Chain0 | ExitKind::Chain1 => {
                    let dst = self.resolve(st)?;
                    if let Some(slot) = kind.chain_slot() {
                        if dst.key.mode & ModeFlags::SINGLE_STEP.bits() == 0 {
                            self.cache.link(src, slot, &dst)?;
                        }
                    }
                    next = Some(dst);
                }
                ExitKind::NoChain | ExitKind::Budget => {}
                ExitKind::Halt => {
                    self.halt.store(0, Ordering::SeqCst);
                    return Ok(HaltReason::HaltRequested);
                }
                ExitKind::Exception => {
                    if let Some(reason) = self.deliver(st)? {
                        return Ok(reason);
                    }
                }
            }
        }
    }

    /// Block for the current PC and mode; single-step when the budget
    /// cannot cover the whole block.
    fn resolve(&mut self, st: &JitState) -> Result<Arc<CompiledBlock>, JitError> {
        let pc = st.cpu.pc();
        let mode = st.cpu.mode();
        let block = self.lookup_or_compile(BlockKey::new(pc, mode.bits()))?;
        if block.icount as u64 <= st.budget {
            return Ok(block);
        }
        self.lookup_or_compile(BlockKey::new(pc, (mode | ModeFlags::SINGLE_STEP).bits()))
    }

    fn lookup_or_compile(&mut self, key: BlockKey) -> Result<Arc<CompiledBlock>, JitError> {
        if let Some(b) = self.jump_cache.lookup(key) {
            if b.is_valid() {
                return Ok(Arc::clone(b));
            }
        }
        let block = match self.cache.lookup(key) {
            Some(b) => b,
            None => self.compiler.compile(&self.cache, &*self.callbacks, key)?,
        };
        self.jump_cache.insert(key, Arc::clone(&block));
        Ok(block)
    }

    fn execute(&mut self, block: &CompiledBlock, st: &mut JitState) -> Result<u64, JitError> {
        self.epoch.enter();
        if !block.is_valid() {
            // Removed after resolve; resolve again.
            self.epoch.leave();
            return Ok(encode_exit(block.id, ExitKind::NoChain));
        }
        self.cache.touch(block);
        let env = st.as_env();
        // SAFETY: the epoch slot is entered and the block was valid
        // after entering, so its code and IR stay alive; env has the
        // layout its globals were registered for.
        let raw = match &block.code {
            BlockCode::Host { .. } => unsafe { self.cache.enter(block, env) }
                .ok_or_else(|| JitError::CacheConsistencyViolation(format!("block {} has no host code", block.id))),
            BlockCode::Ir(ir) => unsafe { interpret(ir, env) }.map_err(JitError::from),
        };
        self.epoch.leave();
        raw
    }

    /// Hand a pending exception to the host.
    fn deliver(&mut self, st: &mut JitState) -> Result<Option<HaltReason>, JitError> {
        let kind = ExceptionKind::from_raw(st.exception)
            .ok_or_else(|| JitError::CacheConsistencyViolation(format!("unknown exception kind {}", st.exception)))?;
        let info = st.exception_info;
        st.exception = 0;
        st.exception_info = 0;

        let action = match kind {
            ExceptionKind::Svc => self.callbacks.supervisor_call(&mut st.cpu, info),
            _ => {
                let pc = st.cpu.pc();
                self.callbacks.exception(&mut st.cpu, ExceptionInfo { kind, pc, info })
            }
        };
        tracing::trace!(?kind, info, ?action, "exception delivered");
        match action {
            TrapAction::Resume(addr) => {
                st.cpu.set_pc(addr);
                Ok(None)
            }
            TrapAction::Continue => Ok(None),
            TrapAction::Halt => Ok(Some(HaltReason::Trap(kind))),
        }
    }
}
