//! Shared block cache: key map, code region, chain edges and
//! invalidation.
//!
//! Lock order: the writer mutex first, then the map's write lock.
//! Lookups take only the map's read lock. All writes to code memory
//! happen under the writer mutex.

use std::collections::HashMap;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use dbt_backend::{translate, BackendError, ChainSite, CodeBuffer, HostCodeGen, TranslateOptions, X86_64CodeGen};
use dbt_core::{BlockKey, Context};
use dbt_frontend::arm::BlockInfo;

use crate::code_alloc::CodeAllocator;
use crate::code_pages::{CodePages, PageRefs};
use crate::config::{ExecMode, JitConfig, TRAMPOLINE_SIZE};
use crate::epoch::{EpochSlot, Epochs};
use crate::JitError;

/// Executable form of a block.
pub enum BlockCode {
    Host {
        /// Offset of the entry point in the code region.
        start: usize,
        size: usize,
        /// Bytes reserved in the region (size rounded to alignment).
        reserved: usize,
        goto_tb: [Option<ChainSite>; 2],
    },
    /// IR kept for the interpreter.
    Ir(Box<Context>),
}

impl std::fmt::Debug for BlockCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockCode::Host { start, size, .. } => write!(f, "Host({start:#x}+{size})"),
            BlockCode::Ir(ir) => write!(f, "Ir({} ops)", ir.num_ops()),
        }
    }
}

/// A translated block published in the cache.
#[derive(Debug)]
pub struct CompiledBlock {
    /// Unique id, carried in the block's exit values.
    pub id: u64,
    pub key: BlockKey,
    pub guest_len: u32,
    /// Instructions charged on entry.
    pub icount: u32,
    /// Chain targets by slot.
    pub targets: [Option<u32>; 2],
    /// Cache generation the block was published in.
    pub generation: u64,
    pub code: BlockCode,
    last_used: AtomicU64,
    invalid: AtomicBool,
}

impl CompiledBlock {
    pub fn is_valid(&self) -> bool {
        !self.invalid.load(Ordering::SeqCst)
    }

    /// Whether the guest bytes of the block intersect `[start, start + len)`.
    pub fn covers(&self, start: u32, len: u32) -> bool {
        let a0 = self.key.pc as u64;
        let a1 = a0 + self.guest_len.max(1) as u64;
        let b0 = start as u64;
        let b1 = b0 + len.max(1) as u64;
        a0 < b1 && b0 < a1
    }

    pub fn host_entry(&self) -> Option<usize> {
        match self.code {
            BlockCode::Host { start, .. } => Some(start),
            BlockCode::Ir(_) => None,
        }
    }

    pub fn host_size(&self) -> usize {
        match self.code {
            BlockCode::Host { size, .. } => size,
            BlockCode::Ir(_) => 0,
        }
    }

    pub fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }

    fn chain_site(&self, slot: usize) -> Option<ChainSite> {
        match &self.code {
            BlockCode::Host { goto_tb, .. } => goto_tb[slot],
            BlockCode::Ir(_) => None,
        }
    }
}

/// Statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub compiles: u64,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub evictions: u64,
    pub chains: u64,
    pub live_blocks: usize,
    pub code_free: usize,
}

#[derive(Default)]
struct Counters {
    compiles: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
    chains: AtomicU64,
}

fn bump(c: &AtomicU64, n: u64) {
    c.fetch_add(n, Ordering::Relaxed);
}

/// Chain edges of one block.
#[derive(Debug, Default)]
struct Links {
    out: [Option<u64>; 2],
    /// `(source block id, slot)` of every chain into this block.
    incoming: Vec<(u64, usize)>,
}

#[derive(Debug, Clone, Copy)]
struct Retired {
    start: usize,
    size: usize,
    epoch: u64,
}

/// State only touched under the writer mutex.
struct Writer {
    buf: CodeBuffer,
    backend: X86_64CodeGen,
    alloc: CodeAllocator,
    retired: Vec<Retired>,
    page_refs: PageRefs,
    blocks: HashMap<u64, Arc<CompiledBlock>>,
    links: HashMap<u64, Links>,
}

/// Outcome of installing a compiled IR block.
pub(crate) enum Installed {
    Block(Arc<CompiledBlock>),
    /// Host code did not fit the block limits.
    TooLarge(BackendError),
}

type Prologue = unsafe extern "C" fn(*mut u8, *const u8) -> u64;

pub struct BlockCache {
    map: RwLock<HashMap<BlockKey, Arc<CompiledBlock>>>,
    writer: Mutex<Writer>,
    generation: AtomicU64,
    next_id: AtomicU64,
    clock: AtomicU64,
    poisoned: AtomicBool,
    pages: CodePages,
    epochs: Arc<Epochs>,
    counters: Counters,
    code_base: usize,
    prologue: usize,
    max_blocks: usize,
    max_block_code: usize,
}

impl BlockCache {
    pub fn new(config: &JitConfig) -> Result<Self, JitError> {
        config.validate()?;
        let mut buf = CodeBuffer::new(config.code_region_size).map_err(JitError::CodeRegionMap)?;
        let mut backend = X86_64CodeGen::new();
        buf.set_window(0, TRAMPOLINE_SIZE);
        backend.emit_prologue(&mut buf);
        backend.emit_epilogue(&mut buf);
        if buf.overflowed() {
            return Err(JitError::InvalidConfig("trampolines do not fit their reserved area"));
        }
        let alloc = CodeAllocator::new(TRAMPOLINE_SIZE, buf.capacity());
        let code_base = buf.base_ptr() as usize;
        let prologue = backend.prologue_offset();

        Ok(Self {
            map: RwLock::new(HashMap::new()),
            writer: Mutex::new(Writer {
                buf,
                backend,
                alloc,
                retired: Vec::new(),
                page_refs: PageRefs::default(),
                blocks: HashMap::new(),
                links: HashMap::new(),
            }),
            generation: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            clock: AtomicU64::new(0),
            poisoned: AtomicBool::new(false),
            pages: CodePages::new(),
            epochs: Epochs::new(),
            counters: Counters::default(),
            code_base,
            prologue,
            max_blocks: config.max_blocks,
            max_block_code: config.max_block_code,
        })
    }

    /// Register an execution thread for reclamation.
    pub fn register_thread(&self) -> EpochSlot {
        self.epochs.register()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    pub fn check_poisoned(&self) -> Result<(), JitError> {
        if self.is_poisoned() {
            return Err(JitError::CacheConsistencyViolation("cache poisoned by an earlier violation".into()));
        }
        Ok(())
    }

    fn violation(&self, what: String) -> JitError {
        self.poisoned.store(true, Ordering::SeqCst);
        tracing::error!(%what, "block cache consistency violation");
        JitError::CacheConsistencyViolation(what)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Writer>, JitError> {
        self.check_poisoned()?;
        self.writer
            .lock()
            .map_err(|_| self.violation("writer mutex poisoned".into()))
    }

    /// Stamp recency.
    pub fn touch(&self, block: &CompiledBlock) {
        let t = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        block.last_used.store(t, Ordering::Relaxed);
    }

    pub fn lookup(&self, key: BlockKey) -> Option<Arc<CompiledBlock>> {
        let map = self.map.read().unwrap_or_else(|e| e.into_inner());
        match map.get(&key) {
            Some(b) if b.is_valid() => {
                bump(&self.counters.hits, 1);
                Some(Arc::clone(b))
            }
            _ => {
                bump(&self.counters.misses, 1);
                None
            }
        }
    }

    /// Whether a store to `[addr, addr + len)` may hit translated code.
    pub fn is_code(&self, addr: u32, len: u32) -> bool {
        // Orders the guest store before the bitmap load; see `pin`.
        fence(Ordering::SeqCst);
        self.pages.hit(addr, len)
    }

    // -- Compilation --

    pub(crate) fn writer(&self) -> Result<WriterGuard<'_>, JitError> {
        Ok(WriterGuard { cache: self, w: self.lock()? })
    }

    /// Mark the pages a compile may read as code before reading them,
    /// so racing guest stores invalidate and bump the generation.
    pub(crate) fn pin(&self, pc: u32, span: u32) -> Result<(), JitError> {
        self.writer()?.pin(pc, span);
        Ok(())
    }

    pub(crate) fn unpin(&self, pc: u32, span: u32) -> Result<(), JitError> {
        self.writer()?.unpin(pc, span);
        Ok(())
    }

    // -- Chaining --

    /// Patch chain slot `slot` of block `src` to jump into `dst`.
    ///
    /// Blocks removed concurrently are skipped quietly.
    pub fn link(&self, src: u64, slot: usize, dst: &Arc<CompiledBlock>) -> Result<bool, JitError> {
        let mut g = self.writer()?;
        g.link(src, slot, dst)
    }

    // -- Invalidation --

    /// Remove every block intersecting `[start, start + len)`.
    pub fn invalidate_range(&self, start: u32, len: u32) -> Result<usize, JitError> {
        let mut g = self.writer()?;
        g.invalidate_range(start, len)
    }

    pub fn flush_all(&self) -> Result<usize, JitError> {
        let mut g = self.writer()?;
        g.flush_all()
    }

    /// Free code retired before every thread's last quiescent point.
    pub fn reclaim(&self) -> Result<usize, JitError> {
        let mut g = self.writer()?;
        Ok(g.reclaim())
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        let (live_blocks, code_free) = match self.writer.lock() {
            Ok(w) => (w.blocks.len(), w.alloc.free_bytes()),
            Err(_) => (0, 0),
        };
        CacheStats {
            compiles: c.compiles.load(Ordering::Relaxed),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            chains: c.chains.load(Ordering::Relaxed),
            live_blocks,
            code_free,
        }
    }

    /// Full structural check of keys, ids and chain edges.
    pub fn check_consistency(&self) -> Result<(), JitError> {
        let g = self.writer()?;
        g.check()
    }

    // -- Execution --

    /// Enter host code of `block` with `env`.
    ///
    /// # Safety
    /// `env` must point to a live `JitState` whose host pointer is
    /// valid for the helpers, and the caller's epoch slot must be
    /// entered with `block` still valid.
    pub(crate) unsafe fn enter(&self, block: &CompiledBlock, env: *mut u8) -> Option<u64> {
        let entry = block.host_entry()?;
        let prologue: Prologue = std::mem::transmute(self.code_base + self.prologue);
        Some(prologue(env, (self.code_base + entry) as *const u8))
    }

    /// Copy of a block's emitted bytes.
    pub fn host_code(&self, block: &CompiledBlock) -> Option<Vec<u8>> {
        let BlockCode::Host { start, size, .. } = block.code else {
            return None;
        };
        let w = self.writer.lock().ok()?;
        Some(w.buf.slice(start, start + size).to_vec())
    }
}

/// Exclusive access to the writer state.
pub(crate) struct WriterGuard<'a> {
    cache: &'a BlockCache,
    w: MutexGuard<'a, Writer>,
}

impl WriterGuard<'_> {
    pub(crate) fn pin(&mut self, pc: u32, span: u32) {
        let w = &mut *self.w;
        w.page_refs.acquire(&self.cache.pages, pc, span);
        // Orders the bitmap store before the code reads that follow.
        fence(Ordering::SeqCst);
    }

    pub(crate) fn unpin(&mut self, pc: u32, span: u32) {
        let w = &mut *self.w;
        w.page_refs.release(&self.cache.pages, pc, span);
    }

    /// Emit `ir` (or keep it for the interpreter) and publish the
    /// block. A block another thread published first for the same key
    /// wins and is returned instead.
    pub(crate) fn install(
        &mut self,
        ir: &mut Context,
        info: &BlockInfo,
        key: BlockKey,
        mode: ExecMode,
        opts: TranslateOptions,
    ) -> Result<Installed, JitError> {
        let cache = self.cache;
        if let Some(b) = cache.map.read().unwrap_or_else(|e| e.into_inner()).get(&key) {
            if b.is_valid() {
                return Ok(Installed::Block(Arc::clone(b)));
            }
        }

        if self.w.blocks.len() >= cache.max_blocks {
            self.evict_lru()?;
        }

        let id = cache.next_id.fetch_add(1, Ordering::Relaxed);
        ir.block_id = id;

        let code = match mode {
            ExecMode::Interpreted => BlockCode::Ir(Box::new(ir.clone())),
            ExecMode::Compiled => {
                let window = cache.max_block_code;
                let at = self.make_room(window)?;
                let w = &mut *self.w;
                w.buf.set_window(at, at + window);
                match translate(ir, &w.backend, &mut w.buf, opts) {
                    Ok(code) => {
                        w.alloc.shrink(at, window, code.size);
                        BlockCode::Host {
                            start: code.start,
                            size: code.size,
                            reserved: code.size,
                            goto_tb: code.goto_tb,
                        }
                    }
                    Err(e) => {
                        w.alloc.free(at, window);
                        return match e {
                            BackendError::CodeWindowOverflow { .. } | BackendError::SpillLimitExceeded { .. } => {
                                Ok(Installed::TooLarge(e))
                            }
                            e => Err(e.into()),
                        };
                    }
                }
            }
        };

        let block = Arc::new(CompiledBlock {
            id,
            key,
            guest_len: info.guest_len,
            icount: info.icount,
            targets: info.targets,
            generation: cache.generation(),
            code,
            last_used: AtomicU64::new(0),
            invalid: AtomicBool::new(false),
        });
        cache.touch(&block);

        let w = &mut *self.w;
        w.page_refs.acquire(&cache.pages, key.pc, info.guest_len.max(1));
        w.blocks.insert(id, Arc::clone(&block));
        w.links.insert(id, Links::default());
        cache
            .map
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::clone(&block));
        bump(&cache.counters.compiles, 1);

        tracing::debug!(
            pc = key.pc,
            mode = key.mode,
            insns = info.icount,
            guest_bytes = info.guest_len,
            host_bytes = block.host_size(),
            id,
            "compiled block"
        );
        Ok(Installed::Block(block))
    }

    /// Reserve `size` bytes, reclaiming and evicting as needed.
    fn make_room(&mut self, size: usize) -> Result<usize, JitError> {
        loop {
            self.reclaim();
            if let Some(at) = self.w.alloc.alloc(size) {
                return Ok(at);
            }
            if self.w.blocks.is_empty() {
                tracing::warn!(requested = size, retired = self.w.retired.len(), "code region exhausted");
                return Err(JitError::CodeRegionExhausted { requested: size });
            }
            self.evict_lru()?;
        }
    }

    /// Evict the least recently used eighth of the live blocks.
    fn evict_lru(&mut self) -> Result<(), JitError> {
        let mut by_age: Vec<(u64, u64)> = self.w.blocks.values().map(|b| (b.last_used(), b.id)).collect();
        by_age.sort_unstable();
        let n = (by_age.len() / 8).max(1);
        for &(_, id) in &by_age[..n] {
            self.remove(id)?;
        }
        bump(&self.cache.counters.evictions, n as u64);
        self.cache.generation.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(evicted = n, "evicted least recently used blocks");
        Ok(())
    }

    fn reclaim(&mut self) -> usize {
        let safe = self.cache.epochs.safe_epoch();
        let w = &mut *self.w;
        let mut freed = 0;
        let alloc = &mut w.alloc;
        w.retired.retain(|r| {
            if r.epoch <= safe {
                alloc.free(r.start, r.size);
                freed += r.size;
                false
            } else {
                true
            }
        });
        freed
    }

    pub(crate) fn link(&mut self, src: u64, slot: usize, dst: &Arc<CompiledBlock>) -> Result<bool, JitError> {
        let cache = self.cache;
        let w = &mut *self.w;
        let Some(src_block) = w.blocks.get(&src).cloned() else {
            return Ok(false);
        };
        if !dst.is_valid() || !w.blocks.contains_key(&dst.id) {
            return Ok(false);
        }
        let (Some(site), Some(target)) = (src_block.chain_site(slot), dst.host_entry()) else {
            return Ok(false);
        };
        if src_block.targets[slot] != Some(dst.key.pc) || src_block.key.mode != dst.key.mode {
            return Err(cache.violation(format!(
                "chain {src}:{slot} to block {} at {:#x} does not match its target",
                dst.id, dst.key.pc
            )));
        }
        let links = w.links.get_mut(&src).ok_or_else(|| cache.violation(format!("block {src} has no links")))?;
        match links.out[slot] {
            Some(cur) if cur == dst.id => return Ok(false),
            Some(cur) => {
                return Err(cache.violation(format!("chain {src}:{slot} already points at block {cur}")));
            }
            None => links.out[slot] = Some(dst.id),
        }
        w.links.entry(dst.id).or_default().incoming.push((src, slot));
        w.backend.patch_jump(&w.buf, site, target);
        cache.touch(dst);
        bump(&cache.counters.chains, 1);
        tracing::trace!(src, slot, dst = dst.id, "chained");
        Ok(true)
    }

    /// Remove one block: unpublish, sever chains, retire its code.
    fn remove(&mut self, id: u64) -> Result<(), JitError> {
        let cache = self.cache;
        let w = &mut *self.w;
        let Some(block) = w.blocks.remove(&id) else {
            return Ok(());
        };
        block.invalid.store(true, Ordering::SeqCst);
        {
            let mut map = cache.map.write().unwrap_or_else(|e| e.into_inner());
            if map.get(&block.key).is_some_and(|b| b.id == id) {
                map.remove(&block.key);
            }
        }

        let links = w.links.remove(&id).unwrap_or_default();
        for (src, slot) in links.incoming {
            if src == id {
                continue;
            }
            let src_links = w
                .links
                .get_mut(&src)
                .ok_or_else(|| cache.violation(format!("chain from missing block {src} into {id}")))?;
            if src_links.out[slot] != Some(id) {
                return Err(cache.violation(format!("reverse link {src}:{slot} -> {id} has no forward edge")));
            }
            src_links.out[slot] = None;
            if let Some(site) = w.blocks.get(&src).and_then(|b| b.chain_site(slot)) {
                w.backend.reset_jump(&w.buf, site);
            }
        }
        for (slot, dst) in links.out.iter().enumerate() {
            let Some(dst) = dst else { continue };
            if *dst == id {
                continue;
            }
            let dst_links = w
                .links
                .get_mut(dst)
                .ok_or_else(|| cache.violation(format!("chain {id}:{slot} into missing block {dst}")))?;
            let before = dst_links.incoming.len();
            dst_links.incoming.retain(|&e| e != (id, slot));
            if dst_links.incoming.len() == before {
                return Err(cache.violation(format!("chain {id}:{slot} -> {dst} has no reverse link")));
            }
        }

        w.page_refs.release(&cache.pages, block.key.pc, block.guest_len.max(1));
        if let BlockCode::Host { start, reserved, .. } = block.code {
            let epoch = cache.epochs.retire();
            w.retired.push(Retired { start, size: reserved, epoch });
        }
        Ok(())
    }

    pub(crate) fn invalidate_range(&mut self, start: u32, len: u32) -> Result<usize, JitError> {
        let cache = self.cache;
        cache.generation.fetch_add(1, Ordering::SeqCst);
        let victims: Vec<u64> = self
            .w
            .blocks
            .values()
            .filter(|b| b.covers(start, len))
            .map(|b| b.id)
            .collect();
        for &id in &victims {
            self.remove(id)?;
        }
        if !victims.is_empty() {
            bump(&cache.counters.invalidations, victims.len() as u64);
            tracing::debug!(
                start,
                len,
                removed = victims.len(),
                "invalidated blocks"
            );
        }
        if cfg!(debug_assertions) {
            self.check()?;
        }
        Ok(victims.len())
    }

    fn flush_all(&mut self) -> Result<usize, JitError> {
        let cache = self.cache;
        cache.generation.fetch_add(1, Ordering::SeqCst);
        let n = self.w.blocks.len();
        let w = &mut *self.w;
        cache.map.write().unwrap_or_else(|e| e.into_inner()).clear();
        let epoch = cache.epochs.retire();
        for (_, block) in w.blocks.drain() {
            block.invalid.store(true, Ordering::SeqCst);
            if let BlockCode::Host { start, reserved, .. } = block.code {
                w.retired.push(Retired { start, size: reserved, epoch });
            }
        }
        w.links.clear();
        w.page_refs.clear(&cache.pages);
        bump(&cache.counters.invalidations, n as u64);
        self.reclaim();
        tracing::info!(blocks = n, "flushed block cache");
        Ok(n)
    }

    fn check(&self) -> Result<(), JitError> {
        let cache = self.cache;
        let w = &*self.w;
        let map = cache.map.read().unwrap_or_else(|e| e.into_inner());
        if map.len() != w.blocks.len() {
            return Err(cache.violation(format!("{} keys map {} live blocks", map.len(), w.blocks.len())));
        }
        for (key, b) in map.iter() {
            if b.key != *key || !b.is_valid() || !w.blocks.get(&b.id).is_some_and(|l| Arc::ptr_eq(l, b)) {
                return Err(cache.violation(format!("key {key:?} maps stale block {}", b.id)));
            }
        }
        for (&id, links) in &w.links {
            for (slot, dst) in links.out.iter().enumerate() {
                let Some(dst) = dst else { continue };
                let ok = w.links.get(dst).is_some_and(|d| d.incoming.contains(&(id, slot)));
                if !ok {
                    return Err(cache.violation(format!("chain {id}:{slot} -> {dst} has no reverse link")));
                }
            }
            for &(src, slot) in &links.incoming {
                if w.links.get(&src).and_then(|s| s.out[slot]) != Some(id) {
                    return Err(cache.violation(format!("reverse link {src}:{slot} -> {id} has no forward edge")));
                }
            }
        }
        Ok(())
    }
}
