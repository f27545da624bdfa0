//! Epoch-based reclamation of code memory.
//!
//! A thread announces the current epoch in its slot before entering
//! generated code and marks the slot idle when it leaves. Code removed
//! from the cache is retired with a fresh epoch and freed once every
//! slot is idle or has announced that epoch or a later one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

const IDLE: u64 = u64::MAX;

#[derive(Default)]
pub struct Epochs {
    global: AtomicU64,
    slots: Mutex<Vec<Weak<AtomicU64>>>,
}

/// One execution thread's announcement.
pub struct EpochSlot {
    epochs: Arc<Epochs>,
    observed: Arc<AtomicU64>,
}

impl Epochs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(self: &Arc<Self>) -> EpochSlot {
        let observed = Arc::new(AtomicU64::new(IDLE));
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.retain(|w| w.strong_count() > 0);
        slots.push(Arc::downgrade(&observed));
        EpochSlot {
            epochs: Arc::clone(self),
            observed,
        }
    }

    /// Start a new epoch for memory removed just now.
    pub fn retire(&self) -> u64 {
        self.global.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.global.load(Ordering::SeqCst)
    }

    /// Memory retired at an epoch `<=` this value is unreachable.
    pub fn safe_epoch(&self) -> u64 {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .iter()
            .filter_map(Weak::upgrade)
            .map(|s| s.load(Ordering::SeqCst))
            .min()
            .unwrap_or(IDLE)
    }
}

impl EpochSlot {
    /// Announce the current epoch before touching code memory.
    pub fn enter(&self) {
        self.observed.store(self.epochs.current(), Ordering::SeqCst);
    }

    /// Quiescent point: no references into code memory are held.
    pub fn leave(&self) {
        self.observed.store(IDLE, Ordering::SeqCst);
    }

    pub fn is_idle(&self) -> bool {
        self.observed.load(Ordering::SeqCst) == IDLE
    }
}

impl Drop for EpochSlot {
    fn drop(&mut self) {
        self.leave();
    }
}
