//! Configuration checks, code allocator, code-page bitmap and epoch
//! bookkeeping.

use dbt_exec::code_alloc::{CodeAllocator, CODE_ALIGN};
use dbt_exec::code_pages::{pages_of, CodePages, PageRefs, PAGE_BITS};
use dbt_exec::epoch::Epochs;
use dbt_exec::{JitConfig, JitError};

// ── JitConfig ─────────────────────────────────────────────────

#[test]
fn default_config_is_valid() {
    JitConfig::default().validate().unwrap();
}

#[test]
fn config_limits_are_checked() {
    let bad = [
        JitConfig { max_block_insns: 0, ..JitConfig::default() },
        JitConfig { max_block_insns: 513, ..JitConfig::default() },
        JitConfig { max_blocks: 0, ..JitConfig::default() },
        JitConfig { max_block_code: 64, ..JitConfig::default() },
        JitConfig { code_region_size: 4096, ..JitConfig::default() },
        JitConfig { spill_limit_bytes: u32::MAX, ..JitConfig::default() },
    ];
    for config in bad {
        assert!(
            matches!(config.validate(), Err(JitError::InvalidConfig(_))),
            "{config:?}"
        );
    }
}

// ── CodeAllocator ─────────────────────────────────────────────

#[test]
fn alloc_is_aligned_first_fit() {
    let mut a = CodeAllocator::new(5, 1024);
    assert_eq!(a.capacity(), 1024 - 16);
    let x = a.alloc(1).unwrap();
    let y = a.alloc(17).unwrap();
    assert_eq!(x, 16);
    assert_eq!(y, 32);
    assert_eq!(y % CODE_ALIGN, 0);
    assert_eq!(a.free_bytes(), a.capacity() - 16 - 32);
}

#[test]
fn alloc_fails_when_no_range_fits() {
    let mut a = CodeAllocator::new(0, 64);
    assert_eq!(a.alloc(64), Some(0));
    assert_eq!(a.alloc(1), None);
    assert_eq!(a.largest_free(), 0);
}

#[test]
fn free_merges_neighbours() {
    let mut a = CodeAllocator::new(0, 256);
    let x = a.alloc(32).unwrap();
    let y = a.alloc(32).unwrap();
    let z = a.alloc(32).unwrap();
    a.free(x, 32);
    a.free(z, 32);
    // x alone, then z merged with the tail.
    assert_eq!(a.fragments(), 2);
    a.free(y, 32);
    assert_eq!(a.fragments(), 1);
    assert_eq!(a.free_bytes(), 256);
    assert_eq!(a.largest_free(), 256);
}

#[test]
fn shrink_returns_tail() {
    let mut a = CodeAllocator::new(0, 256);
    let x = a.alloc(128).unwrap();
    a.shrink(x, 128, 40);
    assert_eq!(a.free_bytes(), 256 - 48);
    assert_eq!(a.alloc(16), Some(48));
}

#[test]
fn reset_restores_one_range() {
    let mut a = CodeAllocator::new(0, 512);
    for _ in 0..5 {
        a.alloc(48).unwrap();
    }
    a.reset();
    assert_eq!(a.fragments(), 1);
    assert_eq!(a.free_bytes(), 512);
}

// ── CodePages ─────────────────────────────────────────────────

#[test]
fn pages_of_spans_boundaries() {
    let page = 1u32 << PAGE_BITS;
    assert_eq!(pages_of(0x1000, 4).collect::<Vec<_>>(), [1]);
    assert_eq!(pages_of(page - 2, 4).collect::<Vec<_>>(), [0, 1]);
    assert_eq!(pages_of(0x1000, 0).collect::<Vec<_>>(), [1]);
    // Wraps past the top of the address space.
    assert_eq!(pages_of(u32::MAX - 1, 4).count(), 2);
}

#[test]
fn refcounted_page_bits() {
    let pages = CodePages::new();
    let mut refs = PageRefs::default();
    refs.acquire(&pages, 0x1000, 0x20);
    refs.acquire(&pages, 0x1ff0, 0x20);
    assert!(pages.hit(0x1004, 4));
    assert!(pages.contains_page(2));
    assert!(!pages.hit(0x3000, 4));
    assert_eq!(refs.len(), 2);

    refs.release(&pages, 0x1ff0, 0x20);
    assert!(pages.contains_page(1));
    assert!(!pages.contains_page(2));
    refs.release(&pages, 0x1000, 0x20);
    assert!(!pages.hit(0x1000, 0x1000));
    assert!(refs.is_empty());
}

#[test]
fn clear_drops_every_page() {
    let pages = CodePages::new();
    let mut refs = PageRefs::default();
    refs.acquire(&pages, 0x8000, 0x4000);
    assert!(pages.hit(0xa000, 1));
    refs.clear(&pages);
    assert!(!pages.hit(0x8000, 0x4000));
    assert!(refs.is_empty());
}

// ── Epochs ────────────────────────────────────────────────────

#[test]
fn idle_slots_do_not_hold_back_reclamation() {
    let epochs = Epochs::new();
    let slot = epochs.register();
    assert!(slot.is_idle());
    let retired = epochs.retire();
    assert!(epochs.safe_epoch() >= retired);
}

#[test]
fn active_slot_pins_older_epochs() {
    let epochs = Epochs::new();
    let slot = epochs.register();
    slot.enter();
    let retired = epochs.retire();
    assert!(epochs.safe_epoch() < retired);
    // Re-entering announces the new epoch.
    slot.leave();
    slot.enter();
    assert!(epochs.safe_epoch() >= retired);
    slot.leave();
}

#[test]
fn dropped_slot_is_forgotten() {
    let epochs = Epochs::new();
    let slot = epochs.register();
    slot.enter();
    let retired = epochs.retire();
    drop(slot);
    assert!(epochs.safe_epoch() >= retired);
}
