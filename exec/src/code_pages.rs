use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub const PAGE_BITS: u32 = 12;
const NUM_PAGES: usize = 1 << (32 - PAGE_BITS);

/// Guest pages that hold translated code.
///
/// Write helpers test a bit per store without locking. Bits are
/// maintained under the cache writer mutex from per-page reference
/// counts, so a page's bit is set exactly while some block or
/// in-flight compile covers it.
pub struct CodePages {
    bits: Vec<AtomicU64>,
}

/// Writer-side reference counts backing `CodePages`.
#[derive(Debug, Default)]
pub struct PageRefs {
    refs: HashMap<u32, u32>,
}

/// Pages touched by the guest range `[start, start + len)`.
pub fn pages_of(start: u32, len: u32) -> impl Iterator<Item = u32> {
    let first = start >> PAGE_BITS;
    let last = start.wrapping_add(len.max(1) - 1) >> PAGE_BITS;
    let mask = NUM_PAGES as u32 - 1;
    let count = (last.wrapping_sub(first) & mask) + 1;
    (0..count).map(move |i| first.wrapping_add(i) & mask)
}

impl CodePages {
    pub fn new() -> Self {
        Self {
            bits: (0..NUM_PAGES / 64).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn word(&self, page: u32) -> (&AtomicU64, u64) {
        (&self.bits[page as usize / 64], 1 << (page % 64))
    }

    pub fn contains_page(&self, page: u32) -> bool {
        let (w, m) = self.word(page);
        w.load(Ordering::SeqCst) & m != 0
    }

    /// Whether any byte of `[addr, addr + len)` lies on a code page.
    pub fn hit(&self, addr: u32, len: u32) -> bool {
        pages_of(addr, len).any(|p| self.contains_page(p))
    }

    fn set(&self, page: u32, on: bool) {
        let (w, m) = self.word(page);
        if on {
            w.fetch_or(m, Ordering::SeqCst);
        } else {
            w.fetch_and(!m, Ordering::SeqCst);
        }
    }

    pub fn clear_all(&self) {
        for w in &self.bits {
            w.store(0, Ordering::SeqCst);
        }
    }
}

impl Default for CodePages {
    fn default() -> Self {
        Self::new()
    }
}

impl PageRefs {
    pub fn acquire(&mut self, pages: &CodePages, start: u32, len: u32) {
        for p in pages_of(start, len) {
            let n = self.refs.entry(p).or_insert(0);
            *n += 1;
            if *n == 1 {
                pages.set(p, true);
            }
        }
    }

    pub fn release(&mut self, pages: &CodePages, start: u32, len: u32) {
        for p in pages_of(start, len) {
            if let Some(n) = self.refs.get_mut(&p) {
                *n -= 1;
                if *n == 0 {
                    self.refs.remove(&p);
                    pages.set(p, false);
                }
            }
        }
    }

    pub fn clear(&mut self, pages: &CodePages) {
        self.refs.clear();
        pages.clear_all();
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}
