/// Block code is placed on this boundary.
pub const CODE_ALIGN: usize = 16;

const fn align_up(n: usize) -> usize {
    (n + CODE_ALIGN - 1) & !(CODE_ALIGN - 1)
}

/// First-fit allocator over offsets `[start, end)` of the code region.
///
/// The free list is sorted by offset and adjacent ranges are merged on
/// free, so a flush returns the region to a single range.
#[derive(Debug, Clone)]
pub struct CodeAllocator {
    start: usize,
    end: usize,
    free: Vec<(usize, usize)>,
}

impl CodeAllocator {
    pub fn new(start: usize, end: usize) -> Self {
        let start = align_up(start);
        Self {
            start,
            end,
            free: vec![(start, end.saturating_sub(start))],
        }
    }

    pub fn alloc(&mut self, size: usize) -> Option<usize> {
        let size = align_up(size.max(1));
        let i = self.free.iter().position(|&(_, len)| len >= size)?;
        let (at, len) = self.free[i];
        if len == size {
            self.free.remove(i);
        } else {
            self.free[i] = (at + size, len - size);
        }
        Some(at)
    }

    /// Give back the tail of an allocation after emission.
    pub fn shrink(&mut self, at: usize, old: usize, new: usize) {
        let old = align_up(old.max(1));
        let new = align_up(new.max(1));
        if new < old {
            self.free(at + new, old - new);
        }
    }

    pub fn free(&mut self, at: usize, size: usize) {
        let size = align_up(size.max(1));
        let i = self.free.partition_point(|&(s, _)| s < at);
        debug_assert!(i == 0 || self.free[i - 1].0 + self.free[i - 1].1 <= at, "double free");
        debug_assert!(i == self.free.len() || at + size <= self.free[i].0, "double free");
        self.free.insert(i, (at, size));
        // Merge with the successor, then the predecessor.
        if i + 1 < self.free.len() && at + size == self.free[i + 1].0 {
            self.free[i].1 += self.free[i + 1].1;
            self.free.remove(i + 1);
        }
        if i > 0 && self.free[i - 1].0 + self.free[i - 1].1 == at {
            self.free[i - 1].1 += self.free[i].1;
            self.free.remove(i);
        }
    }

    pub fn free_bytes(&self) -> usize {
        self.free.iter().map(|&(_, len)| len).sum()
    }

    pub fn largest_free(&self) -> usize {
        self.free.iter().map(|&(_, len)| len).max().unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn reset(&mut self) {
        self.free.clear();
        self.free.push((self.start, self.capacity()));
    }

    pub fn fragments(&self) -> usize {
        self.free.len()
    }
}
