use std::io;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Executable code region backed by an anonymous mapping.
///
/// The region is mapped read-write-execute: chain sites are patched
/// while other threads execute neighbouring code, so permissions are
/// never toggled. Emission goes through a window `[offset, limit)`;
/// writes past the limit are dropped and latch `overflowed`, which the
/// translator turns into a shorter-block retry.
pub struct CodeBuffer {
    ptr: *mut u8,
    size: usize,
    offset: usize,
    limit: usize,
    overflowed: bool,
}

// SAFETY: CodeBuffer owns its mapping exclusively; concurrent readers
// only ever execute code or see aligned atomic patches.
unsafe impl Send for CodeBuffer {}
unsafe impl Sync for CodeBuffer {}

impl CodeBuffer {
    /// Map a new region of `size` bytes (rounded up to the page size).
    pub fn new(size: usize) -> io::Result<Self> {
        let page_size = page_size();
        let size = (size + page_size - 1) & !(page_size - 1);

        // SAFETY: anonymous private mapping, no file backing.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            offset: 0,
            limit: size,
            overflowed: false,
        })
    }

    /// Current write offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Bytes left in the current window.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.offset)
    }

    /// Restrict emission to `[start, end)` and clear the overflow latch.
    pub fn set_window(&mut self, start: usize, end: usize) {
        assert!(start <= end && end <= self.size, "window outside region");
        self.offset = start;
        self.limit = end;
        self.overflowed = false;
    }

    /// Whether an emit was dropped since the window was set.
    #[inline]
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Raw pointer to the start of the region.
    #[inline]
    pub fn base_ptr(&self) -> *const u8 {
        self.ptr as *const u8
    }

    /// Pointer at a given offset.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *const u8 {
        assert!(offset <= self.size);
        // SAFETY: in bounds of the mapping.
        unsafe { self.ptr.add(offset) as *const u8 }
    }

    // -- Emit methods --

    #[inline]
    fn reserve(&mut self, n: usize) -> bool {
        if self.overflowed || self.offset + n > self.limit {
            self.overflowed = true;
            return false;
        }
        true
    }

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        if self.reserve(1) {
            // SAFETY: reserve checked the window, which lies in the mapping.
            unsafe { self.ptr.add(self.offset).write(val) };
            self.offset += 1;
        }
    }

    #[inline]
    pub fn emit_u16(&mut self, val: u16) {
        if self.reserve(2) {
            unsafe { (self.ptr.add(self.offset) as *mut u16).write_unaligned(val) };
            self.offset += 2;
        }
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        if self.reserve(4) {
            unsafe { (self.ptr.add(self.offset) as *mut u32).write_unaligned(val) };
            self.offset += 4;
        }
    }

    #[inline]
    pub fn emit_u64(&mut self, val: u64) {
        if self.reserve(8) {
            unsafe { (self.ptr.add(self.offset) as *mut u64).write_unaligned(val) };
            self.offset += 8;
        }
    }

    pub fn emit_bytes(&mut self, data: &[u8]) {
        if self.reserve(data.len()) {
            unsafe {
                ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(self.offset), data.len());
            }
            self.offset += data.len();
        }
    }

    /// Patch a u32 in code that is not yet visible to other threads.
    #[inline]
    pub fn patch_u32(&mut self, offset: usize, val: u32) {
        assert!(offset + 4 <= self.size);
        unsafe { (self.ptr.add(offset) as *mut u32).write_unaligned(val) };
    }

    /// Patch a 4-aligned u32 in live code with a single atomic store.
    pub fn patch_u32_atomic(&self, offset: usize, val: u32) {
        assert!(offset + 4 <= self.size && offset % 4 == 0, "unaligned live patch");
        // SAFETY: aligned, in bounds; x86 makes aligned 4-byte stores
        // atomic with respect to instruction fetch.
        let cell = unsafe { &*(self.ptr.add(offset) as *const AtomicU32) };
        cell.store(val, Ordering::Release);
    }

    /// Read a u32 at the given offset.
    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size);
        unsafe { (self.ptr.add(offset) as *const u32).read_unaligned() }
    }

    /// Bytes in `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> &[u8] {
        assert!(start <= end && end <= self.size);
        // SAFETY: in bounds; callers read ranges they emitted.
        unsafe { std::slice::from_raw_parts(self.ptr.add(start), end - start) }
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
