//! Helpers called from generated code.
//!
//! Every helper receives the env pointer first. The env's `host` field
//! points at the `HostCtx` of the running dispatcher, which lives for
//! the whole `run` call.

use std::cell::RefCell;

use dbt_frontend::arm::{ExceptionKind, HelperTable, JitState};

use crate::{BlockCache, Callbacks, JitError};

/// What helpers reach through `JitState::host`.
pub(crate) struct HostCtx<'a> {
    pub callbacks: &'a dyn Callbacks,
    pub cache: &'a BlockCache,
    /// Engine error raised inside a helper, surfaced after the block
    /// returns.
    pub error: RefCell<Option<JitError>>,
}

impl<'a> HostCtx<'a> {
    pub fn new(callbacks: &'a dyn Callbacks, cache: &'a BlockCache) -> Self {
        Self {
            callbacks,
            cache,
            error: RefCell::new(None),
        }
    }

    /// Invalidate translations overwritten by a guest store.
    fn after_store(&self, st: &mut JitState, addr: u32, size: u32) {
        if !self.cache.is_code(addr, size) {
            return;
        }
        match self.cache.invalidate_range(addr, size) {
            Ok(0) => {}
            Ok(_) => st.exit_request = 1,
            Err(e) => {
                self.error.replace(Some(e));
                st.exit_request = 1;
            }
        }
    }
}

/// # Safety
/// `env` must be the env pointer of a running dispatcher.
unsafe fn parts<'a>(env: *mut u8) -> (&'a mut JitState, &'a HostCtx<'a>) {
    let st = &mut *(env as *mut JitState);
    let host = &*(st.host as *const HostCtx<'a>);
    (st, host)
}

fn raise(st: &mut JitState, kind: ExceptionKind, addr: u32) -> u64 {
    st.exception = kind as u32;
    st.exception_info = addr;
    0
}

macro_rules! read_helper {
    ($name:ident, $cb:ident) => {
        unsafe extern "C" fn $name(env: *mut u8, addr: u64, align: u64, _: u64) -> u64 {
            let (st, host) = parts(env);
            let addr = addr as u32;
            if addr & align as u32 != 0 {
                return raise(st, ExceptionKind::Alignment, addr);
            }
            match host.callbacks.$cb(addr) {
                Ok(v) => v as u64,
                Err(fault) => raise(st, ExceptionKind::DataAbort, fault.addr),
            }
        }
    };
}

macro_rules! write_helper {
    ($name:ident, $cb:ident, $ty:ty) => {
        unsafe extern "C" fn $name(env: *mut u8, addr: u64, value: u64, align: u64) -> u64 {
            let (st, host) = parts(env);
            let addr = addr as u32;
            if addr & align as u32 != 0 {
                return raise(st, ExceptionKind::Alignment, addr);
            }
            if let Err(fault) = host.callbacks.$cb(addr, value as $ty) {
                return raise(st, ExceptionKind::DataAbort, fault.addr);
            }
            host.after_store(st, addr, std::mem::size_of::<$ty>() as u32);
            0
        }
    };
}

read_helper!(read8, read8);
read_helper!(read16, read16);
read_helper!(read32, read32);
read_helper!(read64, read64);
write_helper!(write8, write8, u8);
write_helper!(write16, write16, u16);
write_helper!(write32, write32, u32);
write_helper!(write64, write64, u64);

fn size_mask(size: u32) -> u64 {
    if size >= 8 {
        u64::MAX
    } else {
        (1u64 << (size * 8)) - 1
    }
}

unsafe extern "C" fn exclusive_read(env: *mut u8, addr: u64, size: u64, _: u64) -> u64 {
    let (st, host) = parts(env);
    let (addr, size) = (addr as u32, size as u32);
    if addr & (size - 1) != 0 {
        return raise(st, ExceptionKind::Alignment, addr);
    }
    match host.callbacks.exclusive_read(addr, size) {
        Ok(v) => {
            let v = v & size_mask(size);
            st.cpu.exclusive_state = 1;
            st.cpu.exclusive_addr = addr;
            st.cpu.exclusive_value = v;
            v
        }
        Err(fault) => raise(st, ExceptionKind::DataAbort, fault.addr),
    }
}

unsafe extern "C" fn exclusive_write(env: *mut u8, addr: u64, value: u64, size: u64) -> u64 {
    let (st, host) = parts(env);
    let (addr, size) = (addr as u32, size as u32);
    if addr & (size - 1) != 0 {
        return raise(st, ExceptionKind::Alignment, addr);
    }
    let open = st.cpu.exclusive_state != 0 && st.cpu.exclusive_addr == addr;
    st.cpu.exclusive_state = 0;
    if !open {
        return 1;
    }
    let value = value & size_mask(size);
    match host.callbacks.exclusive_write(addr, size, value, st.cpu.exclusive_value) {
        Ok(true) => {
            host.after_store(st, addr, size);
            0
        }
        Ok(false) => 1,
        Err(fault) => raise(st, ExceptionKind::DataAbort, fault.addr),
    }
}

/// Helper addresses baked into translated blocks.
pub fn helper_table() -> HelperTable {
    HelperTable {
        read8,
        read16,
        read32,
        read64,
        write8,
        write16,
        write32,
        write64,
        exclusive_read,
        exclusive_write,
    }
}
