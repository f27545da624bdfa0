//! Shared fixtures: a flat guest memory implementing `Callbacks`,
//! instruction encoders and engine constructors.


use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dbt_exec::{Callbacks, Engine, ExceptionInfo, ExecMode, JitConfig, MemoryFault, TrapAction};
use dbt_frontend::arm::CpuState;

/// Bytes of guest memory, mapped at address 0.
pub const MEM_SIZE: usize = 1 << 20;

/// Address outside guest memory.
pub const UNMAPPED: u32 = 0x00f0_0000;

/// Both execution back ends, for tests that must agree across them.
pub const MODES: [ExecMode; 2] = [ExecMode::Compiled, ExecMode::Interpreted];

/// Flat little-endian guest memory.
///
/// SVC #0 halts the run and any other SVC continues; every other
/// exception halts unless `resume_exceptions` is set, in which case
/// execution skips the raising instruction.
pub struct TestMemory {
    bytes: Mutex<Vec<u8>>,
    faults: Mutex<Vec<Range<u32>>>,
    pub svcs: Mutex<Vec<u32>>,
    pub exceptions: Mutex<Vec<ExceptionInfo>>,
    pub resume_exceptions: AtomicBool,
}

impl TestMemory {
    pub fn new() -> Self {
        Self {
            bytes: Mutex::new(vec![0; MEM_SIZE]),
            faults: Mutex::new(Vec::new()),
            svcs: Mutex::new(Vec::new()),
            exceptions: Mutex::new(Vec::new()),
            resume_exceptions: AtomicBool::new(false),
        }
    }

    /// Make accesses to `range` fault.
    pub fn add_fault(&self, range: Range<u32>) {
        self.faults.lock().unwrap().push(range);
    }

    pub fn load_words(&self, base: u32, words: &[u32]) {
        for (i, w) in words.iter().enumerate() {
            self.poke(base + 4 * i as u32, &w.to_le_bytes());
        }
    }

    pub fn load_halfwords(&self, base: u32, halves: &[u16]) {
        for (i, h) in halves.iter().enumerate() {
            self.poke(base + 2 * i as u32, &h.to_le_bytes());
        }
    }

    /// Write bytes directly, bypassing the engine.
    pub fn poke(&self, addr: u32, data: &[u8]) {
        let mut mem = self.bytes.lock().unwrap();
        mem[addr as usize..addr as usize + data.len()].copy_from_slice(data);
    }

    pub fn peek32(&self, addr: u32) -> u32 {
        let mem = self.bytes.lock().unwrap();
        let a = addr as usize;
        u32::from_le_bytes([mem[a], mem[a + 1], mem[a + 2], mem[a + 3]])
    }

    pub fn svc_log(&self) -> Vec<u32> {
        self.svcs.lock().unwrap().clone()
    }

    pub fn exception_log(&self) -> Vec<ExceptionInfo> {
        self.exceptions.lock().unwrap().clone()
    }

    fn check(&self, addr: u32, size: u32) -> Result<usize, MemoryFault> {
        let end = addr as u64 + size as u64;
        if end > MEM_SIZE as u64 {
            return Err(MemoryFault::at(addr));
        }
        let faults = self.faults.lock().unwrap();
        if faults.iter().any(|r| r.start < end as u32 && addr < r.end) {
            return Err(MemoryFault::at(addr));
        }
        Ok(addr as usize)
    }

    fn read(&self, addr: u32, size: u32) -> Result<u64, MemoryFault> {
        let a = self.check(addr, size)?;
        let mem = self.bytes.lock().unwrap();
        let mut v = 0u64;
        for i in (0..size as usize).rev() {
            v = v << 8 | mem[a + i] as u64;
        }
        Ok(v)
    }

    fn write(&self, addr: u32, size: u32, value: u64) -> Result<(), MemoryFault> {
        let a = self.check(addr, size)?;
        let mut mem = self.bytes.lock().unwrap();
        for i in 0..size as usize {
            mem[a + i] = (value >> (8 * i)) as u8;
        }
        Ok(())
    }
}

impl Default for TestMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Callbacks for TestMemory {
    fn read8(&self, addr: u32) -> Result<u8, MemoryFault> {
        self.read(addr, 1).map(|v| v as u8)
    }

    fn read16(&self, addr: u32) -> Result<u16, MemoryFault> {
        self.read(addr, 2).map(|v| v as u16)
    }

    fn read32(&self, addr: u32) -> Result<u32, MemoryFault> {
        self.read(addr, 4).map(|v| v as u32)
    }

    fn read64(&self, addr: u32) -> Result<u64, MemoryFault> {
        self.read(addr, 8)
    }

    fn write8(&self, addr: u32, value: u8) -> Result<(), MemoryFault> {
        self.write(addr, 1, value as u64)
    }

    fn write16(&self, addr: u32, value: u16) -> Result<(), MemoryFault> {
        self.write(addr, 2, value as u64)
    }

    fn write32(&self, addr: u32, value: u32) -> Result<(), MemoryFault> {
        self.write(addr, 4, value as u64)
    }

    fn write64(&self, addr: u32, value: u64) -> Result<(), MemoryFault> {
        self.write(addr, 8, value)
    }

    fn exclusive_write(&self, addr: u32, size: u32, value: u64, expected: u64) -> Result<bool, MemoryFault> {
        let a = self.check(addr, size)?;
        let mut mem = self.bytes.lock().unwrap();
        let mut current = 0u64;
        for i in (0..size as usize).rev() {
            current = current << 8 | mem[a + i] as u64;
        }
        if current != expected {
            return Ok(false);
        }
        for i in 0..size as usize {
            mem[a + i] = (value >> (8 * i)) as u8;
        }
        Ok(true)
    }

    fn supervisor_call(&self, _cpu: &mut CpuState, imm: u32) -> TrapAction {
        self.svcs.lock().unwrap().push(imm);
        if imm == 0 {
            TrapAction::Halt
        } else {
            TrapAction::Continue
        }
    }

    fn exception(&self, cpu: &mut CpuState, info: ExceptionInfo) -> TrapAction {
        self.exceptions.lock().unwrap().push(info);
        if self.resume_exceptions.load(Ordering::SeqCst) {
            let len = if cpu.thumb != 0 { 2 } else { 4 };
            TrapAction::Resume(info.pc.wrapping_add(len))
        } else {
            TrapAction::Halt
        }
    }
}

pub fn config(mode: ExecMode) -> JitConfig {
    JitConfig {
        exec_mode: mode,
        // Small region keeps the tests' mappings cheap.
        code_region_size: 4 << 20,
        ..JitConfig::default()
    }
}

pub fn engine(config: JitConfig) -> (Engine, Arc<TestMemory>) {
    let mem = Arc::new(TestMemory::new());
    let engine = Engine::new(config, mem.clone()).unwrap();
    (engine, mem)
}

pub fn arm_cpu(pc: u32) -> CpuState {
    let mut cpu = CpuState::new();
    cpu.set_pc(pc);
    cpu.regs[13] = 0x8_0000;
    cpu
}

pub fn thumb_cpu(pc: u32) -> CpuState {
    let mut cpu = arm_cpu(pc);
    cpu.thumb = 1;
    cpu
}
