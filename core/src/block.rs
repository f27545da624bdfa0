/// Identity of a translation: guest start address plus the context
/// discriminator bits that change how the bytes there are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub pc: u32,
    pub mode: u32,
}

impl BlockKey {
    pub const fn new(pc: u32, mode: u32) -> Self {
        Self { pc, mode }
    }

    /// Mixed hash of the key, used by the direct-mapped jump cache.
    pub fn hash(self) -> u64 {
        (self.pc as u64).wrapping_mul(0x9e3779b97f4a7c15) ^ (self.mode as u64)
    }
}

/// Reason a block returned to the dispatcher.
///
/// Encoded into the low three bits of the value returned by generated
/// code; the remaining bits carry the id of the exiting block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ExitKind {
    /// Chain slot 0 reached while unlinked.
    Chain0 = 0,
    /// Chain slot 1 reached while unlinked.
    Chain1 = 1,
    /// Indirect branch or context change; resolve from guest state.
    NoChain = 2,
    /// Remaining budget was smaller than the block's instruction count.
    Budget = 3,
    /// The halt flag was set at block entry.
    Halt = 4,
    /// An exception kind and info were stored in the env.
    Exception = 5,
}

pub const EXIT_KIND_BITS: u32 = 3;
const EXIT_KIND_MASK: u64 = (1 << EXIT_KIND_BITS) - 1;

impl ExitKind {
    pub const fn from_raw(v: u32) -> Option<ExitKind> {
        Some(match v {
            0 => ExitKind::Chain0,
            1 => ExitKind::Chain1,
            2 => ExitKind::NoChain,
            3 => ExitKind::Budget,
            4 => ExitKind::Halt,
            5 => ExitKind::Exception,
            _ => return None,
        })
    }

    /// Chain slot number for `Chain0`/`Chain1`.
    pub const fn chain_slot(self) -> Option<usize> {
        match self {
            ExitKind::Chain0 => Some(0),
            ExitKind::Chain1 => Some(1),
            _ => None,
        }
    }
}

/// Build the value an `exit_tb` returns.
pub const fn encode_exit(block_id: u64, kind: ExitKind) -> u64 {
    (block_id << EXIT_KIND_BITS) | kind as u64
}

/// Split an exit value into block id and kind.
pub fn decode_exit(val: u64) -> Option<(u64, ExitKind)> {
    let kind = ExitKind::from_raw((val & EXIT_KIND_MASK) as u32)?;
    Some((val >> EXIT_KIND_BITS, kind))
}

/// Number of entries in the per-dispatcher jump cache.
pub const JUMP_CACHE_SIZE: usize = 1 << 12;

/// Direct-mapped cache from block key to a recently executed block.
///
/// Entries are hints: a hit must still be checked for validity by the
/// owner of `T`.
pub struct JumpCache<T> {
    entries: Vec<Option<(BlockKey, T)>>,
}

impl<T: Clone> JumpCache<T> {
    pub fn new() -> Self {
        Self {
            entries: vec![None; JUMP_CACHE_SIZE],
        }
    }

    fn index(key: BlockKey) -> usize {
        (key.hash() >> 20) as usize & (JUMP_CACHE_SIZE - 1)
    }

    pub fn lookup(&self, key: BlockKey) -> Option<&T> {
        match &self.entries[Self::index(key)] {
            Some((k, v)) if *k == key => Some(v),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: BlockKey, val: T) {
        self.entries[Self::index(key)] = Some((key, val));
    }

    pub fn remove(&mut self, key: BlockKey) {
        let slot = &mut self.entries[Self::index(key)];
        if matches!(slot, Some((k, _)) if *k == key) {
            *slot = None;
        }
    }

    pub fn invalidate(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
    }
}

impl<T: Clone> Default for JumpCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
