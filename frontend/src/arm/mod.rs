//! ARMv7 frontend: A32 and Thumb decoding and translation to IR.

pub mod decode;
pub mod insn;
pub mod state;
pub mod thumb;
pub mod translate;

pub use decode::{decode_arm, DecodeError};
pub use insn::{Condition, Instruction, Operation};
pub use state::{CpuState, ExceptionKind, JitState, ModeFlags};
pub use thumb::decode_thumb;
pub use translate::{translate_block, ArmDisasContext, ArmTranslator, BlockInfo, HelperTable, TranslateConfig};

/// Source of instruction bytes. Returns `None` when the address
/// cannot be fetched (prefetch abort).
pub trait CodeFetch {
    fn fetch16(&self, addr: u32) -> Option<u16>;
    fn fetch32(&self, addr: u32) -> Option<u32>;
}

/// Outcome of fetching and decoding one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    Insn(Instruction),
    Undefined(DecodeError),
    /// Instruction bytes at `addr` could not be read.
    Abort { addr: u32 },
}

impl Fetched {
    /// Bytes the instruction occupies.
    pub fn len(&self, thumb: bool) -> u32 {
        match self {
            Fetched::Insn(insn) => insn.len,
            Fetched::Undefined(DecodeError::Undefined { len, .. }) => *len,
            Fetched::Abort { .. } => {
                if thumb {
                    2
                } else {
                    4
                }
            }
        }
    }
}

/// Fetch and decode the instruction at `addr` in A32 or Thumb state.
pub fn fetch_decode(fetch: &dyn CodeFetch, addr: u32, thumb: bool) -> Fetched {
    if !thumb {
        return match fetch.fetch32(addr) {
            Some(raw) => decode_arm(raw, addr).map_or_else(Fetched::Undefined, Fetched::Insn),
            None => Fetched::Abort { addr },
        };
    }
    let Some(hw1) = fetch.fetch16(addr) else {
        return Fetched::Abort { addr };
    };
    let raw = if thumb::is_thumb32(hw1) {
        let next = addr.wrapping_add(2);
        let Some(hw2) = fetch.fetch16(next) else {
            return Fetched::Abort { addr: next };
        };
        (hw1 as u32) << 16 | hw2 as u32
    } else {
        hw1 as u32
    };
    decode_thumb(raw, addr).map_or_else(Fetched::Undefined, Fetched::Insn)
}
