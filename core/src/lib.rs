pub mod block;
pub mod context;
pub mod dump;
pub mod error;
pub mod interp;
pub mod ir_builder;
pub mod label;
pub mod op;
pub mod opcode;
pub mod temp;
pub mod types;
pub mod verify;

pub use block::{decode_exit, encode_exit, BlockKey, ExitKind, JumpCache, JUMP_CACHE_SIZE};
pub use context::Context;
pub use error::IrError;
pub use ir_builder::HelperFn;
pub use label::{Label, LabelUse, RelocKind};
pub use op::{LifeData, Op, OpIdx, MAX_OP_ARGS};
pub use opcode::{OpDef, OpFlags, Opcode, ALL_OPCODES, OPCODE_DEFS};
pub use temp::{Temp, TempIdx, TempKind};
pub use types::{Cond, RegSet, TempVal, Type};
