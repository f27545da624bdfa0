use thiserror::Error;

use crate::types::Type;

/// Structural errors in a block's IR, reported by the verifier and the
/// interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("op {op}: temp {temp} used before its definition")]
    UseBeforeDef { op: u32, temp: u32 },
    #[error("op {op}: temp {temp} defined more than once")]
    MultipleDefinition { op: u32, temp: u32 },
    #[error("op {op}: temp {temp} is live across label L{label}")]
    LiveAcrossLabel { op: u32, temp: u32, label: u32 },
    #[error("label L{label} placed {count} times")]
    LabelPlacement { label: u32, count: u32 },
    #[error("op {op}: reference to unknown label L{label}")]
    UnknownLabel { op: u32, label: u32 },
    #[error("op {op}: temp {temp} has type {found:?}, expected {expected:?}")]
    TypeMismatch {
        op: u32,
        temp: u32,
        expected: Type,
        found: Type,
    },
    #[error("op {op}: operand {temp} out of range")]
    BadTemp { op: u32, temp: u32 },
    #[error("op {op}: constant operand is an output")]
    ConstOutput { op: u32 },
    #[error("op {op}: division by zero")]
    DivideByZero { op: u32 },
    #[error("op {op}: bad constant argument {value}")]
    BadConstArg { op: u32, value: u32 },
    #[error("block fell off its last op without exiting")]
    MissingExit,
}
