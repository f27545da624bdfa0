//! Structural IR checks run between translation stages in debug builds
//! and by the test suite.

use std::collections::HashSet;

use crate::context::Context;
use crate::error::IrError;
use crate::op::Op;
use crate::opcode::Opcode;
use crate::temp::{TempIdx, TempKind};
use crate::types::Type;

/// Check the block's IR for well-formedness.
///
/// - every label is placed exactly once and every branch names a
///   known label;
/// - each Ebb temp is defined once, defined before it is used, and not
///   used after a label that follows its definition;
/// - operand types match the op's type.
pub fn verify(ctx: &Context) -> Result<(), IrError> {
    let nlabels = ctx.labels().len() as u32;
    let mut placements = vec![0u32; nlabels as usize];
    let mut defined: HashSet<TempIdx> = HashSet::new();
    let mut ebb_live: HashSet<TempIdx> = HashSet::new();
    let mut last_label = None;

    for op in ctx.ops() {
        let opi = op.idx.0;
        check_labels(op, nlabels, &mut placements)?;
        if op.opc == Opcode::SetLabel {
            ebb_live.clear();
            last_label = Some(op.carg(0));
            continue;
        }

        for &t in op.iargs() {
            check_range(ctx, opi, t)?;
            if ctx.temp(t).kind != TempKind::Ebb {
                continue;
            }
            if !ebb_live.contains(&t) {
                return Err(if defined.contains(&t) {
                    IrError::LiveAcrossLabel {
                        op: opi,
                        temp: t.0,
                        label: last_label.unwrap_or(0),
                    }
                } else {
                    IrError::UseBeforeDef { op: opi, temp: t.0 }
                });
            }
        }
        for &t in op.oargs() {
            check_range(ctx, opi, t)?;
            match ctx.temp(t).kind {
                TempKind::Const => return Err(IrError::ConstOutput { op: opi }),
                TempKind::Ebb => {
                    if !defined.insert(t) {
                        return Err(IrError::MultipleDefinition { op: opi, temp: t.0 });
                    }
                    ebb_live.insert(t);
                }
                TempKind::Global | TempKind::Fixed => {}
            }
        }
        check_types(ctx, op)?;
    }

    for (label, &count) in placements.iter().enumerate() {
        if count != 1 {
            return Err(IrError::LabelPlacement {
                label: label as u32,
                count,
            });
        }
    }
    Ok(())
}

fn check_range(ctx: &Context, op: u32, t: TempIdx) -> Result<(), IrError> {
    if t.0 >= ctx.nb_temps() {
        return Err(IrError::BadTemp { op, temp: t.0 });
    }
    Ok(())
}

fn check_labels(op: &Op, nlabels: u32, placements: &mut [u32]) -> Result<(), IrError> {
    let label = match op.opc {
        Opcode::SetLabel | Opcode::Br => op.carg(0),
        Opcode::BrCond => op.carg(1),
        _ => return Ok(()),
    };
    if label >= nlabels {
        return Err(IrError::UnknownLabel { op: op.idx.0, label });
    }
    if op.opc == Opcode::SetLabel {
        placements[label as usize] += 1;
    }
    Ok(())
}

/// Expected type of each non-constant argument, outputs then inputs.
fn expected_types(op: &Op) -> Vec<Type> {
    let ty = op.op_type;
    let def = op.opc.def();
    let n = (def.nb_oargs + def.nb_iargs) as usize;
    match op.opc {
        Opcode::Ld8U | Opcode::Ld16U | Opcode::Ld32U | Opcode::Ld => vec![ty, Type::I64],
        Opcode::St8 | Opcode::St16 | Opcode::St32 | Opcode::St => vec![ty, Type::I64],
        Opcode::ExtI32I64 | Opcode::ExtUI32I64 => vec![Type::I64, Type::I32],
        Opcode::ExtrlI64I32 | Opcode::ExtrhI64I32 => vec![Type::I32, Type::I64],
        Opcode::Call => vec![Type::I64; n],
        _ => vec![ty; n],
    }
}

fn check_types(ctx: &Context, op: &Op) -> Result<(), IrError> {
    let expected = expected_types(op);
    let args = op.oargs().iter().chain(op.iargs());
    for (&t, &want) in args.zip(expected.iter()) {
        let found = ctx.temp(t).ty;
        if found != want {
            return Err(IrError::TypeMismatch {
                op: op.idx.0,
                temp: t.0,
                expected: want,
                found,
            });
        }
    }
    Ok(())
}
