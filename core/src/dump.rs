//! IR dump: human-readable text for a block's ops.
//!
//! The output is stable for identical IR, so tests compare dumps to
//! check optimizer determinism and idempotence.

use std::fmt::{self, Write};

use crate::context::Context;
use crate::op::Op;
use crate::opcode::Opcode;
use crate::temp::{TempIdx, TempKind};
use crate::types::{Cond, Type};

/// Format a condition code as a short name.
fn cond_name(c: u32) -> &'static str {
    match Cond::from_raw(c) {
        Some(Cond::Never) => "never",
        Some(Cond::Always) => "always",
        Some(Cond::Eq) => "eq",
        Some(Cond::Ne) => "ne",
        Some(Cond::Lt) => "lt",
        Some(Cond::Ge) => "ge",
        Some(Cond::Le) => "le",
        Some(Cond::Gt) => "gt",
        Some(Cond::Ltu) => "ltu",
        Some(Cond::Geu) => "geu",
        Some(Cond::Leu) => "leu",
        Some(Cond::Gtu) => "gtu",
        Some(Cond::TstEq) => "tsteq",
        Some(Cond::TstNe) => "tstne",
        None => "???",
    }
}

fn fmt_temp(ctx: &Context, idx: TempIdx, w: &mut impl Write) -> fmt::Result {
    let i = idx.0 as usize;
    if i >= ctx.nb_temps() as usize {
        return write!(w, "<bad {i}>");
    }
    let t = ctx.temp(idx);
    match t.kind {
        TempKind::Const => write!(w, "$0x{:x}", t.val),
        TempKind::Global | TempKind::Fixed => match t.name {
            Some(name) => w.write_str(name),
            None => write!(w, "g{i}"),
        },
        TempKind::Ebb => write!(w, "tmp{}", i as u32 - ctx.nb_globals()),
    }
}

/// Opcode name with type suffix for polymorphic ops.
fn op_name(op: &Op) -> String {
    let base = op.opc.def().name;
    if op.opc.is_int_polymorphic() {
        let suffix = match op.op_type {
            Type::I32 => "_i32",
            Type::I64 => "_i64",
        };
        format!("{base}{suffix}")
    } else {
        base.to_string()
    }
}

/// Dump all IR ops in `ctx`.
pub fn dump_ops(ctx: &Context, w: &mut impl Write) -> fmt::Result {
    dump_ops_with(ctx, w, |_, _| Ok(()))
}

/// Dump IR ops with an annotation callback for `insn_start`.
///
/// `insn_anno` is called at each guest instruction boundary with the
/// guest pc; use it to append disassembly to the `----` header line.
pub fn dump_ops_with<W: Write>(
    ctx: &Context,
    w: &mut W,
    insn_anno: impl Fn(u32, &mut W) -> fmt::Result,
) -> fmt::Result {
    for op in ctx.ops() {
        match op.opc {
            Opcode::InsnStart => {
                let pc = op.carg(0);
                write!(w, " ---- 0x{pc:08x}")?;
                insn_anno(pc, w)?;
                writeln!(w)?;
                continue;
            }
            Opcode::SetLabel => {
                writeln!(w, " L{}:", op.carg(0))?;
                continue;
            }
            _ => {}
        }

        write!(w, " {}", op_name(op))?;

        let mut first = true;
        for &a in op.oargs().iter().chain(op.iargs()) {
            w.write_str(if first { " " } else { ", " })?;
            first = false;
            fmt_temp(ctx, a, w)?;
        }

        let cargs = op.cargs();
        match op.opc {
            Opcode::BrCond => {
                write!(w, ", {}, L{}", cond_name(cargs[0].0), cargs[1].0)?;
            }
            Opcode::SetCond | Opcode::MovCond => {
                write!(w, ", {}", cond_name(cargs[0].0))?;
            }
            Opcode::Br => write!(w, " L{}", cargs[0].0)?,
            Opcode::Call => {
                let addr = ((cargs[1].0 as u64) << 32) | cargs[0].0 as u64;
                write!(w, ", $0x{addr:x}")?;
            }
            _ => {
                for &c in cargs {
                    w.write_str(if first { " " } else { ", " })?;
                    first = false;
                    write!(w, "$0x{:x}", c.0)?;
                }
            }
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Convenience wrapper returning the dump as a `String`.
pub fn dump_to_string(ctx: &Context) -> String {
    let mut s = String::new();
    // Writing into a String cannot fail.
    let _ = dump_ops(ctx, &mut s);
    s
}
