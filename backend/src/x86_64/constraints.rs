use crate::constraint::*;
use crate::x86_64::regs::{Reg, ALLOCATABLE_REGS};
use dbt_core::{Opcode, RegSet};

const R: RegSet = ALLOCATABLE_REGS;
const R_NO_RCX: RegSet = ALLOCATABLE_REGS.clear(Reg::Rcx as u8);
const R_NO_RAX_RDX: RegSet = ALLOCATABLE_REGS.clear(Reg::Rax as u8).clear(Reg::Rdx as u8);

/// Return the static register constraint for an opcode on x86-64.
///
/// Ops the allocator lowers itself (mov, control flow, calls) have no
/// operand constraints here.
pub fn op_constraint(opc: Opcode) -> &'static OpConstraint {
    match opc {
        // -- Three-address via LEA --
        Opcode::Add => {
            static C: OpConstraint = o1_i2(R, R, R);
            &C
        }
        // -- Destructive binary (output aliases input 0) --
        Opcode::Sub | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor => {
            static C: OpConstraint = o1_i2_alias(R, R);
            &C
        }
        // -- AndC: both inputs are read before the output is written --
        Opcode::AndC => {
            static C: OpConstraint = o1_i2(R, R, R);
            &C
        }
        // -- Destructive unary (output aliases input 0) --
        Opcode::Neg | Opcode::Not | Opcode::Bswap16 | Opcode::Bswap32 => {
            static C: OpConstraint = o1_i1_alias(R);
            &C
        }
        // -- Shifts/rotates: output aliases input 0, count in RCX --
        Opcode::Shl | Opcode::Shr | Opcode::Sar | Opcode::RotL | Opcode::RotR => {
            static C: OpConstraint = o1_i2_alias_fixed(R_NO_RCX, Reg::Rcx as u8);
            &C
        }
        // -- Division: dividend and quotient in RAX, RDX clobbered --
        Opcode::DivS | Opcode::DivU => {
            static C: OpConstraint =
                o1_i2_fixed_clobber(Reg::Rax as u8, R_NO_RAX_RDX, Reg::Rdx as u8);
            &C
        }
        // -- SetCond: newreg output (setcc writes low byte) --
        Opcode::SetCond => {
            static C: OpConstraint = n1_i2(R, R, R);
            &C
        }
        // -- MovCond: output aliases input 2 (v1) --
        Opcode::MovCond => {
            static C: OpConstraint = o1_i4_alias2(R, R, R, R);
            &C
        }
        // -- BrCond: no outputs --
        Opcode::BrCond => {
            static C: OpConstraint = o0_i2(R, R);
            &C
        }
        // -- Unary with a separate output --
        Opcode::Extract
        | Opcode::SExtract
        | Opcode::Clz
        | Opcode::ExtI32I64
        | Opcode::ExtUI32I64
        | Opcode::ExtrlI64I32
        | Opcode::ExtrhI64I32 => {
            static C: OpConstraint = o1_i1(R, R);
            &C
        }
        // -- Load: output, base input --
        Opcode::Ld | Opcode::Ld8U | Opcode::Ld16U | Opcode::Ld32U => {
            static C: OpConstraint = o1_i1(R, R);
            &C
        }
        // -- Store: value input, base input --
        Opcode::St | Opcode::St8 | Opcode::St16 | Opcode::St32 => {
            static C: OpConstraint = o0_i2(R, R);
            &C
        }
        Opcode::Mov
        | Opcode::Br
        | Opcode::SetLabel
        | Opcode::GotoTb
        | Opcode::ExitTb
        | Opcode::Mb
        | Opcode::Call
        | Opcode::Nop
        | Opcode::InsnStart
        | Opcode::Count => &OpConstraint::EMPTY,
    }
}
