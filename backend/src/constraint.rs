use dbt_core::op::MAX_OP_ARGS;
use dbt_core::RegSet;

/// Constraint for a single argument of an IR op.
///
/// Each arg has a set of allowed registers and optional alias/newreg
/// flags.
#[derive(Debug, Clone, Copy)]
pub struct ArgConstraint {
    /// Allowed host registers for this argument.
    pub regs: RegSet,
    /// Output aliases an input (output takes input's register).
    pub oalias: bool,
    /// Input is aliased to an output (input may be reused).
    pub ialias: bool,
    /// Index of the aliased arg (input idx for oalias,
    /// output idx for ialias).
    pub alias_index: u8,
    /// Output must not overlap any input register.
    pub newreg: bool,
}

impl ArgConstraint {
    pub const UNUSED: Self = Self {
        regs: RegSet::EMPTY,
        oalias: false,
        ialias: false,
        alias_index: 0,
        newreg: false,
    };

    /// Whether exactly one register satisfies this constraint.
    pub fn is_pinned(&self) -> bool {
        self.regs.count() == 1
    }
}

/// Per-opcode constraint descriptor.
#[derive(Debug, Clone, Copy)]
pub struct OpConstraint {
    pub args: [ArgConstraint; MAX_OP_ARGS],
    /// Registers the host sequence overwrites beyond its outputs.
    pub clobbers: RegSet,
}

impl OpConstraint {
    pub const EMPTY: Self = Self {
        args: [ArgConstraint::UNUSED; MAX_OP_ARGS],
        clobbers: RegSet::EMPTY,
    };
}

// -- Argument builders --

/// Regular register constraint (any reg in `regs`).
pub const fn r(regs: RegSet) -> ArgConstraint {
    ArgConstraint {
        regs,
        oalias: false,
        ialias: false,
        alias_index: 0,
        newreg: false,
    }
}

/// Fixed single-register constraint (e.g. RCX for shifts).
pub const fn fixed(reg: u8) -> ArgConstraint {
    r(RegSet::from_raw(1u64 << reg))
}

/// Newreg output constraint: must not overlap any input.
pub const fn newreg(regs: RegSet) -> ArgConstraint {
    ArgConstraint {
        regs,
        oalias: false,
        ialias: false,
        alias_index: 0,
        newreg: true,
    }
}

const fn out_alias(regs: RegSet, input: u8) -> ArgConstraint {
    ArgConstraint {
        regs,
        oalias: true,
        ialias: false,
        alias_index: input,
        newreg: false,
    }
}

const fn in_alias(regs: RegSet, output: u8) -> ArgConstraint {
    ArgConstraint {
        regs,
        oalias: false,
        ialias: true,
        alias_index: output,
        newreg: false,
    }
}

const fn build(args: [ArgConstraint; MAX_OP_ARGS]) -> OpConstraint {
    OpConstraint {
        args,
        clobbers: RegSet::EMPTY,
    }
}

// -- OpConstraint builders --

/// 1 output, 1 input, output aliases input 0.
pub const fn o1_i1_alias(o0: RegSet) -> OpConstraint {
    let mut args = [ArgConstraint::UNUSED; MAX_OP_ARGS];
    args[0] = out_alias(o0, 0);
    args[1] = in_alias(o0, 0);
    build(args)
}

/// 1 output, 1 input, no alias.
pub const fn o1_i1(o0: RegSet, i0: RegSet) -> OpConstraint {
    let mut args = [ArgConstraint::UNUSED; MAX_OP_ARGS];
    args[0] = r(o0);
    args[1] = r(i0);
    build(args)
}

/// 1 output, 2 inputs, no alias.
pub const fn o1_i2(o0: RegSet, i0: RegSet, i1: RegSet) -> OpConstraint {
    let mut args = [ArgConstraint::UNUSED; MAX_OP_ARGS];
    args[0] = r(o0);
    args[1] = r(i0);
    args[2] = r(i1);
    build(args)
}

/// 1 output, 2 inputs, output aliases input 0.
pub const fn o1_i2_alias(o0: RegSet, i1: RegSet) -> OpConstraint {
    let mut args = [ArgConstraint::UNUSED; MAX_OP_ARGS];
    args[0] = out_alias(o0, 0);
    args[1] = in_alias(o0, 0);
    args[2] = r(i1);
    build(args)
}

/// 1 output, 2 inputs, output aliases input 0,
/// input 1 is a fixed register.
pub const fn o1_i2_alias_fixed(o0: RegSet, i1_reg: u8) -> OpConstraint {
    let mut args = [ArgConstraint::UNUSED; MAX_OP_ARGS];
    args[0] = out_alias(o0, 0);
    args[1] = in_alias(o0, 0);
    args[2] = fixed(i1_reg);
    build(args)
}

/// 0 outputs, 2 inputs.
pub const fn o0_i2(i0: RegSet, i1: RegSet) -> OpConstraint {
    let mut args = [ArgConstraint::UNUSED; MAX_OP_ARGS];
    args[0] = r(i0);
    args[1] = r(i1);
    build(args)
}

/// 1 newreg output, 2 inputs.
pub const fn n1_i2(o0: RegSet, i0: RegSet, i1: RegSet) -> OpConstraint {
    let mut args = [ArgConstraint::UNUSED; MAX_OP_ARGS];
    args[0] = newreg(o0);
    args[1] = r(i0);
    args[2] = r(i1);
    build(args)
}

/// 0 outputs, 1 input.
pub const fn o0_i1(i0: RegSet) -> OpConstraint {
    let mut args = [ArgConstraint::UNUSED; MAX_OP_ARGS];
    args[0] = r(i0);
    build(args)
}

/// 1 output, 4 inputs, output aliases input 2.
/// For MovCond: CMP i0,i1 -> CMOV d=i2,i3.
pub const fn o1_i4_alias2(o0: RegSet, i0: RegSet, i1: RegSet, i3: RegSet) -> OpConstraint {
    let mut args = [ArgConstraint::UNUSED; MAX_OP_ARGS];
    args[0] = out_alias(o0, 2);
    args[1] = r(i0);
    args[2] = r(i1);
    args[3] = in_alias(o0, 0);
    args[4] = r(i3);
    build(args)
}

/// 1 fixed output aliasing fixed input 0, free input 1 and one
/// clobbered register. For DivS/DivU: o0=i0=RAX, RDX clobbered.
pub const fn o1_i2_fixed_clobber(o0_reg: u8, i1: RegSet, clobber: u8) -> OpConstraint {
    let pinned = RegSet::from_raw(1u64 << o0_reg);
    let mut args = [ArgConstraint::UNUSED; MAX_OP_ARGS];
    args[0] = out_alias(pinned, 0);
    args[1] = in_alias(pinned, 0);
    args[2] = r(i1);
    OpConstraint {
        args,
        clobbers: RegSet::from_raw(1u64 << clobber),
    }
}
