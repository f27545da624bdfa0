use dbt_backend::{BackendError, TranslateOptions, X86_64CodeGen};
use dbt_core::temp::TempIdx;
use dbt_core::{encode_exit, Cond, Context, ExitKind, Type};
use proptest::prelude::*;

use super::{context, interp, run_both, Env, Globals, Jit, NREGS};

fn init(regs: [u32; NREGS]) -> Env {
    Env {
        regs,
        ..Env::default()
    }
}

#[test]
fn exit_value_encodes_block_id() {
    let (mut ctx, _) = context(&X86_64CodeGen::new());
    ctx.block_id = 42;
    ctx.gen_insn_start(0x1000, 0);
    ctx.gen_exit_tb(ExitKind::Budget as u32);
    let (exit, _) = run_both(&mut ctx, Env::default());
    assert_eq!(exit, encode_exit(42, ExitKind::Budget));
}

#[test]
fn arithmetic_matches_interpreter() {
    let (mut ctx, g) = context(&X86_64CodeGen::new());
    let r = g.regs;
    let t = ctx.new_temp(Type::I32);
    let c = ctx.new_temp(Type::I32);
    let s = ctx.new_temp(Type::I32);
    ctx.gen_add(Type::I32, t, r[0], r[1]);
    ctx.gen_mov(Type::I32, r[2], t);
    ctx.gen_setcond(Type::I32, c, t, r[0], Cond::Ltu);
    ctx.gen_mov(Type::I32, r[3], c);
    ctx.gen_sar(Type::I32, s, r[1], r[4]);
    ctx.gen_mov(Type::I32, r[5], s);
    ctx.gen_exit_tb(ExitKind::NoChain as u32);

    let (_, env) = run_both(&mut ctx, init([0xffff_fff0, 0x8000_0020, 0, 0, 4, 0, 0, 0]));
    assert_eq!(env.regs[2], 0x8000_0010);
    assert_eq!(env.regs[3], 1, "carry out of the add");
    assert_eq!(env.regs[5], 0xf800_0002);
}

#[test]
fn wide_multiply_and_division() {
    let (mut ctx, g) = context(&X86_64CodeGen::new());
    let r = g.regs;
    let (a, b, p, lo, hi, q) = (
        ctx.new_temp(Type::I64),
        ctx.new_temp(Type::I64),
        ctx.new_temp(Type::I64),
        ctx.new_temp(Type::I32),
        ctx.new_temp(Type::I32),
        ctx.new_temp(Type::I32),
    );
    ctx.gen_ext_i32_i64(a, r[0]);
    ctx.gen_ext_i32_i64(b, r[1]);
    ctx.gen_mul(Type::I64, p, a, b);
    ctx.gen_mov(Type::I64, g.wide[0], p);
    ctx.gen_extrl_i64_i32(lo, p);
    ctx.gen_extrh_i64_i32(hi, p);
    ctx.gen_mov(Type::I32, r[2], lo);
    ctx.gen_mov(Type::I32, r[3], hi);
    ctx.gen_divs(Type::I32, q, r[0], r[4]);
    ctx.gen_mov(Type::I32, r[5], q);
    ctx.gen_exit_tb(ExitKind::NoChain as u32);

    let (_, env) = run_both(&mut ctx, init([(-7i32) as u32, 3, 0, 0, 2, 0, 0, 0]));
    assert_eq!(env.wide[0], (-21i64) as u64);
    assert_eq!(env.regs[2], (-21i32) as u32);
    assert_eq!(env.regs[3], 0xffff_ffff);
    assert_eq!(env.regs[5], (-3i32) as u32, "division truncates toward zero");
}

#[test]
fn loop_with_backward_branch() {
    let (mut ctx, g) = context(&X86_64CodeGen::new());
    let r = g.regs;
    let one = ctx.new_const(Type::I32, 1);
    let zero = ctx.new_const(Type::I32, 0);
    let top = ctx.new_label();
    let done = ctx.new_label();
    ctx.gen_set_label(top);
    ctx.gen_brcond(Type::I32, r[0], zero, Cond::Eq, done);
    ctx.gen_add(Type::I32, r[1], r[1], r[0]);
    ctx.gen_sub(Type::I32, r[0], r[0], one);
    ctx.gen_br(top);
    ctx.gen_set_label(done);
    ctx.gen_exit_tb(ExitKind::NoChain as u32);

    let (_, env) = run_both(&mut ctx, init([100, 0, 0, 0, 0, 0, 0, 0]));
    assert_eq!(env.regs[1], 5050);
}

#[test]
fn unlinked_goto_tb_falls_through_to_exit() {
    let (mut ctx, g) = context(&X86_64CodeGen::new());
    let c = ctx.new_const(Type::I32, 0x2000);
    ctx.block_id = 5;
    ctx.gen_mov(Type::I32, g.regs[7], c);
    ctx.gen_goto_tb(1);
    ctx.gen_exit_tb(ExitKind::Chain1 as u32);

    let mut jit = Jit::new();
    let code = jit.compile(&mut ctx, TranslateOptions::default()).unwrap();
    assert!(code.goto_tb[0].is_none());
    let site = code.goto_tb[1].expect("chain site for slot 1");
    assert!(site.jump >= code.start && site.jump < code.start + code.size);
    assert_eq!((site.jump + 1) % 4, 0, "jump displacement is 4-aligned");

    let mut env = Env::default();
    assert_eq!(jit.execute(&code, &mut env), encode_exit(5, ExitKind::Chain1));
    assert_eq!(env.regs[7], 0x2000);
}

unsafe extern "C" fn helper_mix(env: *mut u8, a: u64, b: u64, _c: u64) -> u64 {
    let env = &mut *(env as *mut Env);
    env.regs[6] = env.regs[6].wrapping_add(1);
    a.wrapping_mul(31) ^ b
}

#[test]
fn helper_calls_preserve_live_values() {
    let (mut ctx, g) = context(&X86_64CodeGen::new());
    let r = g.regs;
    let keep: Vec<TempIdx> = (0..6).map(|_| ctx.new_temp(Type::I32)).collect();
    let one = ctx.new_const(Type::I32, 1);
    for (i, &t) in keep.iter().enumerate() {
        ctx.gen_add(Type::I32, t, r[i], one);
    }
    let (a, b, out, low) = (
        ctx.new_temp(Type::I64),
        ctx.new_temp(Type::I64),
        ctx.new_temp(Type::I64),
        ctx.new_temp(Type::I32),
    );
    ctx.gen_ext_u32_i64(a, r[0]);
    ctx.gen_ext_u32_i64(b, r[1]);
    ctx.gen_call(out, helper_mix, g.env, &[a, b]);
    ctx.gen_mov(Type::I64, g.wide[1], out);
    ctx.gen_extrl_i64_i32(low, out);
    ctx.gen_mov(Type::I32, r[7], low);
    for (i, &t) in keep.iter().enumerate() {
        ctx.gen_mov(Type::I32, r[i], t);
    }
    ctx.gen_exit_tb(ExitKind::NoChain as u32);

    let (_, env) = run_both(&mut ctx, init([10, 20, 30, 40, 50, 60, 0, 0]));
    assert_eq!(env.regs[..6], [11, 21, 31, 41, 51, 61]);
    assert_eq!(env.regs[6], 1);
    assert_eq!(env.wide[1], 10 * 31 ^ 20);
}

/// Block keeping `n` values live at once.
fn pressure_block(ctx: &mut Context, g: &Globals, n: usize) {
    let vals: Vec<TempIdx> = (0..n)
        .map(|i| {
            let t = ctx.new_temp(Type::I32);
            let c = ctx.new_const(Type::I32, i as u64 * 3 + 1);
            ctx.gen_mul(Type::I32, t, g.regs[i % NREGS], c);
            t
        })
        .collect();
    let mut acc = vals[0];
    for &v in &vals[1..] {
        let s = ctx.new_temp(Type::I32);
        ctx.gen_xor(Type::I32, s, acc, v);
        let s2 = ctx.new_temp(Type::I32);
        ctx.gen_add(Type::I32, s2, s, v);
        acc = s2;
    }
    ctx.gen_mov(Type::I32, g.regs[0], acc);
    ctx.gen_exit_tb(ExitKind::NoChain as u32);
}

#[test]
fn register_pressure_spills() {
    let (mut ctx, g) = context(&X86_64CodeGen::new());
    pressure_block(&mut ctx, &g, 24);
    let start = init([1, 2, 3, 4, 5, 6, 7, 8]);

    let mut ienv = start;
    let iexit = interp(&ctx, &mut ienv).unwrap();
    let mut jit = Jit::new();
    let opts = TranslateOptions {
        trace: true,
        ..TranslateOptions::default()
    };
    let code = jit.compile(&mut ctx, opts).unwrap();
    assert!(code.spill_bytes > 0);
    let trace = code.trace.as_ref().expect("trace requested");
    assert_eq!(trace.first_conflict(), None);

    let mut cenv = start;
    assert_eq!(jit.execute(&code, &mut cenv), iexit);
    assert_eq!(cenv, ienv);
}

#[test]
fn spill_limit_is_enforced() {
    let (mut ctx, g) = context(&X86_64CodeGen::new());
    pressure_block(&mut ctx, &g, 24);
    let mut jit = Jit::new();
    let opts = TranslateOptions {
        spill_limit: 8,
        trace: false,
    };
    match jit.compile(&mut ctx, opts) {
        Err(BackendError::SpillLimitExceeded { needed, limit }) => {
            assert_eq!(limit, 8);
            assert!(needed > 8);
        }
        other => panic!("expected a spill limit error, got {other:?}"),
    }
}

#[test]
fn small_window_overflows() {
    let (mut ctx, g) = context(&X86_64CodeGen::new());
    pressure_block(&mut ctx, &g, 16);
    let mut jit = Jit::new();
    let start = jit.buf.offset();
    jit.buf.set_window(start, start + 32);
    assert!(matches!(
        jit.compile(&mut ctx, TranslateOptions::default()),
        Err(BackendError::CodeWindowOverflow { .. })
    ));

    // The same IR lowers again once the window is large enough.
    ctx.reset_alloc_state();
    let cap = jit.buf.capacity();
    jit.buf.set_window(start, cap);
    let code = jit.compile(&mut ctx, TranslateOptions::default()).unwrap();
    assert_eq!(code.start, start);
}

// -- Random op sequences --

#[derive(Debug, Clone)]
struct RandOp {
    kind: u8,
    d: usize,
    a: usize,
    b: usize,
    imm: u32,
    use_imm: bool,
}

const RAND_CONDS: [Cond; 12] = [
    Cond::Eq,
    Cond::Ne,
    Cond::Lt,
    Cond::Ge,
    Cond::Le,
    Cond::Gt,
    Cond::Ltu,
    Cond::Geu,
    Cond::Leu,
    Cond::Gtu,
    Cond::TstEq,
    Cond::TstNe,
];

fn rand_op() -> impl Strategy<Value = RandOp> {
    (0u8..19, 0..NREGS, 0..NREGS, 0..NREGS, any::<u32>(), any::<bool>()).prop_map(
        |(kind, d, a, b, imm, use_imm)| RandOp {
            kind,
            d,
            a,
            b,
            imm,
            use_imm,
        },
    )
}

fn emit_rand(ctx: &mut Context, g: &Globals, op: &RandOp) {
    let ty = Type::I32;
    let a = g.regs[op.a];
    let b = if op.use_imm {
        ctx.new_const(ty, op.imm as u64)
    } else {
        g.regs[op.b]
    };
    let d = ctx.new_temp(ty);
    let cond = RAND_CONDS[op.imm as usize % RAND_CONDS.len()];
    match op.kind {
        0 => ctx.gen_add(ty, d, a, b),
        1 => ctx.gen_sub(ty, d, a, b),
        2 => ctx.gen_mul(ty, d, a, b),
        3 => ctx.gen_and(ty, d, a, b),
        4 => ctx.gen_or(ty, d, a, b),
        5 => ctx.gen_xor(ty, d, a, b),
        6 => ctx.gen_andc(ty, d, a, b),
        7 => ctx.gen_shl(ty, d, a, b),
        8 => ctx.gen_shr(ty, d, a, b),
        9 => ctx.gen_sar(ty, d, a, b),
        10 => ctx.gen_rotl(ty, d, a, b),
        11 => ctx.gen_rotr(ty, d, a, b),
        12 => ctx.gen_neg(ty, d, a),
        13 => ctx.gen_not(ty, d, a),
        14 => ctx.gen_clz(ty, d, a),
        15 => ctx.gen_bswap32(ty, d, a),
        16 => ctx.gen_setcond(ty, d, a, b, cond),
        17 => ctx.gen_movcond(ty, d, a, b, g.regs[op.d], a, cond),
        _ => {
            let ofs = op.imm % 32;
            let len = 1 + (op.imm >> 8) % (32 - ofs);
            if op.use_imm {
                ctx.gen_sextract(ty, d, a, ofs, len)
            } else {
                ctx.gen_extract(ty, d, a, ofs, len)
            }
        }
    };
    ctx.gen_mov(ty, g.regs[op.d], d);
}

fn build_rand(ops: &[RandOp]) -> Context {
    let (mut ctx, g) = context(&X86_64CodeGen::new());
    for (i, op) in ops.iter().enumerate() {
        ctx.gen_insn_start(0x1000 + 4 * i as u32, i as u32);
        emit_rand(&mut ctx, &g, op);
    }
    ctx.gen_exit_tb(ExitKind::NoChain as u32);
    ctx
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn compiled_matches_interpreted(
        ops in prop::collection::vec(rand_op(), 1..40),
        regs in any::<[u32; NREGS]>(),
    ) {
        let mut ctx = build_rand(&ops);
        let mut ienv = init(regs);
        let iexit = interp(&ctx, &mut ienv).unwrap();
        let mut jit = Jit::new();
        let mut cenv = init(regs);
        let cexit = jit.run(&mut ctx, &mut cenv);
        prop_assert_eq!(iexit, cexit);
        prop_assert_eq!(ienv, cenv);
    }

    #[test]
    fn optimized_matches_unoptimized(
        ops in prop::collection::vec(rand_op(), 1..40),
        regs in any::<[u32; NREGS]>(),
    ) {
        let plain = build_rand(&ops);
        let mut ienv = init(regs);
        let iexit = interp(&plain, &mut ienv).unwrap();

        let mut opt = build_rand(&ops);
        dbt_backend::optimize::optimize(&mut opt);
        let mut jit = Jit::new();
        let mut cenv = init(regs);
        let cexit = jit.run(&mut opt, &mut cenv);
        prop_assert_eq!(iexit, cexit);
        prop_assert_eq!(ienv, cenv);
    }
}
