use dbt_core::interp::{eval_pure, interpret};
use dbt_core::temp::TempIdx;
use dbt_core::{encode_exit, Cond, Context, ExitKind, IrError, Opcode, Type};

#[repr(C)]
#[derive(Default)]
struct Env {
    regs: [u32; 4],
    wide: u64,
}

fn setup() -> (Context, TempIdx, [TempIdx; 4], TempIdx) {
    let mut ctx = Context::new();
    let env = ctx.new_fixed(Type::I64, 5, "env");
    let names = ["r0", "r1", "r2", "r3"];
    let regs = std::array::from_fn(|i| ctx.new_global(Type::I32, env, 4 * i as i64, names[i]));
    let wide = ctx.new_global(Type::I64, env, 16, "wide");
    (ctx, env, regs, wide)
}

fn run(ctx: &Context, env: &mut Env) -> Result<u64, IrError> {
    unsafe { interpret(ctx, env as *mut Env as *mut u8) }
}

#[test]
fn eval_pure_arith() {
    assert_eq!(eval_pure(Opcode::Add, Type::I32, &[0xffff_ffff, 2], &[]), Some(1));
    assert_eq!(eval_pure(Opcode::Sub, Type::I64, &[0, 1], &[]), Some(u64::MAX));
    assert_eq!(eval_pure(Opcode::Sar, Type::I32, &[0x8000_0000, 4], &[]), Some(0xf800_0000));
    assert_eq!(eval_pure(Opcode::RotR, Type::I32, &[1, 1], &[]), Some(0x8000_0000));
    assert_eq!(eval_pure(Opcode::Shl, Type::I32, &[1, 33], &[]), Some(2), "shift count is masked");
    assert_eq!(eval_pure(Opcode::Clz, Type::I32, &[0], &[]), Some(32));
    assert_eq!(eval_pure(Opcode::Bswap32, Type::I32, &[0x1122_3344], &[]), Some(0x4433_2211));
    assert_eq!(eval_pure(Opcode::SExtract, Type::I32, &[0xf0], &[4, 4]), Some(0xffff_ffff));
    assert_eq!(eval_pure(Opcode::ExtI32I64, Type::I32, &[0x8000_0000], &[]), Some(0xffff_ffff_8000_0000));
    assert_eq!(eval_pure(Opcode::DivU, Type::I32, &[7, 0], &[]), None);
    assert_eq!(eval_pure(Opcode::InsnStart, Type::I64, &[], &[0, 0]), None);
}

#[test]
fn eval_pure_conditionals() {
    let lt = Cond::Lt as u32;
    assert_eq!(eval_pure(Opcode::SetCond, Type::I32, &[0xffff_ffff, 0], &[lt]), Some(1));
    assert_eq!(eval_pure(Opcode::SetCond, Type::I64, &[0xffff_ffff, 0], &[lt]), Some(0));
    let eq = Cond::Eq as u32;
    assert_eq!(eval_pure(Opcode::MovCond, Type::I32, &[3, 3, 10, 20], &[eq]), Some(10));
    assert_eq!(eval_pure(Opcode::MovCond, Type::I32, &[3, 4, 10, 20], &[eq]), Some(20));
}

#[test]
fn interpret_updates_globals() {
    let (mut ctx, _, r, wide) = setup();
    ctx.block_id = 3;
    let t = ctx.new_temp(Type::I32);
    let w = ctx.new_temp(Type::I64);
    let w2 = ctx.new_temp(Type::I64);
    ctx.gen_insn_start(0x1000, 0);
    ctx.gen_add(Type::I32, t, r[0], r[1]);
    ctx.gen_mov(Type::I32, r[2], t);
    ctx.gen_ext_u32_i64(w, r[0]);
    ctx.gen_mul(Type::I64, w2, w, w);
    ctx.gen_mov(Type::I64, wide, w2);
    ctx.gen_exit_tb(ExitKind::NoChain as u32);

    let mut env = Env {
        regs: [0x1_0000, 7, 0, 0],
        ..Env::default()
    };
    assert_eq!(run(&ctx, &mut env), Ok(encode_exit(3, ExitKind::NoChain)));
    assert_eq!(env.regs[2], 0x1_0007);
    assert_eq!(env.wide, 0x1_0000_0000);
}

#[test]
fn interpret_loop_with_labels() {
    // r1 = sum of 1..=r0
    let (mut ctx, _, r, _) = setup();
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
    ctx.gen_exit_tb(ExitKind::Halt as u32);

    let mut env = Env {
        regs: [10, 0, 0, 0],
        ..Env::default()
    };
    assert_eq!(run(&ctx, &mut env), Ok(encode_exit(0, ExitKind::Halt)));
    assert_eq!(env.regs[1], 55);
}

#[test]
fn interpret_env_loads_and_stores() {
    let (mut ctx, env_t, r, _) = setup();
    let t = ctx.new_temp(Type::I32);
    ctx.gen_ld8u(Type::I32, t, env_t, 5);
    ctx.gen_mov(Type::I32, r[2], t);
    ctx.gen_st16(Type::I32, r[3], env_t, 0);
    ctx.gen_exit_tb(ExitKind::NoChain as u32);

    let mut env = Env {
        regs: [0xaaaa_aaaa, 0x0000_4200, 0, 0x1234_5678],
        ..Env::default()
    };
    run(&ctx, &mut env).unwrap();
    assert_eq!(env.regs[2], 0x42);
    assert_eq!(env.regs[0], 0xaaaa_5678);
}

unsafe extern "C" fn add3(env: *mut u8, a: u64, b: u64, c: u64) -> u64 {
    let env = &mut *(env as *mut Env);
    env.regs[3] = 1;
    a + b + c
}

#[test]
fn interpret_calls_helpers() {
    let (mut ctx, env_t, r, wide) = setup();
    let a = ctx.new_const(Type::I64, 1);
    let b = ctx.new_const(Type::I64, 20);
    let c = ctx.new_const(Type::I64, 300);
    let out = ctx.new_temp(Type::I64);
    ctx.gen_call(out, add3, env_t, &[a, b, c]);
    ctx.gen_mov(Type::I64, wide, out);
    ctx.gen_mov(Type::I32, r[0], r[3]);
    ctx.gen_exit_tb(ExitKind::NoChain as u32);

    let mut env = Env::default();
    run(&ctx, &mut env).unwrap();
    assert_eq!(env.wide, 321);
    assert_eq!(env.regs[0], 1);
}

#[test]
fn interpret_reports_division_by_zero() {
    let (mut ctx, _, r, _) = setup();
    ctx.gen_divu(Type::I32, r[0], r[1], r[2]);
    ctx.gen_exit_tb(ExitKind::NoChain as u32);
    let mut env = Env::default();
    assert_eq!(run(&ctx, &mut env), Err(IrError::DivideByZero { op: 0 }));
}

#[test]
fn interpret_requires_exit() {
    let (mut ctx, _, r, _) = setup();
    ctx.gen_mov(Type::I32, r[0], r[1]);
    let mut env = Env::default();
    assert_eq!(run(&ctx, &mut env), Err(IrError::MissingExit));
}
