use dbt_core::dump::dump_to_string;
use dbt_core::temp::{TempIdx, TempKind};
use dbt_core::{Context, OpIdx, Opcode, Type};

fn with_globals() -> (Context, TempIdx, TempIdx) {
    let mut ctx = Context::new();
    let env = ctx.new_fixed(Type::I64, 5, "env");
    let r0 = ctx.new_global(Type::I32, env, 0, "r0");
    (ctx, env, r0)
}

#[test]
fn context_new_temp() {
    let mut ctx = Context::new();
    let t0 = ctx.new_temp(Type::I32);
    let t1 = ctx.new_temp(Type::I64);
    assert_eq!(t0, TempIdx(0));
    assert_eq!(t1, TempIdx(1));
    assert_eq!(ctx.nb_temps(), 2);
    assert_eq!(ctx.temp(t1).ty, Type::I64);
    assert_eq!(ctx.temp(t0).kind, TempKind::Ebb);
}

#[test]
fn context_const_dedup() {
    let mut ctx = Context::new();
    let c1 = ctx.new_const(Type::I64, 42);
    assert_eq!(c1, ctx.new_const(Type::I64, 42));
    assert_ne!(c1, ctx.new_const(Type::I64, 99));
    assert_ne!(c1, ctx.new_const(Type::I32, 42), "types have separate pools");
}

#[test]
fn context_const_masked_to_type() {
    let mut ctx = Context::new();
    let c = ctx.new_const(Type::I32, 0x1_0000_0005);
    assert_eq!(ctx.temp(c).val, 5);
    assert_eq!(c, ctx.new_const(Type::I32, 5));
}

#[test]
fn unshared_const_is_patchable() {
    let mut ctx = Context::new();
    let shared = ctx.new_const(Type::I32, 0);
    let count = ctx.new_const_unshared(Type::I32, 0);
    assert_ne!(shared, count);
    ctx.patch_const(count, 17);
    assert_eq!(ctx.temp(count).val, 17);
    assert_eq!(ctx.temp(shared).val, 0);
}

#[test]
fn reset_keeps_globals() {
    let (mut ctx, env, r0) = with_globals();
    assert_eq!(ctx.nb_globals(), 2);
    ctx.block_id = 9;
    let t = ctx.new_temp(Type::I32);
    let l = ctx.new_label();
    ctx.gen_mov(Type::I32, t, r0);
    ctx.gen_set_label(l);
    ctx.gen_exit_tb(2);

    ctx.reset();
    assert_eq!(ctx.nb_temps(), 2);
    assert_eq!(ctx.num_ops(), 0);
    assert!(ctx.labels().is_empty());
    assert_eq!(ctx.block_id, 0);
    assert_eq!(ctx.temp(env).kind, TempKind::Fixed);
    assert_eq!(ctx.temp(r0).name, Some("r0"));
    // Constants from the previous block are gone after reset.
    let c = ctx.new_const(Type::I32, 1);
    assert_eq!(c, TempIdx(2));
}

#[test]
fn global_records_env_offset() {
    let (mut ctx, env, _) = with_globals();
    let r1 = ctx.new_global(Type::I32, env, 4, "r1");
    let t = ctx.temp(r1);
    assert_eq!(t.kind, TempKind::Global);
    assert_eq!(t.mem_base, Some(env));
    assert_eq!(t.mem_offset, 4);
    assert_eq!(ctx.globals().len(), 3);
}

#[test]
#[should_panic(expected = "globals must be registered before locals")]
fn global_after_local_panics() {
    let (mut ctx, env, _) = with_globals();
    ctx.new_temp(Type::I32);
    ctx.new_global(Type::I32, env, 8, "late");
}

#[test]
fn compact_ops_renumbers() {
    let (mut ctx, _, r0) = with_globals();
    let one = ctx.new_const(Type::I32, 1);
    ctx.gen_insn_start(0x1000, 0);
    ctx.gen_add(Type::I32, r0, r0, one);
    ctx.gen_exit_tb(2);
    ctx.op_mut(OpIdx(1)).opc = Opcode::Nop;
    ctx.compact_ops();
    assert_eq!(ctx.num_ops(), 2);
    assert_eq!(ctx.ops()[1].opc, Opcode::ExitTb);
    assert_eq!(ctx.ops()[1].idx, OpIdx(1));
}

#[test]
fn dump_names_operands() {
    let (mut ctx, _, r0) = with_globals();
    let t = ctx.new_temp(Type::I32);
    let c = ctx.new_const(Type::I32, 0x10);
    ctx.gen_insn_start(0x8000, 0);
    ctx.gen_add(Type::I32, t, r0, c);
    ctx.gen_mov(Type::I32, r0, t);
    ctx.gen_exit_tb(2);
    let text = dump_to_string(&ctx);
    assert!(text.contains("---- 0x00008000"), "{text}");
    assert!(text.contains("add_i32 tmp0, r0, $0x10"), "{text}");
    assert_eq!(text, dump_to_string(&ctx.clone()));
}
