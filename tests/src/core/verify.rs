use dbt_core::temp::TempIdx;
use dbt_core::verify::verify;
use dbt_core::{Context, IrError, Type};

fn setup() -> (Context, TempIdx, TempIdx) {
    let mut ctx = Context::new();
    let env = ctx.new_fixed(Type::I64, 5, "env");
    let r0 = ctx.new_global(Type::I32, env, 0, "r0");
    let r1 = ctx.new_global(Type::I32, env, 4, "r1");
    (ctx, r0, r1)
}

#[test]
fn well_formed_block_passes() {
    let (mut ctx, r0, r1) = setup();
    let t = ctx.new_temp(Type::I32);
    let skip = ctx.new_label();
    ctx.gen_insn_start(0x1000, 0);
    ctx.gen_add(Type::I32, t, r0, r1);
    ctx.gen_mov(Type::I32, r0, t);
    ctx.gen_brcond(Type::I32, r0, r1, dbt_core::Cond::Eq, skip);
    ctx.gen_mov(Type::I32, r1, r0);
    ctx.gen_set_label(skip);
    ctx.gen_exit_tb(2);
    assert_eq!(verify(&ctx), Ok(()));
}

#[test]
fn use_before_def() {
    let (mut ctx, r0, _) = setup();
    let t = ctx.new_temp(Type::I32);
    ctx.gen_mov(Type::I32, r0, t);
    assert_eq!(verify(&ctx), Err(IrError::UseBeforeDef { op: 0, temp: t.0 }));
}

#[test]
fn multiple_definition() {
    let (mut ctx, r0, r1) = setup();
    let t = ctx.new_temp(Type::I32);
    ctx.gen_mov(Type::I32, t, r0);
    ctx.gen_mov(Type::I32, t, r1);
    assert_eq!(verify(&ctx), Err(IrError::MultipleDefinition { op: 1, temp: t.0 }));
}

#[test]
fn live_across_label() {
    let (mut ctx, r0, _) = setup();
    let t = ctx.new_temp(Type::I32);
    let l = ctx.new_label();
    ctx.gen_mov(Type::I32, t, r0);
    ctx.gen_set_label(l);
    ctx.gen_mov(Type::I32, r0, t);
    assert_eq!(
        verify(&ctx),
        Err(IrError::LiveAcrossLabel {
            op: 2,
            temp: t.0,
            label: l
        })
    );
}

#[test]
fn globals_survive_labels() {
    let (mut ctx, r0, r1) = setup();
    let l = ctx.new_label();
    ctx.gen_mov(Type::I32, r0, r1);
    ctx.gen_set_label(l);
    ctx.gen_mov(Type::I32, r1, r0);
    assert_eq!(verify(&ctx), Ok(()));
}

#[test]
fn unplaced_label() {
    let (mut ctx, _, _) = setup();
    let l = ctx.new_label();
    ctx.gen_br(l);
    assert_eq!(verify(&ctx), Err(IrError::LabelPlacement { label: l, count: 0 }));
}

#[test]
fn label_placed_twice() {
    let (mut ctx, _, _) = setup();
    let l = ctx.new_label();
    ctx.gen_set_label(l);
    ctx.gen_set_label(l);
    assert_eq!(verify(&ctx), Err(IrError::LabelPlacement { label: l, count: 2 }));
}

#[test]
fn unknown_label() {
    let (mut ctx, _, _) = setup();
    ctx.gen_br(7);
    assert_eq!(verify(&ctx), Err(IrError::UnknownLabel { op: 0, label: 7 }));
}

#[test]
fn type_mismatch() {
    let (mut ctx, r0, r1) = setup();
    let wide = ctx.new_temp(Type::I64);
    ctx.gen_add(Type::I32, wide, r0, r1);
    assert_eq!(
        verify(&ctx),
        Err(IrError::TypeMismatch {
            op: 0,
            temp: wide.0,
            expected: Type::I32,
            found: Type::I64
        })
    );
}

#[test]
fn extension_types_checked() {
    let (mut ctx, r0, _) = setup();
    let wide = ctx.new_temp(Type::I64);
    ctx.gen_ext_u32_i64(wide, r0);
    ctx.gen_extrl_i64_i32(r0, wide);
    assert_eq!(verify(&ctx), Ok(()));
}

#[test]
fn constant_output() {
    let (mut ctx, r0, _) = setup();
    let c = ctx.new_const(Type::I32, 3);
    ctx.gen_mov(Type::I32, c, r0);
    assert_eq!(verify(&ctx), Err(IrError::ConstOutput { op: 0 }));
}

#[test]
fn operand_out_of_range() {
    let (mut ctx, r0, _) = setup();
    ctx.gen_mov(Type::I32, r0, TempIdx(99));
    assert_eq!(verify(&ctx), Err(IrError::BadTemp { op: 0, temp: 99 }));
}
