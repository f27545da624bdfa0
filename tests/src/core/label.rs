use dbt_core::label::*;
use dbt_core::Context;

#[test]
fn label_new() {
    let l = Label::new(0);
    assert_eq!(l.id, 0);
    assert_eq!(l.placements, 0);
    assert_eq!(l.value, None);
    assert!(l.uses.is_empty());
}

#[test]
fn label_resolve() {
    let mut l = Label::new(2);
    l.add_use(50, RelocKind::Rel32);
    l.add_use(90, RelocKind::Rel32);
    assert!(l.has_pending_uses());
    assert_eq!(l.uses[1].offset, 90);

    l.set_value(300);
    assert_eq!(l.value, Some(300));
    assert!(!l.has_pending_uses());
}

#[test]
fn label_no_uses_not_pending() {
    assert!(!Label::new(3).has_pending_uses());
}

#[test]
fn set_label_counts_placements() {
    let mut ctx = Context::new();
    let a = ctx.new_label();
    let b = ctx.new_label();
    assert_eq!((a, b), (0, 1));
    ctx.gen_set_label(b);
    assert_eq!(ctx.label(a).placements, 0);
    assert_eq!(ctx.label(b).placements, 1);
}
