use dbt_core::types::*;

const CONDS: [Cond; 14] = [
    Cond::Never,
    Cond::Always,
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

#[test]
fn type_sizes() {
    assert_eq!(Type::I32.size_bits(), 32);
    assert_eq!(Type::I64.size_bits(), 64);
    assert_eq!(Type::I32.size_bytes(), 4);
    assert_eq!(Type::I64.size_bytes(), 8);
    assert_eq!(Type::I32.mask(), 0xffff_ffff);
    assert_eq!(Type::I64.mask(), u64::MAX);
}

#[test]
fn cond_invert() {
    assert_eq!(Cond::Eq.invert(), Cond::Ne);
    assert_eq!(Cond::Lt.invert(), Cond::Ge);
    assert_eq!(Cond::Ltu.invert(), Cond::Geu);
    assert_eq!(Cond::Never.invert(), Cond::Always);
    assert_eq!(Cond::TstEq.invert(), Cond::TstNe);
}

#[test]
fn cond_invert_is_involution() {
    for c in CONDS {
        assert_eq!(c.invert().invert(), c, "invert is not involution for {c:?}");
    }
}

#[test]
fn cond_invert_negates_test() {
    let samples = [(0u64, 0u64), (1, 2), (2, 1), (0xffff_ffff, 1), (0x8000_0000, 0x7fff_ffff)];
    for c in CONDS {
        for (a, b) in samples {
            assert_ne!(c.test(Type::I32, a, b), c.invert().test(Type::I32, a, b), "{c:?} {a:#x} {b:#x}");
        }
    }
}

#[test]
fn cond_swap_exchanges_operands() {
    let samples = [(0u64, 0u64), (1, 2), (2, 1), (u64::MAX, 0), (1 << 63, 5)];
    for c in CONDS {
        for (a, b) in samples {
            assert_eq!(c.test(Type::I64, a, b), c.swap().test(Type::I64, b, a), "{c:?} {a:#x} {b:#x}");
        }
    }
}

#[test]
fn cond_test_respects_width() {
    // 0xffff_ffff is -1 as i32 but large as i64.
    assert!(Cond::Lt.test(Type::I32, 0xffff_ffff, 0));
    assert!(!Cond::Lt.test(Type::I64, 0xffff_ffff, 0));
    assert!(Cond::Gtu.test(Type::I32, 0xffff_ffff, 0));
    // High bits are ignored for I32.
    assert!(Cond::Eq.test(Type::I32, 0x1_0000_0005, 5));
    assert!(Cond::TstNe.test(Type::I32, 0b1010, 0b0010));
    assert!(Cond::TstEq.test(Type::I32, 0b1010, 0b0101));
}

#[test]
fn cond_from_raw_round_trips() {
    for c in CONDS {
        assert_eq!(Cond::from_raw(c as u32), Some(c));
    }
    assert_eq!(Cond::from_raw(2), None);
    assert_eq!(Cond::from_raw(20), None);
}

#[test]
fn regset_ops() {
    let s = RegSet::EMPTY.set(0).set(5).set(15);
    assert_eq!(s.count(), 3);
    assert!(s.contains(5));
    assert_eq!(s.first(), Some(0));
    assert_eq!(s.clear(0).first(), Some(5));
    assert_eq!(s.iter().collect::<Vec<_>>(), vec![0, 5, 15]);

    let t = RegSet::EMPTY.set(5).set(7);
    assert_eq!(s.intersect(t).iter().collect::<Vec<_>>(), vec![5]);
    assert_eq!(s.union(t).count(), 4);
    assert_eq!(s.subtract(t).count(), 2);
    assert!(RegSet::EMPTY.is_empty());
    assert_eq!(RegSet::EMPTY.first(), None);
}
