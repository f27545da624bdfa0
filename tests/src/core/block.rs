use dbt_core::{decode_exit, encode_exit, BlockKey, ExitKind, JumpCache};

const KINDS: [ExitKind; 6] = [
    ExitKind::Chain0,
    ExitKind::Chain1,
    ExitKind::NoChain,
    ExitKind::Budget,
    ExitKind::Halt,
    ExitKind::Exception,
];

#[test]
fn exit_value_carries_block_and_kind() {
    for kind in KINDS {
        for id in [0u64, 1, 77, 1 << 40] {
            assert_eq!(decode_exit(encode_exit(id, kind)), Some((id, kind)));
        }
    }
}

#[test]
fn exit_value_rejects_unknown_kind() {
    assert_eq!(decode_exit(6), None);
    assert_eq!(decode_exit(8 | 7), None);
    assert_eq!(ExitKind::from_raw(6), None);
}

#[test]
fn chain_slots() {
    assert_eq!(ExitKind::Chain0.chain_slot(), Some(0));
    assert_eq!(ExitKind::Chain1.chain_slot(), Some(1));
    assert_eq!(ExitKind::NoChain.chain_slot(), None);
    assert_eq!(ExitKind::Exception.chain_slot(), None);
}

#[test]
fn block_key_distinguishes_mode() {
    let a = BlockKey::new(0x8000, 0);
    let b = BlockKey::new(0x8000, 1);
    assert_ne!(a, b);
    assert_ne!(a.hash(), b.hash());
}

#[test]
fn jump_cache_lookup_insert_remove() {
    let mut jc: JumpCache<u32> = JumpCache::new();
    let k = BlockKey::new(0x1000, 0);
    assert_eq!(jc.lookup(k), None);
    jc.insert(k, 7);
    assert_eq!(jc.lookup(k), Some(&7));
    // Same pc, other mode: never a false hit.
    assert_eq!(jc.lookup(BlockKey::new(0x1000, 1)), None);

    jc.remove(BlockKey::new(0x2000, 0));
    assert_eq!(jc.lookup(k), Some(&7));
    jc.remove(k);
    assert_eq!(jc.lookup(k), None);
}

#[test]
fn jump_cache_invalidate_clears_all() {
    let mut jc = JumpCache::new();
    let keys: Vec<BlockKey> = (0..64).map(|i| BlockKey::new(0x1000 + 4 * i, 0)).collect();
    for (i, &k) in keys.iter().enumerate() {
        jc.insert(k, i);
    }
    assert!(keys.iter().any(|&k| jc.lookup(k).is_some()));
    jc.invalidate();
    assert!(keys.iter().all(|&k| jc.lookup(k).is_none()));
}
