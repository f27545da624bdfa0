//! Whole-program tests: compiled and interpreted execution must
//! agree, with and without the optimizer.

use proptest::prelude::*;

use dbt_exec::{ExecMode, HaltReason, JitConfig, RunResult};
use dbt_frontend::arm::{CpuState, ExceptionKind};

use crate::harness::asm::a32;
use crate::harness::{arm_cpu, config, engine, MODES};

const CODE: u32 = 0x1000;
const DATA: u32 = 0x4000;

/// Every execution configuration worth comparing.
fn configs() -> Vec<JitConfig> {
    let mut out = Vec::new();
    for mode in MODES {
        for optimize in [true, false] {
            out.push(JitConfig {
                optimize,
                ..config(mode)
            });
        }
    }
    // Short blocks exercise chaining at odd boundaries.
    out.push(JitConfig {
        max_block_insns: 3,
        ..config(ExecMode::Compiled)
    });
    out
}

fn run_program(config: JitConfig, code: &[u32], init: &CpuState, budget: u64) -> (RunResult, CpuState, Vec<u32>) {
    let (engine, mem) = engine(config);
    mem.load_words(CODE, code);
    let mut cpu = *init;
    let r = engine.dispatcher().run(&mut cpu, budget).unwrap();
    engine.cache().check_consistency().unwrap();
    let data = (0..16).map(|i| mem.peek32(DATA + 4 * i)).collect();
    (r, cpu, data)
}

/// Run under every configuration and return the common outcome.
fn run_everywhere(code: &[u32], init: &CpuState, budget: u64) -> (RunResult, CpuState, Vec<u32>) {
    let mut all = configs().into_iter().map(|c| run_program(c, code, init, budget));
    let first = all.next().unwrap();
    for other in all {
        assert_eq!(other, first);
    }
    first
}

// ── Programs ──────────────────────────────────────────────────

#[test]
fn fibonacci() {
    let code = [
        a32::mov_imm(0, 0),
        a32::mov_imm(1, 1),
        a32::mov_imm(2, 20),
        a32::add_reg(3, 0, 1), // loop
        a32::mov_reg(0, 1),
        a32::mov_reg(1, 3),
        a32::subs_imm(2, 2, 1),
        a32::b_cond(a32::NE, CODE + 28, CODE + 12),
        a32::svc(0),
    ];
    let (r, cpu, _) = run_everywhere(&code, &arm_cpu(CODE), 10_000);
    assert_eq!(r.reason, HaltReason::Trap(ExceptionKind::Svc));
    assert_eq!(cpu.regs[0], 6765);
    assert_eq!(r.remaining, 10_000 - (3 + 20 * 5 + 1));
}

#[test]
fn recursive_factorial() {
    const F: u32 = 0x1100;
    let mut code = vec![a32::mov_imm(0, 10), a32::bl(CODE + 4, F), a32::svc(0)];
    code.resize(((F - CODE) / 4) as usize, a32::udf());
    code.extend([
        a32::push(1 << 4 | 1 << 14),
        a32::mov_reg(4, 0),
        a32::cmp_imm(0, 1),
        a32::b_cond(a32::GT, F + 12, F + 24),
        a32::mov_imm(0, 1),
        a32::pop(1 << 4 | 1 << 15),
        a32::dp_imm(a32::SUB, false, 0, 4, 1, 0),
        a32::bl(F + 28, F),
        a32::mul(0, 0, 4),
        a32::pop(1 << 4 | 1 << 15),
    ]);
    let (r, cpu, _) = run_everywhere(&code, &arm_cpu(CODE), 10_000);
    assert_eq!(r.reason, HaltReason::Trap(ExceptionKind::Svc));
    assert_eq!(cpu.regs[0], 3_628_800);
    assert_eq!(cpu.regs[13], 0x8_0000);
    assert_eq!(r.pc, CODE + 12);
}

#[test]
fn word_copy_loop() {
    const SRC: u32 = 0x6000;
    let mut code = a32::mov32(1, SRC).to_vec();
    code.extend(a32::mov32(2, DATA));
    code.extend([
        a32::mov_imm(0, 8),
        a32::ldr_post(3, 1, 4), // loop
        a32::dp_reg(a32::EOR, false, 3, 3, 0, a32::ROR, 3),
        a32::str(3, 2, 0),
        a32::add_imm(2, 2, 4),
        a32::subs_imm(0, 0, 1),
        a32::b_cond(a32::NE, CODE + 40, CODE + 20),
        a32::svc(0),
    ]);
    for config in configs() {
        let (engine, mem) = engine(config);
        mem.load_words(CODE, &code);
        let src: Vec<u32> = (0..8).map(|i| 0x0101_0101 * (i + 1)).collect();
        mem.load_words(SRC, &src);
        let mut cpu = arm_cpu(CODE);
        let r = engine.dispatcher().run(&mut cpu, 1000).unwrap();
        assert_eq!(r.reason, HaltReason::Trap(ExceptionKind::Svc));
        for (i, w) in src.iter().enumerate() {
            let counter = 8 - i as u32;
            assert_eq!(mem.peek32(DATA + 4 * i as u32), w ^ counter.rotate_right(3));
        }
        assert_eq!(cpu.regs[1], SRC + 32);
    }
}

#[test]
fn block_transfer_round_trip() {
    let mut code = a32::mov32(8, DATA + 0x20).to_vec();
    code.extend([
        a32::stmdb(8, 0x00ff, true),
        a32::mov_imm(0, 0),
        a32::mov_imm(7, 0),
        a32::ldm(8, 0x00ff, false),
        a32::svc(0),
    ]);
    let mut init = arm_cpu(CODE);
    for r in 0..8 {
        init.regs[r] = 0x100 * r as u32 + 7;
    }
    let (_, cpu, data) = run_everywhere(&code, &init, 100);
    assert_eq!(&cpu.regs[..8], &init.regs[..8]);
    assert_eq!(cpu.regs[8], DATA);
    assert_eq!(&data[..8], &init.regs[..8]);
}

// ── Random ALU sequences ──────────────────────────────────────

/// One random data-processing or multiply-class instruction over
/// r0-r7.
fn alu_insn() -> impl Strategy<Value = u32> {
    let reg = || 0u32..8;
    let dp_op = 0u32..16;
    // Test ops without S are other instructions.
    let fix_s = |op: u32, s: bool| s || (8..=11).contains(&op);
    prop_oneof![
        4 => (dp_op.clone(), any::<bool>(), reg(), reg(), any::<u8>(), 0u32..16)
            .prop_map(move |(op, s, rd, rn, imm, rot)| a32::dp_imm(op, fix_s(op, s), rd, rn, imm as u32, rot)),
        4 => (dp_op.clone(), any::<bool>(), reg(), reg(), reg(), 0u32..4, 0u32..32)
            .prop_map(move |(op, s, rd, rn, rm, sh, amt)| a32::dp_reg(op, fix_s(op, s), rd, rn, rm, sh, amt)),
        2 => (dp_op, any::<bool>(), reg(), reg(), reg(), 0u32..4, reg())
            .prop_map(move |(op, s, rd, rn, rm, sh, rs)| a32::dp_rsr(op, fix_s(op, s), rd, rn, rm, sh, rs)),
        1 => (reg(), reg(), reg()).prop_map(|(rd, rn, rm)| a32::mul(rd, rn, rm)),
        1 => (reg(), reg(), reg(), reg()).prop_map(|(rd, rn, rm, ra)| a32::mla(rd, rn, rm, ra)),
        1 => (reg(), 1u32..8, reg(), reg(), any::<bool>()).prop_map(|(lo, k, rn, rm, signed)| {
            let hi = (lo + k) % 8;
            if signed { a32::smull(lo, hi, rn, rm) } else { a32::umull(lo, hi, rn, rm) }
        }),
        1 => (reg(), reg(), reg(), any::<bool>()).prop_map(|(rd, rn, rm, signed)| {
            if signed { a32::sdiv(rd, rn, rm) } else { a32::udiv(rd, rn, rm) }
        }),
        1 => (reg(), reg()).prop_map(|(rd, rm)| a32::clz(rd, rm)),
        1 => (reg(), any::<u16>(), any::<bool>()).prop_map(|(rd, imm, top)| {
            if top { a32::movt(rd, imm as u32) } else { a32::movw(rd, imm as u32) }
        }),
    ]
}

/// Instruction under a random condition, mostly always.
fn conditional(insn: u32) -> impl Strategy<Value = u32> {
    prop_oneof![3 => Just(14u32), 1 => 0u32..15].prop_map(move |cc| a32::cond(cc, insn))
}

fn program() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(alu_insn().prop_flat_map(conditional), 1..40).prop_map(|mut code| {
        code.push(a32::svc(0));
        code
    })
}

fn initial_state() -> impl Strategy<Value = CpuState> {
    (prop::array::uniform8(any::<u32>()), 0u32..16).prop_map(|(regs, nzcv)| {
        let mut cpu = arm_cpu(CODE);
        cpu.regs[..8].copy_from_slice(&regs);
        cpu.set_cpsr(nzcv << 28);
        cpu
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn random_alu_agrees_across_modes(code in program(), init in initial_state()) {
        let mut outcomes = configs().into_iter().map(|c| run_program(c, &code, &init, 1000));
        let (r, cpu, _) = outcomes.next().unwrap();
        prop_assert_eq!(r.reason, HaltReason::Trap(ExceptionKind::Svc));
        prop_assert_eq!(r.remaining, 1000 - code.len() as u64);
        for (ro, co, _) in outcomes {
            prop_assert_eq!(ro, r);
            prop_assert_eq!(co, cpu);
        }
    }

    #[test]
    fn random_alu_under_tight_budget(code in program(), init in initial_state(), budget in 1u64..20) {
        // Budget cuts force single-step blocks mid-sequence.
        let mut outcomes = MODES.into_iter().map(|m| run_program(config(m), &code, &init, budget));
        let (r, cpu, _) = outcomes.next().unwrap();
        let executed = budget.min(code.len() as u64);
        prop_assert_eq!(budget - r.remaining, executed);
        for (ro, co, _) in outcomes {
            prop_assert_eq!(ro, r);
            prop_assert_eq!(co, cpu);
        }
    }
}
