//! Engine tests: guest programs run through the dispatcher in both
//! execution modes.

mod internals;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dbt_exec::{ExceptionInfo, ExecMode, HaltReason, JitConfig, RunResult};
use dbt_frontend::arm::{CpuState, ExceptionKind};

use crate::harness::asm::{a32, t16};
use crate::harness::{arm_cpu, config, engine, thumb_cpu, TestMemory, MODES, UNMAPPED};

const CODE: u32 = 0x1000;
const DATA: u32 = 0x4000;

fn run_with(config: JitConfig, code: &[u32], cpu: &mut CpuState, budget: u64) -> (RunResult, Arc<TestMemory>) {
    let (engine, mem) = engine(config);
    mem.load_words(CODE, code);
    let mut d = engine.dispatcher();
    let r = d.run(cpu, budget).unwrap();
    engine.cache().check_consistency().unwrap();
    (r, mem)
}

fn run_arm(mode: ExecMode, code: &[u32], budget: u64) -> (RunResult, CpuState, Arc<TestMemory>) {
    let mut cpu = arm_cpu(CODE);
    let (r, mem) = run_with(config(mode), code, &mut cpu, budget);
    (r, cpu, mem)
}

fn svc_halt() -> HaltReason {
    HaltReason::Trap(ExceptionKind::Svc)
}

// ── Arithmetic and flags ──────────────────────────────────────

#[test]
fn straight_line_arithmetic() {
    for mode in MODES {
        let mut code = a32::mov32(1, 0xdead_beef).to_vec();
        code.extend([
            a32::mov_imm(2, 3),
            a32::add_reg(0, 1, 2),
            a32::mul(3, 2, 2),
            a32::dp_reg(a32::EOR, false, 4, 1, 1, a32::LSL, 0),
            a32::dp_reg(a32::ORR, false, 5, 4, 2, a32::LSL, 4),
            a32::clz(6, 2),
            a32::umull(7, 8, 1, 2),
            a32::svc(0),
        ]);
        let (r, cpu, _) = run_arm(mode, &code, 100);
        assert_eq!(r.reason, svc_halt(), "{mode:?}");
        assert_eq!(cpu.regs[0], 0xdead_bef2);
        assert_eq!(cpu.regs[3], 9);
        assert_eq!(cpu.regs[4], 0);
        assert_eq!(cpu.regs[5], 0x30);
        assert_eq!(cpu.regs[6], 30);
        let wide = 0xdead_beefu64 * 3;
        assert_eq!(cpu.regs[7], wide as u32);
        assert_eq!(cpu.regs[8], (wide >> 32) as u32);
        assert_eq!(r.remaining, 100 - code.len() as u64);
    }
}

#[test]
fn flag_setting_and_conditions() {
    for mode in MODES {
        let code = [
            a32::mov_imm(0, 5),
            a32::subs_imm(1, 0, 5),                    // Z, C
            a32::cond(a32::EQ, a32::mov_imm(2, 1)),   // taken
            a32::cond(a32::NE, a32::mov_imm(3, 1)),   // skipped
            a32::subs_imm(4, 0, 6),                    // N, borrow
            a32::cond(a32::LT, a32::mov_imm(5, 1)),   // taken
            a32::cond(a32::GT, a32::mov_imm(6, 1)),   // skipped
            a32::svc(0),
        ];
        let (r, cpu, _) = run_arm(mode, &code, 100);
        assert_eq!(r.reason, svc_halt());
        assert_eq!(cpu.regs[1], 0);
        assert_eq!(cpu.regs[2], 1, "{mode:?}");
        assert_eq!(cpu.regs[3], 0);
        assert_eq!(cpu.regs[4], u32::MAX);
        assert_eq!(cpu.regs[5], 1);
        assert_eq!(cpu.regs[6], 0);
        // 5 - 6: negative, borrow (C clear), no overflow.
        assert_eq!((cpu.nf, cpu.zf, cpu.cf, cpu.vf), (1, 0, 0, 0));
        // Skipped instructions still count.
        assert_eq!(r.remaining, 100 - 8);
    }
}

#[test]
fn memory_and_stack() {
    for mode in MODES {
        let mut code = a32::mov32(1, DATA).to_vec();
        code.extend([
            a32::mov_imm(2, 0x7f),
            a32::str(2, 1, 8),
            a32::ldr(3, 1, 8),
            a32::strb(1, 1, 12), // low byte of DATA = 0x00
            a32::mov_imm(4, 0xab),
            a32::strb(4, 1, 13),
            a32::ldrb(5, 1, 13),
            a32::push(0b1_0000_0000_1100), // r2, r3, r12
            a32::mov_imm(2, 0),
            a32::mov_imm(3, 0),
            a32::pop(0b1100),
            a32::ldr_post(6, 1, 8),
            a32::svc(0),
        ]);
        let mut cpu = arm_cpu(CODE);
        cpu.regs[12] = 0x1234_5678;
        let (r, mem) = run_with(config(mode), &code, &mut cpu, 100);
        assert_eq!(r.reason, svc_halt());
        assert_eq!(mem.peek32(DATA + 8), 0x7f);
        assert_eq!(cpu.regs[3], 0x7f, "{mode:?}");
        assert_eq!(cpu.regs[5], 0xab);
        assert_eq!(mem.peek32(DATA + 12), 0xab00);
        assert_eq!(cpu.regs[2], 0x7f);
        // Popped two of three pushed words.
        assert_eq!(cpu.regs[13], 0x8_0000 - 4);
        assert_eq!(mem.peek32(0x8_0000 - 4), 0x1234_5678);
        assert_eq!(cpu.regs[6], 0);
        assert_eq!(cpu.regs[1], DATA + 8);
    }
}

// ── Budget and halting ────────────────────────────────────────

/// r0 = 10 iterations of r1 += 2: 33 instructions.
fn countdown() -> Vec<u32> {
    vec![
        a32::mov_imm(0, 10),
        a32::mov_imm(1, 0),
        a32::add_imm(1, 1, 2),
        a32::subs_imm(0, 0, 1),
        a32::b_cond(a32::NE, CODE + 16, CODE + 8),
        a32::svc(0),
    ]
}

#[test]
fn loop_charges_exact_budget() {
    for mode in MODES {
        let (engine, mem) = engine(config(mode));
        mem.load_words(CODE, &countdown());
        let mut cpu = arm_cpu(CODE);
        let r = engine.dispatcher().run(&mut cpu, 1000).unwrap();
        assert_eq!(r.reason, svc_halt());
        assert_eq!(r.remaining, 1000 - 33, "{mode:?}");
        assert_eq!(r.pc, CODE + 24);
        assert_eq!(cpu.regs[1], 20);
        assert_eq!(cpu.regs[0], 0);
        let stats = engine.stats();
        assert_eq!(stats.compiles, 3);
        if mode == ExecMode::Compiled {
            assert!(stats.chains > 0);
        }
    }
}

#[test]
fn budget_stops_mid_block() {
    for mode in MODES {
        let mut code = vec![a32::add_imm(0, 0, 1); 20];
        code.push(a32::svc(0));
        let (engine, mem) = engine(config(mode));
        mem.load_words(CODE, &code);
        let mut d = engine.dispatcher();
        let mut cpu = arm_cpu(CODE);

        let r = d.run(&mut cpu, 7).unwrap();
        assert_eq!(r.reason, HaltReason::BudgetExhausted);
        assert_eq!(r.remaining, 0);
        assert_eq!(cpu.regs[0], 7, "{mode:?}");
        assert_eq!(r.pc, CODE + 28);

        let r = d.run(&mut cpu, 100).unwrap();
        assert_eq!(r.reason, svc_halt());
        assert_eq!(cpu.regs[0], 20);
        assert_eq!(r.remaining, 100 - 14);
        assert_eq!(r.pc, CODE + 0x54);
    }
}

#[test]
fn zero_budget_returns_immediately() {
    let (r, cpu, _) = run_arm(ExecMode::Compiled, &countdown(), 0);
    assert_eq!(r.reason, HaltReason::BudgetExhausted);
    assert_eq!(cpu.pc(), CODE);
    assert_eq!(cpu.regs[0], 0);
}

#[test]
fn step_executes_one_instruction() {
    for mode in MODES {
        let (engine, mem) = engine(config(mode));
        mem.load_words(CODE, &countdown());
        let mut d = engine.dispatcher();
        let mut cpu = arm_cpu(CODE);
        for expected in [CODE + 4, CODE + 8, CODE + 12, CODE + 16, CODE + 8] {
            let r = d.step(&mut cpu).unwrap();
            assert_eq!(r.reason, HaltReason::BudgetExhausted);
            assert_eq!(cpu.pc(), expected);
        }
        assert_eq!(cpu.regs[0], 9);
        assert_eq!(cpu.regs[1], 2);
    }
}

#[test]
fn halt_requested_before_run() {
    for mode in MODES {
        let (engine, mem) = engine(config(mode));
        mem.load_words(CODE, &countdown());
        let mut d = engine.dispatcher();
        let mut cpu = arm_cpu(CODE);
        let handle = d.halt_handle();
        handle.halt();
        assert!(handle.is_pending());

        let r = d.run(&mut cpu, 100).unwrap();
        assert_eq!(r.reason, HaltReason::HaltRequested);
        assert_eq!(r.remaining, 100);
        assert_eq!(r.pc, CODE);
        assert!(!handle.is_pending());

        // The request is consumed.
        let r = d.run(&mut cpu, 100).unwrap();
        assert_eq!(r.reason, svc_halt());
    }
}

#[test]
fn halt_from_another_thread() {
    for mode in MODES {
        let (engine, mem) = engine(config(mode));
        mem.load_words(CODE, &[a32::add_imm(0, 0, 1), a32::b(CODE + 4, CODE)]);
        let mut d = engine.dispatcher();
        let handle = d.halt_handle();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            handle.halt();
        });
        let mut cpu = arm_cpu(CODE);
        let r = d.run(&mut cpu, u64::MAX).unwrap();
        stopper.join().unwrap();
        assert_eq!(r.reason, HaltReason::HaltRequested);
        assert!(cpu.regs[0] > 0);
        assert_eq!(r.pc, CODE);
        assert_eq!(u64::MAX - r.remaining, 2 * cpu.regs[0] as u64);
    }
}

// ── Traps ─────────────────────────────────────────────────────

#[test]
fn svc_continue_and_halt() {
    for mode in MODES {
        let code = [a32::svc(5), a32::mov_imm(0, 1), a32::svc(0x123), a32::svc(0), a32::mov_imm(0, 9)];
        let (r, cpu, mem) = run_arm(mode, &code, 100);
        assert_eq!(r.reason, svc_halt());
        assert_eq!(mem.svc_log(), vec![5, 0x123, 0]);
        assert_eq!(cpu.regs[0], 1);
        assert_eq!(r.pc, CODE + 16);
        assert_eq!(r.remaining, 100 - 4);
    }
}

#[test]
fn undefined_and_breakpoint_trap() {
    for mode in MODES {
        let (r, cpu, mem) = run_arm(mode, &[a32::mov_imm(0, 1), a32::udf(), a32::mov_imm(0, 2)], 100);
        assert_eq!(r.reason, HaltReason::Trap(ExceptionKind::Undefined));
        assert_eq!(r.pc, CODE + 4);
        assert_eq!(cpu.regs[0], 1);
        assert_eq!(r.remaining, 99);
        assert_eq!(
            mem.exception_log(),
            vec![ExceptionInfo {
                kind: ExceptionKind::Undefined,
                pc: CODE + 4,
                info: a32::udf(),
            }]
        );

        let (r, _, mem) = run_arm(mode, &[a32::bkpt(0x12), a32::svc(0)], 100);
        assert_eq!(r.reason, HaltReason::Trap(ExceptionKind::Bkpt));
        assert_eq!(r.pc, CODE);
        assert_eq!(mem.exception_log()[0].info, 0x12);
    }
}

#[test]
fn unsupported_encoding_traps_undefined() {
    let (r, _, mem) = run_arm(ExecMode::Compiled, &[a32::nop(), 0xee00_0a10], 100);
    assert_eq!(r.reason, HaltReason::Trap(ExceptionKind::Undefined));
    assert_eq!(mem.exception_log()[0].info, 0xee00_0a10);
    assert_eq!(r.pc, CODE + 4);
}

#[test]
fn resumed_exception_skips_instruction() {
    for mode in MODES {
        let (engine, mem) = engine(config(mode));
        mem.resume_exceptions.store(true, Ordering::SeqCst);
        mem.load_words(CODE, &[a32::udf(), a32::mov_imm(0, 2), a32::svc(0)]);
        let mut cpu = arm_cpu(CODE);
        let r = engine.dispatcher().run(&mut cpu, 100).unwrap();
        assert_eq!(r.reason, svc_halt());
        assert_eq!(cpu.regs[0], 2);
        assert_eq!(mem.exception_log().len(), 1);
    }
}

#[test]
fn data_abort_mid_block() {
    for mode in MODES {
        let code = [a32::mov_imm(0, 1), a32::ldr(1, 2, 0), a32::mov_imm(0, 2), a32::svc(0)];
        let mut cpu = arm_cpu(CODE);
        cpu.regs[2] = UNMAPPED;
        let (r, mem) = run_with(config(mode), &code, &mut cpu, 50);
        assert_eq!(r.reason, HaltReason::Trap(ExceptionKind::DataAbort));
        assert_eq!(r.pc, CODE + 4, "{mode:?}");
        assert_eq!(cpu.regs[0], 1);
        assert_eq!(r.remaining, 49);
        assert_eq!(mem.exception_log()[0].info, UNMAPPED);
    }
}

#[test]
fn store_fault_leaves_memory_unchanged() {
    for mode in MODES {
        let (engine, mem) = engine(config(mode));
        mem.add_fault(DATA..DATA + 4);
        let mut code = a32::mov32(1, DATA).to_vec();
        code.extend([a32::mov_imm(2, 7), a32::str(2, 1, 0), a32::svc(0)]);
        mem.load_words(CODE, &code);
        let mut cpu = arm_cpu(CODE);
        let r = engine.dispatcher().run(&mut cpu, 50).unwrap();
        assert_eq!(r.reason, HaltReason::Trap(ExceptionKind::DataAbort));
        assert_eq!(r.pc, CODE + 12);
        assert_eq!(mem.peek32(DATA), 0);
    }
}

#[test]
fn prefetch_abort() {
    for mode in MODES {
        let (r, _, mem) = run_arm(mode, &[a32::b(CODE, UNMAPPED)], 50);
        assert_eq!(r.reason, HaltReason::Trap(ExceptionKind::PrefetchAbort));
        assert_eq!(r.pc, UNMAPPED);
        assert_eq!(
            mem.exception_log(),
            vec![ExceptionInfo {
                kind: ExceptionKind::PrefetchAbort,
                pc: UNMAPPED,
                info: UNMAPPED,
            }]
        );
        // Only the branch executed.
        assert_eq!(r.remaining, 49);
    }
}

#[test]
fn alignment_checks() {
    for mode in MODES {
        let mut code = a32::mov32(1, DATA + 1).to_vec();
        code.extend([a32::ldr(0, 1, 0), a32::svc(0)]);

        let mut cpu = arm_cpu(CODE);
        let (engine, mem) = engine(config(mode));
        mem.load_words(DATA, &[0x4433_2211, 0x8877_6655]);
        mem.load_words(CODE, &code);
        let r = engine.dispatcher().run(&mut cpu, 50).unwrap();
        assert_eq!(r.reason, svc_halt());
        assert_eq!(cpu.regs[0], 0x5544_3322);

        let strict = JitConfig {
            strict_alignment: true,
            ..config(mode)
        };
        let mut cpu = arm_cpu(CODE);
        let (r, mem) = run_with(strict, &code, &mut cpu, 50);
        assert_eq!(r.reason, HaltReason::Trap(ExceptionKind::Alignment));
        assert_eq!(r.pc, CODE + 8);
        assert_eq!(mem.exception_log()[0].info, DATA + 1);
    }
}

#[test]
fn division() {
    for mode in MODES {
        let code = [a32::udiv(0, 1, 2), a32::sdiv(3, 4, 5), a32::sdiv(6, 7, 8), a32::svc(0)];
        let mut cpu = arm_cpu(CODE);
        cpu.regs[1] = 10;
        cpu.regs[2] = 0;
        cpu.regs[4] = -21i32 as u32;
        cpu.regs[5] = 4;
        cpu.regs[7] = i32::MIN as u32;
        cpu.regs[8] = -1i32 as u32;
        cpu.regs[0] = 99;
        let (r, _) = run_with(config(mode), &code, &mut cpu, 50);
        assert_eq!(r.reason, svc_halt());
        assert_eq!(cpu.regs[0], 0);
        assert_eq!(cpu.regs[3], -5i32 as u32);
        assert_eq!(cpu.regs[6], i32::MIN as u32);

        let trapping = JitConfig {
            div_by_zero_trap: true,
            ..config(mode)
        };
        let mut cpu = arm_cpu(CODE);
        cpu.regs[1] = 10;
        let (r, mem) = run_with(trapping, &code, &mut cpu, 50);
        assert_eq!(r.reason, HaltReason::Trap(ExceptionKind::DivideByZero));
        assert_eq!(r.pc, CODE);
        assert_eq!(mem.exception_log()[0].pc, CODE);
    }
}

// ── Self-modifying code ───────────────────────────────────────

#[test]
fn store_into_current_block() {
    for mode in MODES {
        let patched = a32::movw(0, 42);
        let mut code = a32::mov32(2, patched).to_vec();
        code.extend([
            a32::movw(3, CODE + 0x14),
            a32::nop(),
            a32::str(2, 3, 0),  // CODE + 0x10
            a32::movw(0, 1),    // CODE + 0x14
            a32::svc(0),
        ]);
        let (engine, mem) = engine(config(mode));
        mem.load_words(CODE, &code);
        let mut cpu = arm_cpu(CODE);
        let r = engine.dispatcher().run(&mut cpu, 100).unwrap();
        assert_eq!(r.reason, svc_halt());
        assert_eq!(cpu.regs[0], 42, "{mode:?}");
        assert_eq!(r.remaining, 100 - 7);
        assert!(engine.stats().invalidations >= 1);
        engine.cache().check_consistency().unwrap();
    }
}

#[test]
fn patched_callee_is_retranslated() {
    const F: u32 = 0x2000;
    const TAIL: u32 = 0x1100;
    for mode in MODES {
        let (engine, mem) = engine(config(mode));
        mem.load_words(CODE, &[a32::mov_imm(6, 2), a32::b(CODE + 4, F)]);
        mem.load_words(F, &[a32::mov_imm(0, 1), a32::add_reg(4, 4, 0), a32::b(F + 8, TAIL)]);
        let mut tail = a32::mov32(2, a32::mov_imm(0, 2)).to_vec();
        tail.extend([
            a32::movw(3, F),
            a32::str(2, 3, 0),
            a32::subs_imm(6, 6, 1),
            a32::b_cond(a32::NE, TAIL + 20, CODE + 4),
            a32::svc(0),
        ]);
        mem.load_words(TAIL, &tail);

        let mut cpu = arm_cpu(CODE);
        let r = engine.dispatcher().run(&mut cpu, 1000).unwrap();
        assert_eq!(r.reason, svc_halt());
        // First call ran the original, second the patched body.
        assert_eq!(cpu.regs[4], 3, "{mode:?}");
        assert!(engine.stats().invalidations >= 2);
        engine.cache().check_consistency().unwrap();
    }
}

#[test]
fn external_writes_need_invalidation() {
    for mode in MODES {
        let (engine, mem) = engine(config(mode));
        mem.load_words(CODE, &[a32::mov_imm(0, 1), a32::svc(0)]);
        let mut d = engine.dispatcher();

        let mut cpu = arm_cpu(CODE);
        d.run(&mut cpu, 10).unwrap();
        assert_eq!(cpu.regs[0], 1);

        // Written behind the engine's back: the old translation stays.
        mem.load_words(CODE, &[a32::mov_imm(0, 2)]);
        let mut cpu = arm_cpu(CODE);
        d.run(&mut cpu, 10).unwrap();
        assert_eq!(cpu.regs[0], 1);

        assert_eq!(engine.invalidate_range(CODE, 4).unwrap(), 1);
        let mut cpu = arm_cpu(CODE);
        d.run(&mut cpu, 10).unwrap();
        assert_eq!(cpu.regs[0], 2);
        assert_eq!(engine.stats().compiles, 2);
        assert_eq!(engine.invalidate_range(DATA, 0x100).unwrap(), 0);
    }
}

#[test]
fn flush_all_drops_every_block() {
    for mode in MODES {
        let (engine, mem) = engine(config(mode));
        mem.load_words(CODE, &countdown());
        let mut d = engine.dispatcher();
        let mut cpu = arm_cpu(CODE);
        d.run(&mut cpu, 1000).unwrap();
        assert_eq!(engine.stats().live_blocks, 3);

        assert_eq!(d.flush_all().unwrap(), 3);
        assert_eq!(engine.stats().live_blocks, 0);

        let mut cpu = arm_cpu(CODE);
        let r = d.run(&mut cpu, 1000).unwrap();
        assert_eq!(r.reason, svc_halt());
        assert_eq!(cpu.regs[1], 20);
        assert_eq!(engine.stats().compiles, 6);
        engine.cache().check_consistency().unwrap();
    }
}

#[test]
fn lru_eviction_bounds_live_blocks() {
    for mode in MODES {
        let limited = JitConfig {
            max_blocks: 4,
            ..config(mode)
        };
        let (engine, mem) = engine(limited);
        for i in 0..9 {
            let at = CODE + 0x100 * i;
            mem.load_words(at, &[a32::add_imm(0, 0, 1), a32::b(at + 4, at + 0x100)]);
        }
        mem.load_words(CODE + 0x900, &[a32::svc(0)]);

        let mut d = engine.dispatcher();
        for round in 1..=2 {
            let mut cpu = arm_cpu(CODE);
            let r = d.run(&mut cpu, 1000).unwrap();
            assert_eq!(r.reason, svc_halt());
            assert_eq!(cpu.regs[0], 9, "round {round}");
            let stats = engine.stats();
            assert!(stats.live_blocks <= 4);
            assert!(stats.evictions > 0);
            engine.cache().check_consistency().unwrap();
        }
    }
}

// ── Exclusives and endianness ─────────────────────────────────

#[test]
fn exclusive_pair() {
    for mode in MODES {
        let mut code = a32::mov32(1, DATA).to_vec();
        code.extend([
            a32::ldrex(0, 1),
            a32::add_imm(0, 0, 1),
            a32::strex(2, 0, 1),
            a32::strex(3, 0, 1), // reservation already consumed
            a32::svc(0),
        ]);
        let (engine, mem) = engine(config(mode));
        mem.load_words(DATA, &[41]);
        mem.load_words(CODE, &code);
        let mut cpu = arm_cpu(CODE);
        engine.dispatcher().run(&mut cpu, 100).unwrap();
        assert_eq!(mem.peek32(DATA), 42);
        assert_eq!(cpu.regs[2], 0, "{mode:?}");
        assert_eq!(cpu.regs[3], 1);
        assert_eq!(cpu.exclusive_state, 0);
    }
}

#[test]
fn exclusive_store_without_reservation_fails() {
    for mode in MODES {
        let mut code = a32::mov32(1, DATA).to_vec();
        code.extend([
            a32::mov_imm(0, 7),
            a32::strex(2, 0, 1),
            a32::ldrex(4, 1),
            a32::clrex(),
            a32::strex(3, 0, 1),
            a32::svc(0),
        ]);
        let (engine, mem) = engine(config(mode));
        mem.load_words(DATA, &[5]);
        mem.load_words(CODE, &code);
        let mut cpu = arm_cpu(CODE);
        engine.dispatcher().run(&mut cpu, 100).unwrap();
        assert_eq!(cpu.regs[2], 1);
        assert_eq!(cpu.regs[3], 1);
        assert_eq!(cpu.regs[4], 5);
        assert_eq!(mem.peek32(DATA), 5);
    }
}

#[test]
fn setend_switches_data_endianness() {
    for mode in MODES {
        let code = [
            a32::movw(1, DATA),
            a32::setend(true),
            a32::ldr(0, 1, 0),
            a32::str(0, 1, 4),
            a32::setend(false),
            a32::ldr(3, 1, 0),
            a32::svc(0),
        ];
        let (engine, mem) = engine(config(mode));
        mem.load_words(DATA, &[0x1122_3344]);
        mem.load_words(CODE, &code);
        let mut cpu = arm_cpu(CODE);
        let r = engine.dispatcher().run(&mut cpu, 100).unwrap();
        assert_eq!(r.reason, svc_halt());
        assert_eq!(cpu.regs[0], 0x4433_2211, "{mode:?}");
        assert_eq!(cpu.regs[3], 0x1122_3344);
        // Swapped on the way in and back out.
        assert_eq!(mem.peek32(DATA + 4), 0x1122_3344);
        assert_eq!(cpu.big_endian, 0);
    }
}

// ── Thumb ─────────────────────────────────────────────────────

#[test]
fn arm_thumb_interworking() {
    const T: u32 = 0x2000;
    for mode in MODES {
        let (engine, mem) = engine(config(mode));
        mem.load_words(CODE, &[a32::movw(1, T | 1), a32::blx(1), a32::add_imm(0, 0, 1), a32::svc(0)]);
        mem.load_halfwords(T, &[t16::movs(0, 7), t16::bx(14)]);
        let mut cpu = arm_cpu(CODE);
        let r = engine.dispatcher().run(&mut cpu, 100).unwrap();
        assert_eq!(r.reason, svc_halt());
        assert_eq!(cpu.regs[0], 8, "{mode:?}");
        assert_eq!(cpu.regs[14], CODE + 8);
        assert_eq!(cpu.thumb, 0);
        assert_eq!(r.pc, CODE + 16);
    }
}

#[test]
fn thumb_loop() {
    const T: u32 = 0x3000;
    for mode in MODES {
        let (engine, mem) = engine(config(mode));
        mem.load_halfwords(
            T,
            &[
                t16::movs(0, 0),
                t16::movs(1, 10),
                t16::adds_imm(0, 3),
                t16::subs_imm(1, 1),
                t16::b_cond(t16::NE, T + 8, T + 4),
                t16::svc(0),
            ],
        );
        let mut cpu = thumb_cpu(T);
        let r = engine.dispatcher().run(&mut cpu, 1000).unwrap();
        assert_eq!(r.reason, svc_halt());
        assert_eq!(cpu.regs[0], 30);
        assert_eq!(r.pc, T + 12);
        assert_eq!(r.remaining, 1000 - (2 + 30 + 1));
        assert_eq!(cpu.thumb, 1);
    }
}

#[test]
fn thumb_call_and_return() {
    const T: u32 = 0x3000;
    const F: u32 = 0x3100;
    for mode in MODES {
        let (engine, mem) = engine(config(mode));
        let [hw1, hw2] = t16::bl(T, F);
        mem.load_halfwords(T, &[hw1, hw2, t16::adds_reg(0, 0, 0), t16::svc(0)]);
        mem.load_halfwords(F, &[t16::push(0, true), t16::movs(0, 5), t16::pop(0, true)]);
        let mut cpu = thumb_cpu(T);
        let r = engine.dispatcher().run(&mut cpu, 100).unwrap();
        assert_eq!(r.reason, svc_halt());
        assert_eq!(cpu.regs[0], 10, "{mode:?}");
        assert_eq!(cpu.regs[14], (T + 4) | 1);
        assert_eq!(cpu.regs[13], 0x8_0000);
        assert_eq!(r.pc, T + 8);
    }
}

#[test]
fn thumb_compare_and_branch() {
    const T: u32 = 0x3000;
    for mode in MODES {
        let (engine, mem) = engine(config(mode));
        mem.load_halfwords(
            T,
            &[
                t16::cbz(false, 1, T, T + 6),
                t16::movs(0, 1),
                t16::svc(0),
                t16::movs(0, 2),
                t16::svc(0),
            ],
        );
        let mut cpu = thumb_cpu(T);
        engine.dispatcher().run(&mut cpu, 100).unwrap();
        assert_eq!(cpu.regs[0], 2);

        let mut cpu = thumb_cpu(T);
        cpu.regs[1] = 1;
        engine.dispatcher().run(&mut cpu, 100).unwrap();
        assert_eq!(cpu.regs[0], 1);
    }
}

// ── Sharing between dispatchers ───────────────────────────────

#[test]
fn dispatchers_share_translations() {
    let (engine, mem) = engine(config(ExecMode::Compiled));
    mem.load_words(CODE, &countdown());
    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let mut d = engine.dispatcher();
                for _ in 0..10 {
                    let mut cpu = arm_cpu(CODE);
                    let r = d.run(&mut cpu, 1000).unwrap();
                    assert_eq!(r.reason, svc_halt());
                    assert_eq!(cpu.regs[1], 20);
                }
            });
        }
    });
    let stats = engine.stats();
    assert_eq!(stats.live_blocks, 3);
    assert!(stats.hits > 0);
    engine.cache().check_consistency().unwrap();
}

#[test]
fn invalidation_during_execution() {
    for mode in MODES {
        let (engine, mem) = engine(config(mode));
        mem.load_words(
            CODE,
            &[
                a32::movw(0, 20_000),
                a32::mov_imm(1, 0),
                a32::add_imm(1, 1, 2),
                a32::subs_imm(0, 0, 1),
                a32::b_cond(a32::NE, CODE + 16, CODE + 8),
                a32::svc(0),
            ],
        );
        thread::scope(|s| {
            let runner = s.spawn(|| {
                let mut cpu = arm_cpu(CODE);
                let r = engine.dispatcher().run(&mut cpu, u64::MAX).unwrap();
                (r, cpu)
            });
            for _ in 0..200 {
                engine.invalidate_range(CODE, 0x20).unwrap();
                thread::yield_now();
            }
            let (r, cpu) = runner.join().unwrap();
            assert_eq!(r.reason, svc_halt());
            assert_eq!(cpu.regs[1], 40_000, "{mode:?}");
            assert_eq!(u64::MAX - r.remaining, 2 + 3 * 20_000 + 1);
        });
        engine.cache().reclaim().unwrap();
        engine.cache().check_consistency().unwrap();
    }
}
