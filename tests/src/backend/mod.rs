//! Backend tests run each block through both the x86-64 code
//! generator and the IR interpreter and compare guest state.

mod translate;

use dbt_backend::{BackendError, CodeBuffer, HostCodeGen, TranslateOptions, TranslatedCode, X86_64CodeGen};
use dbt_core::interp::interpret;
use dbt_core::temp::TempIdx;
use dbt_core::{Context, IrError, Type};

pub const NREGS: usize = 8;

/// Guest state the test blocks run against.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Env {
    pub regs: [u32; NREGS],
    pub wide: [u64; 2],
}

pub struct Globals {
    pub env: TempIdx,
    pub regs: [TempIdx; NREGS],
    pub wide: [TempIdx; 2],
}

const NAMES: [&str; NREGS] = ["r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7"];

/// Fresh context with the backend's frame layout and the `Env` globals.
pub fn context(backend: &X86_64CodeGen) -> (Context, Globals) {
    let mut ctx = Context::new();
    backend.init_context(&mut ctx);
    let env = ctx.new_fixed(Type::I64, dbt_backend::x86_64::regs::AREG0 as u8, "env");
    let regs = std::array::from_fn(|i| ctx.new_global(Type::I32, env, 4 * i as i64, NAMES[i]));
    let wide = [
        ctx.new_global(Type::I64, env, 32, "w0"),
        ctx.new_global(Type::I64, env, 40, "w1"),
    ];
    (ctx, Globals { env, regs, wide })
}

type Prologue = unsafe extern "C" fn(*mut u8, *const u8) -> u64;

/// A code region with the shared prologue and epilogue in place.
pub struct Jit {
    pub backend: X86_64CodeGen,
    pub buf: CodeBuffer,
}

impl Jit {
    pub fn new() -> Self {
        let mut backend = X86_64CodeGen::new();
        let mut buf = CodeBuffer::new(1 << 20).unwrap();
        backend.emit_prologue(&mut buf);
        backend.emit_epilogue(&mut buf);
        Self { backend, buf }
    }

    pub fn compile(&mut self, ctx: &mut Context, opts: TranslateOptions) -> Result<TranslatedCode, BackendError> {
        dbt_backend::translate(ctx, &self.backend, &mut self.buf, opts)
    }

    /// Enter compiled code at `code.start`.
    pub fn execute(&self, code: &TranslatedCode, env: &mut Env) -> u64 {
        unsafe {
            let prologue: Prologue = std::mem::transmute(self.buf.ptr_at(self.backend.prologue_offset()));
            prologue(env as *mut Env as *mut u8, self.buf.ptr_at(code.start))
        }
    }

    /// Compile and run the block in `ctx`.
    pub fn run(&mut self, ctx: &mut Context, env: &mut Env) -> u64 {
        let code = self.compile(ctx, TranslateOptions::default()).unwrap();
        self.execute(&code, env)
    }
}

pub fn interp(ctx: &Context, env: &mut Env) -> Result<u64, IrError> {
    unsafe { interpret(ctx, env as *mut Env as *mut u8) }
}

/// Run the block both ways from `init`; panics when they disagree.
pub fn run_both(ctx: &mut Context, init: Env) -> (u64, Env) {
    let mut ienv = init;
    let iexit = interp(ctx, &mut ienv).unwrap();
    let mut jit = Jit::new();
    let mut cenv = init;
    let cexit = jit.run(ctx, &mut cenv);
    assert_eq!(iexit, cexit, "exit values differ");
    assert_eq!(ienv, cenv, "guest state differs");
    (cexit, cenv)
}
