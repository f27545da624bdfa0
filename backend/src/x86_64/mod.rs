pub mod codegen;
pub mod constraints;
pub mod emitter;
pub mod regs;

pub use codegen::X86_64CodeGen;
pub use regs::Reg;
