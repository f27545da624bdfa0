//! Execution engine: block cache, compile pipeline and dispatcher.
//!
//! The dispatcher runs the lookup, translate, execute cycle. Blocks
//! live in a cache shared between dispatchers; direct branches are
//! chained by patching jumps in host code, and guest stores into
//! translated code invalidate the affected blocks synchronously.

pub mod cache;
pub mod callbacks;
pub mod code_alloc;
pub mod code_pages;
pub mod compile;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod epoch;
pub mod error;
pub mod helpers;

pub use cache::{BlockCache, BlockCode, CacheStats, CompiledBlock};
pub use callbacks::{Callbacks, ExceptionInfo, MemoryFault, TrapAction};
pub use compile::{translate_config, CallbackFetch};
pub use config::{ExecMode, JitConfig};
pub use dispatch::{Dispatcher, HaltHandle, HaltReason, RunResult};
pub use engine::Engine;
pub use error::JitError;
pub use helpers::helper_table;
