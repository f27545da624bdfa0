use std::io;

use dbt_backend::BackendError;
use dbt_core::IrError;
use thiserror::Error;

/// Errors returned by the engine.
///
/// Guest-visible faults never appear here: they are delivered through
/// the exception callback. What remains are configuration mistakes,
/// resource exhaustion and internal invariant violations.
#[derive(Debug, Error)]
pub enum JitError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("cannot map the code region")]
    CodeRegionMap(#[source] io::Error),

    /// Even a one-instruction block at `pc` does not fit the limits.
    #[error("translation limit exceeded at {pc:#010x} with a single-instruction block")]
    TranslationLimitExceeded {
        pc: u32,
        #[source]
        source: BackendError,
    },

    /// Fatal: the cache is poisoned and every later run fails.
    #[error("block cache consistency violation: {0}")]
    CacheConsistencyViolation(String),

    #[error("code region exhausted: {requested} bytes requested, none reclaimable")]
    CodeRegionExhausted { requested: usize },

    #[error("backend failure")]
    Backend(#[from] BackendError),

    #[error("IR failure")]
    Ir(#[from] IrError),
}
