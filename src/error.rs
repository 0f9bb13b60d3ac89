//! Error taxonomy and the process-wide last-error compatibility shim.
//!
//! Every engine operation has two surfaces: a raw-pointer entry point (which
//! writes [`set_last_error`] and returns a null sentinel on failure) and a
//! safe wrapper returning [`PoolResult`]. New code should prefer the latter;
//! the shim exists only for callers ported from the raw-pointer calling
//! convention this crate's engines grew out of.

use std::sync::atomic::{AtomicU8, Ordering};

/// The result type returned by every safe (non-raw-pointer) engine method.
pub type PoolResult<T> = Result<T, PoolError>;

/// Taxonomy of errors an engine can raise.
///
/// `PoolError` deliberately has no `Ok`-like variant: success is represented
/// by `Ok(_)` in [`PoolResult`] and by `POOL_OK` (discriminant `0`) in the
/// last-error shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// A required argument was null.
    #[error("a required pointer argument was null")]
    NullPtr,
    /// A payload pointer is out of range, misaligned, or addresses the
    /// interior of a block rather than its start.
    #[error("the pointer is out of range, misaligned, or not a block start")]
    InvalidPtr,
    /// A creation parameter was zero.
    #[error("a creation parameter was zero")]
    InvalidArgs,
    /// The system allocator returned null, the pool is full, or no free
    /// block satisfies the request.
    #[error("allocation failed: pool exhausted or fragmented")]
    AllocFailed,
    /// A traversed header's leading canary is neither `FREE` nor `USED`.
    #[error("a block header is damaged")]
    BlockDamaged,
}

impl PoolError {
    /// The symbolic name the original C library used for this error, kept
    /// around for callers that log/match on the string form.
    pub const fn as_str(self) -> &'static str {
        match self {
            PoolError::NullPtr => "POOL_NULL_PTR",
            PoolError::InvalidPtr => "POOL_INVALID_PTR",
            PoolError::InvalidArgs => "POOL_INVALID_ARGS",
            PoolError::AllocFailed => "POOL_ALLOC_FAILED",
            PoolError::BlockDamaged => "POOL_BLOCK_DAMAGED",
        }
    }

    const fn discriminant(self) -> u8 {
        match self {
            PoolError::NullPtr => 1,
            PoolError::InvalidPtr => 2,
            PoolError::InvalidArgs => 3,
            PoolError::AllocFailed => 4,
            PoolError::BlockDamaged => 5,
        }
    }

    const fn from_discriminant(value: u8) -> Option<Self> {
        match value {
            1 => Some(PoolError::NullPtr),
            2 => Some(PoolError::InvalidPtr),
            3 => Some(PoolError::InvalidArgs),
            4 => Some(PoolError::AllocFailed),
            5 => Some(PoolError::BlockDamaged),
            _ => None,
        }
    }
}

/// The symbolic name for "no error", matching the source's `str_errors[0]`.
pub const OK_STR: &str = "POOL_OK";

static LAST_ERROR: AtomicU8 = AtomicU8::new(0);

/// Overwrite the process-wide last-error slot.
///
/// Called at the start of every raw-pointer engine operation (with
/// `None`, clearing it) and again on failure (with `Some(err)`).
pub fn set_last_error(error: Option<PoolError>) {
    let value = error.map_or(0, PoolError::discriminant);
    LAST_ERROR.store(value, Ordering::SeqCst);
}

/// Read the process-wide last-error slot.
///
/// Returns `None` if the most recent raw-pointer operation succeeded.
pub fn last_error() -> Option<PoolError> {
    PoolError::from_discriminant(LAST_ERROR.load(Ordering::SeqCst))
}

/// The symbolic name of the current last-error value (`"POOL_OK"` if none).
pub fn last_error_str() -> &'static str {
    last_error().map_or(OK_STR, PoolError::as_str)
}

/// Serializes tests that assert on the process-wide last-error shim.
///
/// `cargo test` runs tests within one binary on multiple threads; without
/// this, two tests racing on [`LAST_ERROR`] would see each other's writes.
#[cfg(test)]
pub(crate) fn shim_test_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbolic_names_round_trip_the_source_table() {
        assert_eq!(PoolError::NullPtr.as_str(), "POOL_NULL_PTR");
        assert_eq!(PoolError::InvalidPtr.as_str(), "POOL_INVALID_PTR");
        assert_eq!(PoolError::InvalidArgs.as_str(), "POOL_INVALID_ARGS");
        assert_eq!(PoolError::AllocFailed.as_str(), "POOL_ALLOC_FAILED");
        assert_eq!(PoolError::BlockDamaged.as_str(), "POOL_BLOCK_DAMAGED");
    }

    #[test]
    fn shim_reflects_most_recent_call_only() {
        let _guard = shim_test_lock();
        set_last_error(Some(PoolError::AllocFailed));
        assert_eq!(last_error(), Some(PoolError::AllocFailed));
        assert_eq!(last_error_str(), "POOL_ALLOC_FAILED");

        set_last_error(None);
        assert_eq!(last_error(), None);
        assert_eq!(last_error_str(), "POOL_OK");
    }
}
