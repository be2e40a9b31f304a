//! Helper traits to simplify the common patterns in the crate.

use std::sync::{LockResult, PoisonError};

/// Extension trait for taking std locks without poison ceremony.
///
/// A poisoned mutex means another thread panicked while holding it; the data
/// guarded here (channels, state flags) stays consistent across panics, so
/// the guard is recovered rather than propagated as a second error.
pub trait LockResultExt {
    /// The guard type produced by the lock.
    type Guard;

    /// Return the guard whether or not the lock was poisoned.
    fn ignore_poison(self) -> Self::Guard;
}

impl<G> LockResultExt for LockResult<G> {
    type Guard = G;

    fn ignore_poison(self) -> G {
        self.unwrap_or_else(PoisonError::into_inner)
    }
}
