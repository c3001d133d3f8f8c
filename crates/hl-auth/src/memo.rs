//! Lazily computed value with an explicit staleness flag.

use std::sync::Arc;

/// A cached value that is recomputed on the next read after it is
/// invalidated (or when it was never computed).
///
/// `Memo` itself is not synchronized; owners keep it behind the same lock
/// as the inputs the value is derived from, so check-then-compute is atomic.
#[derive(Debug)]
pub struct Memo<T> {
    value: Option<Arc<T>>,
    stale: bool,
}

impl<T> Memo<T> {
    pub fn new() -> Self {
        Self {
            value: None,
            stale: false,
        }
    }

    /// Force recomputation on the next [`Memo::get_or_try_init`].
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    pub fn needs_refresh(&self) -> bool {
        self.value.is_none() || self.stale
    }

    /// Return the cached value, computing it first if absent or stale.
    ///
    /// If `init` fails the previous value is kept but stays stale, so the
    /// next call retries. Readers holding an `Arc` from an earlier call are
    /// unaffected by a refresh.
    pub fn get_or_try_init<E>(&mut self, init: impl FnOnce() -> Result<T, E>) -> Result<Arc<T>, E> {
        if let Some(value) = &self.value {
            if !self.stale {
                return Ok(Arc::clone(value));
            }
        }

        let value = Arc::new(init()?);
        self.value = Some(Arc::clone(&value));
        self.stale = false;
        Ok(value)
    }
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self::new()
    }
}
