//! Process-wide schema cache (C8).
//!
//! A single mutex protects one opaque blob produced by introspecting the
//! cluster's schema. The cache holds no structured view of its own; it
//! only remembers whether a blob has already been built.

use std::sync::Mutex;

/// Guards one opaque, lazily-built schema blob shared by every worker.
#[derive(Debug, Default)]
pub struct SchemaCache {
    blob: Mutex<Option<Vec<u8>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached blob, building it with `build` on a miss. `build`
    /// runs under the lock, so concurrent callers serialize on the first
    /// introspection rather than racing to build duplicate blobs.
    pub fn read_or_build<E>(&self, build: impl FnOnce() -> Result<Vec<u8>, E>) -> Result<Vec<u8>, E> {
        let mut guard = self.blob.lock().unwrap_or_else(|poison| poison.into_inner());
        if let Some(blob) = guard.as_ref() {
            return Ok(blob.clone());
        }
        let blob = build()?;
        *guard = Some(blob.clone());
        Ok(blob)
    }

    /// Drops the cached blob. Always succeeds; the next `read_or_build`
    /// re-materializes it.
    pub fn clear(&self) {
        let mut guard = self.blob.lock().unwrap_or_else(|poison| poison.into_inner());
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn builds_once_then_reuses() {
        let cache = SchemaCache::new();
        let calls = AtomicUsize::new(0);
        let build = || -> Result<Vec<u8>, ()> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1, 2, 3])
        };
        assert_eq!(cache.read_or_build(build).unwrap(), vec![1, 2, 3]);
        assert_eq!(cache.read_or_build(build).unwrap(), vec![1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_forces_rebuild() {
        let cache = SchemaCache::new();
        let calls = AtomicUsize::new(0);
        let build = || -> Result<Vec<u8>, ()> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![calls.load(Ordering::SeqCst) as u8])
        };
        assert_eq!(cache.read_or_build(build).unwrap(), vec![1]);
        cache.clear();
        assert_eq!(cache.read_or_build(build).unwrap(), vec![2]);
    }

    #[test]
    fn clear_before_any_build_is_a_no_op() {
        let cache = SchemaCache::new();
        cache.clear();
        cache.clear();
    }
}
