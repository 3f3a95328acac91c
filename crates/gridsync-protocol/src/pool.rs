//! Object pools with scoped release.
//!
//! [`Pool::get`] hands out a [`Pooled`] guard. Dropping the guard recycles
//! the value and returns it to the pool, so a buffer cannot leak out of the
//! pool on an early return or an error path. Pools are owned by whoever
//! builds the server and shared through `Clone` (an `Arc` inside).

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

/// A value that can be cleared for reuse.
pub trait Recycle: Send + 'static {
    /// Resets the value to an empty state, keeping its allocations.
    fn recycle(&mut self);
}

impl<T: Send + 'static> Recycle for Vec<T> {
    fn recycle(&mut self) {
        self.clear();
    }
}

impl Recycle for crate::Snapshot {
    fn recycle(&mut self) {
        self.seqnum = 0;
        self.center = crate::Position::default();
        self.pieces.clear();
    }
}

struct PoolInner<T> {
    idle: Mutex<Vec<T>>,
    max_idle: usize,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

/// A bounded pool of reusable values.
pub struct Pool<T: Recycle> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Recycle> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Recycle + Default> Pool<T> {
    /// Creates a pool that builds new values with `T::default()` and keeps
    /// at most `max_idle` values around.
    pub fn new(max_idle: usize) -> Self {
        Self::with_factory(max_idle, T::default)
    }
}

impl<T: Recycle> Pool<T> {
    /// Creates a pool with a custom constructor.
    pub fn with_factory(
        max_idle: usize,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                max_idle,
                factory: Box::new(factory),
            }),
        }
    }

    /// Borrows a value, building a new one if the pool is empty.
    pub fn get(&self) -> Pooled<T> {
        let value = self
            .inner
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| (self.inner.factory)());
        Pooled {
            value: Some(value),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of values currently waiting in the pool.
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }
}

/// A value borrowed from a [`Pool`]. Returned on drop.
pub struct Pooled<T: Recycle> {
    // Always `Some` until `drop` takes it.
    value: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("pooled value present until drop")
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("pooled value present until drop")
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(mut value) = self.value.take() {
            value.recycle();
            let mut idle = self.pool.idle.lock();
            if idle.len() < self.pool.max_idle {
                idle.push(value);
            }
        }
    }
}

impl<T: Recycle + std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pooled").field(&**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_from_empty_pool_builds_new_value() {
        let pool: Pool<Vec<u8>> = Pool::new(4);
        let buf = pool.get();
        assert!(buf.is_empty());
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_drop_returns_recycled_value_to_pool() {
        let pool: Pool<Vec<u8>> = Pool::new(4);
        {
            let mut buf = pool.get();
            buf.extend_from_slice(&[1, 2, 3]);
        }
        assert_eq!(pool.idle(), 1);

        // The recycled buffer is empty but keeps its capacity.
        let buf = pool.get();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 3);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_drop_beyond_max_idle_discards_value() {
        let pool: Pool<Vec<u8>> = Pool::new(1);
        let a = pool.get();
        let b = pool.get();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_with_factory_uses_custom_constructor() {
        let pool = Pool::with_factory(2, || Vec::<u32>::with_capacity(64));
        let buf = pool.get();
        assert!(buf.capacity() >= 64);
    }

    #[test]
    fn test_pool_clone_shares_storage() {
        let pool: Pool<Vec<u8>> = Pool::new(4);
        let other = pool.clone();
        drop(other.get());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_snapshot_recycle_clears_pieces() {
        let pool: Pool<crate::Snapshot> = Pool::new(2);
        {
            let mut snap = pool.get();
            snap.seqnum = 9;
            snap.pieces.push(crate::PieceData {
                id: crate::PieceId(1),
                kind: crate::PieceKind::Pawn,
                side: crate::Side::White,
                position: crate::Position::new(0, 0),
                move_count: 0,
                capture_count: 0,
            });
        }
        let snap = pool.get();
        assert_eq!(snap.seqnum, 0);
        assert!(snap.pieces.is_empty());
    }
}
