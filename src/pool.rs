//! Surface resource pool: fixed-shape frame buffer reuse for video decode.
//!
//! Continuous decode would otherwise allocate and free one full frame per
//! tick. The pool keeps free lists keyed by dimensions; `acquire` hands out a
//! matching buffer or allocates a fresh one, and the returned `SurfaceLease`
//! gives the buffer back on Drop — on every exit path, including a decode
//! failure mid-frame.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Width/height pair identifying a buffer shape.
pub type Dimensions = (u32, u32);

const BYTES_PER_PIXEL: usize = 4; // RGBA

struct PoolInner {
    free: HashMap<Dimensions, Vec<Vec<u8>>>,
}

/// Reuse pool for RGBA frame buffers.
pub struct SurfacePool {
    inner: Mutex<PoolInner>,
    /// Free-list cap per dimension set, bounding worst-case memory when
    /// dimensions vary across files.
    max_free_per_dims: usize,
}

impl SurfacePool {
    pub fn new(max_free_per_dims: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PoolInner { free: HashMap::new() }),
            max_free_per_dims: max_free_per_dims.max(1),
        })
    }

    /// Acquire a buffer sized for `width`×`height` RGBA pixels.
    ///
    /// Reuses a free buffer when one matches; otherwise allocates. Allocation
    /// has no hard ceiling — a pool that cannot satisfy the request from its
    /// free lists falls back to a one-off allocation rather than failing the
    /// frame.
    pub fn acquire(self: &Arc<Self>, width: u32, height: u32) -> SurfaceLease {
        let dims = (width, height);
        let len = width as usize * height as usize * BYTES_PER_PIXEL;

        let buffer = {
            let mut inner = self.inner.lock().unwrap();
            inner.free.get_mut(&dims).and_then(|list| list.pop())
        };
        let buffer = buffer.unwrap_or_else(|| vec![0u8; len]);

        SurfaceLease {
            pool: Arc::clone(self),
            dims,
            buffer: Some(buffer),
        }
    }

    /// Number of free buffers held for the given dimensions.
    pub fn free_count(&self, width: u32, height: u32) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.free.get(&(width, height)).map_or(0, |l| l.len())
    }

    fn release(&self, dims: Dimensions, buffer: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        let list = inner.free.entry(dims).or_default();
        if list.len() < self.max_free_per_dims {
            list.push(buffer);
        }
        // Over the cap the buffer just drops; dimensions changed mid-stream
        // and the old shape is not worth hoarding.
    }
}

/// Scoped ownership of one pooled buffer. Deref to the pixel bytes.
pub struct SurfaceLease {
    pool: Arc<SurfacePool>,
    dims: Dimensions,
    buffer: Option<Vec<u8>>,
}

impl SurfaceLease {
    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }
}

impl std::ops::Deref for SurfaceLease {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().expect("lease buffer present until drop")
    }
}

impl std::ops::DerefMut for SurfaceLease {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().expect("lease buffer present until drop")
    }
}

impl Drop for SurfaceLease {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(self.dims, buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_restores_free_list() {
        let pool = SurfacePool::new(8);
        let leases: Vec<_> = (0..4).map(|_| pool.acquire(320, 240)).collect();
        assert_eq!(pool.free_count(320, 240), 0);
        drop(leases);
        assert_eq!(pool.free_count(320, 240), 4);

        // Reacquire: free list shrinks, no fresh allocation needed.
        let lease = pool.acquire(320, 240);
        assert_eq!(pool.free_count(320, 240), 3);
        assert_eq!(lease.len(), 320 * 240 * 4);
    }

    #[test]
    fn release_happens_on_decode_failure_path() {
        let pool = SurfacePool::new(8);

        fn failing_decode(mut frame: crate::pool::SurfaceLease) -> anyhow::Result<()> {
            frame[0] = 0xff;
            anyhow::bail!("corrupt frame")
        }

        let lease = pool.acquire(64, 64);
        assert!(failing_decode(lease).is_err());
        assert_eq!(pool.free_count(64, 64), 1, "buffer leaked on error path");
    }

    #[test]
    fn free_list_is_capped_per_dimensions() {
        let pool = SurfacePool::new(2);
        let leases: Vec<_> = (0..5).map(|_| pool.acquire(16, 16)).collect();
        drop(leases);
        assert_eq!(pool.free_count(16, 16), 2);
    }

    #[test]
    fn dimensions_are_kept_separate() {
        let pool = SurfacePool::new(8);
        drop(pool.acquire(100, 100));
        drop(pool.acquire(200, 200));
        assert_eq!(pool.free_count(100, 100), 1);
        assert_eq!(pool.free_count(200, 200), 1);

        let lease = pool.acquire(100, 100);
        assert_eq!(lease.dimensions(), (100, 100));
        assert_eq!(pool.free_count(200, 200), 1);
    }
}
