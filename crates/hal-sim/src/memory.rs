//! Device memory accounting.

use std::sync::atomic::{AtomicUsize, Ordering};

use hal_core::{BackendError, Result};

/// Capacity-limited pool of simulated device memory.
///
/// Only the byte counts are tracked here; the bytes themselves live in
/// each buffer's storage.
#[derive(Debug)]
pub struct DevicePool {
    capacity: usize,
    allocated: AtomicUsize,
}

impl DevicePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Claim `size` bytes, failing if that would exceed the capacity.
    pub fn reserve(&self, buft: &str, size: usize) -> Result<()> {
        let mut current = self.allocated.load(Ordering::Acquire);
        loop {
            let next = current
                .checked_add(size)
                .filter(|&next| next <= self.capacity)
                .ok_or_else(|| BackendError::AllocationFailure {
                    buft: buft.to_string(),
                    requested: size,
                    reason: format!(
                        "{} of {} bytes free",
                        self.capacity.saturating_sub(current),
                        self.capacity
                    ),
                })?;
            match self.allocated.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn release(&self, size: usize) {
        self.allocated.fetch_sub(size, Ordering::AcqRel);
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.allocated())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reserve_and_release() {
        let pool = DevicePool::new(1024);
        pool.reserve("SIM0", 1000).unwrap();
        assert_eq!(pool.free(), 24);
        let err = pool.reserve("SIM0", 100).unwrap_err();
        assert!(matches!(err, BackendError::AllocationFailure { requested: 100, .. }));
        pool.release(1000);
        assert_eq!(pool.allocated(), 0);
        pool.reserve("SIM0", 1024).unwrap();
    }

    #[test]
    fn test_concurrent_reservations_never_overcommit() {
        let pool = Arc::new(DevicePool::new(64 * 100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || (0..50).filter(|_| pool.reserve("SIM0", 64).is_ok()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 100);
        assert_eq!(pool.free(), 0);
    }
}
