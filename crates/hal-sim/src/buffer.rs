//! Device-private memory of a simulated accelerator.

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hal_core::{check_tensor_range, BackendError, BufferImpl, BufferTypeImpl, Result, Tensor};
use parking_lot::{Mutex, RwLock};

use crate::memory::DevicePool;

/// Quantized rows are padded to a multiple of this many elements so kernels
/// can read whole tiles past the end of a row.
pub const MATRIX_ROW_PADDING: usize = 512;

/// Device addresses handed out to simulated buffers. They are never
/// dereferenced, only reported by `base()`.
static NEXT_DEVICE_ADDR: AtomicUsize = AtomicUsize::new(0x1_0000_0000);
const DEVICE_PAGE: usize = 1 << 16;

fn next_device_addr(size: usize) -> usize {
    NEXT_DEVICE_ADDR.fetch_add(hal_core::align_up(size.max(1), DEVICE_PAGE), Ordering::Relaxed)
}

/// Bytes `tensor` occupies in device memory, padding included.
pub fn padded_size(tensor: &Tensor) -> usize {
    let nbytes = tensor.nbytes();
    let dtype = tensor.dtype();
    let row_len = tensor.shape().row_len();
    if !dtype.is_quantized() || row_len % MATRIX_ROW_PADDING == 0 {
        return nbytes;
    }
    nbytes + dtype.row_size(MATRIX_ROW_PADDING - row_len % MATRIX_ROW_PADDING)
}

pub struct SimBufferType {
    name: String,
    alignment: usize,
    pool: Arc<DevicePool>,
}

impl SimBufferType {
    pub fn new(name: impl Into<String>, alignment: usize, pool: Arc<DevicePool>) -> Self {
        SimBufferType {
            name: name.into(),
            alignment,
            pool,
        }
    }
}

impl BufferTypeImpl for SimBufferType {
    fn name(&self) -> &str {
        &self.name
    }

    fn alloc_buffer(&self, size: usize) -> Result<Box<dyn BufferImpl>> {
        Ok(Box::new(SimBuffer::new(&self.name, size, Arc::clone(&self.pool))?))
    }

    fn alignment(&self) -> usize {
        self.alignment
    }

    fn max_size(&self) -> usize {
        self.pool.capacity()
    }

    fn alloc_size(&self, tensor: &Tensor) -> usize {
        padded_size(tensor)
    }
}

/// A buffer in simulated device memory. Its capacity is returned to the
/// device pool on drop.
pub struct SimBuffer {
    data: RwLock<Vec<u8>>,
    base: usize,
    pool: Arc<DevicePool>,
    // offsets of tensors initialized since the last reset
    initialized: Mutex<BTreeSet<usize>>,
}

impl SimBuffer {
    fn new(buft: &str, size: usize, pool: Arc<DevicePool>) -> Result<Self> {
        pool.reserve(buft, size)?;
        let mut data = Vec::new();
        if let Err(e) = data.try_reserve_exact(size) {
            pool.release(size);
            return Err(BackendError::AllocationFailure {
                buft: buft.to_string(),
                requested: size,
                reason: e.to_string(),
            });
        }
        data.resize(size, 0);
        tracing::debug!("{buft}: allocated {size} bytes, {} free", pool.free());
        Ok(SimBuffer {
            data: RwLock::new(data),
            base: next_device_addr(size),
            pool,
            initialized: Mutex::new(BTreeSet::new()),
        })
    }

    /// Number of tensors initialized since the last reset.
    pub fn initialized_tensors(&self) -> usize {
        self.initialized.lock().len()
    }

    fn same_device(&self, other: &SimBuffer) -> bool {
        Arc::ptr_eq(&self.pool, &other.pool)
    }
}

impl Drop for SimBuffer {
    fn drop(&mut self) {
        self.pool.release(self.data.get_mut().len());
    }
}

impl BufferImpl for SimBuffer {
    fn base(&self) -> usize {
        self.base
    }

    /// Zero the row padding so padded reads see no stale data.
    fn init_tensor(&self, tensor: &Tensor, offset: usize) -> Result<()> {
        let start = offset + tensor.nbytes();
        let mut data = self.data.write();
        let end = (offset + padded_size(tensor)).min(data.len());
        if start < end {
            data[start..end].fill(0);
        }
        self.initialized.lock().insert(offset);
        Ok(())
    }

    fn memset(&self, offset: usize, value: u8, len: usize) -> Result<()> {
        self.data.write()[offset..offset + len].fill(value);
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.data.write()[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        out.copy_from_slice(&self.data.read()[offset..offset + out.len()]);
        Ok(())
    }

    /// Device-local copy between two buffers of the same device.
    fn cpy_tensor(&self, src: &Tensor, dst: &Tensor) -> Result<bool> {
        let (Some(placement), Some(dst_at)) = (src.placement(), dst.offset()) else {
            return Ok(false);
        };
        let Some(other) = placement.buffer.downcast_ref::<SimBuffer>() else {
            return Ok(false);
        };
        if !self.same_device(other) {
            return Ok(false);
        }
        let len = dst.nbytes();
        check_tensor_range(src, 0, len)?;
        let from = placement.offset..placement.offset + len;
        if std::ptr::eq(self, other) {
            self.data.write().copy_within(from, dst_at);
        } else {
            let staged = other.data.read()[from].to_vec();
            self.data.write()[dst_at..dst_at + len].copy_from_slice(&staged);
        }
        Ok(true)
    }

    fn clear(&self, value: u8) -> Result<()> {
        self.data.write().fill(value);
        Ok(())
    }

    fn reset(&self) {
        self.initialized.lock().clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal_core::{tensor_copy, tensor_read, tensor_set, BufferType, DType};

    fn buft(capacity: usize) -> (BufferType, Arc<DevicePool>) {
        let pool = Arc::new(DevicePool::new(capacity));
        (
            BufferType::new(SimBufferType::new("SIM0", 256, Arc::clone(&pool))),
            pool,
        )
    }

    #[test]
    fn test_quantized_rows_are_padded() {
        let (buft, _) = buft(1 << 20);
        let q = Tensor::new("q", DType::Q4_0, vec![4, 96]);
        // 4 rows of 3 blocks, plus padding of 416 elements = 13 blocks
        assert_eq!(q.nbytes(), 4 * 3 * 18);
        assert_eq!(padded_size(&q), 4 * 3 * 18 + 13 * 18);
        assert_eq!(buft.alloc_size(&q), hal_core::align_up(padded_size(&q), 256));

        let aligned = Tensor::new("q", DType::Q8_0, vec![2, 512]);
        assert_eq!(padded_size(&aligned), aligned.nbytes());
        let f = Tensor::new("f", DType::F32, vec![3, 100]);
        assert_eq!(padded_size(&f), 1200);
    }

    #[test]
    fn test_capacity_accounting() {
        let (buft, pool) = buft(4096);
        assert!(!buft.is_host());
        let a = buft.alloc_buffer(3000).unwrap();
        assert_eq!(pool.free(), 1096);
        assert!(matches!(
            buft.alloc_buffer(2000),
            Err(BackendError::AllocationFailure { .. })
        ));
        drop(a);
        assert_eq!(pool.free(), 4096);
        assert!(buft.alloc_buffer(4096).is_ok());
    }

    #[test]
    fn test_init_zeroes_padding() {
        let (buft, _) = buft(1 << 20);
        let buf = buft.alloc_buffer(4096).unwrap();
        buf.clear(0xff).unwrap();
        let mut q = Tensor::new("q", DType::Q8_0, vec![1, 32]);
        buf.alloc_tensor(&mut q, 256).unwrap();

        let sim = buf.downcast_ref::<SimBuffer>().unwrap();
        assert_eq!(sim.initialized_tensors(), 1);
        let data = sim.data.read();
        assert!(data[256..256 + 34].iter().all(|&b| b == 0xff));
        assert!(data[256 + 34..256 + padded_size(&q)].iter().all(|&b| b == 0));
        drop(data);

        buf.reset();
        assert_eq!(sim.initialized_tensors(), 0);
    }

    #[test]
    fn test_reset_twice_then_reuse() {
        let (buft, pool) = buft(1 << 20);
        let buf = buft.alloc_buffer(2048).unwrap();
        let sim = buf.downcast_ref::<SimBuffer>().unwrap();
        let mut a = Tensor::new("a", DType::F32, vec![64]);
        let mut b = Tensor::new("b", DType::F32, vec![64]);
        buf.alloc_tensor(&mut a, 0).unwrap();
        buf.alloc_tensor(&mut b, 256).unwrap();
        assert_eq!(sim.initialized_tensors(), 2);

        buf.reset();
        assert_eq!(sim.initialized_tensors(), 0);
        buf.reset();
        assert_eq!(sim.initialized_tensors(), 0);
        assert_eq!(pool.free(), (1 << 20) - 2048);

        // a fresh layout over the same memory
        let mut c = Tensor::new("c", DType::F32, vec![128]);
        buf.alloc_tensor(&mut c, 1024).unwrap();
        assert_eq!(sim.initialized_tensors(), 1);
        let data: Vec<u8> = (0..=255).cycle().take(512).collect();
        tensor_set(&c, &data, 0).unwrap();
        assert_eq!(tensor_read(&c).unwrap(), data);
    }

    #[test]
    fn test_device_local_copy() {
        let (buft, _) = buft(1 << 20);
        let a = buft.alloc_buffer(1024).unwrap();
        let b = buft.alloc_buffer(1024).unwrap();
        assert_ne!(a.base(), b.base());
        let mut src = Tensor::new("src", DType::F32, vec![16]);
        let mut dst = Tensor::new("dst", DType::F32, vec![16]);
        a.alloc_tensor(&mut src, 0).unwrap();
        b.alloc_tensor(&mut dst, 512).unwrap();
        let data: Vec<u8> = (0..64).collect();
        tensor_set(&src, &data, 0).unwrap();

        assert!(b.cpy_tensor(&src, &dst).unwrap());
        assert_eq!(tensor_read(&dst).unwrap(), data);

        // another device's buffer has no direct path
        let (other, _) = self::buft(1 << 20);
        let c = other.alloc_buffer(1024).unwrap();
        let mut far = Tensor::new("far", DType::F32, vec![16]);
        c.alloc_tensor(&mut far, 0).unwrap();
        assert!(!c.cpy_tensor(&src, &far).unwrap());
        tensor_copy(&src, &far).unwrap();
        assert_eq!(tensor_read(&far).unwrap(), data);
    }
}
