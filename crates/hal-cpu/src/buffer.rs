//! Host memory buffers.

use std::any::Any;

use hal_core::{
    check_tensor_range, BackendError, BufferImpl, BufferTypeImpl, HostRegion, Result, Tensor,
};
use parking_lot::RwLock;

pub const CPU_BUFFER_TYPE_NAME: &str = "CPU";

/// Plain host heap memory.
#[derive(Debug, Clone)]
pub struct CpuBufferType {
    name: String,
    alignment: usize,
    max_size: usize,
}

impl CpuBufferType {
    pub fn new(alignment: usize, max_size: usize) -> Self {
        CpuBufferType::named(CPU_BUFFER_TYPE_NAME, alignment, max_size)
    }

    /// Host memory under another name, e.g. the staging buffer type of an
    /// off-host device.
    pub fn named(name: impl Into<String>, alignment: usize, max_size: usize) -> Self {
        CpuBufferType {
            name: name.into(),
            alignment,
            max_size,
        }
    }
}

impl BufferTypeImpl for CpuBufferType {
    fn name(&self) -> &str {
        &self.name
    }

    fn alloc_buffer(&self, size: usize) -> Result<Box<dyn BufferImpl>> {
        Ok(Box::new(CpuBuffer::new(&self.name, size, self.alignment)?))
    }

    fn alignment(&self) -> usize {
        self.alignment
    }

    fn max_size(&self) -> usize {
        self.max_size
    }

    fn is_host(&self) -> bool {
        true
    }
}

/// Heap region whose first byte is aligned to the buffer type's alignment.
pub struct CpuBuffer {
    data: RwLock<Vec<u8>>,
    // index of the first aligned byte in `data`
    start: usize,
    size: usize,
}

impl CpuBuffer {
    fn new(buft: &str, size: usize, alignment: usize) -> Result<Self> {
        let fail = |reason: String| BackendError::AllocationFailure {
            buft: buft.to_string(),
            requested: size,
            reason,
        };
        let padded = size
            .checked_add(alignment)
            .ok_or_else(|| fail(format!("{size} bytes plus {alignment} alignment overflows")))?;
        let mut data = Vec::new();
        data.try_reserve_exact(padded).map_err(|e| fail(e.to_string()))?;
        data.resize(padded, 0);
        let addr = data.as_ptr() as usize;
        let start = hal_core::align_up(addr, alignment) - addr;
        Ok(CpuBuffer {
            data: RwLock::new(data),
            start,
            size,
        })
    }

    fn range(&self, offset: usize, len: usize) -> std::ops::Range<usize> {
        self.start + offset..self.start + offset + len
    }

    /// Copy `len` bytes at `src_at` in `src` to `dst_at` in `self`.
    fn copy_from(&self, src: &CpuBuffer, src_at: usize, dst_at: usize, len: usize) {
        if std::ptr::eq(self, src) {
            let from = self.range(src_at, len);
            self.data.write().copy_within(from, self.start + dst_at);
            return;
        }
        // Lock in address order so two opposite copies cannot deadlock.
        let src_first = (src as *const CpuBuffer as usize) < (self as *const CpuBuffer as usize);
        let (src_guard, mut dst_guard) = if src_first {
            let s = src.data.read();
            (s, self.data.write())
        } else {
            let d = self.data.write();
            (src.data.read(), d)
        };
        dst_guard[self.range(dst_at, len)].copy_from_slice(&src_guard[src.range(src_at, len)]);
    }
}

impl BufferImpl for CpuBuffer {
    fn base(&self) -> usize {
        self.data.read().as_ptr() as usize + self.start
    }

    fn memset(&self, offset: usize, value: u8, len: usize) -> Result<()> {
        let range = self.range(offset, len);
        self.data.write()[range].fill(value);
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let range = self.range(offset, data.len());
        self.data.write()[range].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        out.copy_from_slice(&self.data.read()[self.range(offset, out.len())]);
        Ok(())
    }

    /// Direct copy when the source also lives in plain host memory.
    fn cpy_tensor(&self, src: &Tensor, dst: &Tensor) -> Result<bool> {
        let (Some(placement), Some(dst_at)) = (src.placement(), dst.offset()) else {
            return Ok(false);
        };
        let len = dst.nbytes();
        check_tensor_range(src, 0, len)?;
        if let Some(cpu) = placement.buffer.downcast_ref::<CpuBuffer>() {
            self.copy_from(cpu, placement.offset, dst_at, len);
            return Ok(true);
        }
        if let Some(host) = placement.buffer.downcast_ref::<HostPtrBuffer>() {
            let bytes = &host.region.as_bytes()[placement.offset..placement.offset + len];
            self.write(dst_at, bytes)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn clear(&self, value: u8) -> Result<()> {
        let range = self.range(0, self.size);
        self.data.write()[range].fill(value);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Read-only view of externally owned host memory. Dropping the buffer
/// releases its handle on the region and nothing else.
pub struct HostPtrBuffer {
    region: HostRegion,
    name: String,
}

impl HostPtrBuffer {
    pub fn new(region: HostRegion) -> Self {
        HostPtrBuffer {
            name: format!("{CPU_BUFFER_TYPE_NAME}_Mapped"),
            region,
        }
    }

    pub fn region(&self) -> &HostRegion {
        &self.region
    }

    fn read_only(&self) -> BackendError {
        BackendError::ReadOnly(self.name.clone())
    }
}

impl BufferImpl for HostPtrBuffer {
    fn base(&self) -> usize {
        self.region.addr()
    }

    fn memset(&self, _offset: usize, _value: u8, _len: usize) -> Result<()> {
        Err(self.read_only())
    }

    fn write(&self, _offset: usize, _data: &[u8]) -> Result<()> {
        Err(self.read_only())
    }

    fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        out.copy_from_slice(&self.region.as_bytes()[offset..offset + out.len()]);
        Ok(())
    }

    fn clear(&self, _value: u8) -> Result<()> {
        Err(self.read_only())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
