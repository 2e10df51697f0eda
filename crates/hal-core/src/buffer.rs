//! Buffers: concrete memory regions of one [`BufferType`].
//!
//! A [`Buffer`] is a shared handle. The storage behind it is released when
//! the last handle goes away, so tensors placed in a buffer keep it alive.
//! Implementations only deal in byte ranges relative to their own start;
//! the handle resolves tensor placements and checks bounds before any call
//! reaches them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::buffer_type::BufferType;
use crate::error::{BackendError, GraphError, Result};
use crate::multi_buffer::MultiBuffer;
use crate::tensor::Tensor;

/// What a buffer is used for. Implementations may pick an allocation or
/// transfer strategy from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferUsage {
    #[default]
    Any,
    Weights,
    Compute,
}

/// Implementation side of a buffer. Offsets are relative to the start of
/// the buffer and are already bounds-checked by the caller.
pub trait BufferImpl: Send + Sync + 'static {
    /// Opaque start address. Only host buffers promise it is dereferenceable.
    fn base(&self) -> usize;

    /// Finalize device-specific state for a tensor now placed at `offset`.
    fn init_tensor(&self, _tensor: &Tensor, _offset: usize) -> Result<()> {
        Ok(())
    }

    fn memset(&self, offset: usize, value: u8, len: usize) -> Result<()>;

    fn write(&self, offset: usize, data: &[u8]) -> Result<()>;

    fn read(&self, offset: usize, out: &mut [u8]) -> Result<()>;

    /// Copy `src` (any buffer) into `dst` (this buffer) through a
    /// specialised path. `Ok(false)` means no such path exists.
    fn cpy_tensor(&self, _src: &Tensor, _dst: &Tensor) -> Result<bool> {
        Ok(false)
    }

    fn clear(&self, value: u8) -> Result<()>;

    /// Drop bookkeeping tied to previously initialized tensors.
    fn reset(&self) {}

    fn as_any(&self) -> &dyn Any;
}

pub(crate) enum Storage {
    Empty,
    Single(Box<dyn BufferImpl>),
    Multi(MultiBuffer),
}

struct BufferInner {
    buft: BufferType,
    size: usize,
    usage: RwLock<BufferUsage>,
    max_tensor_size: Option<usize>,
    storage: Storage,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        tracing::debug!("freeing {} byte buffer of '{}'", self.size, self.buft.name());
    }
}

#[derive(Clone)]
pub struct Buffer(Arc<BufferInner>);

impl Buffer {
    /// Wrap implementation storage of `size` bytes.
    pub fn from_impl(buft: BufferType, imp: Box<dyn BufferImpl>, size: usize) -> Buffer {
        Buffer::with_storage(buft, Storage::Single(imp), size, None)
    }

    /// Like [`from_impl`](Self::from_impl), but every tensor bound into the
    /// buffer must be at most `max_tensor_size` bytes.
    pub fn from_impl_limited(
        buft: BufferType,
        imp: Box<dyn BufferImpl>,
        size: usize,
        max_tensor_size: usize,
    ) -> Buffer {
        Buffer::with_storage(buft, Storage::Single(imp), size, Some(max_tensor_size))
    }

    pub(crate) fn empty(buft: BufferType) -> Buffer {
        Buffer::with_storage(buft, Storage::Empty, 0, None)
    }

    /// Compose several buffers into one. The composite reports the first
    /// buffer's type and the summed size.
    pub fn multi(buffers: Vec<Buffer>) -> Result<Buffer> {
        let buft = buffers
            .first()
            .map(|b| b.buffer_type().clone())
            .ok_or_else(|| BackendError::Other("multi-buffer needs at least one buffer".into()))?;
        let size = buffers.iter().map(Buffer::size).sum();
        Ok(Buffer::with_storage(
            buft,
            Storage::Multi(MultiBuffer::new(buffers)),
            size,
            None,
        ))
    }

    fn with_storage(
        buft: BufferType,
        storage: Storage,
        size: usize,
        max_tensor_size: Option<usize>,
    ) -> Buffer {
        Buffer(Arc::new(BufferInner {
            buft,
            size,
            usage: RwLock::new(BufferUsage::Any),
            max_tensor_size,
            storage,
        }))
    }

    pub fn name(&self) -> &str {
        self.0.buft.name()
    }

    pub fn buffer_type(&self) -> &BufferType {
        &self.0.buft
    }

    pub fn size(&self) -> usize {
        self.0.size
    }

    pub fn base(&self) -> usize {
        match &self.0.storage {
            Storage::Empty => 0,
            Storage::Single(imp) => imp.base(),
            Storage::Multi(multi) => multi.base(),
        }
    }

    pub fn alignment(&self) -> usize {
        self.0.buft.alignment()
    }

    pub fn max_size(&self) -> usize {
        self.0.buft.max_size()
    }

    pub fn alloc_size(&self, tensor: &Tensor) -> usize {
        self.0.buft.alloc_size(tensor)
    }

    pub fn is_host(&self) -> bool {
        self.0.buft.is_host()
    }

    pub fn max_tensor_size(&self) -> Option<usize> {
        self.0.max_tensor_size
    }

    pub fn usage(&self) -> BufferUsage {
        *self.0.usage.read()
    }

    /// Set the usage. On a multi-buffer every constituent gets the same
    /// usage before any other `set_usage` call can interleave.
    pub fn set_usage(&self, usage: BufferUsage) {
        match &self.0.storage {
            Storage::Multi(multi) => multi.set_usage(usage, || *self.0.usage.write() = usage),
            _ => *self.0.usage.write() = usage,
        }
    }

    pub fn is_multi_buffer(&self) -> bool {
        matches!(self.0.storage, Storage::Multi(_))
    }

    /// Constituents of a multi-buffer, `None` for any other buffer.
    pub fn constituents(&self) -> Option<&[Buffer]> {
        match &self.0.storage {
            Storage::Multi(multi) => Some(multi.buffers()),
            _ => None,
        }
    }

    /// Access the implementation behind a plain buffer.
    pub fn downcast_ref<T: BufferImpl>(&self) -> Option<&T> {
        match &self.0.storage {
            Storage::Single(imp) => imp.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Release this handle. The memory goes back to its allocator once no
    /// tensor or other handle refers to the buffer any more.
    pub fn free(self) {
        drop(self)
    }

    /// Fill the whole buffer with `value`.
    pub fn clear(&self, value: u8) -> Result<()> {
        match &self.0.storage {
            Storage::Empty => Ok(()),
            Storage::Single(imp) => imp.clear(value),
            Storage::Multi(multi) => multi.clear(value),
        }
    }

    /// Forget per-tensor state so the buffer can take a new layout.
    pub fn reset(&self) {
        match &self.0.storage {
            Storage::Empty => {}
            Storage::Single(imp) => imp.reset(),
            Storage::Multi(multi) => multi.reset(),
        }
    }

    /// Bind `tensor` at `offset` and initialize it.
    ///
    /// The offset must respect the buffer type's alignment and the tensor's
    /// allocation footprint must fit inside the buffer.
    pub fn alloc_tensor(&self, tensor: &mut Tensor, offset: usize) -> Result<()> {
        let alignment = self.alignment();
        if offset % alignment != 0 {
            return Err(BackendError::Misaligned { offset, alignment });
        }
        if let Some(limit) = self.0.max_tensor_size {
            if tensor.nbytes() > limit {
                return Err(BackendError::AllocationFailure {
                    buft: self.name().to_string(),
                    requested: tensor.nbytes(),
                    reason: format!(
                        "tensor '{}' exceeds max tensor size {limit}",
                        tensor.name()
                    ),
                });
            }
        }
        let footprint = self.alloc_size(tensor);
        check_range(offset, footprint, self.size())?;
        tensor.bind(self.clone(), offset);
        if let Err(e) = self.init_at(tensor, offset) {
            tensor.unbind();
            return Err(e);
        }
        Ok(())
    }

    /// Re-run device-specific initialization for a tensor already placed here.
    pub fn init_tensor(&self, tensor: &Tensor) -> Result<()> {
        let offset = self.resolve(tensor, 0, 0)?;
        self.init_at(tensor, offset)
    }

    pub(crate) fn init_at(&self, tensor: &Tensor, offset: usize) -> Result<()> {
        match &self.0.storage {
            Storage::Empty => Ok(()),
            Storage::Single(imp) => imp.init_tensor(tensor, offset),
            Storage::Multi(multi) => multi.init_tensor(tensor, offset),
        }
    }

    /// Write `data` into `tensor` starting `offset` bytes into the tensor.
    pub fn set_tensor(&self, tensor: &Tensor, data: &[u8], offset: usize) -> Result<()> {
        let at = self.resolve(tensor, offset, data.len())?;
        self.write_bytes(at, data)
    }

    /// Read `out.len()` bytes of `tensor` starting `offset` bytes into it.
    pub fn get_tensor(&self, tensor: &Tensor, out: &mut [u8], offset: usize) -> Result<()> {
        let at = self.resolve(tensor, offset, out.len())?;
        self.read_bytes(at, out)
    }

    pub fn memset_tensor(&self, tensor: &Tensor, value: u8, offset: usize, len: usize) -> Result<()> {
        let at = self.resolve(tensor, offset, len)?;
        self.memset_bytes(at, value, len)
    }

    /// Copy `src` into `dst` (which lives in this buffer) with a specialised
    /// path. `Ok(false)` tells the caller to fall back to a host copy.
    pub fn cpy_tensor(&self, src: &Tensor, dst: &Tensor) -> Result<bool> {
        self.resolve(dst, 0, dst.nbytes())?;
        match &self.0.storage {
            Storage::Single(imp) => imp.cpy_tensor(src, dst),
            Storage::Empty | Storage::Multi(_) => Ok(false),
        }
    }

    /// Absolute byte offset in this buffer for `len` bytes at `offset` into
    /// `tensor`, after checking the tensor lives here.
    fn resolve(&self, tensor: &Tensor, offset: usize, len: usize) -> Result<usize> {
        let placement = tensor
            .placement()
            .ok_or_else(|| BackendError::Unallocated(tensor.name().to_string()))?;
        if !placement.buffer.ptr_eq(self) {
            return Err(BackendError::ForeignTensor(tensor.name().to_string()));
        }
        check_range(offset, len, tensor.nbytes())?;
        let at = placement.offset + offset;
        check_range(at, len, self.size())?;
        Ok(at)
    }

    pub(crate) fn write_bytes(&self, offset: usize, data: &[u8]) -> Result<()> {
        check_range(offset, data.len(), self.size())?;
        match &self.0.storage {
            Storage::Empty => Ok(()),
            Storage::Single(imp) => imp.write(offset, data),
            Storage::Multi(multi) => multi.write(offset, data),
        }
    }

    pub(crate) fn read_bytes(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        check_range(offset, out.len(), self.size())?;
        match &self.0.storage {
            Storage::Empty => Ok(()),
            Storage::Single(imp) => imp.read(offset, out),
            Storage::Multi(multi) => multi.read(offset, out),
        }
    }

    pub(crate) fn memset_bytes(&self, offset: usize, value: u8, len: usize) -> Result<()> {
        check_range(offset, len, self.size())?;
        match &self.0.storage {
            Storage::Empty => Ok(()),
            Storage::Single(imp) => imp.memset(offset, value, len),
            Storage::Multi(multi) => multi.memset(offset, value, len),
        }
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Buffer {}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("type", &self.name())
            .field("size", &self.size())
            .field("usage", &self.usage())
            .field("multi", &self.is_multi_buffer())
            .finish()
    }
}

pub(crate) fn check_range(offset: usize, len: usize, size: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(BackendError::OutOfBounds { offset, len, size }),
    }
}

fn placed_buffer(tensor: &Tensor) -> Result<&Buffer> {
    tensor
        .buffer()
        .ok_or_else(|| BackendError::Unallocated(tensor.name().to_string()))
}

/// Check that `len` bytes at `offset` into `tensor` lie inside both the
/// tensor and its buffer, without touching any data.
pub fn check_tensor_range(tensor: &Tensor, offset: usize, len: usize) -> Result<()> {
    placed_buffer(tensor)?.resolve(tensor, offset, len).map(|_| ())
}

/// Write into a tensor through its own placement.
pub fn tensor_set(tensor: &Tensor, data: &[u8], offset: usize) -> Result<()> {
    placed_buffer(tensor)?.set_tensor(tensor, data, offset)
}

/// Read from a tensor through its own placement.
pub fn tensor_get(tensor: &Tensor, out: &mut [u8], offset: usize) -> Result<()> {
    placed_buffer(tensor)?.get_tensor(tensor, out, offset)
}

/// Read a tensor's whole contents.
pub fn tensor_read(tensor: &Tensor) -> Result<Vec<u8>> {
    let mut out = vec![0u8; tensor.nbytes()];
    tensor_get(tensor, &mut out, 0)?;
    Ok(out)
}

pub fn tensor_memset(tensor: &Tensor, value: u8, offset: usize, len: usize) -> Result<()> {
    placed_buffer(tensor)?.memset_tensor(tensor, value, offset, len)
}

/// Copy `src` into `dst`. Uses the destination buffer's specialised path
/// when there is one and stages through host memory otherwise.
pub fn tensor_copy(src: &Tensor, dst: &Tensor) -> Result<()> {
    if src.nbytes() != dst.nbytes() {
        return Err(GraphError::ShapeMismatch {
            expected: dst.shape().dims().to_vec(),
            got: src.shape().dims().to_vec(),
        }
        .into());
    }
    let dst_buf = placed_buffer(dst)?;
    if dst_buf.cpy_tensor(src, dst)? {
        return Ok(());
    }
    let staged = tensor_read(src)?;
    dst_buf.set_tensor(dst, &staged, 0)
}
