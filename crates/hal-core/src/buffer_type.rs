use std::fmt;
use std::sync::Arc;

use crate::buffer::{Buffer, BufferImpl};
use crate::error::{BackendError, Result};
use crate::tensor::Tensor;

/// Implementation side of a buffer type: one per device/memory-kind pair.
pub trait BufferTypeImpl: Send + Sync {
    fn name(&self) -> &str;

    /// Allocate the storage for a buffer of exactly `size` bytes.
    /// `size` is never zero and never above [`max_size`](Self::max_size).
    fn alloc_buffer(&self, size: usize) -> Result<Box<dyn BufferImpl>>;

    /// Required alignment of a tensor's offset inside a buffer.
    fn alignment(&self) -> usize;

    /// Largest single allocation.
    fn max_size(&self) -> usize {
        usize::MAX
    }

    /// Bytes needed to hold `tensor`, including any type-specific padding.
    fn alloc_size(&self, tensor: &Tensor) -> usize {
        tensor.nbytes()
    }

    /// Whether the memory is directly addressable by the host.
    fn is_host(&self) -> bool {
        false
    }
}

/// Shared handle to a buffer type.
///
/// Equality is identity: two handles are equal when they refer to the same
/// registered type, which is what `supports_buft` probes compare.
#[derive(Clone)]
pub struct BufferType(Arc<dyn BufferTypeImpl>);

impl BufferType {
    pub fn new(imp: impl BufferTypeImpl + 'static) -> Self {
        BufferType(Arc::new(imp))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn alignment(&self) -> usize {
        self.0.alignment().max(1)
    }

    pub fn max_size(&self) -> usize {
        self.0.max_size()
    }

    pub fn is_host(&self) -> bool {
        self.0.is_host()
    }

    /// Footprint of `tensor` in a buffer of this type: at least its logical
    /// size, rounded up to the alignment.
    pub fn alloc_size(&self, tensor: &Tensor) -> usize {
        let size = self.0.alloc_size(tensor).max(tensor.nbytes());
        align_up(size, self.alignment())
    }

    /// Allocate a buffer of `size` bytes.
    ///
    /// A zero size yields an empty buffer that holds no tensors.
    pub fn alloc_buffer(&self, size: usize) -> Result<Buffer> {
        if size == 0 {
            return Ok(Buffer::empty(self.clone()));
        }
        if size > self.max_size() {
            tracing::warn!(
                "buffer type '{}': {} bytes exceeds max size {}",
                self.name(),
                size,
                self.max_size()
            );
            return Err(BackendError::AllocationFailure {
                buft: self.name().to_string(),
                requested: size,
                reason: format!("exceeds max size {}", self.max_size()),
            });
        }
        let imp = self.0.alloc_buffer(size).inspect_err(|e| {
            tracing::warn!("buffer type '{}': allocation failed: {e}", self.name());
        })?;
        tracing::debug!("allocated {} bytes from '{}'", size, self.name());
        Ok(Buffer::from_impl(self.clone(), imp, size))
    }

    pub fn ptr_eq(&self, other: &BufferType) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for BufferType {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for BufferType {}

impl fmt::Debug for BufferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferType")
            .field("name", &self.name())
            .field("alignment", &self.alignment())
            .field("is_host", &self.is_host())
            .finish()
    }
}

/// Round `n` up to a multiple of `align`.
pub fn align_up(n: usize, align: usize) -> usize {
    if align <= 1 {
        return n;
    }
    n.div_ceil(align) * align
}
