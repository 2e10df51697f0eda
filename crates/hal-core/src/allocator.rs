//! Placing tensors into buffers.

use crate::buffer::Buffer;
use crate::buffer_type::{align_up, BufferType};
use crate::error::{BackendError, Result};
use crate::graph::Graph;
use crate::tensor::{Tensor, TensorId};

/// Bump allocator handing out consecutive aligned slots of one buffer.
#[derive(Debug)]
pub struct TensorAllocator {
    buffer: Buffer,
    offset: usize,
}

impl TensorAllocator {
    pub fn new(buffer: Buffer) -> Self {
        TensorAllocator { buffer, offset: 0 }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Bytes handed out so far, padding included.
    pub fn used(&self) -> usize {
        self.offset
    }

    pub fn alloc(&mut self, tensor: &mut Tensor) -> Result<()> {
        let size = self.buffer.alloc_size(tensor);
        if self.offset + size > self.buffer.size() {
            return Err(BackendError::AllocationFailure {
                buft: self.buffer.name().to_string(),
                requested: size,
                reason: format!(
                    "not enough space for '{}': {} of {} bytes used",
                    tensor.name(),
                    self.offset,
                    self.buffer.size()
                ),
            });
        }
        self.buffer.alloc_tensor(tensor, self.offset)?;
        self.offset = align_up(self.offset + size, self.buffer.alignment());
        Ok(())
    }
}

/// Allocate every unplaced tensor of `graph` from `buft`.
///
/// Tensors are packed in creation order. When the total exceeds the type's
/// max size the set is split over several buffers, returned as one
/// multi-buffer. Returns `None` when there was nothing to allocate.
pub fn alloc_graph_tensors(graph: &mut Graph, buft: &BufferType) -> Result<Option<Buffer>> {
    let max_size = buft.max_size();
    let mut chunks: Vec<(usize, Vec<TensorId>)> = Vec::new();
    let mut cur: (usize, Vec<TensorId>) = (0, Vec::new());

    for (id, tensor) in graph.tensors() {
        if tensor.is_allocated() {
            continue;
        }
        let size = buft.alloc_size(tensor);
        if size > max_size {
            return Err(BackendError::AllocationFailure {
                buft: buft.name().to_string(),
                requested: size,
                reason: format!("tensor '{}' exceeds max size {max_size}", tensor.name()),
            });
        }
        if cur.0 + size > max_size {
            chunks.push(std::mem::take(&mut cur));
        }
        cur.0 += size;
        cur.1.push(id);
    }
    if !cur.1.is_empty() {
        chunks.push(cur);
    }
    if chunks.is_empty() {
        return Ok(None);
    }

    // Every buffer is reserved before any tensor is bound. On failure the
    // graph is left unplaced and reserved buffers drop.
    let reserved = chunks
        .into_iter()
        .map(|(size, ids)| Ok((buft.alloc_buffer(size)?, ids)))
        .collect::<Result<Vec<_>>>()?;

    let mut placed: Vec<TensorId> = Vec::new();
    let mut buffers = Vec::with_capacity(reserved.len());
    for (buffer, ids) in reserved {
        let mut allocator = TensorAllocator::new(buffer);
        for id in ids {
            if let Err(e) = allocator.alloc(graph.tensor_mut(id)) {
                for id in placed {
                    graph.tensor_mut(id).unbind();
                }
                return Err(e);
            }
            placed.push(id);
        }
        buffers.push(allocator.buffer);
    }
    tracing::debug!(
        "allocated graph tensors from '{}' in {} buffer(s)",
        buft.name(),
        buffers.len()
    );

    if buffers.len() == 1 {
        Ok(buffers.pop())
    } else {
        Buffer::multi(buffers).map(Some)
    }
}
