//! Composite buffer over several constituent buffers, used when one set of
//! tensors is spread over more than one allocation.
//!
//! The composite's address space is the constituents laid end to end, so a
//! byte range may straddle two of them; every range operation is split at
//! the boundaries.

use parking_lot::Mutex;

use crate::buffer::{Buffer, BufferUsage};
use crate::error::Result;
use crate::tensor::Tensor;

pub(crate) struct MultiBuffer {
    buffers: Vec<Buffer>,
    // serializes usage propagation
    usage_lock: Mutex<()>,
}

impl MultiBuffer {
    pub(crate) fn new(buffers: Vec<Buffer>) -> Self {
        MultiBuffer {
            buffers,
            usage_lock: Mutex::new(()),
        }
    }

    pub(crate) fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    pub(crate) fn base(&self) -> usize {
        self.buffers.first().map(Buffer::base).unwrap_or(0)
    }

    pub(crate) fn set_usage(&self, usage: BufferUsage, set_own: impl FnOnce()) {
        let _guard = self.usage_lock.lock();
        set_own();
        for buf in &self.buffers {
            buf.set_usage(usage);
        }
    }

    pub(crate) fn clear(&self, value: u8) -> Result<()> {
        self.buffers.iter().try_for_each(|b| b.clear(value))
    }

    pub(crate) fn reset(&self) {
        self.buffers.iter().for_each(Buffer::reset);
    }

    /// Forward to the constituent holding the tensor's first byte.
    pub(crate) fn init_tensor(&self, tensor: &Tensor, offset: usize) -> Result<()> {
        match self.spans(offset, 1).next() {
            Some((buf, local, _)) => buf.init_at(tensor, local),
            None => Ok(()),
        }
    }

    pub(crate) fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        for (buf, local, range) in self.spans(offset, data.len()) {
            buf.write_bytes(local, &data[range])?;
        }
        Ok(())
    }

    pub(crate) fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        for (buf, local, range) in self.spans(offset, out.len()) {
            buf.read_bytes(local, &mut out[range])?;
        }
        Ok(())
    }

    pub(crate) fn memset(&self, offset: usize, value: u8, len: usize) -> Result<()> {
        for (buf, local, range) in self.spans(offset, len) {
            buf.memset_bytes(local, value, range.len())?;
        }
        Ok(())
    }

    /// Split `[offset, offset+len)` into `(constituent, local offset, range
    /// within the caller's slice)` pieces.
    fn spans(
        &self,
        offset: usize,
        len: usize,
    ) -> impl Iterator<Item = (&Buffer, usize, std::ops::Range<usize>)> + '_ {
        let end = offset + len;
        let mut start = 0usize;
        self.buffers.iter().filter_map(move |buf| {
            let (lo, hi) = (start, start + buf.size());
            start = hi;
            let from = offset.max(lo);
            let to = end.min(hi);
            (from < to).then(|| (buf, from - lo, (from - offset)..(to - offset)))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::buffer::{tensor_read, tensor_set, Buffer, BufferUsage};
    use crate::buffer_type::BufferType;
    use crate::dtype::DType;
    use crate::tensor::Tensor;
    use crate::testing::{VecBuffer, VecBufferType};

    fn counted(buft: &BufferType, size: usize, frees: &Arc<AtomicUsize>) -> Buffer {
        Buffer::from_impl(buft.clone(), VecBuffer::boxed(size, Some(frees.clone())), size)
    }

    #[test]
    fn test_free_frees_each_constituent_once() {
        let buft = BufferType::new(VecBufferType::new("vec", 32, 1 << 20));
        let frees = Arc::new(AtomicUsize::new(0));
        let parts = (0..3).map(|_| counted(&buft, 128, &frees)).collect();
        let multi = Buffer::multi(parts).unwrap();
        assert!(multi.is_multi_buffer());
        assert_eq!(multi.size(), 384);
        assert_eq!(multi.constituents().unwrap().len(), 3);
        assert_eq!(frees.load(Ordering::SeqCst), 0);

        multi.free();
        assert_eq!(frees.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_set_usage_propagates() {
        let buft = BufferType::new(VecBufferType::new("vec", 32, 1 << 20));
        let parts: Vec<Buffer> = (0..4).map(|_| buft.alloc_buffer(64).unwrap()).collect();
        let multi = Buffer::multi(parts.clone()).unwrap();
        multi.set_usage(BufferUsage::Weights);
        assert_eq!(multi.usage(), BufferUsage::Weights);
        assert!(parts.iter().all(|b| b.usage() == BufferUsage::Weights));
    }

    #[test]
    fn test_clear_and_straddling_range() {
        let buft = BufferType::new(VecBufferType::new("vec", 32, 1 << 20));
        let parts: Vec<Buffer> = (0..2).map(|_| buft.alloc_buffer(64).unwrap()).collect();
        let multi = Buffer::multi(parts.clone()).unwrap();
        multi.clear(9).unwrap();

        // a 64-byte tensor at offset 32 covers the tail of part 0 and the
        // head of part 1
        let mut t = Tensor::new("t", DType::F32, vec![16]);
        multi.alloc_tensor(&mut t, 32).unwrap();
        assert!(tensor_read(&t).unwrap().iter().all(|&b| b == 9));

        let data: Vec<u8> = (0..64).collect();
        tensor_set(&t, &data, 0).unwrap();
        assert_eq!(tensor_read(&t).unwrap(), data);

        let mut head = Tensor::new("head", DType::F32, vec![8]);
        parts[1].alloc_tensor(&mut head, 0).unwrap();
        assert_eq!(tensor_read(&head).unwrap(), &data[32..]);
    }

    #[test]
    fn test_empty_multi_rejected() {
        assert!(Buffer::multi(Vec::new()).is_err());
    }
}
