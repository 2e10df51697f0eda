//! Opaque handles passed across the C boundary.
//!
//! Every handle owns a clone of the runtime object it wraps, so freeing a
//! handle never invalidates other handles to the same device or buffer.
//! Strings returned to C are cached here and live as long as the handle.

use std::ffi::CString;

use hal_core::{
    Backend, Buffer, BufferType, Device, Event, HostMemory, PendingRead, Registry, Tensor,
};

fn c_string(s: &str) -> CString {
    CString::new(s.replace('\0', " ")).unwrap_or_default()
}

pub struct HalRegistry {
    pub(crate) inner: Registry,
    pub(crate) name: CString,
}

impl HalRegistry {
    pub(crate) fn new(inner: Registry) -> Self {
        Self {
            name: c_string(inner.name()),
            inner,
        }
    }
}

pub struct HalDevice {
    pub(crate) inner: Device,
    pub(crate) name: CString,
    pub(crate) description: CString,
}

impl HalDevice {
    pub(crate) fn new(inner: Device) -> Self {
        Self {
            name: c_string(inner.name()),
            description: c_string(inner.description()),
            inner,
        }
    }
}

pub struct HalBackend {
    pub(crate) inner: Backend,
    pub(crate) name: CString,
}

impl HalBackend {
    pub(crate) fn new(inner: Backend) -> Self {
        Self {
            name: c_string(inner.name()),
            inner,
        }
    }
}

pub struct HalBufferType {
    pub(crate) inner: BufferType,
    pub(crate) name: CString,
}

impl HalBufferType {
    pub(crate) fn new(inner: BufferType) -> Self {
        Self {
            name: c_string(inner.name()),
            inner,
        }
    }
}

pub struct HalBuffer {
    pub(crate) inner: Buffer,
}

pub struct HalTensor {
    pub(crate) inner: Tensor,
}

pub struct HalEvent {
    pub(crate) inner: Event,
}

pub struct HalPendingRead {
    pub(crate) inner: PendingRead,
}

/// Caller-owned memory wrapped by `hal_dev_buffer_from_host_ptr`. The caller
/// keeps it alive, unmodified, until every buffer built on it is freed.
pub(crate) struct ForeignMemory {
    ptr: *const u8,
    len: usize,
}

// The memory is only ever read, and its owner guarantees it outlives us.
unsafe impl Send for ForeignMemory {}
unsafe impl Sync for ForeignMemory {}

impl ForeignMemory {
    /// # Safety
    /// `ptr` must be valid for reads of `len` bytes for the lifetime of the
    /// returned value.
    pub(crate) unsafe fn new(ptr: *const u8, len: usize) -> Self {
        Self { ptr, len }
    }
}

impl HostMemory for ForeignMemory {
    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}
