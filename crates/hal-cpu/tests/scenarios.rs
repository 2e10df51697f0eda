//! End-to-end buffer scenarios on the CPU device.

use std::io::Write;

use hal_cpu::{CpuBufferType, CpuConfig, CpuRegistry};
use hal_core::{
    tensor_get, tensor_read, BackendError, BufferType, DType, Device, HostMemory, HostRegion,
    Registry, Tensor,
};

fn cpu_device() -> Device {
    Registry::new(CpuRegistry::new(CpuConfig::default()))
        .device_get(0)
        .unwrap()
}

/// Caller memory whose first byte sits `shift` bytes past a 64-byte boundary.
struct OffsetBytes {
    data: Vec<u8>,
    start: usize,
    len: usize,
}

impl OffsetBytes {
    fn new(bytes: &[u8], shift: usize) -> Self {
        let mut data = vec![0u8; bytes.len() + 64 + shift];
        let start = data.as_ptr().align_offset(64) + shift;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        OffsetBytes {
            data,
            start,
            len: bytes.len(),
        }
    }
}

impl HostMemory for OffsetBytes {
    fn bytes(&self) -> &[u8] {
        &self.data[self.start..self.start + self.len]
    }
}

#[test]
fn test_aligned_buffer_roundtrip() {
    let buft = BufferType::new(CpuBufferType::new(256, usize::MAX));
    let buf = buft.alloc_buffer(4096).unwrap();
    assert_eq!(buf.size(), 4096);

    // 1000 f32 = 4000 logical bytes
    let mut t = Tensor::new("t", DType::F32, vec![1000]);
    assert_eq!(t.nbytes(), 4000);
    let alloc_size = buft.alloc_size(&t);
    assert!(alloc_size >= 4000 && alloc_size <= 4096);
    assert_eq!(alloc_size % 256, 0);

    buf.alloc_tensor(&mut t, 0).unwrap();
    buf.init_tensor(&t).unwrap();
    let payload: Vec<u8> = (0..4000).map(|i| (i % 251) as u8).collect();
    buf.set_tensor(&t, &payload, 0).unwrap();
    let mut out = vec![0u8; 4000];
    buf.get_tensor(&t, &mut out, 0).unwrap();
    assert_eq!(out, payload);
}

#[test]
fn test_clear_then_read_any_range() {
    let buft = BufferType::new(CpuBufferType::new(64, usize::MAX));
    let buf = buft.alloc_buffer(1024).unwrap();
    buf.clear(0x5a).unwrap();
    let mut t = Tensor::new("t", DType::F32, vec![256]);
    buf.alloc_tensor(&mut t, 0).unwrap();
    let mut part = vec![0u8; 100];
    tensor_get(&t, &mut part, 333).unwrap();
    assert!(part.iter().all(|&b| b == 0x5a));

    // reset is idempotent and leaves the data alone
    buf.reset();
    buf.reset();
    buf.init_tensor(&t).unwrap();
    assert!(tensor_read(&t).unwrap().iter().all(|&b| b == 0x5a));
}

#[test]
fn test_host_region_with_tensor_limit() {
    let dev = cpu_device();
    let bytes: Vec<u8> = (0..1 << 20).map(|i| (i % 241) as u8).collect();
    let region = HostRegion::new(OffsetBytes::new(&bytes, 0));
    assert_eq!(region.addr() % 64, 0);
    let buf = dev
        .buffer_from_host_ptr(region.clone(), 1 << 20, 512 << 10)
        .unwrap();
    assert_eq!(buf.size(), 1 << 20);
    assert_eq!(buf.max_tensor_size(), Some(512 << 10));

    // 600 KiB
    let mut big = Tensor::new("big", DType::F32, vec![600 * 256]);
    assert!(matches!(
        buf.alloc_tensor(&mut big, 0),
        Err(BackendError::AllocationFailure { .. })
    ));
    assert!(!big.is_allocated());

    // 400 KiB
    let mut small = Tensor::new("small", DType::F32, vec![400 * 256]);
    buf.alloc_tensor(&mut small, 0).unwrap();
    assert_eq!(tensor_read(&small).unwrap(), &bytes[..400 << 10]);

    assert_eq!(region.handle_count(), 2);
    small.unbind();
    buf.free();
    // the region is intact and owned by the caller alone again
    assert_eq!(region.handle_count(), 1);
    assert_eq!(region.as_bytes(), &bytes[..]);
}

#[test]
fn test_mapped_file_buffer() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let data: Vec<u8> = (0..8192).map(|i| (i * 7 % 256) as u8).collect();
    file.write_all(&data).unwrap();
    file.flush().unwrap();

    let region = HostRegion::map_file(file.path()).unwrap();
    let dev = cpu_device();
    let buf = dev.buffer_from_host_ptr(region, 8192, 8192).unwrap();
    let mut t = Tensor::new("weights", DType::F16, vec![16, 64]);
    buf.alloc_tensor(&mut t, 4096).unwrap();
    assert_eq!(tensor_read(&t).unwrap(), &data[4096..6144]);
    assert!(matches!(
        buf.set_tensor(&t, &[0u8; 2], 0),
        Err(BackendError::ReadOnly(_))
    ));
}

#[test]
fn test_host_ptr_larger_than_region_rejected() {
    let dev = cpu_device();
    let region = HostRegion::new(vec![0u8; 1024]);
    assert!(matches!(
        dev.buffer_from_host_ptr(region, 2048, 1024),
        Err(BackendError::OutOfBounds { .. })
    ));
}

#[test]
fn test_misaligned_host_region_rejected() {
    let dev = cpu_device();
    let alignment = dev.buffer_type().alignment();
    let bytes = vec![7u8; 4096];

    let region = HostRegion::new(OffsetBytes::new(&bytes, 1));
    let err = dev.buffer_from_host_ptr(region.clone(), 1024, 1024).unwrap_err();
    assert!(matches!(
        err,
        BackendError::Misaligned { offset, alignment: a }
            if offset == region.addr() && a == alignment
    ));
    assert_eq!(err.class(), hal_core::ErrorClass::Usage);
    // nothing kept a handle to the rejected region
    assert_eq!(region.handle_count(), 1);

    let region = HostRegion::new(OffsetBytes::new(&bytes, alignment));
    let buf = dev.buffer_from_host_ptr(region, 4096, 4096).unwrap();
    let mut t = Tensor::new("t", DType::F32, vec![16]);
    buf.alloc_tensor(&mut t, 0).unwrap();
    assert_eq!(tensor_read(&t).unwrap(), vec![7u8; 64]);
}
