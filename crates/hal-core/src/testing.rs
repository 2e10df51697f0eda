//! Minimal buffer, device and registry implementations for unit tests.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::BackendImpl;
use crate::buffer::BufferImpl;
use crate::buffer_type::{BufferType, BufferTypeImpl};
use crate::device::{Device, DeviceCaps, DeviceImpl, DeviceType};
use crate::error::{BackendError, Result};
use crate::graph::{Graph, NodeRef};
use crate::guid::Guid;
use crate::log::LogSink;
use crate::registry::{ProcAddress, RegistryImpl};
use crate::tensor::Op;

pub(crate) struct VecBufferType {
    name: String,
    alignment: usize,
    max_size: usize,
    // at most this many buffers alive at once
    max_live: Option<usize>,
    live: Arc<AtomicUsize>,
}

impl VecBufferType {
    pub(crate) fn new(name: &str, alignment: usize, max_size: usize) -> Self {
        VecBufferType {
            name: name.to_string(),
            alignment,
            max_size,
            max_live: None,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail allocations once `max_live` buffers are alive.
    pub(crate) fn limited(mut self, max_live: usize) -> Self {
        self.max_live = Some(max_live);
        self
    }

    pub(crate) fn live_counter(&self) -> Arc<AtomicUsize> {
        self.live.clone()
    }
}

impl BufferTypeImpl for VecBufferType {
    fn name(&self) -> &str {
        &self.name
    }

    fn alloc_buffer(&self, size: usize) -> Result<Box<dyn BufferImpl>> {
        if let Some(max) = self.max_live {
            if self.live.load(Ordering::SeqCst) >= max {
                return Err(BackendError::AllocationFailure {
                    buft: self.name.clone(),
                    requested: size,
                    reason: format!("{max} buffers already alive"),
                });
            }
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(VecBuffer {
            data: RwLock::new(vec![0u8; size]),
            frees: None,
            live: Some(self.live.clone()),
        }))
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

pub(crate) struct VecBuffer {
    data: RwLock<Vec<u8>>,
    frees: Option<Arc<AtomicUsize>>,
    live: Option<Arc<AtomicUsize>>,
}

impl VecBuffer {
    pub(crate) fn boxed(size: usize, frees: Option<Arc<AtomicUsize>>) -> Box<dyn BufferImpl> {
        Box::new(VecBuffer {
            data: RwLock::new(vec![0u8; size]),
            frees,
            live: None,
        })
    }
}

impl Drop for VecBuffer {
    fn drop(&mut self) {
        if let Some(frees) = &self.frees {
            frees.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(live) = &self.live {
            live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl BufferImpl for VecBuffer {
    fn base(&self) -> usize {
        self.data.read().as_ptr() as usize
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

    fn clear(&self, value: u8) -> Result<()> {
        self.data.write().fill(value);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) const TEST_GUID: Guid = Guid::from_bytes([0x7e; 16]);

pub(crate) const TEST_EXTENSION: &str = "test_double";

fn double(n: usize) -> usize {
    n * 2
}

static DOUBLE: fn(usize) -> usize = double;

/// Device over [`VecBufferType`] memory that can run `silu` nodes only.
pub(crate) struct TestDevice {
    name: String,
    device_type: DeviceType,
    buft: BufferType,
}

impl TestDevice {
    pub(crate) fn new(name: &str, device_type: DeviceType) -> Self {
        TestDevice {
            name: name.to_string(),
            device_type,
            buft: BufferType::new(VecBufferType::new(name, 32, 1 << 20)),
        }
    }
}

impl DeviceImpl for TestDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "unit test device"
    }

    fn memory(&self) -> (usize, usize) {
        (1 << 20, 1 << 20)
    }

    fn device_type(&self) -> DeviceType {
        self.device_type
    }

    fn caps(&self) -> DeviceCaps {
        DeviceCaps::default()
    }

    fn init_backend(&self, _device: &Device, params: &str) -> Result<Box<dyn BackendImpl>> {
        if params == "fail" {
            return Err(BackendError::InitializationFailure("asked to fail".into()));
        }
        Ok(Box::new(TestBackend))
    }

    fn buffer_type(&self) -> BufferType {
        self.buft.clone()
    }

    fn supports_op(&self, node: NodeRef<'_>) -> bool {
        matches!(node.op(), Op::Silu)
    }

    fn supports_buft(&self, buft: &BufferType) -> bool {
        buft.ptr_eq(&self.buft)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) struct TestBackend;

impl BackendImpl for TestBackend {
    fn name(&self) -> &str {
        "test"
    }

    fn guid(&self) -> Guid {
        TEST_GUID
    }

    fn graph_compute(&self, _graph: &Graph) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registry whose `add_device` accepts `name=<name>` and yields a GPU.
pub(crate) struct TestRegistry {
    name: String,
    initial: Vec<String>,
}

impl TestRegistry {
    pub(crate) fn new(name: &str, devices: &[&str]) -> Self {
        TestRegistry {
            name: name.to_string(),
            initial: devices.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl RegistryImpl for TestRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    fn enumerate(&self, _log: &Arc<LogSink>) -> Vec<Box<dyn DeviceImpl>> {
        self.initial
            .iter()
            .map(|n| Box::new(TestDevice::new(n, DeviceType::Cpu)) as Box<dyn DeviceImpl>)
            .collect()
    }

    fn add_device(&self, params: &str, _log: &Arc<LogSink>) -> Result<Box<dyn DeviceImpl>> {
        match params.strip_prefix("name=") {
            Some(name) if !name.is_empty() => Ok(Box::new(TestDevice::new(name, DeviceType::Gpu))),
            _ => Err(BackendError::InvalidParams {
                params: params.to_string(),
                reason: "expected name=<name>".into(),
            }),
        }
    }

    fn proc_address(&self, name: &str) -> Option<ProcAddress> {
        (name == TEST_EXTENSION).then_some(&DOUBLE as ProcAddress)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
