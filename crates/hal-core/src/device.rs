//! Devices: descriptors of compute units and factories for backends,
//! host-pointer buffers and events.
//!
//! The capability probes live here and nowhere else. [`Backend`] forwards
//! its own probes to its device, so a scheduler gets the same answer with
//! or without a backend instance.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::backend::{Backend, BackendImpl};
use crate::buffer::Buffer;
use crate::buffer_type::BufferType;
use crate::error::{BackendError, Result};
use crate::event::{Event, EventImpl};
use crate::graph::NodeRef;
use crate::host::HostRegion;
use crate::registry::{Registry, RegistryInner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Host CPU, always usable as the fallback.
    Cpu,
    /// Discrete accelerator with its own memory.
    Gpu,
    /// Integrated accelerator sharing host memory.
    IGpu,
    /// Accelerator that only takes part of the work, alongside a CPU.
    Accel,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceType::Cpu => "CPU",
            DeviceType::Gpu => "GPU",
            DeviceType::IGpu => "IGPU",
            DeviceType::Accel => "ACCEL",
        })
    }
}

/// Which optional calls a device implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceCaps {
    /// `set_tensor_async`/`get_tensor_async` may return before completion.
    pub async_io: bool,
    /// A transfer-optimized host buffer type is available.
    pub host_buffer: bool,
    /// `buffer_from_host_ptr` is implemented.
    pub buffer_from_host_ptr: bool,
    /// Events can be created, recorded and awaited.
    pub events: bool,
}

/// Snapshot of a device's identity, memory and capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProps {
    pub name: String,
    pub description: String,
    pub memory_free: usize,
    pub memory_total: usize,
    pub device_type: DeviceType,
    pub caps: DeviceCaps,
}

/// Implementation side of a device.
pub trait DeviceImpl: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// `(free, total)` bytes, measured on every call.
    fn memory(&self) -> (usize, usize);

    fn device_type(&self) -> DeviceType;

    fn caps(&self) -> DeviceCaps;

    /// Create a backend for this device. `device` is the public handle of
    /// `self`, for backends that need to refer back to it.
    fn init_backend(&self, device: &Device, params: &str) -> Result<Box<dyn BackendImpl>>;

    fn buffer_type(&self) -> BufferType;

    fn host_buffer_type(&self) -> Option<BufferType> {
        None
    }

    /// Wrap the first `size` bytes of `region` without copying. Every tensor
    /// bound into the buffer must be at most `max_tensor_size` bytes, and
    /// the region must start on the buffer type's alignment.
    fn buffer_from_host_ptr(
        &self,
        _region: HostRegion,
        _size: usize,
        _max_tensor_size: usize,
    ) -> Result<Buffer> {
        Err(BackendError::Unsupported(format!(
            "{}: buffers from host memory",
            self.name()
        )))
    }

    fn supports_op(&self, node: NodeRef<'_>) -> bool;

    fn supports_buft(&self, buft: &BufferType) -> bool;

    fn offload_op(&self, _node: NodeRef<'_>) -> bool {
        false
    }

    fn event_new(&self) -> Result<Box<dyn EventImpl>> {
        Err(BackendError::Unsupported(format!("{}: events", self.name())))
    }

    fn event_synchronize(&self, _event: &Event) -> Result<()> {
        Err(BackendError::Unsupported(format!("{}: events", self.name())))
    }

    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct DeviceInner {
    imp: Box<dyn DeviceImpl>,
    registry: Weak<RegistryInner>,
}

/// Shared handle to a device.
#[derive(Clone)]
pub struct Device(Arc<DeviceInner>);

impl Device {
    pub(crate) fn with_registry(imp: Box<dyn DeviceImpl>, registry: Weak<RegistryInner>) -> Self {
        Device(Arc::new(DeviceInner { imp, registry }))
    }

    /// A device that belongs to no registry.
    pub fn standalone(imp: impl DeviceImpl) -> Self {
        Device::with_registry(Box::new(imp), Weak::new())
    }

    pub fn name(&self) -> &str {
        self.0.imp.name()
    }

    pub fn description(&self) -> &str {
        self.0.imp.description()
    }

    /// `(free, total)` bytes.
    pub fn memory(&self) -> (usize, usize) {
        self.0.imp.memory()
    }

    pub fn device_type(&self) -> DeviceType {
        self.0.imp.device_type()
    }

    pub fn caps(&self) -> DeviceCaps {
        self.0.imp.caps()
    }

    pub fn props(&self) -> DeviceProps {
        let (memory_free, memory_total) = self.memory();
        DeviceProps {
            name: self.name().to_string(),
            description: self.description().to_string(),
            memory_free,
            memory_total,
            device_type: self.device_type(),
            caps: self.caps(),
        }
    }

    /// The registry that enumerated or added this device.
    pub fn registry(&self) -> Option<Registry> {
        self.0.registry.upgrade().map(Registry::from_inner)
    }

    pub fn init_backend(&self, params: &str) -> Result<Backend> {
        let imp = self.0.imp.init_backend(self, params).inspect_err(|e| {
            tracing::warn!("{}: backend init failed: {e}", self.name());
        })?;
        Ok(Backend::new(self.clone(), imp))
    }

    pub fn buffer_type(&self) -> BufferType {
        self.0.imp.buffer_type()
    }

    pub fn host_buffer_type(&self) -> Option<BufferType> {
        self.0.imp.host_buffer_type()
    }

    pub fn buffer_from_host_ptr(
        &self,
        region: HostRegion,
        size: usize,
        max_tensor_size: usize,
    ) -> Result<Buffer> {
        if size > region.len() {
            return Err(BackendError::OutOfBounds {
                offset: 0,
                len: size,
                size: region.len(),
            });
        }
        self.0.imp.buffer_from_host_ptr(region, size, max_tensor_size)
    }

    pub fn supports_op(&self, node: NodeRef<'_>) -> bool {
        self.0.imp.supports_op(node)
    }

    pub fn supports_buft(&self, buft: &BufferType) -> bool {
        self.0.imp.supports_buft(buft)
    }

    pub fn offload_op(&self, node: NodeRef<'_>) -> bool {
        self.0.imp.offload_op(node)
    }

    pub fn event_new(&self) -> Result<Event> {
        let imp = self.0.imp.event_new()?;
        Ok(Event::new(self.clone(), imp))
    }

    /// Block the host until `event`'s most recent record is reached.
    pub fn event_synchronize(&self, event: &Event) -> Result<()> {
        if !event.device().ptr_eq(self) {
            return Err(BackendError::Foreign(format!(
                "event of device '{}'",
                event.device().name()
            )));
        }
        self.0.imp.event_synchronize(event)
    }

    pub fn event_free(&self, event: Event) {
        drop(event)
    }

    pub fn downcast_ref<T: DeviceImpl>(&self) -> Option<&T> {
        self.0.imp.as_any().downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name())
            .field("type", &self.device_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;
    use crate::graph::Graph;
    use crate::testing::TestDevice;

    #[test]
    fn test_props_and_probes() {
        let dev = Device::standalone(TestDevice::new("T0", DeviceType::Gpu));
        let props = dev.props();
        assert_eq!(props.name, "T0");
        assert_eq!(props.device_type, DeviceType::Gpu);
        assert!(props.memory_free <= props.memory_total);
        assert!(dev.registry().is_none());

        let mut g = Graph::new();
        let a = g.input("a", DType::F32, vec![4]);
        let s = g.silu(a).unwrap();
        let m = g.softmax(s).unwrap();
        assert!(dev.supports_op(g.node(s)));
        assert!(!dev.supports_op(g.node(m)));
        assert!(dev.supports_buft(&dev.buffer_type()));
    }

    #[test]
    fn test_backend_forwards_probes() {
        let dev = Device::standalone(TestDevice::new("T0", DeviceType::Cpu));
        let backend = dev.init_backend("").unwrap();
        assert!(backend.device().ptr_eq(&dev));
        assert!(backend.is(crate::testing::TEST_GUID));

        let mut g = Graph::new();
        let a = g.input("a", DType::F32, vec![4]);
        let m = g.softmax(a).unwrap();
        assert_eq!(backend.supports_op(g.node(m)), dev.supports_op(g.node(m)));
        assert_eq!(backend.offload_op(g.node(m)), dev.offload_op(g.node(m)));
    }

    #[test]
    fn test_optional_calls_default_to_unsupported() {
        let dev = Device::standalone(TestDevice::new("T0", DeviceType::Cpu));
        assert!(dev.host_buffer_type().is_none());
        assert!(matches!(dev.event_new(), Err(BackendError::Unsupported(_))));
        let region = HostRegion::new(vec![0u8; 64]);
        assert!(matches!(
            dev.buffer_from_host_ptr(region.clone(), 128, 64),
            Err(BackendError::OutOfBounds { .. })
        ));
        assert!(matches!(
            dev.buffer_from_host_ptr(region, 64, 64),
            Err(BackendError::Unsupported(_))
        ));
    }

    #[test]
    fn test_init_failure_propagates() {
        let dev = Device::standalone(TestDevice::new("T0", DeviceType::Cpu));
        assert!(matches!(
            dev.init_backend("fail"),
            Err(BackendError::InitializationFailure(_))
        ));
    }
}
