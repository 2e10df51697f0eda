use std::any::Any;
use std::sync::Arc;

use hal_core::{
    Backend, BackendError, BackendImpl, Buffer, BufferType, Device, DeviceCaps, DeviceImpl,
    DeviceType, HostRegion, LogSink, NodeRef, ProcAddress, RegistryImpl, Result,
};

use crate::backend::CpuBackend;
use crate::buffer::{CpuBufferType, HostPtrBuffer};
use crate::compute::supports_node;
use crate::config::CpuConfig;
use crate::meminfo::host_memory;

pub const CPU_REGISTRY_NAME: &str = "CPU";

/// Name under which the CPU registry exposes [`SetNThreadsFn`].
pub const SET_N_THREADS: &str = "hal_cpu_set_n_threads";

/// Resize a CPU backend's worker pool. Fails for any other backend.
pub type SetNThreadsFn = fn(&Backend, usize) -> Result<()>;

fn set_n_threads(backend: &Backend, n_threads: usize) -> Result<()> {
    backend
        .downcast_ref::<CpuBackend>()
        .ok_or_else(|| BackendError::Foreign(format!("backend '{}'", backend.name())))?
        .set_n_threads(n_threads)
}

static SET_N_THREADS_FN: SetNThreadsFn = set_n_threads;

pub struct CpuDevice {
    description: String,
    buft: BufferType,
    n_threads: usize,
}

impl CpuDevice {
    pub fn new(config: &CpuConfig) -> Result<Self> {
        config.validate()?;
        let n_threads = config.resolve_threads();
        Ok(CpuDevice {
            description: format!("reference CPU, {n_threads} threads"),
            buft: BufferType::new(CpuBufferType::new(
                config.alignment,
                config.max_size_bytes()?,
            )),
            n_threads,
        })
    }
}

impl DeviceImpl for CpuDevice {
    fn name(&self) -> &str {
        "CPU"
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn memory(&self) -> (usize, usize) {
        host_memory()
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Cpu
    }

    fn caps(&self) -> DeviceCaps {
        DeviceCaps {
            async_io: false,
            host_buffer: false,
            buffer_from_host_ptr: true,
            events: false,
        }
    }

    fn init_backend(&self, device: &Device, params: &str) -> Result<Box<dyn BackendImpl>> {
        Ok(Box::new(CpuBackend::new(device.clone(), params, self.n_threads)?))
    }

    fn buffer_type(&self) -> BufferType {
        self.buft.clone()
    }

    fn buffer_from_host_ptr(
        &self,
        region: HostRegion,
        size: usize,
        max_tensor_size: usize,
    ) -> Result<Buffer> {
        let alignment = self.buft.alignment();
        if region.addr() % alignment != 0 {
            tracing::warn!(
                "cpu: host memory at {:#x} is not {alignment}-byte aligned",
                region.addr()
            );
            return Err(BackendError::Misaligned {
                offset: region.addr(),
                alignment,
            });
        }
        tracing::debug!("cpu: wrapping {size} bytes of host memory at {:#x}", region.addr());
        Ok(Buffer::from_impl_limited(
            self.buft.clone(),
            Box::new(HostPtrBuffer::new(region)),
            size,
            max_tensor_size,
        ))
    }

    fn supports_op(&self, node: NodeRef<'_>) -> bool {
        supports_node(node)
    }

    fn supports_buft(&self, buft: &BufferType) -> bool {
        buft.is_host()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registry with the single host CPU device.
pub struct CpuRegistry {
    config: CpuConfig,
}

impl CpuRegistry {
    pub fn new(config: CpuConfig) -> Self {
        CpuRegistry { config }
    }
}

impl RegistryImpl for CpuRegistry {
    fn name(&self) -> &str {
        CPU_REGISTRY_NAME
    }

    fn enumerate(&self, log: &Arc<LogSink>) -> Vec<Box<dyn DeviceImpl>> {
        match CpuDevice::new(&self.config) {
            Ok(dev) => vec![Box::new(dev)],
            Err(e) => {
                log.warn(format!("cpu: device unavailable: {e}"));
                Vec::new()
            }
        }
    }

    fn proc_address(&self, name: &str) -> Option<ProcAddress> {
        match name {
            SET_N_THREADS => Some(&SET_N_THREADS_FN),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
