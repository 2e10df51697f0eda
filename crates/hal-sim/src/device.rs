use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use hal_core::{
    BackendError, BackendImpl, BufferType, Device, DeviceCaps, DeviceImpl, DeviceType, Event,
    EventImpl, LogSink, NodeRef, Op, RegistryImpl, Result,
};
use hal_cpu::compute::supports_node;
use hal_cpu::CpuBufferType;
use parking_lot::Mutex;

use crate::backend::SimBackend;
use crate::buffer::SimBufferType;
use crate::config::{SimConfig, SimDeviceConfig};
use crate::event::SimEvent;
use crate::memory::DevicePool;

pub const SIM_REGISTRY_NAME: &str = "SIM";

/// Matmuls with at least this many rows are worth copying weights over for.
pub const MIN_OFFLOAD_ROWS: usize = 32;

pub struct SimDevice {
    config: SimDeviceConfig,
    description: String,
    pool: Arc<DevicePool>,
    buft: BufferType,
    host_buft: BufferType,
}

impl SimDevice {
    pub fn new(config: SimDeviceConfig) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(DevicePool::new(config.memory_bytes()?));
        let buft = BufferType::new(SimBufferType::new(
            config.name.clone(),
            config.alignment,
            Arc::clone(&pool),
        ));
        let host_buft = BufferType::new(CpuBufferType::named(
            format!("{}_Host", config.name),
            config.alignment,
            usize::MAX,
        ));
        Ok(SimDevice {
            description: format!(
                "simulated accelerator, {} memory, {}us latency",
                config.memory, config.latency_us
            ),
            config,
            pool,
            buft,
            host_buft,
        })
    }

    pub fn pool(&self) -> &DevicePool {
        &self.pool
    }
}

impl DeviceImpl for SimDevice {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn memory(&self) -> (usize, usize) {
        (self.pool.free(), self.pool.capacity())
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Gpu
    }

    fn caps(&self) -> DeviceCaps {
        DeviceCaps {
            async_io: true,
            host_buffer: true,
            buffer_from_host_ptr: false,
            events: true,
        }
    }

    fn init_backend(&self, _device: &Device, params: &str) -> Result<Box<dyn BackendImpl>> {
        Ok(Box::new(SimBackend::new(
            &self.config.name,
            params,
            self.config.latency(),
        )?))
    }

    fn buffer_type(&self) -> BufferType {
        self.buft.clone()
    }

    fn host_buffer_type(&self) -> Option<BufferType> {
        Some(self.host_buft.clone())
    }

    fn supports_op(&self, node: NodeRef<'_>) -> bool {
        supports_node(node)
    }

    fn supports_buft(&self, buft: &BufferType) -> bool {
        buft.ptr_eq(&self.buft)
    }

    fn offload_op(&self, node: NodeRef<'_>) -> bool {
        node.op() == Op::MatMul && node.tensor().shape().n_rows() >= MIN_OFFLOAD_ROWS
    }

    fn event_new(&self) -> Result<Box<dyn EventImpl>> {
        Ok(Box::new(SimEvent::new()))
    }

    fn event_synchronize(&self, event: &Event) -> Result<()> {
        let sim = event
            .downcast_ref::<SimEvent>()
            .ok_or_else(|| BackendError::Foreign("event".into()))?;
        let generation = sim.state().target()?;
        sim.state().wait_for(generation);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registry of simulated devices. Devices come from the configuration and
/// from `add_device("name=...,memory=...")`.
pub struct SimRegistry {
    config: SimConfig,
    names: Mutex<HashSet<String>>,
}

impl SimRegistry {
    pub fn new(config: SimConfig) -> Self {
        SimRegistry {
            config,
            names: Mutex::new(HashSet::new()),
        }
    }

    fn create(&self, config: SimDeviceConfig) -> Result<SimDevice> {
        let mut names = self.names.lock();
        if names.contains(&config.name) {
            return Err(BackendError::InitializationFailure(format!(
                "sim device '{}' already exists",
                config.name
            )));
        }
        let device = SimDevice::new(config)?;
        names.insert(device.config.name.clone());
        Ok(device)
    }
}

impl RegistryImpl for SimRegistry {
    fn name(&self) -> &str {
        SIM_REGISTRY_NAME
    }

    fn enumerate(&self, log: &Arc<LogSink>) -> Vec<Box<dyn DeviceImpl>> {
        let mut devices: Vec<Box<dyn DeviceImpl>> = Vec::new();
        for config in &self.config.devices {
            match self.create(config.clone()) {
                Ok(dev) => devices.push(Box::new(dev)),
                Err(e) => log.warn(format!("sim: skipping device '{}': {e}", config.name)),
            }
        }
        devices
    }

    fn add_device(&self, params: &str, log: &Arc<LogSink>) -> Result<Box<dyn DeviceImpl>> {
        let config = SimDeviceConfig::from_params(params)?;
        let device = self.create(config)?;
        log.debug(format!("sim: created device '{}'", device.config.name));
        Ok(Box::new(device))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
