//! Process-wide directory of registries and devices.
//!
//! Backend modules register here once at startup; callers enumerate without
//! depending on any specific module. Entries are never removed.

use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::backend::Backend;
use crate::device::{Device, DeviceType};
use crate::error::{BackendError, Result};
use crate::registry::Registry;

#[derive(Default)]
struct Entries {
    registries: Vec<Registry>,
    devices: Vec<Device>,
}

#[derive(Default)]
pub struct Directory {
    entries: RwLock<Entries>,
}

static GLOBAL: OnceLock<Directory> = OnceLock::new();

/// The process-wide directory.
pub fn global() -> &'static Directory {
    GLOBAL.get_or_init(Directory::new)
}

impl Directory {
    /// A private directory, independent of [`global`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `reg` and every device it currently has. Registering the
    /// same registry again does nothing.
    pub fn register(&self, reg: Registry) {
        let mut entries = self.entries.write();
        if entries.registries.iter().any(|r| r.ptr_eq(&reg)) {
            tracing::warn!("registry '{}' is already registered", reg.name());
            return;
        }
        tracing::info!(
            "registered backend '{}' ({} devices)",
            reg.name(),
            reg.device_count()
        );
        for dev in reg.devices() {
            push_device(&mut entries.devices, dev);
        }
        entries.registries.push(reg);
    }

    /// Register a single device. Registering the same device again does
    /// nothing.
    pub fn register_device(&self, dev: Device) {
        push_device(&mut self.entries.write().devices, dev);
    }

    pub fn reg_count(&self) -> usize {
        self.entries.read().registries.len()
    }

    pub fn reg_get(&self, index: usize) -> Option<Registry> {
        self.entries.read().registries.get(index).cloned()
    }

    /// Case-insensitive lookup.
    pub fn reg_by_name(&self, name: &str) -> Option<Registry> {
        self.entries
            .read()
            .registries
            .iter()
            .find(|r| r.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn dev_count(&self) -> usize {
        self.entries.read().devices.len()
    }

    pub fn dev_get(&self, index: usize) -> Option<Device> {
        self.entries.read().devices.get(index).cloned()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.entries.read().devices.clone()
    }

    /// Case-insensitive lookup.
    pub fn dev_by_name(&self, name: &str) -> Option<Device> {
        self.entries
            .read()
            .devices
            .iter()
            .find(|d| d.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// First device of the given type.
    pub fn dev_by_type(&self, device_type: DeviceType) -> Option<Device> {
        self.entries
            .read()
            .devices
            .iter()
            .find(|d| d.device_type() == device_type)
            .cloned()
    }

    pub fn init_by_name(&self, name: &str, params: &str) -> Result<Backend> {
        self.dev_by_name(name)
            .ok_or_else(|| BackendError::InitializationFailure(format!("no device named '{name}'")))?
            .init_backend(params)
    }

    pub fn init_by_type(&self, device_type: DeviceType, params: &str) -> Result<Backend> {
        self.dev_by_type(device_type)
            .ok_or_else(|| {
                BackendError::InitializationFailure(format!("no device of type {device_type}"))
            })?
            .init_backend(params)
    }

    /// A backend on the best device available: a GPU, then an integrated
    /// GPU, then the CPU.
    pub fn init_best(&self) -> Result<Backend> {
        [DeviceType::Gpu, DeviceType::IGpu, DeviceType::Cpu]
            .into_iter()
            .find_map(|t| self.dev_by_type(t))
            .ok_or_else(|| BackendError::InitializationFailure("no devices registered".into()))?
            .init_backend("")
    }

    /// Add a device to the registry named `reg_name` and register it here.
    pub fn add_device(&self, reg_name: &str, params: &str) -> Result<Device> {
        let reg = self.reg_by_name(reg_name).ok_or_else(|| {
            BackendError::InitializationFailure(format!("no registry named '{reg_name}'"))
        })?;
        let dev = reg.add_device(params)?;
        self.register_device(dev.clone());
        Ok(dev)
    }
}

fn push_device(devices: &mut Vec<Device>, dev: Device) {
    if devices.iter().any(|d| d.ptr_eq(&dev)) {
        tracing::warn!("device '{}' is already registered", dev.name());
        return;
    }
    tracing::debug!("registered device '{}' ({})", dev.name(), dev.device_type());
    devices.push(dev);
}
