//! Registries: named providers of devices, typically one per backend module.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::device::{Device, DeviceImpl};
use crate::error::{BackendError, Result};
use crate::log::{LogCallback, LogSink};

/// Opaque vendor extension returned by [`RegistryImpl::proc_address`].
pub type ProcAddress = &'static (dyn Any + Send + Sync);

/// Implementation side of a registry.
pub trait RegistryImpl: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Devices present at construction. Called once. `log` is the sink the
    /// registry's log callback is attached to.
    fn enumerate(&self, log: &Arc<LogSink>) -> Vec<Box<dyn DeviceImpl>>;

    /// Create a device from implementation-defined `params`, e.g. the
    /// address of a remote endpoint.
    fn add_device(&self, params: &str, _log: &Arc<LogSink>) -> Result<Box<dyn DeviceImpl>> {
        Err(BackendError::Unsupported(format!(
            "{}: add_device('{params}')",
            self.name()
        )))
    }

    /// Vendor-specific entry point by name, `None` if unknown.
    fn proc_address(&self, _name: &str) -> Option<ProcAddress> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct RegistryInner {
    imp: Box<dyn RegistryImpl>,
    devices: RwLock<Vec<Device>>,
    add_lock: Mutex<()>,
    log: Arc<LogSink>,
}

/// Shared handle to a registry.
///
/// Device indices are stable: devices are only ever appended.
#[derive(Clone)]
pub struct Registry(Arc<RegistryInner>);

impl Registry {
    pub fn new(imp: impl RegistryImpl) -> Registry {
        let log = Arc::new(LogSink::new());
        let inner = Arc::new_cyclic(|weak: &Weak<RegistryInner>| {
            let devices = imp
                .enumerate(&log)
                .into_iter()
                .map(|d| Device::with_registry(d, weak.clone()))
                .collect::<Vec<_>>();
            tracing::debug!("registry '{}' enumerated {} device(s)", imp.name(), devices.len());
            RegistryInner {
                imp: Box::new(imp),
                devices: RwLock::new(devices),
                add_lock: Mutex::new(()),
                log,
            }
        });
        Registry(inner)
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Registry {
        Registry(inner)
    }

    pub fn name(&self) -> &str {
        self.0.imp.name()
    }

    pub fn device_count(&self) -> usize {
        self.0.devices.read().len()
    }

    pub fn device_get(&self, index: usize) -> Option<Device> {
        self.0.devices.read().get(index).cloned()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.0.devices.read().clone()
    }

    /// Create and append a device. Calls are serialized per registry. On
    /// failure nothing is registered.
    pub fn add_device(&self, params: &str) -> Result<Device> {
        let _guard = self.0.add_lock.lock();
        let imp = self
            .0
            .imp
            .add_device(params, &self.0.log)
            .inspect_err(|e| self.0.log.warn(format!("{}: add_device failed: {e}", self.name())))?;
        let device = Device::with_registry(imp, Arc::downgrade(&self.0));
        self.0.devices.write().push(device.clone());
        self.0
            .log
            .info(format!("{}: added device '{}'", self.name(), device.name()));
        Ok(device)
    }

    /// Look up a vendor extension and view it as `T`. Unknown names and
    /// type mismatches both yield `None`.
    pub fn proc_address<T: Any>(&self, name: &str) -> Option<&'static T> {
        self.0.imp.proc_address(name)?.downcast_ref::<T>()
    }

    pub fn set_log_callback(&self, callback: Option<LogCallback>) {
        self.0.log.set_callback(callback)
    }

    pub fn log(&self) -> &Arc<LogSink> {
        &self.0.log
    }

    pub fn downcast_ref<T: RegistryImpl>(&self) -> Option<&T> {
        self.0.imp.as_any().downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Registry) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Registry {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Registry {}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name())
            .field("devices", &self.device_count())
            .finish()
    }
}
