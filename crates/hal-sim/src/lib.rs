//! `hal-sim` - Simulated off-host accelerator for the tensor backend runtime.
//!
//! A simulated device behaves like a discrete GPU behind the generic
//! contracts: its memory is private and capacity-limited, every backend
//! runs an asynchronous command stream on its own worker thread, and
//! events order work across backends without involving the host. Kernels
//! are the reference CPU kernels, executed on the stream.
//!
//! Devices are listed in [`SimConfig`] or added at runtime with
//! `add_device("name=SIM1,memory=64M,latency_us=50")`.

pub mod backend;
pub mod buffer;
pub mod config;
pub mod device;
pub mod event;
pub mod memory;
mod stream;

use std::sync::OnceLock;

use hal_core::{directory, Registry};

pub use backend::{SimBackend, SimPlan, SIM_GUID};
pub use buffer::{padded_size, SimBuffer, SimBufferType, MATRIX_ROW_PADDING};
pub use config::{SimConfig, SimDeviceConfig};
pub use device::{SimDevice, SimRegistry, SIM_REGISTRY_NAME};
pub use event::SimEvent;
pub use memory::DevicePool;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The process-wide `SIM` registry. Without a prior [`init`] it starts
/// with no devices.
pub fn registry() -> Registry {
    REGISTRY
        .get_or_init(|| Registry::new(SimRegistry::new(SimConfig::default())))
        .clone()
}

/// Create the process-wide registry from `config` and add it to the global
/// directory. Returns `false` when the registry already existed, in which
/// case `config` is ignored.
pub fn init(config: SimConfig) -> bool {
    let mut created = false;
    let reg = REGISTRY
        .get_or_init(|| {
            created = true;
            Registry::new(SimRegistry::new(config))
        })
        .clone();
    directory::global().register(reg);
    created
}

/// Add the `SIM` registry to the global directory.
pub fn register() {
    directory::global().register(registry());
}
