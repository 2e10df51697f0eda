//! `hal-cpu` - Reference host CPU device for the tensor backend runtime.
//!
//! This crate provides:
//! - A `CPU` buffer type over aligned heap memory
//! - Read-only buffers wrapping externally owned host regions
//! - Reference kernels and a synchronous backend with graph plans
//! - The `CPU` registry, with a `hal_cpu_set_n_threads` extension

pub mod backend;
pub mod buffer;
pub mod compute;
pub mod config;
pub mod device;
pub mod kernels;
mod meminfo;

use std::sync::OnceLock;

use hal_core::{directory, Registry};

pub use backend::{CpuBackend, CpuPlan, CPU_GUID};
pub use buffer::{CpuBuffer, CpuBufferType, HostPtrBuffer};
pub use config::CpuConfig;
pub use device::{CpuDevice, CpuRegistry, SetNThreadsFn, SET_N_THREADS};

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The process-wide CPU registry, created with the default configuration
/// on first use unless [`init`] ran before.
pub fn registry() -> Registry {
    REGISTRY
        .get_or_init(|| Registry::new(CpuRegistry::new(CpuConfig::default())))
        .clone()
}

/// Create the process-wide CPU registry from `config` and add it to the
/// global directory. Returns `false` when the registry already existed, in
/// which case `config` is ignored.
pub fn init(config: CpuConfig) -> bool {
    let mut created = false;
    let reg = REGISTRY
        .get_or_init(|| {
            created = true;
            Registry::new(CpuRegistry::new(config))
        })
        .clone();
    directory::global().register(reg);
    created
}

/// Add the CPU registry to the global directory.
pub fn register() {
    directory::global().register(registry());
}
