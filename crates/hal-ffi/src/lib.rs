//! `hal-ffi` - C boundary for the tensor backend runtime.
//!
//! Every runtime object crosses the boundary as an opaque, heap-allocated
//! handle that the caller releases with the matching `hal_*_free`. Calls
//! return a [`HalStatus`]; on failure the message is available from
//! [`hal_last_error`] on the same thread. Panics never unwind into C.

mod buffer;
mod config;
mod device;
mod error;
mod execution;
mod handles;
mod logging;
mod types;

pub use buffer::*;
pub use config::{ConfigError, RuntimeConfig};
pub use device::*;
pub use error::*;
pub use execution::*;
pub use handles::*;
pub use logging::init_logging;
pub use types::*;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::AssertUnwindSafe;
use std::path::Path;

/// Run `f`, converting a panic into `HalStatus::ErrorInternal`.
fn catch_panic<F: FnOnce() -> Result<(), HalStatus>>(f: F) -> HalStatus {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => HalStatus::Ok,
        Ok(Err(status)) => status,
        Err(_) => {
            set_last_error("internal panic");
            HalStatus::ErrorInternal
        }
    }
}

pub(crate) unsafe fn borrow<'a, T>(ptr: *const T, what: &str) -> Result<&'a T, HalStatus> {
    ptr.as_ref()
        .ok_or_else(|| fail(HalStatus::ErrorInvalidArgument, format!("{what} is null")))
}

pub(crate) unsafe fn borrow_mut<'a, T>(ptr: *mut T, what: &str) -> Result<&'a mut T, HalStatus> {
    ptr.as_mut()
        .ok_or_else(|| fail(HalStatus::ErrorInvalidArgument, format!("{what} is null")))
}

/// Slot a new handle will be written to.
pub(crate) unsafe fn out_slot<'a, T>(out: *mut *mut T) -> Result<&'a mut *mut T, HalStatus> {
    borrow_mut(out, "out")
}

pub(crate) fn emit<T>(slot: &mut *mut T, value: T) {
    *slot = Box::into_raw(Box::new(value));
}

pub(crate) unsafe fn read_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, HalStatus> {
    if ptr.is_null() {
        return Err(fail(HalStatus::ErrorInvalidArgument, format!("{what} is null")));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|e| fail(HalStatus::ErrorInvalidArgument, format!("invalid {what}: {e}")))
}

/// Backend and device params; null means none.
pub(crate) unsafe fn read_params<'a>(ptr: *const c_char) -> Result<&'a str, HalStatus> {
    if ptr.is_null() {
        Ok("")
    } else {
        read_str(ptr, "params")
    }
}

pub(crate) unsafe fn read_bytes<'a>(data: *const u8, len: usize) -> Result<&'a [u8], HalStatus> {
    if len == 0 {
        return Ok(&[]);
    }
    if data.is_null() {
        return Err(fail(HalStatus::ErrorInvalidArgument, "data is null"));
    }
    Ok(std::slice::from_raw_parts(data, len))
}

pub(crate) unsafe fn write_bytes<'a>(data: *mut u8, len: usize) -> Result<&'a mut [u8], HalStatus> {
    if len == 0 {
        return Ok(&mut []);
    }
    if data.is_null() {
        return Err(fail(HalStatus::ErrorInvalidArgument, "data is null"));
    }
    Ok(std::slice::from_raw_parts_mut(data, len))
}

/// Set up logging and the process-wide CPU and SIM registries from
/// `config`. Registries that already exist keep their configuration.
pub fn init_runtime(config: &RuntimeConfig) -> Result<(), ConfigError> {
    init_logging(&config.log_level);
    config.validate()?;
    if !hal_cpu::init(config.cpu.clone()) {
        tracing::debug!("CPU registry already initialized");
    }
    if !hal_sim::init(config.sim.clone()) {
        tracing::debug!("SIM registry already initialized");
    }
    tracing::info!(
        "runtime ready: {} registries, {} devices",
        hal_core::directory::global().reg_count(),
        hal_core::directory::global().dev_count()
    );
    Ok(())
}

fn init_status(config: Result<RuntimeConfig, ConfigError>) -> Result<(), HalStatus> {
    let config = config.map_err(|e| fail(HalStatus::ErrorInvalidArgument, e.to_string()))?;
    init_runtime(&config).map_err(|e| fail(HalStatus::ErrorInitialization, e.to_string()))
}

/// Initialize the runtime from a TOML document. A null `config_toml` uses
/// the defaults.
#[no_mangle]
pub unsafe extern "C" fn hal_init(config_toml: *const c_char) -> HalStatus {
    catch_panic(|| {
        let config = if config_toml.is_null() {
            Ok(RuntimeConfig::default())
        } else {
            RuntimeConfig::from_toml(read_str(config_toml, "config")?)
        };
        init_status(config)
    })
}

/// Initialize the runtime from a TOML file.
#[no_mangle]
pub unsafe extern "C" fn hal_init_from_file(path: *const c_char) -> HalStatus {
    catch_panic(|| {
        let path = read_str(path, "path")?;
        init_status(RuntimeConfig::from_file(Path::new(path)))
    })
}

/// Get the last error message for the current thread.
///
/// Returns a heap-allocated C string that the caller must free with
/// `hal_free_string`, or null if there is no pending error.
#[no_mangle]
pub extern "C" fn hal_last_error() -> *const c_char {
    match take_last_error() {
        Some(s) => s.into_raw(),
        None => std::ptr::null(),
    }
}

/// Free a string previously returned by `hal_last_error`.
#[no_mangle]
pub unsafe extern "C" fn hal_free_string(s: *const c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s as *mut c_char));
    }
}
