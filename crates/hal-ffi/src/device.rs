//! Registry and device discovery through the global directory.

use std::os::raw::{c_char, c_void};

use hal_core::directory;

use crate::error::{fail, report};
use crate::handles::{HalDevice, HalRegistry};
use crate::logging::bridge;
use crate::types::{HalDeviceProps, HalDeviceType, HalLogCallback, HalStatus};
use crate::{borrow, catch_panic, emit, out_slot, read_params, read_str};

fn not_found(what: String) -> HalStatus {
    fail(HalStatus::ErrorInvalidArgument, format!("no {what}"))
}

#[no_mangle]
pub extern "C" fn hal_reg_count() -> usize {
    directory::global().reg_count()
}

#[no_mangle]
pub unsafe extern "C" fn hal_reg_get(index: usize, out: *mut *mut HalRegistry) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let reg = directory::global()
            .reg_get(index)
            .ok_or_else(|| not_found(format!("registry at index {index}")))?;
        emit(slot, HalRegistry::new(reg));
        Ok(())
    })
}

/// Case-insensitive lookup of a registry by name.
#[no_mangle]
pub unsafe extern "C" fn hal_reg_by_name(
    name: *const c_char,
    out: *mut *mut HalRegistry,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let name = read_str(name, "name")?;
        let reg = directory::global()
            .reg_by_name(name)
            .ok_or_else(|| not_found(format!("registry '{name}'")))?;
        emit(slot, HalRegistry::new(reg));
        Ok(())
    })
}

/// Name of the registry, valid until the handle is freed. Null for a null
/// handle.
#[no_mangle]
pub unsafe extern "C" fn hal_reg_name(reg: *const HalRegistry) -> *const c_char {
    reg.as_ref().map_or(std::ptr::null(), |r| r.name.as_ptr())
}

#[no_mangle]
pub unsafe extern "C" fn hal_reg_dev_count(reg: *const HalRegistry) -> usize {
    reg.as_ref().map_or(0, |r| r.inner.device_count())
}

#[no_mangle]
pub unsafe extern "C" fn hal_reg_dev_get(
    reg: *const HalRegistry,
    index: usize,
    out: *mut *mut HalDevice,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let reg = borrow(reg, "registry")?;
        let dev = reg
            .inner
            .device_get(index)
            .ok_or_else(|| not_found(format!("device {index} in '{}'", reg.inner.name())))?;
        emit(slot, HalDevice::new(dev));
        Ok(())
    })
}

/// Create a device on a registry that supports runtime creation. The new
/// device is also listed by the global directory.
#[no_mangle]
pub unsafe extern "C" fn hal_reg_add_device(
    reg: *const HalRegistry,
    params: *const c_char,
    out: *mut *mut HalDevice,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let reg = borrow(reg, "registry")?;
        let dev = directory::global()
            .add_device(reg.inner.name(), read_params(params)?)
            .map_err(report)?;
        emit(slot, HalDevice::new(dev));
        Ok(())
    })
}

/// Route the registry's log lines to `callback` instead of `tracing`. A null
/// callback restores the default. `user_data` is passed back unchanged,
/// possibly from backend worker threads.
#[no_mangle]
pub unsafe extern "C" fn hal_reg_set_log_callback(
    reg: *const HalRegistry,
    callback: HalLogCallback,
    user_data: *mut c_void,
) -> HalStatus {
    catch_panic(|| {
        let reg = borrow(reg, "registry")?;
        reg.inner.set_log_callback(bridge(callback, user_data));
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn hal_reg_free(reg: *mut HalRegistry) {
    if !reg.is_null() {
        drop(Box::from_raw(reg));
    }
}

#[no_mangle]
pub extern "C" fn hal_dev_count() -> usize {
    directory::global().dev_count()
}

#[no_mangle]
pub unsafe extern "C" fn hal_dev_get(index: usize, out: *mut *mut HalDevice) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let dev = directory::global()
            .dev_get(index)
            .ok_or_else(|| not_found(format!("device at index {index}")))?;
        emit(slot, HalDevice::new(dev));
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn hal_dev_by_name(
    name: *const c_char,
    out: *mut *mut HalDevice,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let name = read_str(name, "name")?;
        let dev = directory::global()
            .dev_by_name(name)
            .ok_or_else(|| not_found(format!("device '{name}'")))?;
        emit(slot, HalDevice::new(dev));
        Ok(())
    })
}

/// First device of the given type, in registration order.
#[no_mangle]
pub unsafe extern "C" fn hal_dev_by_type(
    device_type: HalDeviceType,
    out: *mut *mut HalDevice,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let dev = directory::global()
            .dev_by_type(device_type.into())
            .ok_or_else(|| not_found(format!("device of type {device_type:?}")))?;
        emit(slot, HalDevice::new(dev));
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn hal_dev_name(dev: *const HalDevice) -> *const c_char {
    dev.as_ref().map_or(std::ptr::null(), |d| d.name.as_ptr())
}

#[no_mangle]
pub unsafe extern "C" fn hal_dev_description(dev: *const HalDevice) -> *const c_char {
    dev.as_ref()
        .map_or(std::ptr::null(), |d| d.description.as_ptr())
}

/// Current free and total memory of the device, in bytes.
#[no_mangle]
pub unsafe extern "C" fn hal_dev_memory(
    dev: *const HalDevice,
    free: *mut usize,
    total: *mut usize,
) -> HalStatus {
    catch_panic(|| {
        let dev = borrow(dev, "device")?;
        let (f, t) = dev.inner.memory();
        if let Some(free) = free.as_mut() {
            *free = f;
        }
        if let Some(total) = total.as_mut() {
            *total = t;
        }
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn hal_dev_get_props(
    dev: *const HalDevice,
    props: *mut HalDeviceProps,
) -> HalStatus {
    catch_panic(|| {
        let dev = borrow(dev, "device")?;
        let out = crate::borrow_mut(props, "props")?;
        let (memory_free, memory_total) = dev.inner.memory();
        *out = HalDeviceProps {
            name: dev.name.as_ptr(),
            description: dev.description.as_ptr(),
            memory_free,
            memory_total,
            device_type: dev.inner.device_type().into(),
            caps: dev.inner.caps().into(),
        };
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn hal_dev_free(dev: *mut HalDevice) {
    if !dev.is_null() {
        drop(Box::from_raw(dev));
    }
}
