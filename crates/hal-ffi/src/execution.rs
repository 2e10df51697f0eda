//! Backends, asynchronous transfers and events.

use std::os::raw::c_char;

use hal_core::{directory, tensor_copy_async};

use crate::error::{fail, report};
use crate::handles::{HalBackend, HalBuffer, HalDevice, HalEvent, HalPendingRead, HalTensor};
use crate::types::{HalDeviceType, HalStatus};
use crate::{borrow, catch_panic, emit, out_slot, read_bytes, read_params, read_str, write_bytes};

#[no_mangle]
pub unsafe extern "C" fn hal_dev_init_backend(
    dev: *const HalDevice,
    params: *const c_char,
    out: *mut *mut HalBackend,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let dev = borrow(dev, "device")?;
        let backend = dev.inner.init_backend(read_params(params)?).map_err(report)?;
        emit(slot, HalBackend::new(backend));
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn hal_backend_init_by_name(
    name: *const c_char,
    params: *const c_char,
    out: *mut *mut HalBackend,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let backend = directory::global()
            .init_by_name(read_str(name, "name")?, read_params(params)?)
            .map_err(report)?;
        emit(slot, HalBackend::new(backend));
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn hal_backend_init_by_type(
    device_type: HalDeviceType,
    params: *const c_char,
    out: *mut *mut HalBackend,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let backend = directory::global()
            .init_by_type(device_type.into(), read_params(params)?)
            .map_err(report)?;
        emit(slot, HalBackend::new(backend));
        Ok(())
    })
}

/// Backend on the most capable device: a discrete accelerator, then an
/// integrated one, then the CPU.
#[no_mangle]
pub unsafe extern "C" fn hal_backend_init_best(out: *mut *mut HalBackend) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let backend = directory::global().init_best().map_err(report)?;
        emit(slot, HalBackend::new(backend));
        Ok(())
    })
}

/// Release a backend. Queued work is drained first.
#[no_mangle]
pub unsafe extern "C" fn hal_backend_free(backend: *mut HalBackend) {
    if !backend.is_null() {
        let handle = Box::from_raw(backend);
        handle.inner.free();
    }
}

#[no_mangle]
pub unsafe extern "C" fn hal_backend_name(backend: *const HalBackend) -> *const c_char {
    backend
        .as_ref()
        .map_or(std::ptr::null(), |b| b.name.as_ptr())
}

#[no_mangle]
pub unsafe extern "C" fn hal_backend_device(
    backend: *const HalBackend,
    out: *mut *mut HalDevice,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let backend = borrow(backend, "backend")?;
        emit(slot, HalDevice::new(backend.inner.device().clone()));
        Ok(())
    })
}

/// Allocate from the backend's default buffer type.
#[no_mangle]
pub unsafe extern "C" fn hal_backend_alloc_buffer(
    backend: *const HalBackend,
    size: usize,
    out: *mut *mut HalBuffer,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let backend = borrow(backend, "backend")?;
        let inner = backend.inner.alloc_buffer(size).map_err(report)?;
        emit(slot, HalBuffer { inner });
        Ok(())
    })
}

/// Queue a write of `size` bytes at `offset` into the tensor. `data` is
/// copied before the call returns.
#[no_mangle]
pub unsafe extern "C" fn hal_backend_tensor_set_async(
    backend: *const HalBackend,
    tensor: *const HalTensor,
    data: *const u8,
    offset: usize,
    size: usize,
) -> HalStatus {
    catch_panic(|| {
        let backend = borrow(backend, "backend")?;
        let tensor = borrow(tensor, "tensor")?;
        let data = read_bytes(data, size)?;
        backend
            .inner
            .set_tensor_async(&tensor.inner, data, offset)
            .map_err(report)
    })
}

/// Queue a read of `size` bytes at `offset`. Collect the bytes with
/// `hal_pending_read_wait` once the backend has been synchronized.
#[no_mangle]
pub unsafe extern "C" fn hal_backend_tensor_get_async(
    backend: *const HalBackend,
    tensor: *const HalTensor,
    offset: usize,
    size: usize,
    out: *mut *mut HalPendingRead,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let backend = borrow(backend, "backend")?;
        let tensor = borrow(tensor, "tensor")?;
        let inner = backend
            .inner
            .get_tensor_async(&tensor.inner, offset, size)
            .map_err(report)?;
        emit(slot, HalPendingRead { inner });
        Ok(())
    })
}

/// Block until the read completes and copy its bytes into `dst`, which must
/// hold exactly the requested size. Consumes the read handle.
#[no_mangle]
pub unsafe extern "C" fn hal_pending_read_wait(
    read: *mut HalPendingRead,
    dst: *mut u8,
    size: usize,
) -> HalStatus {
    catch_panic(|| {
        if read.is_null() {
            return Err(fail(HalStatus::ErrorInvalidArgument, "read is null"));
        }
        let read = Box::from_raw(read);
        let bytes = read.inner.wait().map_err(report)?;
        if bytes.len() != size {
            return Err(fail(
                HalStatus::ErrorInvalidArgument,
                format!("read returned {} bytes, destination holds {size}", bytes.len()),
            ));
        }
        write_bytes(dst, size)?.copy_from_slice(&bytes);
        Ok(())
    })
}

/// Drop a read without waiting for it.
#[no_mangle]
pub unsafe extern "C" fn hal_pending_read_free(read: *mut HalPendingRead) {
    if !read.is_null() {
        drop(Box::from_raw(read));
    }
}

/// Copy `src` into `dst`, asynchronously when the destination backend can,
/// otherwise by synchronizing both backends and staging through the host.
#[no_mangle]
pub unsafe extern "C" fn hal_backend_tensor_copy_async(
    src_backend: *const HalBackend,
    dst_backend: *const HalBackend,
    src: *const HalTensor,
    dst: *const HalTensor,
) -> HalStatus {
    catch_panic(|| {
        let src_backend = borrow(src_backend, "src_backend")?;
        let dst_backend = borrow(dst_backend, "dst_backend")?;
        let src = borrow(src, "src")?;
        let dst = borrow(dst, "dst")?;
        tensor_copy_async(&src_backend.inner, &dst_backend.inner, &src.inner, &dst.inner)
            .map_err(report)
    })
}

/// Wait for all queued work. Reports the first failure of queued work
/// since the last synchronize.
#[no_mangle]
pub unsafe extern "C" fn hal_backend_synchronize(backend: *const HalBackend) -> HalStatus {
    catch_panic(|| {
        let backend = borrow(backend, "backend")?;
        backend.inner.synchronize().map_err(report)
    })
}

#[no_mangle]
pub unsafe extern "C" fn hal_event_new(dev: *const HalDevice, out: *mut *mut HalEvent) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let dev = borrow(dev, "device")?;
        let inner = dev.inner.event_new().map_err(report)?;
        emit(slot, HalEvent { inner });
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn hal_event_free(event: *mut HalEvent) {
    if !event.is_null() {
        drop(Box::from_raw(event));
    }
}

/// Mark the point in `backend`'s queue the event completes at.
#[no_mangle]
pub unsafe extern "C" fn hal_event_record(
    event: *const HalEvent,
    backend: *const HalBackend,
) -> HalStatus {
    catch_panic(|| {
        let event = borrow(event, "event")?;
        let backend = borrow(backend, "backend")?;
        backend.inner.event_record(&event.inner).map_err(report)
    })
}

/// Make work queued on `backend` after this call wait for the event.
#[no_mangle]
pub unsafe extern "C" fn hal_event_wait(
    backend: *const HalBackend,
    event: *const HalEvent,
) -> HalStatus {
    catch_panic(|| {
        let backend = borrow(backend, "backend")?;
        let event = borrow(event, "event")?;
        backend.inner.event_wait(&event.inner).map_err(report)
    })
}

/// Block the calling thread until the event completes.
#[no_mangle]
pub unsafe extern "C" fn hal_event_synchronize(event: *const HalEvent) -> HalStatus {
    catch_panic(|| {
        let event = borrow(event, "event")?;
        event.inner.synchronize().map_err(report)
    })
}
