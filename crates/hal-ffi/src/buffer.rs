//! Buffer types, buffers and tensors.

use std::os::raw::c_char;

use hal_core::{tensor_copy, tensor_get, tensor_memset, tensor_set, HostRegion, Shape, Tensor};

use crate::error::{fail, report};
use crate::handles::{ForeignMemory, HalBuffer, HalBufferType, HalDevice, HalTensor};
use crate::types::{HalBufferUsage, HalDType, HalStatus};
use crate::{
    borrow, borrow_mut, catch_panic, emit, out_slot, read_bytes, read_str, write_bytes,
};

#[no_mangle]
pub unsafe extern "C" fn hal_dev_buffer_type(
    dev: *const HalDevice,
    out: *mut *mut HalBufferType,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let dev = borrow(dev, "device")?;
        emit(slot, HalBufferType::new(dev.inner.buffer_type()));
        Ok(())
    })
}

/// Host buffer type for staging transfers to the device.
#[no_mangle]
pub unsafe extern "C" fn hal_dev_host_buffer_type(
    dev: *const HalDevice,
    out: *mut *mut HalBufferType,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let dev = borrow(dev, "device")?;
        let buft = dev.inner.host_buffer_type().ok_or_else(|| {
            fail(
                HalStatus::ErrorUnsupported,
                format!("{} has no host buffer type", dev.inner.name()),
            )
        })?;
        emit(slot, HalBufferType::new(buft));
        Ok(())
    })
}

/// Wrap `size` bytes of caller memory as a read-only buffer.
///
/// # Safety
/// `ptr` must stay valid and unmodified until the buffer and every tensor
/// placed in it are freed.
#[no_mangle]
pub unsafe extern "C" fn hal_dev_buffer_from_host_ptr(
    dev: *const HalDevice,
    ptr: *const u8,
    size: usize,
    max_tensor_size: usize,
    out: *mut *mut HalBuffer,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let dev = borrow(dev, "device")?;
        if ptr.is_null() {
            return Err(fail(HalStatus::ErrorInvalidArgument, "ptr is null"));
        }
        let region = HostRegion::new(ForeignMemory::new(ptr, size));
        let inner = dev
            .inner
            .buffer_from_host_ptr(region, size, max_tensor_size)
            .map_err(report)?;
        emit(slot, HalBuffer { inner });
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn hal_buft_name(buft: *const HalBufferType) -> *const c_char {
    buft.as_ref().map_or(std::ptr::null(), |b| b.name.as_ptr())
}

#[no_mangle]
pub unsafe extern "C" fn hal_buft_alignment(buft: *const HalBufferType) -> usize {
    buft.as_ref().map_or(0, |b| b.inner.alignment())
}

#[no_mangle]
pub unsafe extern "C" fn hal_buft_max_size(buft: *const HalBufferType) -> usize {
    buft.as_ref().map_or(0, |b| b.inner.max_size())
}

#[no_mangle]
pub unsafe extern "C" fn hal_buft_is_host(buft: *const HalBufferType) -> bool {
    buft.as_ref().is_some_and(|b| b.inner.is_host())
}

/// Bytes the buffer type needs to hold `tensor`, padding included.
#[no_mangle]
pub unsafe extern "C" fn hal_buft_alloc_size(
    buft: *const HalBufferType,
    tensor: *const HalTensor,
) -> usize {
    match (buft.as_ref(), tensor.as_ref()) {
        (Some(b), Some(t)) => b.inner.alloc_size(&t.inner),
        _ => 0,
    }
}

#[no_mangle]
pub unsafe extern "C" fn hal_buft_alloc_buffer(
    buft: *const HalBufferType,
    size: usize,
    out: *mut *mut HalBuffer,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let buft = borrow(buft, "buffer type")?;
        let inner = buft.inner.alloc_buffer(size).map_err(report)?;
        emit(slot, HalBuffer { inner });
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn hal_buft_free(buft: *mut HalBufferType) {
    if !buft.is_null() {
        drop(Box::from_raw(buft));
    }
}

#[no_mangle]
pub unsafe extern "C" fn hal_buffer_size(buf: *const HalBuffer) -> usize {
    buf.as_ref().map_or(0, |b| b.inner.size())
}

/// Device address of the first byte.
#[no_mangle]
pub unsafe extern "C" fn hal_buffer_base(buf: *const HalBuffer) -> usize {
    buf.as_ref().map_or(0, |b| b.inner.base())
}

#[no_mangle]
pub unsafe extern "C" fn hal_buffer_is_host(buf: *const HalBuffer) -> bool {
    buf.as_ref().is_some_and(|b| b.inner.is_host())
}

#[no_mangle]
pub unsafe extern "C" fn hal_buffer_get_usage(buf: *const HalBuffer) -> HalBufferUsage {
    buf.as_ref()
        .map_or(HalBufferUsage::Any, |b| b.inner.usage().into())
}

#[no_mangle]
pub unsafe extern "C" fn hal_buffer_set_usage(
    buf: *const HalBuffer,
    usage: HalBufferUsage,
) -> HalStatus {
    catch_panic(|| {
        borrow(buf, "buffer")?.inner.set_usage(usage.into());
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn hal_buffer_clear(buf: *const HalBuffer, value: u8) -> HalStatus {
    catch_panic(|| borrow(buf, "buffer")?.inner.clear(value).map_err(report))
}

#[no_mangle]
pub unsafe extern "C" fn hal_buffer_reset(buf: *const HalBuffer) -> HalStatus {
    catch_panic(|| {
        borrow(buf, "buffer")?.inner.reset();
        Ok(())
    })
}

/// Release the handle. Memory is returned once no tensor refers to it.
#[no_mangle]
pub unsafe extern "C" fn hal_buffer_free(buf: *mut HalBuffer) {
    if !buf.is_null() {
        let handle = Box::from_raw(buf);
        handle.inner.free();
    }
}

/// Describe a new unallocated tensor of `ndim` dimensions. The last
/// dimension is the contiguous row.
#[no_mangle]
pub unsafe extern "C" fn hal_tensor_new(
    name: *const c_char,
    dtype: HalDType,
    dims: *const usize,
    ndim: usize,
    out: *mut *mut HalTensor,
) -> HalStatus {
    catch_panic(|| {
        let slot = out_slot(out)?;
        let name = read_str(name, "name")?;
        if ndim == 0 || dims.is_null() {
            return Err(fail(HalStatus::ErrorInvalidArgument, "tensor needs dims"));
        }
        let dims = std::slice::from_raw_parts(dims, ndim);
        let inner = Tensor::new(name, dtype.into(), Shape::from_slice(dims));
        emit(slot, HalTensor { inner });
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn hal_tensor_free(tensor: *mut HalTensor) {
    if !tensor.is_null() {
        drop(Box::from_raw(tensor));
    }
}

#[no_mangle]
pub unsafe extern "C" fn hal_tensor_nbytes(tensor: *const HalTensor) -> usize {
    tensor.as_ref().map_or(0, |t| t.inner.nbytes())
}

#[no_mangle]
pub unsafe extern "C" fn hal_tensor_is_allocated(tensor: *const HalTensor) -> bool {
    tensor.as_ref().is_some_and(|t| t.inner.is_allocated())
}

/// Place the tensor at `offset` in the buffer.
#[no_mangle]
pub unsafe extern "C" fn hal_buffer_alloc_tensor(
    buf: *const HalBuffer,
    tensor: *mut HalTensor,
    offset: usize,
) -> HalStatus {
    catch_panic(|| {
        let buf = borrow(buf, "buffer")?;
        let tensor = borrow_mut(tensor, "tensor")?;
        buf.inner
            .alloc_tensor(&mut tensor.inner, offset)
            .map_err(report)
    })
}

/// Blocking write of `size` bytes at `offset` within the tensor.
#[no_mangle]
pub unsafe extern "C" fn hal_tensor_set(
    tensor: *const HalTensor,
    data: *const u8,
    offset: usize,
    size: usize,
) -> HalStatus {
    catch_panic(|| {
        let tensor = borrow(tensor, "tensor")?;
        tensor_set(&tensor.inner, read_bytes(data, size)?, offset).map_err(report)
    })
}

#[no_mangle]
pub unsafe extern "C" fn hal_tensor_get(
    tensor: *const HalTensor,
    data: *mut u8,
    offset: usize,
    size: usize,
) -> HalStatus {
    catch_panic(|| {
        let tensor = borrow(tensor, "tensor")?;
        tensor_get(&tensor.inner, write_bytes(data, size)?, offset).map_err(report)
    })
}

#[no_mangle]
pub unsafe extern "C" fn hal_tensor_memset(
    tensor: *const HalTensor,
    value: u8,
    offset: usize,
    size: usize,
) -> HalStatus {
    catch_panic(|| {
        let tensor = borrow(tensor, "tensor")?;
        tensor_memset(&tensor.inner, value, offset, size).map_err(report)
    })
}

/// Blocking copy between tensors of equal size on any devices.
#[no_mangle]
pub unsafe extern "C" fn hal_tensor_copy(src: *const HalTensor, dst: *const HalTensor) -> HalStatus {
    catch_panic(|| {
        let src = borrow(src, "src")?;
        let dst = borrow(dst, "dst")?;
        tensor_copy(&src.inner, &dst.inner).map_err(report)
    })
}
