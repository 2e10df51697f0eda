//! Drives the runtime through the exported C functions only.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use hal_ffi::*;

const CONFIG: &str = r#"
log_level = "warn"

[cpu]
n_threads = 2

[[sim.devices]]
name = "SIM0"
memory = "64M"
latency_us = 50
"#;

fn init() {
    let config = CString::new(CONFIG).unwrap();
    assert_eq!(unsafe { hal_init(config.as_ptr()) }, HalStatus::Ok);
}

fn c(s: &str) -> CString {
    CString::new(s).unwrap()
}

fn str_of(ptr: *const c_char) -> String {
    assert!(!ptr.is_null());
    unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string()
}

fn last_error() -> String {
    let ptr = hal_last_error();
    let msg = str_of(ptr);
    unsafe { hal_free_string(ptr) };
    msg
}

fn device_of_type(t: HalDeviceType) -> *mut HalDevice {
    let mut dev = ptr::null_mut();
    assert_eq!(unsafe { hal_dev_by_type(t, &mut dev) }, HalStatus::Ok);
    dev
}

fn f32_tensor(name: &str, dims: &[usize]) -> *mut HalTensor {
    let mut t = ptr::null_mut();
    let name = c(name);
    let status =
        unsafe { hal_tensor_new(name.as_ptr(), HalDType::F32, dims.as_ptr(), dims.len(), &mut t) };
    assert_eq!(status, HalStatus::Ok);
    t
}

#[test]
fn test_init_and_discovery() {
    init();
    init();
    assert!(hal_reg_count() >= 2);

    let mut reg = ptr::null_mut();
    let name = c("cpu");
    assert_eq!(unsafe { hal_reg_by_name(name.as_ptr(), &mut reg) }, HalStatus::Ok);
    assert_eq!(str_of(unsafe { hal_reg_name(reg) }), "CPU");
    assert_eq!(unsafe { hal_reg_dev_count(reg) }, 1);
    unsafe { hal_reg_free(reg) };

    let dev = device_of_type(HalDeviceType::Gpu);
    let mut props = HalDeviceProps {
        name: ptr::null(),
        description: ptr::null(),
        memory_free: 0,
        memory_total: 0,
        device_type: HalDeviceType::Cpu,
        caps: HalDeviceCaps::default(),
    };
    assert_eq!(unsafe { hal_dev_get_props(dev, &mut props) }, HalStatus::Ok);
    assert_eq!(str_of(props.name), "SIM0");
    assert_eq!(props.device_type, HalDeviceType::Gpu);
    assert_eq!(props.memory_total, 64 << 20);
    assert!(props.caps.async_io && props.caps.events);
    assert!(!props.caps.buffer_from_host_ptr);

    let mut total = 0;
    assert_eq!(
        unsafe { hal_dev_memory(dev, ptr::null_mut(), &mut total) },
        HalStatus::Ok
    );
    assert_eq!(total, 64 << 20);
    unsafe { hal_dev_free(dev) };

    let mut missing = ptr::null_mut();
    let name = c("no-such-device");
    assert_eq!(
        unsafe { hal_dev_by_name(name.as_ptr(), &mut missing) },
        HalStatus::ErrorInvalidArgument
    );
    assert!(missing.is_null());
    assert!(last_error().contains("no-such-device"));
}

#[test]
fn test_buffer_and_tensor_on_cpu() {
    init();
    let dev = device_of_type(HalDeviceType::Cpu);
    let mut buft = ptr::null_mut();
    assert_eq!(unsafe { hal_dev_buffer_type(dev, &mut buft) }, HalStatus::Ok);
    assert_eq!(str_of(unsafe { hal_buft_name(buft) }), "CPU");
    assert!(unsafe { hal_buft_is_host(buft) });

    let mut buf = ptr::null_mut();
    assert_eq!(unsafe { hal_buft_alloc_buffer(buft, 1024, &mut buf) }, HalStatus::Ok);
    assert_eq!(unsafe { hal_buffer_size(buf) }, 1024);
    assert_eq!(
        unsafe { hal_buffer_set_usage(buf, HalBufferUsage::Weights) },
        HalStatus::Ok
    );
    assert_eq!(unsafe { hal_buffer_get_usage(buf) }, HalBufferUsage::Weights);

    let t = f32_tensor("w", &[4, 8]);
    assert_eq!(unsafe { hal_tensor_nbytes(t) }, 128);
    assert_eq!(unsafe { hal_buft_alloc_size(buft, t) }, 128);
    assert!(!unsafe { hal_tensor_is_allocated(t) });
    assert_eq!(unsafe { hal_buffer_alloc_tensor(buf, t, 0) }, HalStatus::Ok);

    let data: Vec<u8> = (0..128).collect();
    assert_eq!(
        unsafe { hal_tensor_set(t, data.as_ptr(), 0, data.len()) },
        HalStatus::Ok
    );
    let mut out = vec![0u8; 32];
    assert_eq!(
        unsafe { hal_tensor_get(t, out.as_mut_ptr(), 64, out.len()) },
        HalStatus::Ok
    );
    assert_eq!(out, data[64..96]);

    assert_eq!(unsafe { hal_tensor_memset(t, 0xAB, 0, 4) }, HalStatus::Ok);
    assert_eq!(
        unsafe { hal_tensor_get(t, out.as_mut_ptr(), 0, 4) },
        HalStatus::Ok
    );
    assert_eq!(out[..4], [0xAB; 4]);

    // reads past the tensor are usage errors
    assert_eq!(
        unsafe { hal_tensor_get(t, out.as_mut_ptr(), 120, 32) },
        HalStatus::ErrorUsage
    );
    assert!(last_error().contains("out of bounds"));

    assert_eq!(unsafe { hal_buffer_clear(buf, 0) }, HalStatus::Ok);
    unsafe {
        hal_tensor_free(t);
        hal_buffer_free(buf);
        hal_buft_free(buft);
        hal_dev_free(dev);
    }
}

#[test]
fn test_host_ptr_buffer_is_read_only() {
    init();
    let dev = device_of_type(HalDeviceType::Cpu);
    let mut backing = vec![0u8; 256 + 64];
    let start = backing.as_ptr().align_offset(64);
    for (i, b) in backing[start..start + 256].iter_mut().enumerate() {
        *b = i as u8;
    }
    let region = &backing[start..start + 256];
    let mut buf = ptr::null_mut();

    // one byte past the boundary breaks the buffer type's alignment
    assert_eq!(
        unsafe { hal_dev_buffer_from_host_ptr(dev, region[1..].as_ptr(), 255, 255, &mut buf) },
        HalStatus::ErrorUsage
    );
    assert!(buf.is_null());
    assert!(last_error().contains("not aligned"));

    assert_eq!(
        unsafe { hal_dev_buffer_from_host_ptr(dev, region.as_ptr(), region.len(), 256, &mut buf) },
        HalStatus::Ok
    );
    assert_eq!(unsafe { hal_buffer_base(buf) }, region.as_ptr() as usize);

    let t = f32_tensor("view", &[16]);
    assert_eq!(unsafe { hal_buffer_alloc_tensor(buf, t, 64) }, HalStatus::Ok);
    let mut out = vec![0u8; 64];
    assert_eq!(
        unsafe { hal_tensor_get(t, out.as_mut_ptr(), 0, 64) },
        HalStatus::Ok
    );
    assert_eq!(out, region[64..128]);
    assert_eq!(
        unsafe { hal_tensor_set(t, out.as_ptr(), 0, 64) },
        HalStatus::ErrorUsage
    );
    assert!(last_error().contains("read-only"));

    unsafe {
        hal_tensor_free(t);
        hal_buffer_free(buf);
        hal_dev_free(dev);
    }
}

#[test]
fn test_async_transfers_on_best_backend() {
    init();
    let mut backend = ptr::null_mut();
    assert_eq!(unsafe { hal_backend_init_best(&mut backend) }, HalStatus::Ok);
    assert_eq!(str_of(unsafe { hal_backend_name(backend) }), "SIM0");

    let mut buf = ptr::null_mut();
    assert_eq!(
        unsafe { hal_backend_alloc_buffer(backend, 256, &mut buf) },
        HalStatus::Ok
    );
    assert!(!unsafe { hal_buffer_is_host(buf) });
    let t = f32_tensor("x", &[64]);
    assert_eq!(unsafe { hal_buffer_alloc_tensor(buf, t, 0) }, HalStatus::Ok);

    let data = vec![7u8; 256];
    assert_eq!(
        unsafe { hal_backend_tensor_set_async(backend, t, data.as_ptr(), 0, data.len()) },
        HalStatus::Ok
    );
    let mut read = ptr::null_mut();
    assert_eq!(
        unsafe { hal_backend_tensor_get_async(backend, t, 0, 256, &mut read) },
        HalStatus::Ok
    );
    assert_eq!(unsafe { hal_backend_synchronize(backend) }, HalStatus::Ok);
    let mut out = vec![0u8; 256];
    assert_eq!(
        unsafe { hal_pending_read_wait(read, out.as_mut_ptr(), out.len()) },
        HalStatus::Ok
    );
    assert_eq!(out, data);

    unsafe {
        hal_tensor_free(t);
        hal_buffer_free(buf);
        hal_backend_free(backend);
    }
}

#[test]
fn test_event_orders_copy_between_devices() {
    init();
    let mut reg = ptr::null_mut();
    let name = c("sim");
    assert_eq!(unsafe { hal_reg_by_name(name.as_ptr(), &mut reg) }, HalStatus::Ok);
    let mut dev1 = ptr::null_mut();
    let params = c("name=FFI1,memory=4M");
    assert_eq!(
        unsafe { hal_reg_add_device(reg, params.as_ptr(), &mut dev1) },
        HalStatus::Ok
    );
    let sim0 = c("SIM0");
    let mut dev0 = ptr::null_mut();
    assert_eq!(unsafe { hal_dev_by_name(sim0.as_ptr(), &mut dev0) }, HalStatus::Ok);

    let mut b0 = ptr::null_mut();
    let mut b1 = ptr::null_mut();
    assert_eq!(
        unsafe { hal_dev_init_backend(dev0, ptr::null(), &mut b0) },
        HalStatus::Ok
    );
    let threads = c("n_threads=1");
    assert_eq!(
        unsafe { hal_dev_init_backend(dev1, threads.as_ptr(), &mut b1) },
        HalStatus::Ok
    );

    let mut buf0 = ptr::null_mut();
    let mut buf1 = ptr::null_mut();
    assert_eq!(unsafe { hal_backend_alloc_buffer(b0, 64, &mut buf0) }, HalStatus::Ok);
    assert_eq!(unsafe { hal_backend_alloc_buffer(b1, 64, &mut buf1) }, HalStatus::Ok);
    let src = f32_tensor("src", &[16]);
    let dst = f32_tensor("dst", &[16]);
    assert_eq!(unsafe { hal_buffer_alloc_tensor(buf0, src, 0) }, HalStatus::Ok);
    assert_eq!(unsafe { hal_buffer_alloc_tensor(buf1, dst, 0) }, HalStatus::Ok);

    let mut event = ptr::null_mut();
    assert_eq!(unsafe { hal_event_new(dev0, &mut event) }, HalStatus::Ok);
    // waiting before anything was recorded is a usage error
    assert_eq!(unsafe { hal_event_wait(b1, event) }, HalStatus::ErrorUsage);
    let _ = last_error();

    let data: Vec<u8> = (100..164).collect();
    assert_eq!(
        unsafe { hal_backend_tensor_set_async(b0, src, data.as_ptr(), 0, 64) },
        HalStatus::Ok
    );
    assert_eq!(unsafe { hal_event_record(event, b0) }, HalStatus::Ok);
    assert_eq!(unsafe { hal_event_wait(b1, event) }, HalStatus::Ok);
    assert_eq!(
        unsafe { hal_backend_tensor_copy_async(b0, b1, src, dst) },
        HalStatus::Ok
    );
    assert_eq!(unsafe { hal_backend_synchronize(b1) }, HalStatus::Ok);
    assert_eq!(unsafe { hal_event_synchronize(event) }, HalStatus::Ok);

    let mut out = vec![0u8; 64];
    assert_eq!(
        unsafe { hal_tensor_get(dst, out.as_mut_ptr(), 0, 64) },
        HalStatus::Ok
    );
    assert_eq!(out, data);

    unsafe {
        hal_event_free(event);
        hal_tensor_free(src);
        hal_tensor_free(dst);
        hal_buffer_free(buf0);
        hal_buffer_free(buf1);
        hal_backend_free(b0);
        hal_backend_free(b1);
        hal_dev_free(dev0);
        hal_dev_free(dev1);
        hal_reg_free(reg);
    }
}

static LOG_LINES: AtomicUsize = AtomicUsize::new(0);

extern "C" fn count_lines(_level: HalLogLevel, message: *const c_char, user_data: *mut c_void) {
    assert!(!message.is_null());
    let counter = unsafe { &*(user_data as *const AtomicUsize) };
    counter.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_log_callback_receives_registry_lines() {
    init();
    let mut reg = ptr::null_mut();
    let name = c("SIM");
    assert_eq!(unsafe { hal_reg_by_name(name.as_ptr(), &mut reg) }, HalStatus::Ok);
    let user = &LOG_LINES as *const AtomicUsize as *mut c_void;
    assert_eq!(
        unsafe { hal_reg_set_log_callback(reg, Some(count_lines), user) },
        HalStatus::Ok
    );

    let before = LOG_LINES.load(Ordering::SeqCst);
    let mut dev = ptr::null_mut();
    let params = c("name=FFILOG,memory=1M");
    assert_eq!(
        unsafe { hal_reg_add_device(reg, params.as_ptr(), &mut dev) },
        HalStatus::Ok
    );
    assert!(LOG_LINES.load(Ordering::SeqCst) > before);

    // same name twice fails without creating anything
    let mut again = ptr::null_mut();
    assert_eq!(
        unsafe { hal_reg_add_device(reg, params.as_ptr(), &mut again) },
        HalStatus::ErrorInitialization
    );
    assert!(again.is_null());
    assert!(last_error().contains("FFILOG"));

    assert_eq!(
        unsafe { hal_reg_set_log_callback(reg, None, ptr::null_mut()) },
        HalStatus::Ok
    );
    unsafe {
        hal_dev_free(dev);
        hal_reg_free(reg);
    }
}

#[test]
fn test_null_arguments() {
    assert_eq!(
        unsafe { hal_dev_get(0, ptr::null_mut()) },
        HalStatus::ErrorInvalidArgument
    );
    assert!(last_error().contains("out is null"));
    assert_eq!(
        unsafe { hal_backend_synchronize(ptr::null()) },
        HalStatus::ErrorInvalidArgument
    );
    assert!(unsafe { hal_dev_name(ptr::null()) }.is_null());
    assert_eq!(unsafe { hal_buffer_size(ptr::null()) }, 0);

    let mut t = ptr::null_mut();
    let name = c("t");
    assert_eq!(
        unsafe { hal_tensor_new(name.as_ptr(), HalDType::F32, ptr::null(), 0, &mut t) },
        HalStatus::ErrorInvalidArgument
    );
    let _ = last_error();
    unsafe {
        hal_tensor_free(ptr::null_mut());
        hal_backend_free(ptr::null_mut());
        hal_free_string(ptr::null());
    }
}
