use std::os::raw::{c_char, c_void};

use hal_core::{BufferUsage, DType, DeviceCaps, DeviceType, ErrorClass, LogLevel};

/// Status codes returned by all FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorAllocation = 2,
    ErrorUnsupported = 3,
    ErrorExecution = 4,
    ErrorInitialization = 5,
    ErrorUsage = 6,
    ErrorInternal = 7,
}

impl From<ErrorClass> for HalStatus {
    fn from(class: ErrorClass) -> Self {
        match class {
            ErrorClass::Allocation => HalStatus::ErrorAllocation,
            ErrorClass::Unsupported => HalStatus::ErrorUnsupported,
            ErrorClass::Execution => HalStatus::ErrorExecution,
            ErrorClass::Initialization => HalStatus::ErrorInitialization,
            ErrorClass::Usage => HalStatus::ErrorUsage,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalDeviceType {
    Cpu = 0,
    Gpu = 1,
    IGpu = 2,
    Accel = 3,
}

impl From<DeviceType> for HalDeviceType {
    fn from(t: DeviceType) -> Self {
        match t {
            DeviceType::Cpu => HalDeviceType::Cpu,
            DeviceType::Gpu => HalDeviceType::Gpu,
            DeviceType::IGpu => HalDeviceType::IGpu,
            DeviceType::Accel => HalDeviceType::Accel,
        }
    }
}

impl From<HalDeviceType> for DeviceType {
    fn from(t: HalDeviceType) -> Self {
        match t {
            HalDeviceType::Cpu => DeviceType::Cpu,
            HalDeviceType::Gpu => DeviceType::Gpu,
            HalDeviceType::IGpu => DeviceType::IGpu,
            HalDeviceType::Accel => DeviceType::Accel,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalDType {
    F32 = 0,
    F16 = 1,
    Q4_0 = 2,
    Q8_0 = 3,
}

impl From<HalDType> for DType {
    fn from(t: HalDType) -> Self {
        match t {
            HalDType::F32 => DType::F32,
            HalDType::F16 => DType::F16,
            HalDType::Q4_0 => DType::Q4_0,
            HalDType::Q8_0 => DType::Q8_0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalBufferUsage {
    Any = 0,
    Weights = 1,
    Compute = 2,
}

impl From<HalBufferUsage> for BufferUsage {
    fn from(u: HalBufferUsage) -> Self {
        match u {
            HalBufferUsage::Any => BufferUsage::Any,
            HalBufferUsage::Weights => BufferUsage::Weights,
            HalBufferUsage::Compute => BufferUsage::Compute,
        }
    }
}

impl From<BufferUsage> for HalBufferUsage {
    fn from(u: BufferUsage) -> Self {
        match u {
            BufferUsage::Any => HalBufferUsage::Any,
            BufferUsage::Weights => HalBufferUsage::Weights,
            BufferUsage::Compute => HalBufferUsage::Compute,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalLogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl From<LogLevel> for HalLogLevel {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => HalLogLevel::Debug,
            LogLevel::Info => HalLogLevel::Info,
            LogLevel::Warn => HalLogLevel::Warn,
            LogLevel::Error => HalLogLevel::Error,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HalDeviceCaps {
    pub async_io: bool,
    pub host_buffer: bool,
    pub buffer_from_host_ptr: bool,
    pub events: bool,
}

impl From<DeviceCaps> for HalDeviceCaps {
    fn from(c: DeviceCaps) -> Self {
        Self {
            async_io: c.async_io,
            host_buffer: c.host_buffer,
            buffer_from_host_ptr: c.buffer_from_host_ptr,
            events: c.events,
        }
    }
}

/// Device snapshot filled by `hal_dev_get_props`. The strings are owned by
/// the device handle and stay valid until it is freed.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HalDeviceProps {
    pub name: *const c_char,
    pub description: *const c_char,
    pub memory_free: usize,
    pub memory_total: usize,
    pub device_type: HalDeviceType,
    pub caps: HalDeviceCaps,
}

/// Receives log lines of a registry. `message` is only valid for the
/// duration of the call.
pub type HalLogCallback = Option<
    extern "C" fn(level: HalLogLevel, message: *const c_char, user_data: *mut c_void),
>;
