use std::ffi::CString;
use std::os::raw::c_void;
use std::sync::Arc;

use hal_core::{LogCallback, LogLevel};
use tracing_subscriber::EnvFilter;

use crate::types::HalLogCallback;

/// Install the process-wide `tracing` subscriber. `RUST_LOG` wins over
/// `level`. A subscriber installed earlier by the host is left alone.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
}

struct UserData(*mut c_void);

// Handed back to the caller untouched; the caller owns its thread safety.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    fn ptr(&self) -> *mut c_void {
        self.0
    }
}

/// Wrap a C callback as a registry log callback. `None` removes it.
pub fn bridge(callback: HalLogCallback, user_data: *mut c_void) -> Option<LogCallback> {
    let cb = callback?;
    let user = UserData(user_data);
    Some(Arc::new(move |level: LogLevel, message: &str| {
        if let Ok(c_msg) = CString::new(message.replace('\0', " ")) {
            cb(level.into(), c_msg.as_ptr(), user.ptr());
        }
    }))
}
