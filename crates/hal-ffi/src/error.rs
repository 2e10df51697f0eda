use std::cell::RefCell;
use std::ffi::CString;

use hal_core::BackendError;

use crate::types::HalStatus;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store an error message for later retrieval via `hal_last_error`.
pub fn set_last_error(msg: impl Into<String>) {
    let msg = msg.into();
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg.replace('\0', " ")).ok();
    });
}

/// Take the last error message, leaving `None` in its place.
pub fn take_last_error() -> Option<CString> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

/// Record `msg` and hand back `status`.
pub(crate) fn fail(status: HalStatus, msg: impl Into<String>) -> HalStatus {
    set_last_error(msg);
    status
}

/// Record a backend error and map it to its status code.
pub(crate) fn report(err: BackendError) -> HalStatus {
    let status = HalStatus::from(err.class());
    set_last_error(err.to_string());
    status
}
