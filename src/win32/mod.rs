/*
 * Win32 implementations of the platform seams. Handles cross the seam as
 * plain integers (`WindowHandle`, `ProcessId`) so the portable core never
 * sees windows-rs types; the conversions live here.
 */
mod event_hook;
mod helper;
mod process_api;
mod window_api;

pub use event_hook::Win32EventHooks;
pub use helper::NativeEmbeddingHelper;
pub use process_api::{Win32Process, Win32Processes};
pub use window_api::Win32Windows;

use crate::error::EmbedError;
use crate::platform::{Platform, UiDispatcher};
use crate::subsystem::EmbeddingSubsystem;
use crate::types::WindowHandle;

use windows::Win32::Foundation::{GetLastError, HWND, WIN32_ERROR, SetLastError};

use std::ffi::c_void;
use std::sync::Arc;

#[inline]
pub(crate) fn to_hwnd(window: WindowHandle) -> HWND {
    HWND(window.raw() as *mut c_void)
}

#[inline]
pub(crate) fn from_hwnd(hwnd: HWND) -> WindowHandle {
    WindowHandle(hwnd.0 as isize)
}

/// `None` for the null handle, for parameters where null means "desktop" or "none".
#[inline]
pub(crate) fn optional_hwnd(window: WindowHandle) -> Option<HWND> {
    (!window.is_null()).then(|| to_hwnd(window))
}

pub(crate) fn last_error_code() -> u32 {
    unsafe { GetLastError().0 }
}

pub(crate) fn clear_last_error() {
    unsafe { SetLastError(WIN32_ERROR(0)) };
}

/// Win32 error code carried by an `HRESULT_FROM_WIN32` error.
pub(crate) fn win32_code(err: &windows::core::Error) -> u32 {
    (err.code().0 as u32) & 0xFFFF
}

pub(crate) fn native_call(call: &'static str, code: u32) -> EmbedError {
    EmbedError::NativeCall { call, code }
}

/*
 * Assembles the Win32 collaborators for one host window. The embedding
 * subsystem is process-scoped and shared between hosts; the dispatcher is
 * the host window's own message loop.
 */
pub fn native_platform(
    subsystem: Arc<EmbeddingSubsystem>,
    dispatcher: Arc<dyn UiDispatcher>,
) -> Platform {
    Platform {
        windows: Arc::new(Win32Windows::new()),
        processes: Arc::new(Win32Processes::new()),
        hooks: Arc::new(Win32EventHooks::new()),
        subsystem,
        dispatcher,
    }
}
