/*
 * Binding to the WinEmbed helper library, which wraps an unmodified
 * top-level window in a container window of its own. The library is loaded
 * once per process; the matching architecture build must sit next to the
 * executable.
 */
use super::{last_error_code, native_call, to_hwnd, from_hwnd, win32_code};
use crate::error::{EmbedError, Result};
use crate::platform::EmbeddingHelper;
use crate::types::WindowHandle;

use windows::Win32::{
    Foundation::{ERROR_INVALID_WINDOW_HANDLE, FreeLibrary, HMODULE, HWND, LPARAM, WPARAM},
    System::LibraryLoader::{GetProcAddress, LoadLibraryW},
    UI::WindowsAndMessaging::{DestroyWindow, SendMessageW, SetParent, WM_DESTROY, WM_PARENTNOTIFY},
};
use windows::core::{HSTRING, PCSTR, s};

use std::ffi::c_void;

#[cfg(target_arch = "aarch64")]
pub const HELPER_LIBRARY: &str = "WinEmbed.arm64.dll";
#[cfg(not(target_arch = "aarch64"))]
pub const HELPER_LIBRARY: &str = "WinEmbed.x64.dll";

type InitShlFn = unsafe extern "system" fn();
type DoneShlFn = unsafe extern "system" fn();
type CreateShlWndFn = unsafe extern "system" fn(HWND, HWND, i32, i32) -> HWND;

pub struct NativeEmbeddingHelper {
    module: isize,
    init_shl: InitShlFn,
    done_shl: DoneShlFn,
    create_shl_wnd: CreateShlWndFn,
}

fn resolve(module: HMODULE, name: PCSTR, label: &str) -> Result<unsafe extern "system" fn() -> isize> {
    unsafe { GetProcAddress(module, name) }.ok_or_else(|| {
        EmbedError::NotInitialized(format!(
            "{HELPER_LIBRARY} does not export {label} (error {})",
            last_error_code()
        ))
    })
}

impl NativeEmbeddingHelper {
    /// Loads the helper library for the current architecture.
    pub fn load() -> Result<Self> {
        let module = unsafe { LoadLibraryW(&HSTRING::from(HELPER_LIBRARY)) }.map_err(|err| {
            EmbedError::NotInitialized(format!("cannot load {HELPER_LIBRARY}: {err}"))
        })?;

        let symbols = (|| -> Result<_> {
            Ok((
                resolve(module, s!("InitShl"), "InitShl")?,
                resolve(module, s!("DoneShl"), "DoneShl")?,
                resolve(module, s!("CreateShlWnd"), "CreateShlWnd")?,
            ))
        })();
        let (init_shl, done_shl, create_shl_wnd) = match symbols {
            Ok(symbols) => symbols,
            Err(err) => {
                _ = unsafe { FreeLibrary(module) };
                return Err(err);
            }
        };

        log::debug!("Win32: {HELPER_LIBRARY} loaded.");
        // SAFETY: the exports have these signatures in every WinEmbed build.
        unsafe {
            Ok(Self {
                module: module.0 as isize,
                init_shl: std::mem::transmute::<_, InitShlFn>(init_shl),
                done_shl: std::mem::transmute::<_, DoneShlFn>(done_shl),
                create_shl_wnd: std::mem::transmute::<_, CreateShlWndFn>(create_shl_wnd),
            })
        }
    }
}

impl EmbeddingHelper for NativeEmbeddingHelper {
    fn initialize(&self) -> Result<()> {
        unsafe { (self.init_shl)() };
        Ok(())
    }

    fn shutdown(&self) {
        unsafe { (self.done_shl)() };
    }

    fn create_container(
        &self,
        parent: WindowHandle,
        child: WindowHandle,
        width: i32,
        height: i32,
    ) -> Result<WindowHandle> {
        let container =
            unsafe { (self.create_shl_wnd)(to_hwnd(parent), to_hwnd(child), width, height) };
        if container.is_invalid() {
            return Err(EmbedError::OperationFailed(format!(
                "helper could not wrap {child} (error {})",
                last_error_code()
            )));
        }
        Ok(from_hwnd(container))
    }

    /*
     * The container forwards `WM_PARENTNOTIFY(WM_DESTROY)` to the helper so it
     * can release its hooks on the child; only then is the child handed back
     * to the desktop and the container destroyed.
     */
    fn destroy_container(
        &self,
        container: WindowHandle,
        child: WindowHandle,
    ) -> Result<WindowHandle> {
        let container_hwnd = to_hwnd(container);
        unsafe {
            SendMessageW(
                container_hwnd,
                WM_PARENTNOTIFY,
                Some(WPARAM(WM_DESTROY as usize)),
                Some(LPARAM(child.raw())),
            )
        };

        if let Err(err) = unsafe { SetParent(to_hwnd(child), None) }
            && win32_code(&err) != 0
        {
            log::warn!("Win32: releasing {child} from container {container} failed: {err}");
        }

        if let Err(err) = unsafe { DestroyWindow(container_hwnd) } {
            let code = win32_code(&err);
            if code != ERROR_INVALID_WINDOW_HANDLE.0 {
                return Err(native_call("DestroyWindow", code));
            }
            log::debug!("Win32: container {container} was already destroyed.");
        }
        Ok(child)
    }
}

impl Drop for NativeEmbeddingHelper {
    fn drop(&mut self) {
        _ = unsafe { FreeLibrary(HMODULE(self.module as *mut c_void)) };
    }
}
