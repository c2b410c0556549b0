/*
 * `WindowApi` over user32/gdi32. Calls that return the previous value of a
 * property (`SetParent`, `SetFocus`) report a null previous value as an
 * error in windows-rs even on success, so those distinguish real failures
 * by the thread's last-error code.
 */
use super::{clear_last_error, from_hwnd, last_error_code, native_call, optional_hwnd, to_hwnd, win32_code};
use crate::error::{EmbedError, Result};
use crate::platform::WindowApi;
use crate::types::{Bitmap, ProcessId, Rect, ShowCommand, WindowHandle, WindowStyle};

use windows::Win32::{
    Foundation::{HWND, LPARAM, RECT},
    Graphics::Gdi::{
        BI_RGB, BITMAPINFO, BITMAPINFOHEADER, CreateCompatibleBitmap, CreateCompatibleDC,
        DIB_RGB_COLORS, DeleteDC, DeleteObject, GetDIBits, GetWindowDC, HGDIOBJ, ReleaseDC,
        SelectObject,
    },
    Storage::Xps::{PRINT_WINDOW_FLAGS, PrintWindow},
    UI::Input::KeyboardAndMouse::SetFocus,
    UI::WindowsAndMessaging::{
        AdjustWindowRectEx, BringWindowToTop, EnumWindows, GWL_STYLE, GetClientRect,
        GetWindowLongPtrW, GetWindowRect, GetWindowTextLengthW, GetWindowTextW,
        GetWindowThreadProcessId, IsWindow, IsWindowVisible, MoveWindow, SW_MINIMIZE,
        SW_SHOWDEFAULT, SW_SHOWMAXIMIZED, SW_SHOWNORMAL, SetForegroundWindow, SetParent,
        SetWindowLongPtrW, ShowWindow, WINDOW_EX_STYLE, WINDOW_STYLE,
    },
};
use windows::core::BOOL;

use std::ffi::c_void;

/// Renders windows that use DirectComposition as well.
const PW_RENDERFULLCONTENT: PRINT_WINDOW_FLAGS = PRINT_WINDOW_FLAGS(0x0000_0002);

fn to_rect(rect: RECT) -> Rect {
    Rect {
        left: rect.left,
        top: rect.top,
        right: rect.right,
        bottom: rect.bottom,
    }
}

fn from_rect(rect: Rect) -> RECT {
    RECT {
        left: rect.left,
        top: rect.top,
        right: rect.right,
        bottom: rect.bottom,
    }
}

unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let windows = unsafe { &mut *(lparam.0 as *mut Vec<WindowHandle>) };
    windows.push(from_hwnd(hwnd));
    true.into()
}

/// All top-level windows in z-order.
pub(crate) fn enumerate_top_level() -> Result<Vec<WindowHandle>> {
    let mut windows: Vec<WindowHandle> = Vec::new();
    unsafe {
        EnumWindows(
            Some(collect_window),
            LPARAM(&mut windows as *mut Vec<WindowHandle> as isize),
        )
    }
    .map_err(|err| native_call("EnumWindows", win32_code(&err)))?;
    Ok(windows)
}

pub(crate) fn read_window_text(window: WindowHandle) -> String {
    let hwnd = to_hwnd(window);
    let length = unsafe { GetWindowTextLengthW(hwnd) };
    if length <= 0 {
        return String::new();
    }
    let mut buffer = vec![0u16; length as usize + 1];
    let copied = unsafe { GetWindowTextW(hwnd, &mut buffer) };
    buffer.truncate(copied.max(0) as usize);
    String::from_utf16_lossy(&buffer)
}

pub(crate) fn owning_process(window: WindowHandle) -> Option<ProcessId> {
    let mut process_id = 0u32;
    let thread_id = unsafe { GetWindowThreadProcessId(to_hwnd(window), Some(&mut process_id)) };
    (thread_id != 0 && process_id != 0).then_some(ProcessId(process_id))
}

#[derive(Debug, Default)]
pub struct Win32Windows;

impl Win32Windows {
    pub fn new() -> Self {
        Self
    }
}

impl WindowApi for Win32Windows {
    fn top_level_windows(&self) -> Result<Vec<WindowHandle>> {
        enumerate_top_level()
    }

    fn is_window(&self, window: WindowHandle) -> bool {
        unsafe { IsWindow(optional_hwnd(window)) }.as_bool()
    }

    fn is_visible(&self, window: WindowHandle) -> bool {
        unsafe { IsWindowVisible(to_hwnd(window)) }.as_bool()
    }

    fn window_text(&self, window: WindowHandle) -> String {
        read_window_text(window)
    }

    fn window_process_id(&self, window: WindowHandle) -> Option<ProcessId> {
        owning_process(window)
    }

    fn style(&self, window: WindowHandle) -> Result<WindowStyle> {
        clear_last_error();
        let value = unsafe { GetWindowLongPtrW(to_hwnd(window), GWL_STYLE) };
        if value == 0 {
            let code = last_error_code();
            if code != 0 {
                return Err(native_call("GetWindowLongPtrW", code));
            }
        }
        Ok(WindowStyle(value as u32))
    }

    fn set_style(&self, window: WindowHandle, style: WindowStyle) -> Result<()> {
        clear_last_error();
        let previous = unsafe { SetWindowLongPtrW(to_hwnd(window), GWL_STYLE, style.0 as isize) };
        if previous == 0 {
            let code = last_error_code();
            if code != 0 {
                return Err(native_call("SetWindowLongPtrW", code));
            }
        }
        Ok(())
    }

    fn set_parent(&self, window: WindowHandle, parent: WindowHandle) -> Result<()> {
        clear_last_error();
        match unsafe { SetParent(to_hwnd(window), optional_hwnd(parent)) } {
            Ok(_) => Ok(()),
            Err(err) => match win32_code(&err) {
                0 => Ok(()),
                code => Err(native_call("SetParent", code)),
            },
        }
    }

    fn window_rect(&self, window: WindowHandle) -> Result<Rect> {
        let mut rect = RECT::default();
        unsafe { GetWindowRect(to_hwnd(window), &mut rect) }
            .map_err(|err| native_call("GetWindowRect", win32_code(&err)))?;
        Ok(to_rect(rect))
    }

    fn client_rect(&self, window: WindowHandle) -> Result<Rect> {
        let mut rect = RECT::default();
        unsafe { GetClientRect(to_hwnd(window), &mut rect) }
            .map_err(|err| native_call("GetClientRect", win32_code(&err)))?;
        Ok(to_rect(rect))
    }

    fn adjust_window_rect(&self, client: Rect, style: WindowStyle) -> Result<Rect> {
        let mut rect = from_rect(client);
        unsafe {
            AdjustWindowRectEx(&mut rect, WINDOW_STYLE(style.0), false, WINDOW_EX_STYLE(0))
        }
        .map_err(|err| native_call("AdjustWindowRectEx", win32_code(&err)))?;
        Ok(to_rect(rect))
    }

    fn move_window(&self, window: WindowHandle, rect: Rect) -> Result<()> {
        unsafe {
            MoveWindow(
                to_hwnd(window),
                rect.left,
                rect.top,
                rect.width(),
                rect.height(),
                true,
            )
        }
        .map_err(|err| native_call("MoveWindow", win32_code(&err)))
    }

    fn show_window(&self, window: WindowHandle, command: ShowCommand) -> Result<()> {
        let cmd = match command {
            ShowCommand::Normal => SW_SHOWNORMAL,
            ShowCommand::Default => SW_SHOWDEFAULT,
            ShowCommand::Maximized => SW_SHOWMAXIMIZED,
            ShowCommand::Minimized => SW_MINIMIZE,
        };
        // The return value is the previous visibility, not a success flag.
        unsafe { _ = ShowWindow(to_hwnd(window), cmd) };
        Ok(())
    }

    fn set_foreground(&self, window: WindowHandle) -> Result<()> {
        if !unsafe { SetForegroundWindow(to_hwnd(window)) }.as_bool() {
            // Foreground activation is routinely refused by the focus-stealing rules.
            log::debug!("Win32: SetForegroundWindow({window}) was refused.");
        }
        Ok(())
    }

    fn set_focus(&self, window: WindowHandle) -> Result<()> {
        clear_last_error();
        match unsafe { SetFocus(optional_hwnd(window)) } {
            Ok(_) => Ok(()),
            Err(err) => match win32_code(&err) {
                0 => Ok(()),
                code => Err(native_call("SetFocus", code)),
            },
        }
    }

    fn bring_to_top(&self, window: WindowHandle) -> Result<()> {
        unsafe { BringWindowToTop(to_hwnd(window)) }
            .map_err(|err| native_call("BringWindowToTop", win32_code(&err)))
    }

    /*
     * Renders the window into a 32-bit top-down DIB through `PrintWindow`,
     * which also works for windows covered by others.
     */
    fn capture(&self, window: WindowHandle, width: u32, height: u32) -> Result<Bitmap> {
        if width == 0 || height == 0 {
            return Err(EmbedError::OperationFailed(format!(
                "cannot capture {window} with an empty area"
            )));
        }
        let hwnd = to_hwnd(window);
        let mut bitmap = Bitmap::new(width, height);

        unsafe {
            let window_dc = GetWindowDC(Some(hwnd));
            if window_dc.is_invalid() {
                return Err(native_call("GetWindowDC", last_error_code()));
            }
            let memory_dc = CreateCompatibleDC(Some(window_dc));
            let target = CreateCompatibleBitmap(window_dc, width as i32, height as i32);
            let previous = SelectObject(memory_dc, HGDIOBJ(target.0));

            let printed = PrintWindow(hwnd, memory_dc, PW_RENDERFULLCONTENT).as_bool();

            let mut info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: width as i32,
                    biHeight: -(height as i32),
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };
            SelectObject(memory_dc, previous);
            let lines = GetDIBits(
                memory_dc,
                target,
                0,
                height,
                Some(bitmap.pixels.as_mut_ptr() as *mut c_void),
                &mut info,
                DIB_RGB_COLORS,
            );

            _ = DeleteObject(HGDIOBJ(target.0));
            _ = DeleteDC(memory_dc);
            ReleaseDC(Some(hwnd), window_dc);

            if !printed {
                return Err(native_call("PrintWindow", last_error_code()));
            }
            if lines == 0 {
                return Err(native_call("GetDIBits", last_error_code()));
            }
        }
        Ok(bitmap)
    }
}
