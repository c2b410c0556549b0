/*
 * The host container window: the native child window that an external
 * application's window is embedded into. It registers its own window class,
 * forwards resize, activation and destruction to a `HostWindowListener`
 * (normally the `HostControl` built on top of it) and runs work marshaled from
 * other threads on its message loop through `HostWindowDispatcher`.
 *
 * Everything here must be created and destroyed on the thread that pumps the
 * parent window's messages.
 */
use crate::error::{EmbedError, Result};
use crate::host::{HostControl, HostWindowListener, SharedEventHandler};
use crate::platform::{UiDispatcher, WorkItem};
use crate::subsystem::EmbeddingSubsystem;
use crate::types::{Rect, WindowHandle};
use crate::win32::native_platform;

use windows::{
    Win32::{
        Foundation::{
            ERROR_INVALID_WINDOW_HANDLE, GetLastError, HINSTANCE, HWND, LPARAM, LRESULT, WPARAM,
        },
        Graphics::Gdi::{COLOR_WINDOW, HBRUSH},
        System::LibraryLoader::GetModuleHandleW,
        System::Threading::GetCurrentThreadId,
        UI::WindowsAndMessaging::{
            CREATESTRUCTW, CS_HREDRAW, CS_VREDRAW, CreateWindowExW, DefWindowProcW, DestroyWindow,
            GWLP_USERDATA, GetClassInfoExW, GetWindowLongPtrW, IDC_ARROW, LoadCursorW,
            PostMessageW, RegisterClassExW, SetWindowLongPtrW, WINDOW_EX_STYLE,
            WM_APP, WM_DESTROY, WM_LBUTTONDOWN, WM_MDIACTIVATE, WM_MOUSEACTIVATE, WM_NCCREATE,
            WM_NCDESTROY, WM_SETFOCUS, WM_SIZE, WNDCLASSEXW, WS_CHILD, WS_CLIPCHILDREN,
            WS_OVERLAPPEDWINDOW, WS_VISIBLE,
        },
    },
    core::{HSTRING, PCWSTR},
};

use std::collections::VecDeque;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const HOST_WINDOW_CLASS: &str = "ExtAppHost_HostWindowClass";

/// Drains the marshaled work queue of a host window.
pub(crate) const WM_APP_RUN_QUEUED_WORK: u32 = WM_APP + 0x100;

const SUCCESS_CODE: LRESULT = LRESULT(0);

/*
 * State shared between the window procedure and every dispatcher handed out
 * for the window. The queue is the only path from worker threads onto the
 * UI thread; the posted message is just a wake-up.
 */
struct HostWindowShared {
    hwnd: AtomicIsize,
    owner_thread: u32,
    /// Set once the window procedure owns the creation context.
    adopted: AtomicBool,
    closed: AtomicBool,
    queue: Mutex<VecDeque<WorkItem>>,
    listener: Mutex<Option<Arc<dyn HostWindowListener>>>,
}

impl HostWindowShared {
    fn new(owner_thread: u32) -> Self {
        Self {
            hwnd: AtomicIsize::new(0),
            owner_thread,
            adopted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
            listener: Mutex::new(None),
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<WorkItem>> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<Arc<dyn HostWindowListener>>> {
        self.listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listener(&self) -> Option<Arc<dyn HostWindowListener>> {
        self.lock_listener().clone()
    }

    /// Runs queued work in FIFO order, including items queued by the work itself.
    fn drain_queue(&self) {
        loop {
            let next = self.lock_queue().pop_front();
            let Some(work) = next else {
                break;
            };
            if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
                log::error!("HostWindow: a marshaled work item panicked.");
            }
        }
    }

    fn notify(&self, what: &str, call: impl FnOnce(&dyn HostWindowListener)) {
        let Some(listener) = self.listener() else {
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| call(listener.as_ref()))).is_err() {
            log::error!("HostWindow: listener panicked while handling {what}.");
        }
    }

    /*
     * After destruction nothing may run on the UI thread any more. Dropping
     * the queued items also drops the reply channels of blocked
     * `run_on_owner` callers, which then fail instead of waiting forever.
     */
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let abandoned: Vec<WorkItem> = self.lock_queue().drain(..).collect();
        if !abandoned.is_empty() {
            log::debug!(
                "HostWindow: discarding {} queued work item(s) on destroy.",
                abandoned.len()
            );
        }
        drop(abandoned);
    }
}

/// `UiDispatcher` backed by a host window's message loop.
#[derive(Clone)]
pub struct HostWindowDispatcher {
    shared: Arc<HostWindowShared>,
}

impl UiDispatcher for HostWindowDispatcher {
    fn is_owner_thread(&self) -> bool {
        unsafe { GetCurrentThreadId() == self.shared.owner_thread }
    }

    fn post(&self, work: WorkItem) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(EmbedError::InvalidState(
                "host window has been destroyed".to_string(),
            ));
        }
        self.shared.lock_queue().push_back(work);
        let hwnd = HWND(self.shared.hwnd.load(Ordering::SeqCst) as *mut c_void);
        unsafe { PostMessageW(Some(hwnd), WM_APP_RUN_QUEUED_WORK, WPARAM(0), LPARAM(0)) }
            .map_err(|err| {
                log::error!("HostWindow: PostMessageW to {hwnd:?} failed: {err}");
                EmbedError::from(err)
            })
    }
}

// Context passed during window creation to associate the shared state with the HWND.
struct WindowCreationContext {
    shared: Arc<HostWindowShared>,
}

fn instance_handle() -> Result<HINSTANCE> {
    let module = unsafe { GetModuleHandleW(None) }?;
    Ok(HINSTANCE(module.0))
}

/*
 * Registers the host window class if not already registered. The class has
 * no background of its own beyond the system window colour; the embedded
 * window covers the client area.
 */
pub(crate) fn register_window_class() -> Result<()> {
    let class_name = HSTRING::from(HOST_WINDOW_CLASS);
    let class_name_pcwstr = PCWSTR(class_name.as_ptr());
    let instance = instance_handle()?;

    unsafe {
        let mut existing = WNDCLASSEXW::default();
        if GetClassInfoExW(Some(instance), class_name_pcwstr, &mut existing).is_ok() {
            log::debug!("HostWindow: window class '{HOST_WINDOW_CLASS}' already registered.");
            return Ok(());
        }

        let wc = WNDCLASSEXW {
            cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
            style: CS_HREDRAW | CS_VREDRAW,
            lpfnWndProc: Some(facade_wnd_proc_router),
            hInstance: instance,
            hCursor: LoadCursorW(None, IDC_ARROW)?,
            hbrBackground: HBRUSH((COLOR_WINDOW.0 + 1) as *mut c_void),
            lpszClassName: class_name_pcwstr,
            ..Default::default()
        };

        if RegisterClassExW(&wc) == 0 {
            let error = GetLastError();
            log::error!("HostWindow: RegisterClassExW failed: {error:?}");
            return Err(EmbedError::OperationFailed(format!(
                "RegisterClassExW failed: {error:?}"
            )));
        }
    }
    log::debug!("HostWindow: window class '{HOST_WINDOW_CLASS}' registered.");
    Ok(())
}

/// A created host window together with its dispatcher.
pub struct HostWindow {
    handle: WindowHandle,
    shared: Arc<HostWindowShared>,
}

impl HostWindow {
    pub fn handle(&self) -> WindowHandle {
        self.handle
    }

    pub fn dispatcher(&self) -> Arc<dyn UiDispatcher> {
        Arc::new(HostWindowDispatcher {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Routes the window's resize, activation and destruction notifications to `listener`.
    pub fn set_listener(&self, listener: Arc<dyn HostWindowListener>) {
        *self.shared.lock_listener() = Some(listener);
    }

    /*
     * Destroys the native window. `WM_DESTROY` notifies the listener and
     * discards pending work; an already destroyed window is not an error.
     */
    pub fn destroy(&self) {
        let hwnd = HWND(self.handle.raw() as *mut c_void);
        log::debug!("HostWindow: destroying {}.", self.handle);
        if unsafe { DestroyWindow(hwnd) }.is_err() {
            let last_error = unsafe { GetLastError() };
            if last_error.0 != ERROR_INVALID_WINDOW_HANDLE.0 {
                log::error!("HostWindow: DestroyWindow for {} failed: {last_error:?}", self.handle);
            } else {
                log::debug!("HostWindow: {} was already destroyed.", self.handle);
            }
        }
    }
}

/*
 * Creates the host window as a visible child of `parent` occupying `rect`
 * (parent client coordinates), or as an overlapped top-level window when
 * `parent` is null.
 */
pub fn create_host_window(parent: WindowHandle, rect: Rect) -> Result<HostWindow> {
    register_window_class()?;
    let shared = Arc::new(HostWindowShared::new(unsafe { GetCurrentThreadId() }));
    let creation_context = Box::new(WindowCreationContext {
        shared: Arc::clone(&shared),
    });
    let (style, parent_hwnd) = if parent.is_null() {
        (WS_OVERLAPPEDWINDOW | WS_CLIPCHILDREN, None)
    } else {
        (
            WS_CHILD | WS_VISIBLE | WS_CLIPCHILDREN,
            Some(HWND(parent.raw() as *mut c_void)),
        )
    };

    let context_raw = Box::into_raw(creation_context);
    let created = unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE(0),
            &HSTRING::from(HOST_WINDOW_CLASS),
            &HSTRING::new(),
            style,
            rect.left,
            rect.top,
            rect.width(),
            rect.height(),
            parent_hwnd,
            None,
            Some(instance_handle()?),
            Some(context_raw as *mut c_void),
        )
    };
    let hwnd = match created {
        Ok(hwnd) => hwnd,
        Err(err) => {
            log::error!("HostWindow: CreateWindowExW failed: {err}");
            // Without WM_NCCREATE the router never took ownership of the context.
            if !shared.adopted.load(Ordering::SeqCst) {
                drop(unsafe { Box::from_raw(context_raw) });
            }
            return Err(err.into());
        }
    };
    let handle = WindowHandle(hwnd.0 as isize);
    shared.hwnd.store(handle.raw(), Ordering::SeqCst);
    log::debug!("HostWindow: created {handle} under parent {parent}.");
    Ok(HostWindow { handle, shared })
}

/*
 * Creates a host window under `parent` and a `HostControl` that embeds into
 * it through the Win32 platform. The control is registered as the window's
 * listener, so resizing, activating and destroying the window drive it.
 */
pub fn create_host_control(
    parent: WindowHandle,
    rect: Rect,
    subsystem: Arc<EmbeddingSubsystem>,
    handler: SharedEventHandler,
) -> Result<(HostWindow, HostControl)> {
    let window = create_host_window(parent, rect)?;
    let platform = native_platform(subsystem, window.dispatcher());
    let control = HostControl::new(platform, window.handle(), handler);
    window.set_listener(Arc::new(control.clone()));
    Ok((window, control))
}

fn handle_window_message(
    shared: &HostWindowShared,
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_APP_RUN_QUEUED_WORK => {
            shared.drain_queue();
            return SUCCESS_CODE;
        }
        WM_SIZE => shared.notify("WM_SIZE", |listener| listener.on_resize()),
        WM_MOUSEACTIVATE | WM_LBUTTONDOWN | WM_MDIACTIVATE | WM_SETFOCUS => {
            shared.notify("activation", |listener| listener.on_activated())
        }
        WM_DESTROY => {
            shared.close();
            shared.notify("WM_DESTROY", |listener| listener.on_destroyed());
            // Breaks the listener -> platform -> dispatcher -> listener cycle.
            shared.lock_listener().take();
            return SUCCESS_CODE;
        }
        _ => {}
    }
    unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
}

/*
 * Window procedure router. Retrieves the `WindowCreationContext` stored at
 * `WM_NCCREATE` and frees it at `WM_NCDESTROY`.
 */
unsafe extern "system" fn facade_wnd_proc_router(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let context_ptr = if msg == WM_NCCREATE {
        let create_struct = unsafe { &*(lparam.0 as *const CREATESTRUCTW) };
        let context_raw_ptr = create_struct.lpCreateParams as *mut WindowCreationContext;
        unsafe { SetWindowLongPtrW(hwnd, GWLP_USERDATA, context_raw_ptr as isize) };
        if let Some(context) = unsafe { context_raw_ptr.as_ref() } {
            context.shared.adopted.store(true, Ordering::SeqCst);
        }
        context_raw_ptr
    } else {
        unsafe { GetWindowLongPtrW(hwnd, GWLP_USERDATA) as *mut WindowCreationContext }
    };

    if context_ptr.is_null() {
        return unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) };
    }

    let context = unsafe { &*context_ptr };
    let result = handle_window_message(&context.shared, hwnd, msg, wparam, lparam);

    if msg == WM_NCDESTROY {
        let _ = unsafe { Box::from_raw(context_ptr) };
        unsafe { SetWindowLongPtrW(hwnd, GWLP_USERDATA, 0) };
    }
    result
}
