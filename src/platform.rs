/*
 * Seams between the embedding state machine and the operating system.
 *
 * The core only speaks to the window manager, the process table, the
 * low-level event hook facility, the native embedding helper and the host's
 * message loop through the traits below. `crate::win32` implements them with
 * Win32 calls; unit tests implement them with in-memory fakes.
 */
use crate::error::{EmbedError, Result};
use crate::launcher::LaunchRequest;
use crate::subsystem::EmbeddingSubsystem;
use crate::types::{
    Bitmap, MainWindow, ProcessEntry, ProcessId, Rect, ShowCommand, WindowHandle, WindowStyle,
};

use std::sync::{Arc, mpsc};
use std::time::Duration;

/// Primitive window-manager operations used by the finders and the embedding engine.
pub trait WindowApi: Send + Sync {
    /// All top-level windows of the current desktop in enumeration (z-) order.
    fn top_level_windows(&self) -> Result<Vec<WindowHandle>>;
    fn is_window(&self, window: WindowHandle) -> bool;
    fn is_visible(&self, window: WindowHandle) -> bool;
    fn window_text(&self, window: WindowHandle) -> String;
    fn window_process_id(&self, window: WindowHandle) -> Option<ProcessId>;
    fn style(&self, window: WindowHandle) -> Result<WindowStyle>;
    fn set_style(&self, window: WindowHandle, style: WindowStyle) -> Result<()>;
    /// Re-parents `window`; `WindowHandle::NULL` makes it top-level again.
    /// Must be called on the thread servicing the new parent's message loop.
    fn set_parent(&self, window: WindowHandle, parent: WindowHandle) -> Result<()>;
    /// Window rectangle in screen coordinates.
    fn window_rect(&self, window: WindowHandle) -> Result<Rect>;
    fn client_rect(&self, window: WindowHandle) -> Result<Rect>;
    /// Grows a client rectangle into the window rectangle that `style` decorations require.
    fn adjust_window_rect(&self, client: Rect, style: WindowStyle) -> Result<Rect>;
    fn move_window(&self, window: WindowHandle, rect: Rect) -> Result<()>;
    fn show_window(&self, window: WindowHandle, command: ShowCommand) -> Result<()>;
    fn set_foreground(&self, window: WindowHandle) -> Result<()>;
    fn set_focus(&self, window: WindowHandle) -> Result<()>;
    fn bring_to_top(&self, window: WindowHandle) -> Result<()>;
    fn capture(&self, window: WindowHandle, width: u32, height: u32) -> Result<Bitmap>;
}

pub type ExitCallback = Box<dyn FnOnce() + Send + 'static>;

/// Live handle to an external OS process.
pub trait ExternalProcess: Send + Sync {
    fn id(&self) -> ProcessId;
    fn has_exited(&self) -> bool;
    fn wait_for_input_idle(&self, timeout: Duration) -> Result<()>;
    /// The primary visible, unowned top-level window, if the process has one yet.
    fn main_window(&self) -> Result<Option<MainWindow>>;
    /// Asks `window`, one of this process's windows, to close. Returns false when no close
    /// request could be delivered. The window may be embedded, so it need not be top-level.
    fn close_window(&self, window: WindowHandle) -> bool;
    fn kill(&self) -> Result<()>;
    /// Registers `on_exit` to run once, on an OS-managed thread, when the process exits.
    fn watch_exit(&self, on_exit: ExitCallback) -> Result<Box<dyn ExitRegistration>>;
}

/// Keeps an exit watch alive. `unregister` must tolerate being called more than once.
pub trait ExitRegistration: Send {
    fn unregister(&mut self);
}

/// Creating, adopting and querying processes.
pub trait ProcessApi: Send + Sync {
    fn spawn(&self, request: &LaunchRequest) -> Result<Arc<dyn ExternalProcess>>;
    fn open(&self, process_id: ProcessId) -> Result<Arc<dyn ExternalProcess>>;
    /// Snapshot of the process table, optionally restricted to one executable name.
    fn query_processes(&self, name: Option<&str>) -> Result<Vec<ProcessEntry>>;
    fn executable_path(&self, process_id: ProcessId) -> Option<String>;
}

pub type TitleCallback = Arc<dyn Fn(WindowHandle) + Send + Sync + 'static>;

/// Low-level event hooks scoped to one process.
pub trait EventHookApi: Send + Sync {
    /// Installs an "object name changed" hook. The returned registration owns the callback
    /// for the whole hook lifetime. Install and unhook on the host's UI thread.
    fn hook_name_changes(
        &self,
        process_id: ProcessId,
        callback: TitleCallback,
    ) -> Result<Box<dyn HookRegistration>>;
}

pub trait HookRegistration: Send {
    fn unhook(&mut self);
}

/// The native routine that wraps an untouched window inside a container window.
pub trait EmbeddingHelper: Send + Sync {
    fn initialize(&self) -> Result<()>;
    fn shutdown(&self);
    fn create_container(
        &self,
        parent: WindowHandle,
        child: WindowHandle,
        width: i32,
        height: i32,
    ) -> Result<WindowHandle>;
    /// Notifies and destroys `container`, returning `child` to top-level status.
    fn destroy_container(&self, container: WindowHandle, child: WindowHandle)
    -> Result<WindowHandle>;
}

pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

/// Access to the host window's message loop thread.
pub trait UiDispatcher: Send + Sync {
    fn is_owner_thread(&self) -> bool;
    /// Queues `work` to run on the owner thread. Never runs it synchronously on a foreign thread.
    fn post(&self, work: WorkItem) -> Result<()>;
}

/*
 * Runs `work` on the UI thread and blocks the caller until it has completed,
 * returning its value. On the UI thread itself the closure runs inline.
 * Values that are sensitive to the calling thread or call sequence (native
 * last-error codes) must be read inside `work`.
 */
pub fn run_on_owner<T, F>(dispatcher: &dyn UiDispatcher, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if dispatcher.is_owner_thread() {
        return Ok(work());
    }
    let (sender, receiver) = mpsc::sync_channel(1);
    dispatcher.post(Box::new(move || {
        let _ = sender.send(work());
    }))?;
    receiver.recv().map_err(|_| {
        EmbedError::OperationFailed(
            "UI thread discarded a marshaled work item before running it".to_string(),
        )
    })
}

/// The full set of OS collaborators used by one `HostControl`.
#[derive(Clone)]
pub struct Platform {
    pub windows: Arc<dyn WindowApi>,
    pub processes: Arc<dyn ProcessApi>,
    pub hooks: Arc<dyn EventHookApi>,
    pub subsystem: Arc<EmbeddingSubsystem>,
    pub dispatcher: Arc<dyn UiDispatcher>,
}
