/*
 * Process creation, adoption and observation on Win32.
 *
 * Shell launches go through `ShellExecuteExW` (which is also how elevation is
 * requested); alternate credentials use `CreateProcessWithLogonW` with the
 * password copied into a page-locked buffer that is zeroed right after the
 * call. Exit notifications use a thread-pool wait on the process handle.
 */
use super::window_api::{enumerate_top_level, owning_process, read_window_text};
use super::{last_error_code, native_call, to_hwnd, win32_code};
use crate::config::SecretString;
use crate::error::{EmbedError, Result};
use crate::launcher::{LaunchMode, LaunchRequest};
use crate::platform::{ExitCallback, ExitRegistration, ExternalProcess, ProcessApi};
use crate::process_table::query_process_table;
use crate::types::{MainWindow, ProcessEntry, ProcessId, ShowCommand, WindowHandle};

use windows::Win32::{
    Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE, LPARAM, WAIT_OBJECT_0, WPARAM},
    System::Memory::{VirtualLock, VirtualUnlock},
    System::Threading::{
        CREATE_NO_WINDOW, CREATE_PROCESS_LOGON_FLAGS, CreateProcessWithLogonW, GetProcessId,
        INFINITE, LOGON_WITH_PROFILE, OpenProcess, PROCESS_CREATION_FLAGS, PROCESS_INFORMATION,
        PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SYNCHRONIZE,
        PROCESS_TERMINATE, QueryFullProcessImageNameW, RegisterWaitForSingleObject,
        STARTF_USESHOWWINDOW, STARTUPINFOW, TerminateProcess, UnregisterWaitEx,
        WT_EXECUTEONLYONCE, WaitForInputIdle, WaitForSingleObject,
    },
    UI::Shell::{SEE_MASK_FLAG_NO_UI, SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW, ShellExecuteExW},
    UI::WindowsAndMessaging::{
        GW_OWNER, GetWindow, IsWindowVisible, PostMessageW, SHOW_WINDOW_CMD, SW_MINIMIZE,
        SW_SHOWNORMAL, WM_CLOSE,
    },
};
use windows::core::{HSTRING, PCWSTR, PWSTR};

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT_FAILED: u32 = 0xFFFF_FFFF;
const WAIT_TIMEOUT: u32 = 0x0000_0102;
const EXIT_CODE_KILLED: u32 = 1;

fn show_command(show: ShowCommand) -> SHOW_WINDOW_CMD {
    match show {
        ShowCommand::Minimized => SW_MINIMIZE,
        _ => SW_SHOWNORMAL,
    }
}

fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Owned process handle, closed on drop.
#[derive(Debug)]
struct ProcessHandle(isize);

impl ProcessHandle {
    fn handle(&self) -> HANDLE {
        HANDLE(self.0 as *mut c_void)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Err(err) = unsafe { CloseHandle(self.handle()) } {
            log::debug!("Win32: closing process handle failed: {err}");
        }
    }
}

/*
 * The main window of a process: its first visible, unowned top-level window
 * in z-order, with the title it carries right now.
 */
fn find_main_window(process_id: ProcessId) -> Result<Option<MainWindow>> {
    for window in enumerate_top_level()? {
        if owning_process(window) != Some(process_id) {
            continue;
        }
        let hwnd = to_hwnd(window);
        if !unsafe { IsWindowVisible(hwnd) }.as_bool() {
            continue;
        }
        let owned = unsafe { GetWindow(hwnd, GW_OWNER) }.is_ok_and(|owner| !owner.is_invalid());
        if owned {
            continue;
        }
        return Ok(Some(MainWindow {
            handle: window,
            title: read_window_text(window),
        }));
    }
    Ok(None)
}

pub struct Win32Process {
    id: ProcessId,
    handle: Arc<ProcessHandle>,
}

impl Win32Process {
    fn from_handle(handle: HANDLE) -> Result<Self> {
        let owned = Arc::new(ProcessHandle(handle.0 as isize));
        let id = unsafe { GetProcessId(owned.handle()) };
        if id == 0 {
            return Err(native_call("GetProcessId", last_error_code()));
        }
        Ok(Self {
            id: ProcessId(id),
            handle: owned,
        })
    }
}

impl ExternalProcess for Win32Process {
    fn id(&self) -> ProcessId {
        self.id
    }

    fn has_exited(&self) -> bool {
        (unsafe { WaitForSingleObject(self.handle.handle(), 0) }) == WAIT_OBJECT_0
    }

    fn wait_for_input_idle(&self, timeout: Duration) -> Result<()> {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        match unsafe { WaitForInputIdle(self.handle.handle(), millis) } {
            0 => Ok(()),
            WAIT_TIMEOUT => Err(EmbedError::OperationFailed(format!(
                "process {} did not become input-idle within {millis} ms",
                self.id
            ))),
            WAIT_FAILED => Err(native_call("WaitForInputIdle", last_error_code())),
            other => Err(EmbedError::OperationFailed(format!(
                "WaitForInputIdle returned {other:#x}"
            ))),
        }
    }

    fn main_window(&self) -> Result<Option<MainWindow>> {
        find_main_window(self.id)
    }

    /*
     * Posts `WM_CLOSE` straight to the tracked window. Once embedded it is a
     * child of the host (or of the helper's container), so it cannot be
     * looked up again through the top-level window list.
     */
    fn close_window(&self, window: WindowHandle) -> bool {
        if window.is_null() || owning_process(window) != Some(self.id) {
            log::debug!("Win32: {window} is not a window of process {}.", self.id);
            return false;
        }
        match unsafe { PostMessageW(Some(to_hwnd(window)), WM_CLOSE, WPARAM(0), LPARAM(0)) } {
            Ok(()) => {
                log::debug!("Win32: close request posted to {window}.");
                true
            }
            Err(err) => {
                log::debug!("Win32: posting close to {window} failed: {err}");
                false
            }
        }
    }

    fn kill(&self) -> Result<()> {
        unsafe { TerminateProcess(self.handle.handle(), EXIT_CODE_KILLED) }
            .map_err(|err| native_call("TerminateProcess", win32_code(&err)))
    }

    fn watch_exit(&self, on_exit: ExitCallback) -> Result<Box<dyn ExitRegistration>> {
        let watch = Arc::new(ExitWatch {
            process_id: self.id,
            on_exit: Mutex::new(Some(on_exit)),
        });
        let context = Arc::into_raw(Arc::clone(&watch)) as *const c_void;
        let mut wait = HANDLE::default();
        let registered = unsafe {
            RegisterWaitForSingleObject(
                &mut wait,
                self.handle.handle(),
                Some(exit_wait_callback),
                Some(context),
                INFINITE,
                WT_EXECUTEONLYONCE,
            )
        };
        if let Err(err) = registered {
            // The callback was never registered, so the context reference is still ours.
            drop(unsafe { Arc::from_raw(context as *const ExitWatch) });
            return Err(native_call("RegisterWaitForSingleObject", win32_code(&err)));
        }
        log::debug!("Win32: exit wait registered for process {}.", self.id);
        Ok(Box::new(Win32ExitRegistration {
            wait: Some(wait.0 as isize),
            context: context as usize,
            _process: Arc::clone(&self.handle),
        }))
    }
}

struct ExitWatch {
    process_id: ProcessId,
    on_exit: Mutex<Option<ExitCallback>>,
}

unsafe extern "system" fn exit_wait_callback(context: *mut c_void, _timed_out: bool) {
    let watch = unsafe { &*(context as *const ExitWatch) };
    let on_exit = watch
        .on_exit
        .lock()
        .map(|mut slot| slot.take())
        .unwrap_or(None);
    if let Some(on_exit) = on_exit
        && panic::catch_unwind(AssertUnwindSafe(on_exit)).is_err()
    {
        log::error!(
            "Win32: exit callback for process {} panicked.",
            watch.process_id
        );
    }
}

struct Win32ExitRegistration {
    wait: Option<isize>,
    /// `Arc<ExitWatch>` reference handed to the thread pool.
    context: usize,
    _process: Arc<ProcessHandle>,
}

impl ExitRegistration for Win32ExitRegistration {
    fn unregister(&mut self) {
        let Some(wait) = self.wait.take() else {
            return;
        };
        // Blocks until a running callback has returned, so the context can be released.
        if let Err(err) =
            unsafe { UnregisterWaitEx(HANDLE(wait as *mut c_void), Some(INVALID_HANDLE_VALUE)) }
        {
            log::warn!("Win32: unregistering exit wait failed: {err}");
        }
        drop(unsafe { Arc::from_raw(self.context as *const ExitWatch) });
    }
}

impl Drop for Win32ExitRegistration {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[derive(Debug, Default)]
pub struct Win32Processes;

impl Win32Processes {
    pub fn new() -> Self {
        Self
    }

    fn shell_execute(&self, request: &LaunchRequest, verb: Option<&str>) -> Result<Win32Process> {
        let file = HSTRING::from(request.command.as_str());
        let parameters = request.arguments.as_deref().map(HSTRING::from);
        let directory = HSTRING::from(request.working_directory.as_os_str());
        let verb = verb.map(HSTRING::from);

        let mut info = SHELLEXECUTEINFOW {
            cbSize: std::mem::size_of::<SHELLEXECUTEINFOW>() as u32,
            fMask: SEE_MASK_NOCLOSEPROCESS | SEE_MASK_FLAG_NO_UI,
            lpVerb: verb.as_ref().map_or(PCWSTR::null(), |v| PCWSTR(v.as_ptr())),
            lpFile: PCWSTR(file.as_ptr()),
            lpParameters: parameters
                .as_ref()
                .map_or(PCWSTR::null(), |p| PCWSTR(p.as_ptr())),
            lpDirectory: PCWSTR(directory.as_ptr()),
            nShow: show_command(request.show).0,
            ..Default::default()
        };
        unsafe { ShellExecuteExW(&mut info) }.map_err(|err| {
            EmbedError::LaunchFailed(format!("cannot start '{}': {err}", request.command))
        })?;
        if info.hProcess.is_invalid() {
            return Err(EmbedError::LaunchFailed(format!(
                "'{}' was handed to an existing process",
                request.command
            )));
        }
        Win32Process::from_handle(info.hProcess)
    }

    fn create_with_logon(
        &self,
        request: &LaunchRequest,
        username: &str,
        domain: Option<&str>,
        password: &SecretString,
        load_user_profile: bool,
    ) -> Result<Win32Process> {
        let username = wide(username);
        let domain = domain.map(wide);
        let application = wide(&request.command);
        let mut command_line = wide(&match &request.arguments {
            Some(arguments) => format!("\"{}\" {arguments}", request.command),
            None => format!("\"{}\"", request.command),
        });
        let directory = HSTRING::from(request.working_directory.as_os_str());

        let startup = STARTUPINFOW {
            cb: std::mem::size_of::<STARTUPINFOW>() as u32,
            dwFlags: STARTF_USESHOWWINDOW,
            wShowWindow: show_command(request.show).0 as u16,
            ..Default::default()
        };
        let mut information = PROCESS_INFORMATION::default();
        let logon_flags = if load_user_profile {
            LOGON_WITH_PROFILE
        } else {
            CREATE_PROCESS_LOGON_FLAGS(0)
        };
        let creation_flags = if request.create_no_window {
            CREATE_NO_WINDOW
        } else {
            PROCESS_CREATION_FLAGS(0)
        };

        let secret = password.to_wide();
        let locked = unsafe { VirtualLock(secret.as_ptr() as *const c_void, secret.byte_len()) };
        if let Err(err) = &locked {
            log::debug!("Win32: could not page-lock the password buffer: {err}");
        }
        let created = unsafe {
            CreateProcessWithLogonW(
                PCWSTR(username.as_ptr()),
                domain
                    .as_ref()
                    .map_or(PCWSTR::null(), |d| PCWSTR(d.as_ptr())),
                PCWSTR(secret.as_ptr()),
                logon_flags,
                PCWSTR(application.as_ptr()),
                Some(PWSTR(command_line.as_mut_ptr())),
                creation_flags,
                None,
                PCWSTR(directory.as_ptr()),
                &startup,
                &mut information,
            )
        };
        if locked.is_ok() {
            _ = unsafe { VirtualUnlock(secret.as_ptr() as *const c_void, secret.byte_len()) };
        }
        drop(secret);

        created.map_err(|err| {
            EmbedError::LaunchFailed(format!(
                "cannot start '{}' with alternate credentials: {err}",
                request.command
            ))
        })?;
        _ = unsafe { CloseHandle(information.hThread) };
        Win32Process::from_handle(information.hProcess)
    }
}

impl ProcessApi for Win32Processes {
    fn spawn(&self, request: &LaunchRequest) -> Result<Arc<dyn ExternalProcess>> {
        let process = match &request.mode {
            // The shell ignores `create_no_window`; the show command keeps it out of sight.
            LaunchMode::ShellExecute { verb } => self.shell_execute(request, *verb)?,
            LaunchMode::WithLogon {
                username,
                domain,
                password,
                load_user_profile,
            } => self.create_with_logon(
                request,
                username,
                domain.as_deref(),
                password,
                *load_user_profile,
            )?,
        };
        log::debug!("Win32: started '{}' as process {}.", request.command, process.id);
        Ok(Arc::new(process))
    }

    fn open(&self, process_id: ProcessId) -> Result<Arc<dyn ExternalProcess>> {
        let handle = unsafe {
            OpenProcess(
                PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_TERMINATE | PROCESS_SYNCHRONIZE,
                false,
                process_id.raw(),
            )
        }
        .map_err(|err| native_call("OpenProcess", win32_code(&err)))?;
        Ok(Arc::new(Win32Process::from_handle(handle)?))
    }

    fn query_processes(&self, name: Option<&str>) -> Result<Vec<ProcessEntry>> {
        Ok(query_process_table(name))
    }

    fn executable_path(&self, process_id: ProcessId) -> Option<String> {
        let handle =
            unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, process_id.raw()) }
                .ok()?;
        let handle = ProcessHandle(handle.0 as isize);
        let mut buffer = vec![0u16; 1024];
        let mut length = buffer.len() as u32;
        unsafe {
            QueryFullProcessImageNameW(
                handle.handle(),
                PROCESS_NAME_WIN32,
                PWSTR(buffer.as_mut_ptr()),
                &mut length,
            )
        }
        .ok()?;
        buffer.truncate(length as usize);
        Some(String::from_utf16_lossy(&buffer))
    }
}
