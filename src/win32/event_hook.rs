/*
 * Out-of-context WinEvent hooks for caption changes of the embedded process.
 *
 * The hook procedure receives no user data, so callbacks live in a global
 * registry keyed by the hook handle. Hooks are installed and removed on the
 * host's UI thread; events are delivered there as well, through its message
 * loop.
 */
use super::{from_hwnd, native_call, last_error_code};
use crate::error::Result;
use crate::platform::{EventHookApi, HookRegistration, TitleCallback};
use crate::types::ProcessId;

use windows::Win32::{
    Foundation::HWND,
    UI::Accessibility::{HWINEVENTHOOK, SetWinEventHook, UnhookWinEvent},
    UI::WindowsAndMessaging::{EVENT_OBJECT_NAMECHANGE, OBJID_WINDOW, WINEVENT_OUTOFCONTEXT},
};

use std::collections::HashMap;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, OnceLock};

const CHILDID_SELF: i32 = 0;

fn registry() -> MutexGuard<'static, HashMap<isize, TitleCallback>> {
    static HOOKS: OnceLock<Mutex<HashMap<isize, TitleCallback>>> = OnceLock::new();
    HOOKS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

unsafe extern "system" fn name_change_proc(
    hook: HWINEVENTHOOK,
    _event: u32,
    hwnd: HWND,
    id_object: i32,
    id_child: i32,
    _event_thread: u32,
    _event_time: u32,
) {
    // Only the window object itself; captions of child controls are not interesting.
    if id_object != OBJID_WINDOW.0 || id_child != CHILDID_SELF || hwnd.is_invalid() {
        return;
    }
    let callback = registry().get(&(hook.0 as isize)).cloned();
    let Some(callback) = callback else {
        return;
    };
    let window = from_hwnd(hwnd);
    if panic::catch_unwind(AssertUnwindSafe(|| callback(window))).is_err() {
        log::error!("Win32: title change callback for {window} panicked.");
    }
}

#[derive(Debug, Default)]
pub struct Win32EventHooks;

impl Win32EventHooks {
    pub fn new() -> Self {
        Self
    }
}

impl EventHookApi for Win32EventHooks {
    fn hook_name_changes(
        &self,
        process_id: ProcessId,
        callback: TitleCallback,
    ) -> Result<Box<dyn HookRegistration>> {
        let hook = unsafe {
            SetWinEventHook(
                EVENT_OBJECT_NAMECHANGE,
                EVENT_OBJECT_NAMECHANGE,
                None,
                Some(name_change_proc),
                process_id.raw(),
                0,
                WINEVENT_OUTOFCONTEXT,
            )
        };
        if hook.is_invalid() {
            return Err(native_call("SetWinEventHook", last_error_code()));
        }
        let key = hook.0 as isize;
        registry().insert(key, callback);
        log::debug!("Win32: name change hook {key:#x} installed for process {process_id}.");
        Ok(Box::new(Win32HookRegistration { hook: Some(key) }))
    }
}

struct Win32HookRegistration {
    hook: Option<isize>,
}

impl HookRegistration for Win32HookRegistration {
    fn unhook(&mut self) {
        let Some(key) = self.hook.take() else {
            return;
        };
        if !unsafe { UnhookWinEvent(HWINEVENTHOOK(key as *mut c_void)) }.as_bool() {
            log::warn!(
                "Win32: UnhookWinEvent({key:#x}) failed with {}.",
                last_error_code()
            );
        }
        registry().remove(&key);
    }
}

impl Drop for Win32HookRegistration {
    fn drop(&mut self) {
        self.unhook();
    }
}
