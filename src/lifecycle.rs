/*
 * Ties the OS notifications of one tracked process to the host: the exit
 * watch and the "object name changed" hooks used to follow title changes.
 *
 * The monitor owns every registration it created, together with the
 * callbacks they reference, for as long as the registration lives.
 * `detach` releases all of them and tolerates a monitor that never
 * registered anything. Hook registrations must be released on the thread
 * that installed them, so owners tear the monitor down on the UI thread.
 */
use crate::error::Result;
use crate::platform::{
    EventHookApi, ExitCallback, ExitRegistration, ExternalProcess, HookRegistration, TitleCallback,
};
use crate::types::ProcessId;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[derive(Default)]
pub struct LifecycleMonitor {
    process_id: Option<ProcessId>,
    exit: Option<Box<dyn ExitRegistration>>,
    hooks: Vec<Box<dyn HookRegistration>>,
}

impl LifecycleMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_watching_exit(&self) -> bool {
        self.exit.is_some()
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /*
     * Registers `on_exit` for the process exit. The subscriber runs at most
     * once; a panic inside it is logged and never unwinds into the OS
     * callback. A second registration while one is active is ignored.
     */
    pub fn watch_exit(&mut self, process: &dyn ExternalProcess, on_exit: ExitCallback) -> Result<()> {
        if self.exit.is_some() {
            log::debug!(
                "Lifecycle: exit of process {} is already watched.",
                process.id()
            );
            return Ok(());
        }

        let process_id = process.id();
        let fired = Arc::new(AtomicBool::new(false));
        let guarded: ExitCallback = Box::new(move || {
            if fired.swap(true, Ordering::SeqCst) {
                return;
            }
            log::debug!("Lifecycle: process {process_id} exited.");
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(on_exit)) {
                log::error!(
                    "Lifecycle: exit subscriber for process {process_id} panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        });

        self.exit = Some(process.watch_exit(guarded)?);
        self.process_id = Some(process_id);
        Ok(())
    }

    pub fn hook_title_changes(
        &mut self,
        hooks: &dyn EventHookApi,
        process_id: ProcessId,
        callback: TitleCallback,
    ) -> Result<()> {
        let registration = hooks.hook_name_changes(process_id, callback)?;
        self.hooks.push(registration);
        log::debug!("Lifecycle: name-change hook installed for process {process_id}.");
        Ok(())
    }

    pub fn detach(&mut self) {
        if let Some(mut exit) = self.exit.take() {
            exit.unregister();
        }
        let hook_count = self.hooks.len();
        for mut hook in self.hooks.drain(..) {
            hook.unhook();
        }
        if let Some(process_id) = self.process_id.take() {
            log::debug!(
                "Lifecycle: detached from process {process_id} ({hook_count} hooks released)."
            );
        }
    }
}

impl Drop for LifecycleMonitor {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for LifecycleMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleMonitor")
            .field("process_id", &self.process_id)
            .field("watching_exit", &self.exit.is_some())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
