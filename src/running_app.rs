/*
 * The live entity behind one `start` call: process, target window, how that
 * window is embedded, the configuration it was started with and the
 * lifecycle registrations. Owned by exactly one `HostControl`.
 */
use crate::config::ExternalAppConfiguration;
use crate::embedding::Embedding;
use crate::error::{EmbedError, Result};
use crate::lifecycle::LifecycleMonitor;
use crate::platform::ExternalProcess;
use crate::types::{ApplicationState, ProcessId, WindowHandle};

use std::fmt;
use std::sync::Arc;

pub struct RunningApplication {
    pub configuration: ExternalAppConfiguration,
    state: ApplicationState,
    pub process: Option<Arc<dyn ExternalProcess>>,
    /// The process's own top-level window. For the Window method the
    /// container placed in the host is kept in `embedding`.
    window: WindowHandle,
    embedding: Embedding,
    pub monitor: LifecycleMonitor,
    /// An embed or detach is running outside the session lock.
    pub operation_in_flight: bool,
    /// `close_application` was requested for this run.
    pub user_initiated_close: bool,
    /// `ApplicationClosed` has been raised for this run.
    pub closed_notified: bool,
}

impl RunningApplication {
    pub fn new(configuration: ExternalAppConfiguration) -> Self {
        Self {
            configuration,
            state: ApplicationState::Stopped,
            process: None,
            window: WindowHandle::NULL,
            embedding: Embedding::Detached,
            monitor: LifecycleMonitor::new(),
            operation_in_flight: false,
            user_initiated_close: false,
            closed_notified: false,
        }
    }

    pub fn state(&self) -> ApplicationState {
        self.state
    }

    pub fn transition(&mut self, next: ApplicationState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(EmbedError::InvalidState(format!(
                "cannot move from {:?} to {next:?}",
                self.state
            )));
        }
        log::debug!("HostControl: state {:?} -> {next:?}.", self.state);
        self.state = next;
        Ok(())
    }

    /// Moves to `Stopped` unless already there.
    pub fn stop(&mut self) {
        if self.state != ApplicationState::Stopped {
            log::debug!("HostControl: state {:?} -> Stopped.", self.state);
            self.state = ApplicationState::Stopped;
        }
    }

    pub fn process_id(&self) -> Option<ProcessId> {
        self.process.as_ref().map(|process| process.id())
    }

    pub fn is_running(&self) -> bool {
        self.process
            .as_ref()
            .is_some_and(|process| !process.has_exited())
    }

    pub fn window(&self) -> WindowHandle {
        self.window
    }

    /// Replaces the target window. Only valid while nothing is embedded.
    pub fn set_window(&mut self, window: WindowHandle) -> Result<()> {
        if self.embedding.is_embedded() {
            return Err(EmbedError::InvalidState(format!(
                "cannot retarget from {} to {window} while embedded",
                self.window
            )));
        }
        self.window = window;
        Ok(())
    }

    pub fn embedding(&self) -> Embedding {
        self.embedding
    }

    pub fn set_embedding(&mut self, embedding: Embedding) -> Result<()> {
        if embedding.is_embedded() && !self.has_window() {
            return Err(EmbedError::InvalidState(
                "cannot embed without a window".to_string(),
            ));
        }
        self.embedding = embedding;
        Ok(())
    }

    pub fn has_window(&self) -> bool {
        !self.window.is_null()
    }

    pub fn is_embedded(&self) -> bool {
        self.has_window() && self.embedding.is_embedded()
    }

    /// The handle currently occupying the host area.
    /// Forgets the window and its embedding; used when the process is gone.
    pub fn release_window(&mut self) {
        self.embedding = Embedding::Detached;
        self.window = WindowHandle::NULL;
    }
}

impl fmt::Debug for RunningApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningApplication")
            .field("command", &self.configuration.command)
            .field("state", &self.state)
            .field("process_id", &self.process_id())
            .field("window", &self.window)
            .field("embedding", &self.embedding)
            .field("monitor", &self.monitor)
            .finish()
    }
}
