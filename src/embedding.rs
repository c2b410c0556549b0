/*
 * The re-parenting protocol. `EmbeddingEngine` places a process window inside
 * the host window with one of two strategies and takes it out again:
 *
 * - Control method: the window itself is re-styled as a child (group and
 *   tab-stop cleared, child set) and re-parented into the host. The style
 *   read before the change is kept for detaching, the style read after it is
 *   kept for client-area positioning.
 * - Window method: the native embedding helper wraps the untouched window in
 *   a container window; the container is what sits in the host's layout.
 *
 * The engine owns no application state. Callers pass the current target and
 * store the returned `Embedding`, so no lock has to be held while a call is
 * marshaled onto the UI thread. Every call that creates or re-parents a
 * window runs on the host's UI thread via `run_on_owner`.
 */
use crate::error::{EmbedError, Result};
use crate::platform::{UiDispatcher, WindowApi, run_on_owner};
use crate::polling::{MAX_REPARENT_ATTEMPTS, PollTiming};
use crate::subsystem::EmbeddingSubsystem;
use crate::types::{Bitmap, EmbedMethod, Rect, ShowCommand, WindowHandle, WindowStyle};

use std::sync::Arc;

/// Style applied to a window re-parented with the Control method.
pub fn embedded_style(original: WindowStyle) -> WindowStyle {
    original
        .without(WindowStyle::GROUP)
        .without(WindowStyle::TABSTOP)
        .with(WindowStyle::CHILD)
}

/// Style restored on detach. A disabled window would be unusable once top-level again.
pub fn restored_style(original: WindowStyle) -> WindowStyle {
    original.without(WindowStyle::DISABLED)
}

/// How the target window is currently placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Embedding {
    #[default]
    Detached,
    Control {
        original_style: WindowStyle,
        embedded_style: WindowStyle,
    },
    Window {
        container: WindowHandle,
    },
}

impl Embedding {
    pub fn is_embedded(&self) -> bool {
        !matches!(self, Embedding::Detached)
    }

    /// The handle that occupies the host's layout: the container for the Window method.
    pub fn placed_window(&self, window: WindowHandle) -> WindowHandle {
        match self {
            Embedding::Window { container } => *container,
            _ => window,
        }
    }
}

pub struct EmbeddingEngine {
    windows: Arc<dyn WindowApi>,
    subsystem: Arc<EmbeddingSubsystem>,
    dispatcher: Arc<dyn UiDispatcher>,
    timing: PollTiming,
}

impl EmbeddingEngine {
    pub fn new(
        windows: Arc<dyn WindowApi>,
        subsystem: Arc<EmbeddingSubsystem>,
        dispatcher: Arc<dyn UiDispatcher>,
        timing: PollTiming,
    ) -> Self {
        Self {
            windows,
            subsystem,
            dispatcher,
            timing,
        }
    }

    /// Embeds `window` into `host` with the given strategy.
    pub fn embed(
        &self,
        window: WindowHandle,
        host: WindowHandle,
        method: EmbedMethod,
    ) -> Result<Embedding> {
        if window.is_null() || !self.windows.is_window(window) {
            return Err(EmbedError::InvalidHandle(format!(
                "window {window} cannot be embedded"
            )));
        }
        log::debug!("Embedding: embedding window {window} into {host} using {method:?}.");
        match method {
            EmbedMethod::Control => self.embed_control(window, host),
            EmbedMethod::Window => self.embed_window(window, host),
        }
    }

    fn embed_control(&self, window: WindowHandle, host: WindowHandle) -> Result<Embedding> {
        let original_style = self.windows.style(window)?;
        let target_style = embedded_style(original_style);
        self.windows.set_style(window, target_style)?;

        if let Err(err) = self.reparent(window, host) {
            if let Err(restore_err) = self.windows.set_style(window, original_style) {
                log::warn!(
                    "Embedding: restoring style of {window} after failed re-parent failed: {restore_err}"
                );
            }
            return Err(err);
        }

        let embedded_style = self.windows.style(window).unwrap_or_else(|err| {
            log::warn!("Embedding: re-reading style of {window} failed, using computed style: {err}");
            target_style
        });
        log::debug!(
            "Embedding: window {window} embedded, style {:#x} -> {:#x}.",
            original_style.0,
            embedded_style.0
        );
        Ok(Embedding::Control {
            original_style,
            embedded_style,
        })
    }

    /*
     * Re-parents on the UI thread, retrying with a fixed delay. The native
     * error code is captured inside the marshaled call; reading it here would
     * pick up whatever the worker thread did last.
     */
    fn reparent(&self, window: WindowHandle, parent: WindowHandle) -> Result<()> {
        let mut last_code = 0;
        for attempt in 1..=MAX_REPARENT_ATTEMPTS {
            let windows = Arc::clone(&self.windows);
            let outcome =
                run_on_owner(self.dispatcher.as_ref(), move || windows.set_parent(window, parent))?;
            match outcome {
                Ok(()) => {
                    if attempt > 1 {
                        log::debug!("Embedding: re-parent of {window} succeeded on attempt {attempt}.");
                    }
                    return Ok(());
                }
                Err(err) => {
                    last_code = err.native_code().unwrap_or(last_code);
                    log::debug!(
                        "Embedding: re-parent attempt {attempt}/{MAX_REPARENT_ATTEMPTS} of {window} failed: {err}"
                    );
                }
            }
            if attempt < MAX_REPARENT_ATTEMPTS {
                std::thread::sleep(self.timing.reparent_retry_delay);
            }
        }
        log::error!("Embedding: giving up re-parenting {window} (last error {last_code}).");
        Err(EmbedError::ReparentFailed {
            attempts: MAX_REPARENT_ATTEMPTS,
            code: last_code,
        })
    }

    fn embed_window(&self, window: WindowHandle, host: WindowHandle) -> Result<Embedding> {
        let area = self.windows.window_rect(host)?;
        let subsystem = Arc::clone(&self.subsystem);
        let container = run_on_owner(self.dispatcher.as_ref(), move || {
            subsystem.create_container(host, window, area.width(), area.height())
        })??;
        log::debug!("Embedding: window {window} wrapped in container {container}.");
        Ok(Embedding::Window { container })
    }

    /*
     * Reverses `embedding` for `window`. Detaching a detached window is a
     * no-op; the caller stores `Embedding::Detached` on success.
     */
    pub fn detach(&self, window: WindowHandle, embedding: &Embedding) -> Result<()> {
        match *embedding {
            Embedding::Detached => {
                log::debug!("Embedding: window {window} is not embedded, nothing to detach.");
                Ok(())
            }
            Embedding::Control { original_style, .. } => {
                let windows = Arc::clone(&self.windows);
                run_on_owner(self.dispatcher.as_ref(), move || {
                    windows.set_parent(window, WindowHandle::NULL)
                })??;
                self.windows.set_style(window, restored_style(original_style))?;
                log::debug!("Embedding: window {window} detached.");
                Ok(())
            }
            Embedding::Window { container } => {
                let subsystem = Arc::clone(&self.subsystem);
                let released = run_on_owner(self.dispatcher.as_ref(), move || {
                    subsystem.destroy_container(container, window)
                })??;
                log::debug!("Embedding: container {container} destroyed, {released} released.");
                Ok(())
            }
        }
    }

    /*
     * Moves the placed window so that its client area covers `client`. The
     * decorations are derived from the style the window carries while
     * embedded; otherwise from its current style.
     */
    pub fn set_window_position(
        &self,
        window: WindowHandle,
        embedding: &Embedding,
        client: Rect,
    ) -> Result<()> {
        let placed = embedding.placed_window(window);
        let style = match embedding {
            Embedding::Control { embedded_style, .. } => *embedded_style,
            _ => self.windows.style(placed)?,
        };
        let outer = self.windows.adjust_window_rect(client, style)?;
        self.windows.move_window(placed, outer)
    }

    /// Focuses the window; a detached window only when `force` is set.
    pub fn focus(&self, window: WindowHandle, embedding: &Embedding, force: bool) -> Result<()> {
        if !embedding.is_embedded() && !force {
            return Ok(());
        }
        match embedding {
            Embedding::Window { .. } => self.windows.bring_to_top(window),
            _ => {
                self.windows.set_foreground(window)?;
                self.windows.set_focus(window)
            }
        }
    }

    /// Captures the placed window; `None` when it has no visible area.
    pub fn screenshot(&self, window: WindowHandle, embedding: &Embedding) -> Result<Option<Bitmap>> {
        let placed = embedding.placed_window(window);
        let rect = self.windows.window_rect(placed)?;
        if rect.is_degenerate() {
            return Ok(None);
        }
        self.windows
            .capture(placed, rect.width() as u32, rect.height() as u32)
            .map(Some)
    }

    pub fn maximize(&self, window: WindowHandle, embedding: &Embedding) -> Result<()> {
        self.windows
            .show_window(embedding.placed_window(window), ShowCommand::Maximized)
    }

    /// Shows a detached window so that its client area covers `screen_area`.
    pub fn place_top_level(&self, window: WindowHandle, screen_area: Rect) -> Result<()> {
        self.windows.show_window(window, ShowCommand::Default)?;
        self.set_window_position(window, &Embedding::Detached, screen_area)
    }
}
