/*
 * `HostControl` is the embeddable element a host shell owns: one per host
 * area, holding at most one `RunningApplication`.
 *
 * `start` validates the configuration, moves the application to `Starting`
 * and runs the pipeline on a worker thread:
 *   launch or adopt -> find tracked process -> find window (or ask the
 *   handler) -> embed -> watch exit and title changes -> `Running`.
 * Any failure stops the chain and is reported once through
 * `HostEvent::ApplicationClosed` carrying the error.
 *
 * Locking: the session mutex is never held while a call is marshaled onto
 * the UI thread or while the event handler runs. Events are always queued to
 * the UI thread, so they arrive in the order they were raised.
 */
use crate::config::ExternalAppConfiguration;
use crate::embedding::{Embedding, EmbeddingEngine};
use crate::error::{EmbedError, Result};
use crate::launcher::start_process;
use crate::lifecycle::LifecycleMonitor;
use crate::platform::{ExternalProcess, Platform, TitleCallback, run_on_owner};
use crate::polling::{CancellationToken, PollTiming, poll_budget};
use crate::process_finder::{ProcessQuery, find_process};
use crate::running_app::RunningApplication;
use crate::types::{
    ApplicationClosedInfo, ApplicationState, Bitmap, HostEvent, HostEventHandler, ProcessId,
    ProcessWindowInfo, Rect, WindowHandle,
};
use crate::window_finder::{
    WindowQuery, enumerate_process_windows, find_window, resolve_manual_selection,
};

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

pub type SharedEventHandler = Arc<Mutex<dyn HostEventHandler>>;

/// Callbacks from the native host window into its control.
pub trait HostWindowListener: Send + Sync {
    fn on_resize(&self);
    /// An activation-class input message reached the host area.
    fn on_activated(&self);
    fn on_destroyed(&self);
}

fn lock_handler(handler: &SharedEventHandler) -> MutexGuard<'_, dyn HostEventHandler + 'static> {
    handler
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn deliver(handler: &SharedEventHandler, event: HostEvent) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        lock_handler(handler).handle_event(event)
    }));
    if outcome.is_err() {
        log::error!("HostControl: event handler panicked.");
    }
}

#[derive(Default)]
struct Session {
    app: Option<RunningApplication>,
    /// Incremented by every `start` and by `dispose`; stale callbacks compare against it.
    generation: u64,
    cancel: CancellationToken,
}

impl Session {
    fn state(&self) -> ApplicationState {
        self.app
            .as_ref()
            .map(RunningApplication::state)
            .unwrap_or_default()
    }

    fn current(&mut self, generation: u64) -> Result<&mut RunningApplication> {
        if self.generation != generation {
            return Err(EmbedError::Cancelled);
        }
        self.app.as_mut().ok_or(EmbedError::Cancelled)
    }
}

struct HostInner {
    platform: Platform,
    engine: EmbeddingEngine,
    timing: PollTiming,
    host_window: WindowHandle,
    session: Mutex<Session>,
    handler: SharedEventHandler,
}

/// Handle to an in-flight `start`. Dropping it lets the start continue.
pub struct StartTask {
    worker: Option<JoinHandle<Result<()>>>,
    cancel: CancellationToken,
}

impl StartTask {
    /// Requests cooperative cancellation. An already started process keeps running.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Blocks until the pipeline has finished and returns its outcome.
    /// Do not call on the UI thread: the pipeline needs it to make progress.
    pub fn wait(mut self) -> Result<()> {
        match self.worker.take() {
            Some(worker) => worker.join().unwrap_or_else(|_| {
                Err(EmbedError::OperationFailed(
                    "start worker panicked".to_string(),
                ))
            }),
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
pub struct HostControl {
    inner: Arc<HostInner>,
}

impl HostControl {
    pub fn new(platform: Platform, host_window: WindowHandle, handler: SharedEventHandler) -> Self {
        Self::with_timing(platform, host_window, handler, PollTiming::default())
    }

    pub fn with_timing(
        platform: Platform,
        host_window: WindowHandle,
        handler: SharedEventHandler,
        timing: PollTiming,
    ) -> Self {
        let engine = EmbeddingEngine::new(
            Arc::clone(&platform.windows),
            Arc::clone(&platform.subsystem),
            Arc::clone(&platform.dispatcher),
            timing,
        );
        Self {
            inner: Arc::new(HostInner {
                platform,
                engine,
                timing,
                host_window,
                session: Mutex::new(Session::default()),
                handler,
            }),
        }
    }

    pub fn host_window(&self) -> WindowHandle {
        self.inner.host_window
    }

    /*
     * Starts (or adopts) the configured application without blocking the
     * caller. Fails fast when the configuration is invalid or an application
     * is already starting or running; otherwise the outcome is reported
     * through `ApplicationStarted` or `ApplicationClosed`.
     */
    pub fn start(&self, configuration: ExternalAppConfiguration) -> Result<StartTask> {
        configuration.validate()?;
        let command = configuration.command.clone();

        let (generation, cancel, previous) = {
            let mut session = self.inner.lock_session();
            let state = session.state();
            if state != ApplicationState::Stopped {
                return Err(EmbedError::InvalidState(format!(
                    "start requested while {state:?}"
                )));
            }
            let mut app = RunningApplication::new(configuration);
            app.transition(ApplicationState::Starting)?;
            session.generation += 1;
            session.cancel = CancellationToken::new();
            let previous = session.app.replace(app);
            (session.generation, session.cancel.clone(), previous)
        };
        if let Some(mut previous) = previous {
            self.inner
                .release_monitor(std::mem::take(&mut previous.monitor));
        }

        log::debug!("HostControl: starting '{command}' (run {generation}).");
        let inner = Arc::clone(&self.inner);
        let worker_cancel = cancel.clone();
        let spawned = thread::Builder::new()
            .name(format!("extapphost-start-{generation}"))
            .spawn(move || inner.run_start(generation, worker_cancel));

        match spawned {
            Ok(worker) => Ok(StartTask {
                worker: Some(worker),
                cancel,
            }),
            Err(err) => {
                let mut session = self.inner.lock_session();
                if let Ok(app) = session.current(generation) {
                    app.closed_notified = true;
                    app.stop();
                }
                Err(EmbedError::OperationFailed(format!(
                    "cannot spawn start worker: {err}"
                )))
            }
        }
    }

    /// Cancels an in-flight start, if any.
    pub fn cancel_start(&self) {
        self.inner.lock_session().cancel.cancel();
    }

    pub fn state(&self) -> ApplicationState {
        self.inner.lock_session().state()
    }

    pub fn has_window(&self) -> bool {
        self.inner
            .lock_session()
            .app
            .as_ref()
            .is_some_and(RunningApplication::has_window)
    }

    pub fn is_embedded(&self) -> bool {
        self.inner
            .lock_session()
            .app
            .as_ref()
            .is_some_and(RunningApplication::is_embedded)
    }

    /// The application's own top-level window, or the null handle.
    pub fn window(&self) -> WindowHandle {
        self.inner
            .target()
            .map_or(WindowHandle::NULL, |(window, _)| window)
    }

    pub fn process_id(&self) -> Option<ProcessId> {
        self.inner
            .lock_session()
            .app
            .as_ref()
            .and_then(RunningApplication::process_id)
    }

    /// Embeds a running, currently detached application.
    pub fn embed_application(&self) -> Result<()> {
        let generation = {
            let session = self.inner.lock_session();
            match &session.app {
                Some(app) if app.state() == ApplicationState::Running && app.has_window() => {
                    session.generation
                }
                Some(app) if !app.has_window() => {
                    return Err(EmbedError::MissingWindow(
                        "the application has no window to embed".to_string(),
                    ));
                }
                Some(app) => {
                    return Err(EmbedError::InvalidState(format!(
                        "cannot embed while {:?}",
                        app.state()
                    )));
                }
                None => {
                    return Err(EmbedError::MissingWindow(
                        "no application has been started".to_string(),
                    ));
                }
            }
        };
        self.inner.embed_current(generation)?;
        self.inner.post_settle();
        Ok(())
    }

    /*
     * Returns the window to top-level status and places it over the host
     * area. Detaching an application that is not embedded does nothing.
     */
    pub fn detach_application(&self) -> Result<()> {
        let (generation, window, embedding) = {
            let mut session = self.inner.lock_session();
            let generation = session.generation;
            let Some(app) = session.app.as_mut() else {
                return Ok(());
            };
            if !app.is_embedded() {
                return Ok(());
            }
            if app.operation_in_flight {
                return Err(EmbedError::InvalidState(
                    "an embed or detach is already in progress".to_string(),
                ));
            }
            app.operation_in_flight = true;
            (generation, app.window(), app.embedding())
        };

        let outcome = self.inner.engine.detach(window, &embedding);
        {
            let mut session = self.inner.lock_session();
            if let Ok(app) = session.current(generation) {
                app.operation_in_flight = false;
                if outcome.is_ok() {
                    app.set_embedding(Embedding::Detached)?;
                }
            }
        }
        outcome?;

        match self
            .inner
            .platform
            .windows
            .window_rect(self.inner.host_window)
            .and_then(|area| self.inner.engine.place_top_level(window, area))
        {
            Ok(()) => log::debug!("HostControl: window {window} detached."),
            Err(err) => log::warn!("HostControl: placing detached window {window} failed: {err}"),
        }
        Ok(())
    }

    /*
     * Closes the application: terminate when configured to, otherwise ask
     * the main window to close and terminate if that request cannot be
     * delivered. The exit notification that follows is marked as user
     * initiated. A start in progress is cancelled.
     */
    pub fn close_application(&self) {
        let mut session = self.inner.lock_session();
        let cancel = session.cancel.clone();
        let Some(app) = session.app.as_mut() else {
            return;
        };
        let starting = app.state() == ApplicationState::Starting;
        if !starting && (!app.has_window() || !app.is_running()) {
            log::debug!("HostControl: close requested without a running application.");
            return;
        }
        app.user_initiated_close = true;
        let window = app.window();
        let process = app.process.clone();
        let kill = app.configuration.kill_on_close;
        if app.state() == ApplicationState::Running {
            app.stop();
        }
        drop(session);

        if starting {
            cancel.cancel();
        }
        let Some(process) = process.filter(|process| !process.has_exited()) else {
            return;
        };
        if kill {
            log::debug!("HostControl: terminating process {}.", process.id());
            if let Err(err) = process.kill() {
                log::warn!("HostControl: terminating process {} failed: {err}", process.id());
            }
        } else if !process.close_window(window) {
            log::debug!(
                "HostControl: process {} did not accept a close request, terminating.",
                process.id()
            );
            if let Err(err) = process.kill() {
                log::warn!("HostControl: terminating process {} failed: {err}", process.id());
            }
        }
    }

    /// Focuses the embedded window; a detached one only when `force` is set.
    pub fn focus_application(&self, force: bool) {
        self.inner.focus(force);
    }

    /// Moves the window so its client area covers `client` (host coordinates when embedded).
    pub fn set_window_position(&self, client: Rect) {
        let Some((window, embedding)) = self.inner.target() else {
            return;
        };
        if let Err(err) = self
            .inner
            .engine
            .set_window_position(window, &embedding, client)
        {
            log::warn!("HostControl: positioning window {window} failed: {err}");
        }
    }

    pub fn get_window_screenshot(&self) -> Option<Bitmap> {
        let (window, embedding) = self.inner.target()?;
        match self.inner.engine.screenshot(window, &embedding) {
            Ok(bitmap) => bitmap,
            Err(err) => {
                log::warn!("HostControl: capturing window {window} failed: {err}");
                None
            }
        }
    }

    pub fn maximize_application(&self) {
        let Some((window, embedding)) = self.inner.target() else {
            return;
        };
        if let Err(err) = self.inner.engine.maximize(window, &embedding) {
            log::warn!("HostControl: maximizing window {window} failed: {err}");
        }
    }

    /// Current title of the application window; empty without a window.
    pub fn window_title(&self) -> String {
        self.inner
            .target()
            .map(|(window, _)| self.inner.platform.windows.window_text(window))
            .unwrap_or_default()
    }

    /*
     * Releases every registration and forgets the application without
     * closing it. Callbacks of the disposed run are ignored from here on.
     */
    pub fn dispose(&self) {
        let app = {
            let mut session = self.inner.lock_session();
            session.cancel.cancel();
            session.generation += 1;
            session.app.take()
        };
        if let Some(mut app) = app {
            log::debug!("HostControl: disposing {app:?}.");
            self.inner.release_monitor(std::mem::take(&mut app.monitor));
        }
    }
}

impl HostWindowListener for HostControl {
    fn on_resize(&self) {
        self.inner.reposition();
    }

    fn on_activated(&self) {
        self.inner.emit(HostEvent::ApplicationActivated);
        self.inner.focus(false);
    }

    fn on_destroyed(&self) {
        self.dispose();
    }
}

impl HostInner {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn target(&self) -> Option<(WindowHandle, Embedding)> {
        self.lock_session()
            .app
            .as_ref()
            .filter(|app| app.has_window())
            .map(|app| (app.window(), app.embedding()))
    }

    fn emit(&self, event: HostEvent) {
        let handler = Arc::clone(&self.handler);
        let description = format!("{event:?}");
        if let Err(err) = self
            .platform
            .dispatcher
            .post(Box::new(move || deliver(&handler, event)))
        {
            log::warn!("HostControl: dropping event {description}: {err}");
        }
    }

    fn post_to_ui(&self, work: impl FnOnce() + Send + 'static) {
        if let Err(err) = self.platform.dispatcher.post(Box::new(work)) {
            log::warn!("HostControl: cannot reach the UI thread: {err}");
        }
    }

    /// Repositions and focuses the freshly embedded window once the UI thread is idle.
    fn post_settle(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        self.post_to_ui(move || {
            inner.reposition();
            inner.focus(false);
        });
    }

    /// Hook registrations must be released on the thread that installed them.
    fn release_monitor(&self, monitor: LifecycleMonitor) {
        if self.platform.dispatcher.is_owner_thread() {
            drop(monitor);
        } else {
            self.post_to_ui(move || {
                let mut monitor = monitor;
                monitor.detach();
            });
        }
    }

    fn reposition(&self) {
        let Some((window, embedding)) = self.target() else {
            return;
        };
        if !embedding.is_embedded() {
            return;
        }
        let outcome = self
            .platform
            .windows
            .client_rect(self.host_window)
            .map(|area| Rect::from_xywh(0, 0, area.width(), area.height()))
            .and_then(|client| self.engine.set_window_position(window, &embedding, client));
        if let Err(err) = outcome {
            log::warn!("HostControl: repositioning window {window} failed: {err}");
        }
    }

    fn focus(&self, force: bool) {
        let Some((window, embedding)) = self.target() else {
            return;
        };
        if let Err(err) = self.engine.focus(window, &embedding, force) {
            log::warn!("HostControl: focusing window {window} failed: {err}");
        }
    }

    fn run_start(self: Arc<Self>, generation: u64, cancel: CancellationToken) -> Result<()> {
        let outcome = self.start_pipeline(generation, &cancel);
        if let Err(err) = &outcome {
            self.fail_start(generation, err.clone());
        }
        outcome
    }

    fn start_pipeline(self: &Arc<Self>, generation: u64, cancel: &CancellationToken) -> Result<()> {
        let config = self.lock_session().current(generation)?.configuration.clone();
        let windows = self.platform.windows.as_ref();
        let processes = self.platform.processes.as_ref();

        let (mut process, mut window) = self.acquire_process(&config, cancel)?;

        if let Some(title) = config.title_match() {
            let query = WindowQuery {
                title_match: title.to_string(),
                skip: config.window_title_match_skip,
                min_wait_secs: config.min_wait_secs,
                max_wait_secs: config.max_wait_secs,
            };
            match find_window(windows, processes, process.as_ref(), &query, &self.timing, cancel)? {
                Some(info) => window = info.window,
                None => {
                    let info = self.select_window_manually(title, cancel)?;
                    if info.process_id != process.id() {
                        log::debug!(
                            "HostControl: selected window belongs to process {}, tracking it instead of {}.",
                            info.process_id,
                            process.id()
                        );
                        process = processes.open(info.process_id)?;
                    }
                    window = info.window;
                }
            }
        } else if window.is_null() {
            window = self.wait_for_main_window(process.as_ref(), &config, cancel)?;
        }

        if window.is_null() {
            return Err(EmbedError::MissingWindow(format!(
                "process {} has no main window",
                process.id()
            )));
        }

        {
            let mut session = self.lock_session();
            let app = session.current(generation)?;
            app.process = Some(Arc::clone(&process));
            app.set_window(window)?;
        }
        cancel.check()?;

        if !config.start_external {
            self.embed_current(generation)?;
        }
        self.attach_lifecycle(generation, &process)?;

        {
            let mut session = self.lock_session();
            let app = session.current(generation)?;
            if app.closed_notified {
                return Ok(());
            }
            app.transition(ApplicationState::Running)?;
        }
        log::debug!(
            "HostControl: process {} running with window {window}.",
            process.id()
        );
        self.emit(HostEvent::ApplicationStarted);
        if !config.start_external {
            self.post_settle();
        }
        Ok(())
    }

    /*
     * Launches the configured command, or adopts a running process. When
     * tracking criteria are set the process they select replaces the
     * launched one.
     */
    fn acquire_process(
        &self,
        config: &ExternalAppConfiguration,
        cancel: &CancellationToken,
    ) -> Result<(Arc<dyn ExternalProcess>, WindowHandle)> {
        let processes = self.platform.processes.as_ref();
        let query = ProcessQuery::from_config(config);

        let (launched, launched_window) = if config.use_existing_process {
            (None, WindowHandle::NULL)
        } else {
            let launched = start_process(processes, config, &self.timing, cancel)?;
            (Some(launched.process), launched.main_window)
        };

        let Some(query) = query else {
            return launched
                .map(|process| (process, launched_window))
                .ok_or_else(|| {
                    EmbedError::InvalidConfiguration(
                        "an existing process needs tracking criteria".to_string(),
                    )
                });
        };

        let entry = find_process(processes, &query, &self.timing, cancel)?;
        if let Some(process) = launched
            && process.id() == entry.process_id
        {
            return Ok((process, launched_window));
        }
        log::debug!(
            "HostControl: tracking process {} ({}).",
            entry.process_id,
            entry.name
        );
        let process = processes.open(entry.process_id)?;
        let window = match process.main_window() {
            Ok(main) => main.map_or(WindowHandle::NULL, |main| main.handle),
            Err(err) => {
                log::debug!(
                    "HostControl: main window of process {} unavailable: {err}",
                    entry.process_id
                );
                WindowHandle::NULL
            }
        };
        Ok((process, window))
    }

    fn wait_for_main_window(
        &self,
        process: &dyn ExternalProcess,
        config: &ExternalAppConfiguration,
        cancel: &CancellationToken,
    ) -> Result<WindowHandle> {
        for _ in 0..poll_budget(config.max_wait_secs) {
            cancel.check()?;
            if let Some(main) = process.main_window()?
                && !main.handle.is_null()
            {
                return Ok(main.handle);
            }
            if process.has_exited() {
                break;
            }
            cancel.sleep(self.timing.poll_interval)?;
        }
        Ok(WindowHandle::NULL)
    }

    /*
     * Escalation when no window matched the title criteria: the handler is
     * asked on the UI thread to pick one of the current windows, and the
     * pick is checked against a fresh enumeration.
     */
    fn select_window_manually(
        &self,
        title: &str,
        cancel: &CancellationToken,
    ) -> Result<ProcessWindowInfo> {
        cancel.check()?;
        let windows = self.platform.windows.as_ref();
        let processes = self.platform.processes.as_ref();
        let candidates = enumerate_process_windows(windows, processes)?;
        log::debug!(
            "HostControl: no window matched '{title}', asking for a selection among {} windows.",
            candidates.len()
        );

        let handler = Arc::clone(&self.handler);
        let selected = run_on_owner(self.platform.dispatcher.as_ref(), move || {
            lock_handler(&handler).query_window(&candidates)
        })?;
        let selected = selected.ok_or_else(|| {
            EmbedError::MissingWindow(format!(
                "no window matched '{title}' and none was selected"
            ))
        })?;

        cancel.check()?;
        let fresh = enumerate_process_windows(windows, processes)?;
        resolve_manual_selection(selected, &fresh)
    }

    fn embed_current(&self, generation: u64) -> Result<()> {
        let (window, method) = {
            let mut session = self.lock_session();
            let app = session.current(generation)?;
            if app.operation_in_flight {
                return Err(EmbedError::InvalidState(
                    "an embed or detach is already in progress".to_string(),
                ));
            }
            if app.is_embedded() {
                return Ok(());
            }
            if !app.has_window() {
                return Err(EmbedError::MissingWindow(
                    "the application has no window to embed".to_string(),
                ));
            }
            app.operation_in_flight = true;
            (app.window(), app.configuration.embed_method)
        };

        let outcome = self.engine.embed(window, self.host_window, method);

        let mut session = self.lock_session();
        if session.current(generation).is_err() {
            drop(session);
            if let Ok(embedding) = &outcome
                && let Err(err) = self.engine.detach(window, embedding)
            {
                log::warn!("HostControl: undoing stale embed of {window} failed: {err}");
            }
            return Err(EmbedError::Cancelled);
        }
        let app = session.current(generation)?;
        app.operation_in_flight = false;
        app.set_embedding(outcome?)
    }

    fn attach_lifecycle(
        self: &Arc<Self>,
        generation: u64,
        process: &Arc<dyn ExternalProcess>,
    ) -> Result<()> {
        let process_id = process.id();
        let mut monitor = LifecycleMonitor::new();

        let weak = Arc::downgrade(self);
        monitor.watch_exit(
            process.as_ref(),
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.notify_process_exit(generation);
                }
            }),
        )?;

        let weak = Arc::downgrade(self);
        let on_title: TitleCallback = Arc::new(move |window| {
            if let Some(inner) = weak.upgrade() {
                inner.notify_title_change(generation, window);
            }
        });
        let hooks = Arc::clone(&self.platform.hooks);
        let (monitor, hooked) = run_on_owner(self.platform.dispatcher.as_ref(), move || {
            let hooked = monitor.hook_title_changes(hooks.as_ref(), process_id, on_title);
            (monitor, hooked)
        })?;
        if let Err(err) = hooked {
            log::warn!(
                "HostControl: title changes of process {process_id} will not be reported: {err}"
            );
        }

        let mut session = self.lock_session();
        let keep = session
            .current(generation)
            .is_ok_and(|app| !app.closed_notified);
        if !keep {
            drop(session);
            self.release_monitor(monitor);
            return Ok(());
        }
        session.current(generation)?.monitor = monitor;
        Ok(())
    }

    fn notify_process_exit(self: &Arc<Self>, generation: u64) {
        let inner = Arc::clone(self);
        self.post_to_ui(move || inner.handle_process_exit(generation));
    }

    fn handle_process_exit(&self, generation: u64) {
        let (monitor, info, leftover) = {
            let mut session = self.lock_session();
            let Ok(app) = session.current(generation) else {
                return;
            };
            if app.closed_notified {
                return;
            }
            app.closed_notified = true;
            app.stop();
            let leftover = match app.embedding() {
                Embedding::Window { container } => Some((container, app.window())),
                _ => None,
            };
            app.release_window();
            app.operation_in_flight = false;
            let info = ApplicationClosedInfo {
                user_initiated: app.user_initiated_close,
                process_exited: true,
                error: None,
            };
            (std::mem::take(&mut app.monitor), info, leftover)
        };
        self.release_monitor(monitor);
        /* A helper container outlives its child; this runs on the UI thread that owns it. */
        if let Some((container, window)) = leftover
            && let Err(err) = self.platform.subsystem.destroy_container(container, window)
        {
            log::warn!("HostControl: cannot destroy container {container}: {err}");
        }
        log::debug!(
            "HostControl: application exited (user initiated: {}).",
            info.user_initiated
        );
        self.emit(HostEvent::ApplicationClosed(info));
    }

    fn notify_title_change(self: &Arc<Self>, generation: u64, window: WindowHandle) {
        let inner = Arc::clone(self);
        self.post_to_ui(move || inner.handle_title_change(generation, window));
    }

    fn handle_title_change(&self, generation: u64, window: WindowHandle) {
        let tracked = self
            .lock_session()
            .current(generation)
            .is_ok_and(|app| app.window() == window);
        if !tracked {
            log::trace!("HostControl: ignoring name change of untracked window {window}.");
            return;
        }
        let caption = self.platform.windows.window_text(window);
        self.emit(HostEvent::WindowTitleChanged { caption });
    }

    fn fail_start(&self, generation: u64, error: EmbedError) {
        let (monitor, embedded, info) = {
            let mut session = self.lock_session();
            let Ok(app) = session.current(generation) else {
                return;
            };
            if app.closed_notified {
                return;
            }
            app.closed_notified = true;
            app.stop();
            app.operation_in_flight = false;
            let embedded = app
                .is_embedded()
                .then(|| (app.window(), app.embedding()));
            if embedded.is_some() {
                app.set_embedding(Embedding::Detached).ok();
            }
            let info = ApplicationClosedInfo {
                user_initiated: app.user_initiated_close,
                process_exited: app
                    .process
                    .as_ref()
                    .is_some_and(|process| process.has_exited()),
                error: Some(error.clone()),
            };
            (std::mem::take(&mut app.monitor), embedded, info)
        };
        self.release_monitor(monitor);
        if let Some((window, embedding)) = embedded
            && let Err(err) = self.engine.detach(window, &embedding)
        {
            log::warn!("HostControl: detaching {window} after failed start failed: {err}");
        }

        if error.is_cancelled() {
            log::debug!("HostControl: start cancelled.");
        } else {
            log::error!("HostControl: start failed: {error}");
        }
        self.emit(HostEvent::ApplicationClosed(info));
    }
}
