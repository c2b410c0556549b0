/*
 * In-memory stand-ins for the platform seams, shared by the unit tests of
 * every module. The fakes model just enough of the window manager and the
 * process table to drive the state machine deterministically.
 */
use crate::error::{EmbedError, Result};
use crate::launcher::LaunchRequest;
use crate::platform::{
    EmbeddingHelper, EventHookApi, ExitCallback, ExitRegistration, ExternalProcess,
    HookRegistration, ProcessApi, TitleCallback, UiDispatcher, WindowApi, WorkItem,
};
use crate::process_table::name_matches;
use crate::types::{
    Bitmap, HostEvent, HostEventHandler, MainWindow, ProcessEntry, ProcessId, ProcessWindowInfo,
    Rect, ShowCommand, WindowHandle, WindowStyle,
};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Window manager
// ---------------------------------------------------------------------------

/// Error code the fake reports for a refused `set_parent` (access denied).
const SET_PARENT_FAILURE_CODE: u32 = 5;

#[derive(Debug, Clone)]
struct FakeWindow {
    handle: WindowHandle,
    process_id: ProcessId,
    title: String,
    visible: bool,
    style: WindowStyle,
    parent: WindowHandle,
    rect: Rect,
    shown: Option<ShowCommand>,
}

impl FakeWindow {
    fn new(handle: WindowHandle, process_id: ProcessId, title: &str) -> Self {
        Self {
            handle,
            process_id,
            title: title.to_string(),
            visible: true,
            style: WindowStyle::OVERLAPPEDWINDOW | WindowStyle::VISIBLE,
            parent: WindowHandle::NULL,
            rect: Rect::from_xywh(0, 0, 400, 300),
            shown: None,
        }
    }
}

#[derive(Default)]
struct WindowTable {
    windows: Vec<FakeWindow>,
    /// Windows that appear once more than `n` enumerations have happened.
    pending: Vec<(usize, FakeWindow)>,
    enumerations: usize,
    set_parent_failures: u32,
    set_parent_calls: usize,
    focused: Option<WindowHandle>,
    foreground: Option<WindowHandle>,
    top: Option<WindowHandle>,
    next_handle: isize,
}

impl WindowTable {
    fn get(&self, window: WindowHandle) -> Result<&FakeWindow> {
        self.windows
            .iter()
            .find(|entry| entry.handle == window)
            .ok_or_else(|| EmbedError::InvalidHandle(format!("no window {window}")))
    }

    fn get_mut(&mut self, window: WindowHandle) -> Result<&mut FakeWindow> {
        self.windows
            .iter_mut()
            .find(|entry| entry.handle == window)
            .ok_or_else(|| EmbedError::InvalidHandle(format!("no window {window}")))
    }
}

/// Frame added around a client rectangle for the given style.
fn frame_for(style: WindowStyle) -> (i32, i32, i32, i32) {
    if style.contains(WindowStyle::CAPTION) {
        (8, 31, 8, 8)
    } else if style.contains(WindowStyle::BORDER) {
        (1, 1, 1, 1)
    } else {
        (0, 0, 0, 0)
    }
}

#[derive(Default)]
pub struct FakeWindows {
    table: Mutex<WindowTable>,
}

impl FakeWindows {
    pub fn new() -> Self {
        let windows = Self::default();
        lock(&windows.table).next_handle = 0x9000;
        windows
    }

    /// Adds a visible top-level window with a default overlapped style.
    pub fn add_window(&self, handle: WindowHandle, process_id: ProcessId, title: &str) {
        lock(&self.table)
            .windows
            .push(FakeWindow::new(handle, process_id, title));
    }

    pub fn add_window_after_enumerations(
        &self,
        enumerations: usize,
        handle: WindowHandle,
        process_id: ProcessId,
        title: &str,
    ) {
        lock(&self.table)
            .pending
            .push((enumerations, FakeWindow::new(handle, process_id, title)));
    }

    pub fn set_visible(&self, window: WindowHandle, visible: bool) {
        if let Ok(entry) = lock(&self.table).get_mut(window) {
            entry.visible = visible;
        }
    }

    pub fn set_title(&self, window: WindowHandle, title: &str) {
        if let Ok(entry) = lock(&self.table).get_mut(window) {
            entry.title = title.to_string();
        }
    }

    pub fn set_rect(&self, window: WindowHandle, rect: Rect) {
        if let Ok(entry) = lock(&self.table).get_mut(window) {
            entry.rect = rect;
        }
    }

    pub fn set_style_value(&self, window: WindowHandle, style: WindowStyle) {
        if let Ok(entry) = lock(&self.table).get_mut(window) {
            entry.style = style;
        }
    }

    pub fn style_value(&self, window: WindowHandle) -> WindowStyle {
        lock(&self.table)
            .get(window)
            .map(|entry| entry.style)
            .unwrap_or_default()
    }

    pub fn parent_of(&self, window: WindowHandle) -> WindowHandle {
        lock(&self.table)
            .get(window)
            .map(|entry| entry.parent)
            .unwrap_or_default()
    }

    pub fn rect_of(&self, window: WindowHandle) -> Rect {
        lock(&self.table)
            .get(window)
            .map(|entry| entry.rect)
            .unwrap_or_default()
    }

    pub fn shown(&self, window: WindowHandle) -> Option<ShowCommand> {
        lock(&self.table).get(window).ok().and_then(|entry| entry.shown)
    }

    /// Makes the next `count` calls of `set_parent` fail with access denied.
    pub fn fail_set_parent(&self, count: u32) {
        lock(&self.table).set_parent_failures = count;
    }

    pub fn set_parent_calls(&self) -> usize {
        lock(&self.table).set_parent_calls
    }

    pub fn enumerations(&self) -> usize {
        lock(&self.table).enumerations
    }

    pub fn focused(&self) -> Option<WindowHandle> {
        lock(&self.table).focused
    }

    pub fn foreground(&self) -> Option<WindowHandle> {
        lock(&self.table).foreground
    }

    pub fn brought_to_top(&self) -> Option<WindowHandle> {
        lock(&self.table).top
    }

    pub fn clear_focus(&self) {
        let mut table = lock(&self.table);
        table.focused = None;
        table.foreground = None;
        table.top = None;
    }

    /// Creates a bare child window, as the embedding helper does for containers.
    pub fn create_child(&self, parent: WindowHandle, rect: Rect) -> WindowHandle {
        let mut table = lock(&self.table);
        table.next_handle += 1;
        let handle = WindowHandle(table.next_handle);
        let mut child = FakeWindow::new(handle, ProcessId(0), "");
        child.style = WindowStyle::CHILD | WindowStyle::VISIBLE;
        child.parent = parent;
        child.rect = rect;
        table.windows.push(child);
        handle
    }

    /// Re-parents without going through the fallible `set_parent` path.
    pub fn force_parent(&self, window: WindowHandle, parent: WindowHandle) {
        if let Ok(entry) = lock(&self.table).get_mut(window) {
            entry.parent = parent;
        }
    }

    pub fn remove_window(&self, window: WindowHandle) {
        lock(&self.table).windows.retain(|entry| entry.handle != window);
    }
}

impl WindowApi for FakeWindows {
    fn top_level_windows(&self) -> Result<Vec<WindowHandle>> {
        let mut table = lock(&self.table);
        table.enumerations += 1;
        let seen = table.enumerations;
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut table.pending)
            .into_iter()
            .partition(|(after, _)| *after < seen);
        table.pending = waiting;
        table
            .windows
            .extend(ready.into_iter().map(|(_, window)| window));
        Ok(table
            .windows
            .iter()
            .filter(|entry| entry.parent.is_null())
            .map(|entry| entry.handle)
            .collect())
    }

    fn is_window(&self, window: WindowHandle) -> bool {
        lock(&self.table).get(window).is_ok()
    }

    fn is_visible(&self, window: WindowHandle) -> bool {
        lock(&self.table)
            .get(window)
            .is_ok_and(|entry| entry.visible)
    }

    fn window_text(&self, window: WindowHandle) -> String {
        lock(&self.table)
            .get(window)
            .map(|entry| entry.title.clone())
            .unwrap_or_default()
    }

    fn window_process_id(&self, window: WindowHandle) -> Option<ProcessId> {
        lock(&self.table).get(window).ok().map(|entry| entry.process_id)
    }

    fn style(&self, window: WindowHandle) -> Result<WindowStyle> {
        lock(&self.table).get(window).map(|entry| entry.style)
    }

    fn set_style(&self, window: WindowHandle, style: WindowStyle) -> Result<()> {
        lock(&self.table).get_mut(window)?.style = style;
        Ok(())
    }

    fn set_parent(&self, window: WindowHandle, parent: WindowHandle) -> Result<()> {
        let mut table = lock(&self.table);
        table.set_parent_calls += 1;
        if table.set_parent_failures > 0 {
            table.set_parent_failures -= 1;
            return Err(EmbedError::NativeCall {
                call: "SetParent",
                code: SET_PARENT_FAILURE_CODE,
            });
        }
        table.get_mut(window)?.parent = parent;
        Ok(())
    }

    fn window_rect(&self, window: WindowHandle) -> Result<Rect> {
        lock(&self.table).get(window).map(|entry| entry.rect)
    }

    fn client_rect(&self, window: WindowHandle) -> Result<Rect> {
        let table = lock(&self.table);
        let entry = table.get(window)?;
        let (left, top, right, bottom) = frame_for(entry.style);
        Ok(Rect::from_xywh(
            0,
            0,
            entry.rect.width() - left - right,
            entry.rect.height() - top - bottom,
        ))
    }

    fn adjust_window_rect(&self, client: Rect, style: WindowStyle) -> Result<Rect> {
        let (left, top, right, bottom) = frame_for(style);
        Ok(Rect {
            left: client.left - left,
            top: client.top - top,
            right: client.right + right,
            bottom: client.bottom + bottom,
        })
    }

    fn move_window(&self, window: WindowHandle, rect: Rect) -> Result<()> {
        lock(&self.table).get_mut(window)?.rect = rect;
        Ok(())
    }

    fn show_window(&self, window: WindowHandle, command: ShowCommand) -> Result<()> {
        let mut table = lock(&self.table);
        let entry = table.get_mut(window)?;
        entry.shown = Some(command);
        entry.visible = command != ShowCommand::Minimized;
        Ok(())
    }

    fn set_foreground(&self, window: WindowHandle) -> Result<()> {
        let mut table = lock(&self.table);
        table.get(window)?;
        table.foreground = Some(window);
        Ok(())
    }

    fn set_focus(&self, window: WindowHandle) -> Result<()> {
        let mut table = lock(&self.table);
        table.get(window)?;
        table.focused = Some(window);
        Ok(())
    }

    fn bring_to_top(&self, window: WindowHandle) -> Result<()> {
        let mut table = lock(&self.table);
        table.get(window)?;
        table.top = Some(window);
        Ok(())
    }

    fn capture(&self, window: WindowHandle, width: u32, height: u32) -> Result<Bitmap> {
        lock(&self.table).get(window)?;
        Ok(Bitmap::new(width, height))
    }
}

// ---------------------------------------------------------------------------
// Processes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ProcessState {
    exited: bool,
    killed: bool,
    refuses_close: bool,
    close_requests: usize,
    close_targets: Vec<WindowHandle>,
    /// Windows that accept a close request for this process.
    owned_windows: HashSet<WindowHandle>,
    scripted_windows: VecDeque<Option<MainWindow>>,
    last_window: Option<MainWindow>,
    main_window_queries: usize,
    fail_queries: bool,
    next_watch: u64,
    watchers: Vec<(u64, ExitCallback)>,
}

struct ProcessShared {
    id: ProcessId,
    state: Mutex<ProcessState>,
}

/// Scriptable process handle. Clones share state.
#[derive(Clone)]
pub struct FakeProcess {
    shared: Arc<ProcessShared>,
}

impl FakeProcess {
    pub fn new(id: ProcessId) -> Self {
        Self {
            shared: Arc::new(ProcessShared {
                id,
                state: Mutex::new(ProcessState::default()),
            }),
        }
    }

    /// Answers for successive `main_window` queries; the last answer repeats afterwards.
    pub fn script_main_windows(&self, answers: Vec<Option<MainWindow>>) {
        let mut state = lock(&self.shared.state);
        state
            .owned_windows
            .extend(answers.iter().flatten().map(|main| main.handle));
        state.scripted_windows = answers.into();
    }

    pub fn fail_main_window_queries(&self) {
        lock(&self.shared.state).fail_queries = true;
    }

    pub fn main_window_queries(&self) -> usize {
        lock(&self.shared.state).main_window_queries
    }

    /// Marks the process as exited without notifying exit watchers.
    pub fn set_exited(&self) {
        lock(&self.shared.state).exited = true;
    }

    /// Marks the process as exited and runs every registered exit watcher once.
    pub fn simulate_exit(&self) {
        let watchers = {
            let mut state = lock(&self.shared.state);
            state.exited = true;
            std::mem::take(&mut state.watchers)
        };
        for (_, on_exit) in watchers {
            on_exit();
        }
    }

    /// Makes `close_window` report that no close request could be delivered.
    pub fn refuse_close(&self) {
        lock(&self.shared.state).refuses_close = true;
    }

    pub fn close_requests(&self) -> usize {
        lock(&self.shared.state).close_requests
    }

    /// Windows that were asked to close, in order.
    pub fn close_targets(&self) -> Vec<WindowHandle> {
        lock(&self.shared.state).close_targets.clone()
    }

    pub fn was_killed(&self) -> bool {
        lock(&self.shared.state).killed
    }

    pub fn exit_watchers(&self) -> usize {
        lock(&self.shared.state).watchers.len()
    }
}

struct FakeExitRegistration {
    shared: Arc<ProcessShared>,
    id: u64,
}

impl ExitRegistration for FakeExitRegistration {
    fn unregister(&mut self) {
        lock(&self.shared.state)
            .watchers
            .retain(|(id, _)| *id != self.id);
    }
}

impl ExternalProcess for FakeProcess {
    fn id(&self) -> ProcessId {
        self.shared.id
    }

    fn has_exited(&self) -> bool {
        lock(&self.shared.state).exited
    }

    fn wait_for_input_idle(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn main_window(&self) -> Result<Option<MainWindow>> {
        let mut state = lock(&self.shared.state);
        state.main_window_queries += 1;
        if state.fail_queries {
            return Err(EmbedError::OperationFailed(
                "main window query failed".to_string(),
            ));
        }
        if let Some(next) = state.scripted_windows.pop_front() {
            state.last_window = next;
        }
        Ok(state.last_window.clone())
    }

    fn close_window(&self, window: WindowHandle) -> bool {
        let accepted = {
            let mut state = lock(&self.shared.state);
            state.close_requests += 1;
            state.close_targets.push(window);
            !state.refuses_close && state.owned_windows.contains(&window)
        };
        if accepted {
            self.simulate_exit();
        }
        accepted
    }

    fn kill(&self) -> Result<()> {
        lock(&self.shared.state).killed = true;
        self.simulate_exit();
        Ok(())
    }

    fn watch_exit(&self, on_exit: ExitCallback) -> Result<Box<dyn ExitRegistration>> {
        let mut state = lock(&self.shared.state);
        state.next_watch += 1;
        let id = state.next_watch;
        if state.exited {
            drop(state);
            on_exit();
        } else {
            state.watchers.push((id, on_exit));
        }
        Ok(Box::new(FakeExitRegistration {
            shared: Arc::clone(&self.shared),
            id,
        }))
    }
}

#[derive(Default)]
struct ProcessTableState {
    launches: HashMap<String, FakeProcess>,
    known: HashMap<ProcessId, FakeProcess>,
    launched: Vec<String>,
    table: Vec<ProcessEntry>,
    /// Table that replaces `table` once more than `n` queries have happened.
    pending_table: Option<(usize, Vec<ProcessEntry>)>,
    table_queries: usize,
    paths: HashMap<ProcessId, String>,
}

#[derive(Default)]
pub struct FakeProcesses {
    state: Mutex<ProcessTableState>,
}

impl FakeProcesses {
    pub fn new() -> Self {
        Self::default()
    }

    /// `spawn` of `command` yields `process`; any other command fails to launch.
    pub fn register_launch(&self, command: &str, process: FakeProcess) {
        let mut state = lock(&self.state);
        state.known.insert(process.id(), process.clone());
        state.launches.insert(command.to_string(), process);
    }

    /// Makes `process` available to `open`.
    pub fn add_process(&self, process: FakeProcess) {
        lock(&self.state).known.insert(process.id(), process);
    }

    pub fn set_table(&self, entries: Vec<ProcessEntry>) {
        lock(&self.state).table = entries;
    }

    pub fn set_table_after_queries(&self, queries: usize, entries: Vec<ProcessEntry>) {
        lock(&self.state).pending_table = Some((queries, entries));
    }

    pub fn table_queries(&self) -> usize {
        lock(&self.state).table_queries
    }

    pub fn set_executable_path(&self, process_id: ProcessId, path: &str) {
        lock(&self.state).paths.insert(process_id, path.to_string());
    }

    /// Commands passed to `spawn`, in order.
    pub fn launched_requests(&self) -> Vec<String> {
        lock(&self.state).launched.clone()
    }
}

impl ProcessApi for FakeProcesses {
    fn spawn(&self, request: &LaunchRequest) -> Result<Arc<dyn ExternalProcess>> {
        let mut state = lock(&self.state);
        state.launched.push(request.command.clone());
        match state.launches.get(&request.command) {
            Some(process) => Ok(Arc::new(process.clone())),
            None => Err(EmbedError::LaunchFailed(format!(
                "the system cannot find the file '{}'",
                request.command
            ))),
        }
    }

    fn open(&self, process_id: ProcessId) -> Result<Arc<dyn ExternalProcess>> {
        match lock(&self.state).known.get(&process_id) {
            Some(process) => Ok(Arc::new(process.clone())),
            None => Err(EmbedError::InvalidHandle(format!(
                "cannot open process {process_id}"
            ))),
        }
    }

    fn query_processes(&self, name: Option<&str>) -> Result<Vec<ProcessEntry>> {
        let mut state = lock(&self.state);
        state.table_queries += 1;
        let queries = state.table_queries;
        let ready = state
            .pending_table
            .as_ref()
            .is_some_and(|(after, _)| *after < queries);
        if ready && let Some((_, entries)) = state.pending_table.take() {
            state.table = entries;
        }
        Ok(state
            .table
            .iter()
            .filter(|entry| name.is_none_or(|wanted| name_matches(&entry.name, wanted)))
            .cloned()
            .collect())
    }

    fn executable_path(&self, process_id: ProcessId) -> Option<String> {
        lock(&self.state).paths.get(&process_id).cloned()
    }
}

// ---------------------------------------------------------------------------
// Event hooks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct HookTable {
    next_id: u64,
    hooks: Vec<(u64, ProcessId, TitleCallback)>,
}

#[derive(Default)]
pub struct FakeHooks {
    table: Arc<Mutex<HookTable>>,
}

impl FakeHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a name-change event for `window` to the hooks scoped to `process_id`.
    pub fn fire(&self, process_id: ProcessId, window: WindowHandle) {
        let callbacks: Vec<TitleCallback> = lock(&self.table)
            .hooks
            .iter()
            .filter(|(_, pid, _)| *pid == process_id)
            .map(|(_, _, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(window);
        }
    }

    pub fn active(&self) -> usize {
        lock(&self.table).hooks.len()
    }
}

struct FakeHookRegistration {
    table: Arc<Mutex<HookTable>>,
    id: u64,
}

impl HookRegistration for FakeHookRegistration {
    fn unhook(&mut self) {
        lock(&self.table).hooks.retain(|(id, _, _)| *id != self.id);
    }
}

impl EventHookApi for FakeHooks {
    fn hook_name_changes(
        &self,
        process_id: ProcessId,
        callback: TitleCallback,
    ) -> Result<Box<dyn HookRegistration>> {
        let mut table = lock(&self.table);
        table.next_id += 1;
        let id = table.next_id;
        table.hooks.push((id, process_id, callback));
        Ok(Box::new(FakeHookRegistration {
            table: Arc::clone(&self.table),
            id,
        }))
    }
}

// ---------------------------------------------------------------------------
// Embedding helper
// ---------------------------------------------------------------------------

#[derive(Default)]
struct HelperCounters {
    init_calls: usize,
    shutdown_calls: usize,
    created: usize,
}

/// Container helper backed by `FakeWindows`.
pub struct FakeHelper {
    windows: Arc<FakeWindows>,
    counters: Mutex<HelperCounters>,
}

impl FakeHelper {
    pub fn new(windows: Arc<FakeWindows>) -> Self {
        Self {
            windows,
            counters: Mutex::new(HelperCounters::default()),
        }
    }

    pub fn created_count(&self) -> usize {
        lock(&self.counters).created
    }

    pub fn init_calls(&self) -> usize {
        lock(&self.counters).init_calls
    }

    pub fn shutdown_calls(&self) -> usize {
        lock(&self.counters).shutdown_calls
    }
}

impl EmbeddingHelper for FakeHelper {
    fn initialize(&self) -> Result<()> {
        lock(&self.counters).init_calls += 1;
        Ok(())
    }

    fn shutdown(&self) {
        lock(&self.counters).shutdown_calls += 1;
    }

    fn create_container(
        &self,
        parent: WindowHandle,
        child: WindowHandle,
        width: i32,
        height: i32,
    ) -> Result<WindowHandle> {
        let container = self
            .windows
            .create_child(parent, Rect::from_xywh(0, 0, width, height));
        self.windows.force_parent(child, container);
        lock(&self.counters).created += 1;
        Ok(container)
    }

    fn destroy_container(
        &self,
        container: WindowHandle,
        child: WindowHandle,
    ) -> Result<WindowHandle> {
        self.windows.force_parent(child, WindowHandle::NULL);
        self.windows.remove_window(container);
        Ok(child)
    }
}

// ---------------------------------------------------------------------------
// UI thread
// ---------------------------------------------------------------------------

/// Dispatcher whose owner thread is every thread: work runs immediately.
pub struct InlineDispatcher;

impl UiDispatcher for InlineDispatcher {
    fn is_owner_thread(&self) -> bool {
        true
    }

    fn post(&self, work: WorkItem) -> Result<()> {
        work();
        Ok(())
    }
}

/// Dispatcher owned by the creating thread; queued work runs when that thread pumps.
pub struct QueueDispatcher {
    owner: ThreadId,
    queue: Mutex<VecDeque<WorkItem>>,
}

impl QueueDispatcher {
    pub fn for_current_thread() -> Self {
        Self {
            owner: thread::current().id(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Runs queued work, including work queued meanwhile, until the queue is empty.
    pub fn pump(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = lock(&self.queue).pop_front();
            match next {
                Some(work) => {
                    work();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    pub fn discard_pending(&self) {
        let dropped: Vec<WorkItem> = lock(&self.queue).drain(..).collect();
        drop(dropped);
    }
}

impl UiDispatcher for QueueDispatcher {
    fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn post(&self, work: WorkItem) -> Result<()> {
        lock(&self.queue).push_back(work);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Event handler
// ---------------------------------------------------------------------------

/// Records every event and answers manual-selection queries with `query_answer`.
#[derive(Default)]
pub struct RecordingHandler {
    pub events: Vec<HostEvent>,
    pub query_answer: Option<WindowHandle>,
    pub queried: Vec<Vec<ProcessWindowInfo>>,
}

impl HostEventHandler for RecordingHandler {
    fn handle_event(&mut self, event: HostEvent) {
        self.events.push(event);
    }

    fn query_window(&mut self, candidates: &[ProcessWindowInfo]) -> Option<WindowHandle> {
        self.queried.push(candidates.to_vec());
        self.query_answer
    }
}
