/*
 * Finds the top-level window of a process by title. Enumeration considers
 * visible windows with a non-empty title only. Title matching is a
 * case-sensitive substring test; the first `skip` distinct matching windows
 * are passed over so that splash screens and transient dialogs sharing the
 * title fragment are not embedded by accident.
 *
 * The skip count persists across re-enumeration passes: a window skipped on
 * one pass stays skipped on later passes and is not counted twice.
 */
use crate::error::{EmbedError, Result};
use crate::platform::{ExternalProcess, ProcessApi, WindowApi};
use crate::polling::{CancellationToken, PollTiming, poll_budget};
use crate::types::{ProcessId, ProcessWindowInfo, WindowHandle};

use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Executable path reported when the owning process cannot be inspected.
pub const UNKNOWN_EXECUTABLE: &str = "n/a";

struct TitledWindow {
    window: WindowHandle,
    process_id: ProcessId,
    title: String,
}

fn titled_windows(windows: &dyn WindowApi) -> Result<Vec<TitledWindow>> {
    let mut found = Vec::new();
    for window in windows.top_level_windows()? {
        if !windows.is_visible(window) {
            continue;
        }
        let title = windows.window_text(window);
        if title.is_empty() {
            continue;
        }
        let Some(process_id) = windows.window_process_id(window) else {
            continue;
        };
        found.push(TitledWindow {
            window,
            process_id,
            title,
        });
    }
    Ok(found)
}

fn executable_path_of(processes: &dyn ProcessApi, process_id: ProcessId) -> String {
    processes
        .executable_path(process_id)
        .unwrap_or_else(|| UNKNOWN_EXECUTABLE.to_string())
}

/// Snapshot of every visible, titled top-level window with its owning process.
pub fn enumerate_process_windows(
    windows: &dyn WindowApi,
    processes: &dyn ProcessApi,
) -> Result<Vec<ProcessWindowInfo>> {
    let mut paths: HashMap<ProcessId, String> = HashMap::new();
    let infos = titled_windows(windows)?
        .into_iter()
        .map(|entry| ProcessWindowInfo {
            executable_path: paths
                .entry(entry.process_id)
                .or_insert_with(|| executable_path_of(processes, entry.process_id))
                .clone(),
            process_id: entry.process_id,
            window: entry.window,
            title: entry.title,
        })
        .collect::<Vec<_>>();
    log::trace!("WindowFinder: enumerated {} titled windows.", infos.len());
    Ok(infos)
}

/// Title predicate with skip bookkeeping that survives re-enumeration.
#[derive(Debug, Clone)]
pub struct TitleMatcher {
    fragment: String,
    skip: u32,
    skipped: HashSet<WindowHandle>,
}

impl TitleMatcher {
    pub fn new(fragment: impl Into<String>, skip: u32) -> Self {
        Self {
            fragment: fragment.into(),
            skip,
            skipped: HashSet::new(),
        }
    }

    /// Number of distinct matching windows passed over so far.
    pub fn skipped(&self) -> usize {
        self.skipped.len()
    }

    /// Returns true for the first matching window beyond the skip count.
    pub fn accept(&mut self, window: WindowHandle, title: &str) -> bool {
        if !title.contains(self.fragment.as_str()) || self.skipped.contains(&window) {
            return false;
        }
        if self.skipped.len() < self.skip as usize {
            log::debug!("WindowFinder: skipping matching window {window} '{title}'.");
            self.skipped.insert(window);
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowQuery {
    pub title_match: String,
    pub skip: u32,
    pub min_wait_secs: u32,
    pub max_wait_secs: u32,
}

/*
 * Polls the window list until a non-skipped match owned by `process` shows
 * up. Returns `Ok(None)` when the budget runs out or the process exits, so
 * the caller can escalate to manual selection.
 */
pub fn find_window(
    windows: &dyn WindowApi,
    processes: &dyn ProcessApi,
    process: &dyn ExternalProcess,
    query: &WindowQuery,
    timing: &PollTiming,
    cancel: &CancellationToken,
) -> Result<Option<ProcessWindowInfo>> {
    let process_id = process.id();
    log::debug!(
        "WindowFinder: looking for '{}' (skip {}) in process {process_id}.",
        query.title_match,
        query.skip
    );
    cancel.sleep(Duration::from_secs(query.min_wait_secs as u64))?;

    let mut matcher = TitleMatcher::new(query.title_match.clone(), query.skip);
    let budget = poll_budget(query.max_wait_secs);
    for attempt in 1..=budget {
        cancel.check()?;
        cancel.sleep(timing.poll_interval)?;

        let found = titled_windows(windows)?
            .into_iter()
            .filter(|entry| entry.process_id == process_id)
            .find(|entry| matcher.accept(entry.window, &entry.title));
        if let Some(entry) = found {
            log::debug!(
                "WindowFinder: found window {} '{}' on attempt {attempt}.",
                entry.window,
                entry.title
            );
            return Ok(Some(ProcessWindowInfo {
                executable_path: executable_path_of(processes, process_id),
                process_id,
                window: entry.window,
                title: entry.title,
            }));
        }

        if process.has_exited() {
            log::debug!("WindowFinder: process {process_id} exited while searching.");
            break;
        }
    }

    log::debug!(
        "WindowFinder: no window matched '{}' ({} skipped).",
        query.title_match,
        matcher.skipped()
    );
    Ok(None)
}

/*
 * Validates a handle chosen through manual selection against a fresh
 * enumeration. A handle that is gone (or was never a visible, titled
 * top-level window) is a hard failure.
 */
pub fn resolve_manual_selection(
    selected: WindowHandle,
    fresh: &[ProcessWindowInfo],
) -> Result<ProcessWindowInfo> {
    fresh
        .iter()
        .find(|info| info.window == selected)
        .cloned()
        .ok_or_else(|| {
            EmbedError::MissingWindow(format!(
                "selected window {selected} is not among the current top-level windows"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeProcess, FakeProcesses, FakeWindows};

    fn query(title: &str, skip: u32) -> WindowQuery {
        WindowQuery {
            title_match: title.into(),
            skip,
            min_wait_secs: 0,
            max_wait_secs: 1,
        }
    }

    #[test]
    fn matcher_skips_distinct_windows_once() {
        let mut matcher = TitleMatcher::new("Command Prompt", 1);
        assert!(!matcher.accept(WindowHandle(1), "Command Prompt"));
        // Same window seen on a later pass is not counted again.
        assert!(!matcher.accept(WindowHandle(1), "Command Prompt"));
        assert!(matcher.accept(WindowHandle(2), "Administrator: Command Prompt"));
        assert_eq!(matcher.skipped(), 1);
    }

    #[test]
    fn matcher_is_case_sensitive() {
        let mut matcher = TitleMatcher::new("Notepad", 0);
        assert!(!matcher.accept(WindowHandle(1), "notepad"));
        assert!(matcher.accept(WindowHandle(1), "Untitled - Notepad"));
    }

    #[test]
    fn enumeration_skips_hidden_and_untitled_windows() {
        // Arrange
        let windows = FakeWindows::new();
        let processes = FakeProcesses::new();
        windows.add_window(WindowHandle(1), ProcessId(7), "Visible");
        windows.add_window(WindowHandle(2), ProcessId(7), "");
        windows.add_window(WindowHandle(3), ProcessId(8), "Hidden");
        windows.set_visible(WindowHandle(3), false);
        processes.set_executable_path(ProcessId(7), r"C:\Windows\notepad.exe");
        // Act
        let infos = enumerate_process_windows(&windows, &processes).unwrap();
        // Assert
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].window, WindowHandle(1));
        assert_eq!(infos[0].executable_path, r"C:\Windows\notepad.exe");
    }

    #[test]
    fn inaccessible_executable_path_is_reported_as_unknown() {
        let windows = FakeWindows::new();
        let processes = FakeProcesses::new();
        windows.add_window(WindowHandle(4), ProcessId(4), "System");
        let infos = enumerate_process_windows(&windows, &processes).unwrap();
        assert_eq!(infos[0].executable_path, UNKNOWN_EXECUTABLE);
    }

    #[test]
    fn skip_one_returns_second_match_in_enumeration_order() {
        // Arrange
        let windows = FakeWindows::new();
        let processes = FakeProcesses::new();
        let cmd = FakeProcess::new(ProcessId(30));
        windows.add_window(WindowHandle(0x10), ProcessId(30), "Command Prompt");
        windows.add_window(WindowHandle(0x11), ProcessId(99), "Command Prompt");
        windows.add_window(WindowHandle(0x12), ProcessId(30), "Command Prompt - ping");
        // Act
        let found = find_window(
            &windows,
            &processes,
            &cmd,
            &query("Command Prompt", 1),
            &PollTiming::immediate(),
            &CancellationToken::new(),
        )
        .unwrap();
        // Assert
        assert_eq!(found.map(|info| info.window), Some(WindowHandle(0x12)));
    }

    #[test]
    fn skipped_window_stays_skipped_across_passes() {
        let windows = FakeWindows::new();
        let processes = FakeProcesses::new();
        let app = FakeProcess::new(ProcessId(31));
        windows.add_window(WindowHandle(0x20), ProcessId(31), "App - Loading");
        windows.add_window_after_enumerations(2, WindowHandle(0x21), ProcessId(31), "App - Main");
        let found = find_window(
            &windows,
            &processes,
            &app,
            &query("App", 1),
            &PollTiming::immediate(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(found.map(|info| info.window), Some(WindowHandle(0x21)));
    }

    #[test]
    fn search_stops_when_process_exits() {
        let windows = FakeWindows::new();
        let processes = FakeProcesses::new();
        let app = FakeProcess::new(ProcessId(32));
        app.set_exited();
        let found = find_window(
            &windows,
            &processes,
            &app,
            &query("Anything", 0),
            &PollTiming::immediate(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(found, None);
        assert_eq!(windows.enumerations(), 1);
    }

    #[test]
    fn manual_selection_must_appear_in_fresh_enumeration() {
        let fresh = vec![ProcessWindowInfo {
            process_id: ProcessId(5),
            executable_path: UNKNOWN_EXECUTABLE.into(),
            window: WindowHandle(0x40),
            title: "Picked".into(),
        }];
        assert_eq!(
            resolve_manual_selection(WindowHandle(0x40), &fresh)
                .unwrap()
                .process_id,
            ProcessId(5)
        );
        assert!(matches!(
            resolve_manual_selection(WindowHandle(0x41), &fresh),
            Err(EmbedError::MissingWindow(_))
        ));
    }
}
