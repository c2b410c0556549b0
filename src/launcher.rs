/*
 * Starts the external process described by a configuration and waits until
 * it exposes a usable main window.
 *
 * `build_launch_request` is a pure translation of the configuration into
 * process-creation parameters; the native side (`ProcessApi::spawn`) only
 * executes it. `start_process` then waits for input idle (best effort) and
 * polls the main window until one with a real title appears, the process
 * exits, the time budget runs out, or the caller cancels.
 */
use crate::config::{ExternalAppConfiguration, SecretString};
use crate::error::{EmbedError, Result};
use crate::platform::{ExternalProcess, ProcessApi};
use crate::polling::{CancellationToken, PollTiming, poll_budget};
use crate::types::{ShowCommand, WindowHandle};

use std::path::PathBuf;
use std::sync::Arc;

/// Title reported for the input-method helper window before the real main window exists.
pub const PLACEHOLDER_WINDOW_TITLE: &str = "Default IME";

/// Verb used to request elevation through the shell.
pub const RUN_AS_VERB: &str = "runas";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    /// Let the shell start the command, optionally with a verb such as `runas`.
    ShellExecute { verb: Option<&'static str> },
    /// Start directly under alternate credentials; no shell involvement.
    WithLogon {
        username: String,
        domain: Option<String>,
        password: SecretString,
        load_user_profile: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub command: String,
    pub arguments: Option<String>,
    pub working_directory: PathBuf,
    pub show: ShowCommand,
    /// Ask the process not to create a console window.
    pub create_no_window: bool,
    pub mode: LaunchMode,
}

/*
 * Elevation wins over credentials: elevation goes through the shell with the
 * `runas` verb, whereas alternate credentials bypass the shell and log on
 * with the supplied identity.
 */
pub fn build_launch_request(config: &ExternalAppConfiguration) -> LaunchRequest {
    let hidden = config.launches_hidden();
    let mode = if config.run_elevated {
        LaunchMode::ShellExecute {
            verb: Some(RUN_AS_VERB),
        }
    } else if let Some(credentials) = &config.credentials {
        LaunchMode::WithLogon {
            username: credentials.username.clone(),
            domain: credentials.domain.clone(),
            password: credentials.password.clone(),
            load_user_profile: config.load_user_profile,
        }
    } else {
        LaunchMode::ShellExecute { verb: None }
    };

    LaunchRequest {
        command: config.command.clone(),
        arguments: config.arguments.clone().filter(|a| !a.is_empty()),
        working_directory: config
            .working_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from(".")),
        show: if hidden {
            ShowCommand::Minimized
        } else {
            ShowCommand::Normal
        },
        create_no_window: hidden,
        mode,
    }
}

/// A started process together with the main window it exposed.
#[derive(Clone)]
pub struct LaunchedProcess {
    pub process: Arc<dyn ExternalProcess>,
    pub main_window: WindowHandle,
}

fn is_usable_title(title: &str) -> bool {
    title != PLACEHOLDER_WINDOW_TITLE
}

pub fn start_process(
    processes: &dyn ProcessApi,
    config: &ExternalAppConfiguration,
    timing: &PollTiming,
    cancel: &CancellationToken,
) -> Result<LaunchedProcess> {
    cancel.check()?;
    let request = build_launch_request(config);
    log::debug!(
        "Launcher: starting '{}' (mode: {}, show: {:?}).",
        request.command,
        match &request.mode {
            LaunchMode::ShellExecute { verb: Some(verb) } => *verb,
            LaunchMode::ShellExecute { verb: None } => "shell",
            LaunchMode::WithLogon { .. } => "logon",
        },
        request.show
    );

    let process = processes.spawn(&request).map_err(|err| match err {
        EmbedError::LaunchFailed(_) => err,
        other => EmbedError::LaunchFailed(format!("cannot start '{}': {other}", request.command)),
    })?;
    drop(request);

    // Some interpreters (PowerShell among them) refuse this wait; the window poll covers it.
    if let Err(err) = process.wait_for_input_idle(timing.input_idle_timeout) {
        log::debug!(
            "Launcher: waiting for input idle of process {} failed: {err}",
            process.id()
        );
    }

    if process.has_exited() {
        return Err(EmbedError::LaunchFailed(format!(
            "process {} is not running anymore",
            process.id()
        )));
    }

    let budget = poll_budget(config.max_wait_secs);
    for attempt in 1..=budget {
        cancel.check()?;
        cancel.sleep(timing.poll_interval)?;

        if process.has_exited() {
            return Err(EmbedError::LaunchFailed(format!(
                "process {} exited before showing a main window",
                process.id()
            )));
        }

        let main_window = process.main_window().map_err(|err| {
            EmbedError::LaunchFailed(format!(
                "querying the main window of process {} failed: {err}",
                process.id()
            ))
        })?;

        match main_window {
            Some(window) if !window.handle.is_null() && is_usable_title(&window.title) => {
                log::debug!(
                    "Launcher: process {} exposed main window {} '{}' after {attempt} polls.",
                    process.id(),
                    window.handle,
                    window.title
                );
                return Ok(LaunchedProcess {
                    process,
                    main_window: window.handle,
                });
            }
            other => {
                log::trace!(
                    "Launcher: poll {attempt}/{budget} for process {}: {other:?}",
                    process.id()
                );
            }
        }
    }

    Err(EmbedError::LaunchFailed(format!(
        "process {} did not show a usable main window within {} seconds",
        process.id(),
        config.max_wait_secs
    )))
}
