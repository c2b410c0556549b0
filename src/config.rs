/*
 * Caller-supplied configuration for one external application, plus the
 * secret-handling helpers used when the process is started under alternate
 * credentials. The configuration is cloned into the running application when
 * a start begins and never mutated afterwards.
 */
use crate::error::{EmbedError, Result};
use crate::types::EmbedMethod;

use std::fmt;
use std::path::PathBuf;

/// Overwrites a buffer with zeros in a way the optimizer may not elide.
fn wipe<T: Copy + Default>(buffer: &mut [T]) {
    for slot in buffer.iter_mut() {
        // SAFETY: `slot` is a valid, aligned, exclusive reference into the slice.
        unsafe { std::ptr::write_volatile(slot, T::default()) };
    }
    std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
}

/// A password held in memory only as long as needed; zeroed on drop and never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Converts to a NUL-terminated UTF-16 buffer for native APIs.
    pub fn to_wide(&self) -> SecretWide {
        let mut wide: Vec<u16> = self.0.encode_utf16().collect();
        wide.push(0);
        SecretWide(wide)
    }
}

impl Drop for SecretString {
    fn drop(&mut self) {
        // SAFETY: zero bytes are valid UTF-8, so the string stays well-formed.
        let bytes = unsafe { self.0.as_bytes_mut() };
        wipe(bytes);
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

/// NUL-terminated UTF-16 copy of a secret, zeroed on drop.
pub struct SecretWide(Vec<u16>);

impl SecretWide {
    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }

    pub fn as_ptr(&self) -> *const u16 {
        self.0.as_ptr()
    }

    /// Length in bytes, including the terminator.
    pub fn byte_len(&self) -> usize {
        self.0.len() * std::mem::size_of::<u16>()
    }
}

impl Drop for SecretWide {
    fn drop(&mut self) {
        wipe(&mut self.0);
    }
}

impl fmt::Debug for SecretWide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretWide(***)")
    }
}

/// Alternate identity used to start the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub domain: Option<String>,
    pub password: SecretString,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAppConfiguration {
    /// Executable (or document) to start.
    pub command: String,
    pub arguments: Option<String>,
    /// Working directory; the current directory when unset.
    pub working_directory: Option<PathBuf>,
    pub run_elevated: bool,
    /// Start under another identity. Ignored when `run_elevated` is set.
    pub credentials: Option<Credentials>,
    /// Load the user profile of the alternate identity.
    pub load_user_profile: bool,
    /// Exact process name of the real target when the started process is only a stub.
    pub process_name_to_track: Option<String>,
    /// Case-insensitive command-line fragment identifying the real target process.
    pub command_line_match: Option<String>,
    /// Seconds to wait before looking for a tracked process or window.
    pub min_wait_secs: u32,
    /// Upper bound, in seconds, for every wait step.
    pub max_wait_secs: u32,
    pub start_hidden: bool,
    /// Start the process but leave its window outside the host.
    pub start_external: bool,
    /// Do not start anything; adopt an already running process found by name or command line.
    pub use_existing_process: bool,
    /// Substring the target window's title must contain.
    pub window_title_match: Option<String>,
    /// Number of matching windows to pass over before accepting one.
    pub window_title_match_skip: u32,
    /// Terminate the process instead of asking its main window to close.
    pub kill_on_close: bool,
    pub embed_method: EmbedMethod,
}

impl Default for ExternalAppConfiguration {
    fn default() -> Self {
        Self {
            command: String::new(),
            arguments: None,
            working_directory: None,
            run_elevated: false,
            credentials: None,
            load_user_profile: false,
            process_name_to_track: None,
            command_line_match: None,
            min_wait_secs: 0,
            max_wait_secs: 10,
            start_hidden: true,
            start_external: false,
            use_existing_process: false,
            window_title_match: None,
            window_title_match_skip: 0,
            kill_on_close: false,
            embed_method: EmbedMethod::default(),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl ExternalAppConfiguration {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn tracked_process_name(&self) -> Option<&str> {
        non_blank(&self.process_name_to_track)
    }

    pub fn tracked_command_line(&self) -> Option<&str> {
        non_blank(&self.command_line_match)
    }

    /// The title fragment, when window matching is configured. Not trimmed: spaces may matter.
    pub fn title_match(&self) -> Option<&str> {
        self.window_title_match.as_deref().filter(|s| !s.is_empty())
    }

    /// Whether the process should be asked to start without showing its window.
    pub fn launches_hidden(&self) -> bool {
        self.start_hidden && !self.start_external
    }

    /*
     * Rejects configurations that can never produce a running application.
     * Called by `HostControl::start` before any state changes so a bad
     * configuration fails fast without touching the OS.
     */
    pub fn validate(&self) -> Result<()> {
        if !self.use_existing_process && self.command.trim().is_empty() {
            return Err(EmbedError::InvalidConfiguration(
                "a command is required unless an existing process is used".to_string(),
            ));
        }
        if self.use_existing_process
            && self.tracked_process_name().is_none()
            && self.tracked_command_line().is_none()
        {
            return Err(EmbedError::InvalidConfiguration(
                "using an existing process requires a process name or command line match"
                    .to_string(),
            ));
        }
        if self.min_wait_secs > self.max_wait_secs {
            return Err(EmbedError::InvalidConfiguration(format!(
                "min wait ({}s) exceeds max wait ({}s)",
                self.min_wait_secs, self.max_wait_secs
            )));
        }
        if let Some(credentials) = &self.credentials
            && !self.run_elevated
            && credentials.username.trim().is_empty()
        {
            return Err(EmbedError::InvalidConfiguration(
                "alternate credentials require a username".to_string(),
            ));
        }
        Ok(())
    }
}
