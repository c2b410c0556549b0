/*
 * Error vocabulary shared by the whole crate. Every fallible operation returns
 * `Result<T>` so the launch/find/embed chain can short-circuit with `?` and the
 * host control can attach the originating error to its `ApplicationClosed`
 * notification. The error is `Clone` because it travels inside that event.
 */
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedError {
    /// The OS refused to create the process, or it never produced a usable main window.
    LaunchFailed(String),
    /// No process matched the tracking criteria within the wait budget.
    ProcessNotFound(String),
    /// No window satisfied the title/skip criteria and manual selection did not resolve one.
    MissingWindow(String),
    /// Re-parenting failed on every attempt; `code` is the last native error.
    ReparentFailed { attempts: u32, code: u32 },
    /// A single native call failed with the given error code.
    NativeCall { call: &'static str, code: u32 },
    OperationFailed(String),
    InvalidHandle(String),
    InvalidState(String),
    InvalidConfiguration(String),
    /// The embedding helper was used before `initialize` or after `shutdown`.
    NotInitialized(String),
    Cancelled,
}

impl EmbedError {
    /// Native error code carried by this error, if any.
    pub fn native_code(&self) -> Option<u32> {
        match self {
            EmbedError::ReparentFailed { code, .. } | EmbedError::NativeCall { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EmbedError::Cancelled)
    }
}

impl fmt::Display for EmbedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbedError::LaunchFailed(msg) => write!(f, "Launch failed: {msg}"),
            EmbedError::ProcessNotFound(msg) => write!(f, "Process not found: {msg}"),
            EmbedError::MissingWindow(msg) => write!(f, "Missing window: {msg}"),
            EmbedError::ReparentFailed { attempts, code } => write!(
                f,
                "Re-parenting failed after {attempts} attempts (last error code {code})"
            ),
            EmbedError::NativeCall { call, code } => {
                write!(f, "Native call {call} failed with error code {code}")
            }
            EmbedError::OperationFailed(msg) => write!(f, "Operation failed: {msg}"),
            EmbedError::InvalidHandle(msg) => write!(f, "Invalid handle: {msg}"),
            EmbedError::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
            EmbedError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {msg}"),
            EmbedError::NotInitialized(msg) => write!(f, "Not initialized: {msg}"),
            EmbedError::Cancelled => write!(f, "Operation was cancelled"),
        }
    }
}

impl std::error::Error for EmbedError {}

#[cfg(target_os = "windows")]
impl From<windows::core::Error> for EmbedError {
    fn from(err: windows::core::Error) -> Self {
        EmbedError::OperationFailed(format!("{err} ({:?})", err.code()))
    }
}

pub type Result<T> = std::result::Result<T, EmbedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_code_is_exposed_for_native_failures_only() {
        assert_eq!(
            EmbedError::ReparentFailed {
                attempts: 11,
                code: 5
            }
            .native_code(),
            Some(5)
        );
        assert_eq!(
            EmbedError::NativeCall {
                call: "SetWindowLongPtrW",
                code: 1400
            }
            .native_code(),
            Some(1400)
        );
        assert_eq!(EmbedError::Cancelled.native_code(), None);
    }

    #[test]
    fn display_mentions_attempts_and_code() {
        let text = EmbedError::ReparentFailed {
            attempts: 11,
            code: 5,
        }
        .to_string();
        assert!(text.contains("11"));
        assert!(text.contains('5'));
    }
}
