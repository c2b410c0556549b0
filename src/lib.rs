/*
 * Public entry point of the extapphost crate: embeds the main window of an
 * external process inside a host window, keeps it sized, focused and
 * activated with the host, and reports when the process goes away.
 *
 * The state machine (launching or adopting a process, finding its window,
 * re-parenting, lifecycle monitoring) is portable and talks to the OS only
 * through the traits in `platform`. The Win32 implementations of those traits
 * and the host container window are compiled on Windows only, so other
 * targets can still build and test the core logic against fakes.
 */
pub mod config;
pub mod embedding;
pub mod error;
pub mod host;
pub mod launcher;
pub mod lifecycle;
pub mod platform;
pub mod polling;
pub mod process_finder;
pub mod process_table;
pub mod running_app;
pub mod subsystem;
pub mod types;
#[cfg(target_os = "windows")]
pub mod win32;
#[cfg(target_os = "windows")]
pub mod window_common;
pub mod window_finder;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{Credentials, ExternalAppConfiguration, SecretString};
pub use error::{EmbedError, Result};
pub use host::{HostControl, HostWindowListener, SharedEventHandler, StartTask};
pub use platform::{Platform, UiDispatcher};
pub use polling::{CancellationToken, PollTiming};
pub use subsystem::{EmbeddingSubsystem, SubsystemState};
pub use types::{
    ApplicationClosedInfo, ApplicationState, Bitmap, EmbedMethod, HostEvent, HostEventHandler,
    ProcessId, ProcessWindowInfo, Rect, WindowHandle, WindowStyle,
};
#[cfg(target_os = "windows")]
pub use win32::{NativeEmbeddingHelper, native_platform};
#[cfg(target_os = "windows")]
pub use window_common::{HostWindow, create_host_control, create_host_window};
