/*
 * Platform-agnostic vocabulary of the crate: handles, identifiers, window
 * style bits, geometry, snapshots produced by window enumeration, and the
 * event contract through which the host shell observes an embedded app.
 *
 * Nothing here touches Win32 so the state machine built on top of these types
 * compiles and is unit-tested on every platform.
 */
use crate::error::EmbedError;

use std::fmt;

/// Opaque native window handle. The zero value is the null/desktop handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct WindowHandle(pub isize);

impl WindowHandle {
    pub const NULL: WindowHandle = WindowHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn raw(self) -> isize {
        self.0
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl ProcessId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one running application: `Stopped -> Starting -> Running -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplicationState {
    #[default]
    Stopped,
    Starting,
    Running,
}

impl ApplicationState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ApplicationState) -> bool {
        matches!(
            (self, next),
            (ApplicationState::Stopped, ApplicationState::Starting)
                | (ApplicationState::Starting, ApplicationState::Running)
                | (ApplicationState::Starting, ApplicationState::Stopped)
                | (ApplicationState::Running, ApplicationState::Stopped)
        )
    }
}

/// How the external window is placed inside the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedMethod {
    /// An external helper wraps the untouched window in a container window.
    /// Keyboard and focus behave closer to native; the host has less layout control.
    Window,
    /// The window itself is re-styled as a child and re-parented into the host.
    #[default]
    Control,
}

/// Win32 `GWL_STYLE` bits. Only the flags the embedding protocol reasons about are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WindowStyle(pub u32);

impl WindowStyle {
    pub const TABSTOP: WindowStyle = WindowStyle(0x0001_0000);
    pub const GROUP: WindowStyle = WindowStyle(0x0002_0000);
    pub const THICKFRAME: WindowStyle = WindowStyle(0x0004_0000);
    pub const SYSMENU: WindowStyle = WindowStyle(0x0008_0000);
    pub const BORDER: WindowStyle = WindowStyle(0x0080_0000);
    pub const CAPTION: WindowStyle = WindowStyle(0x00C0_0000);
    pub const DISABLED: WindowStyle = WindowStyle(0x0800_0000);
    pub const VISIBLE: WindowStyle = WindowStyle(0x1000_0000);
    pub const CHILD: WindowStyle = WindowStyle(0x4000_0000);
    pub const POPUP: WindowStyle = WindowStyle(0x8000_0000);
    pub const OVERLAPPEDWINDOW: WindowStyle = WindowStyle(0x00CF_0000);

    pub fn contains(self, flags: WindowStyle) -> bool {
        self.0 & flags.0 == flags.0
    }

    pub fn with(self, flags: WindowStyle) -> WindowStyle {
        WindowStyle(self.0 | flags.0)
    }

    pub fn without(self, flags: WindowStyle) -> WindowStyle {
        WindowStyle(self.0 & !flags.0)
    }
}

impl std::ops::BitOr for WindowStyle {
    type Output = WindowStyle;

    fn bitor(self, rhs: WindowStyle) -> WindowStyle {
        WindowStyle(self.0 | rhs.0)
    }
}

/// Rectangle in left/top/right/bottom form, matching the native `RECT` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            left: x,
            top: y,
            right: x.saturating_add(width),
            bottom: y.saturating_add(height),
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// True when the rectangle has no visible area.
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

/// Show commands the core needs from the window manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowCommand {
    Normal,
    Default,
    Maximized,
    Minimized,
}

/// Snapshot of one visible, titled top-level window. Not kept up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessWindowInfo {
    pub process_id: ProcessId,
    pub executable_path: String,
    pub window: WindowHandle,
    pub title: String,
}

/// One row of the OS process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub process_id: ProcessId,
    pub name: String,
    pub command_line: String,
}

/// The main window a process currently exposes, with its title at the time of the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainWindow {
    pub handle: WindowHandle,
    pub title: String,
}

/// Captured window contents, 32 bits per pixel in BGRA order, top-down rows.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Details delivered with `HostEvent::ApplicationClosed`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplicationClosedInfo {
    /// The host asked for the close through `close_application`.
    pub user_initiated: bool,
    /// The external process has exited.
    pub process_exited: bool,
    /// The failure that ended the application, if any.
    pub error: Option<EmbedError>,
}

impl ApplicationClosedInfo {
    pub fn from_error(error: EmbedError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Notifications raised by a `HostControl`. Always delivered on the host's UI thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    ApplicationStarted,
    ApplicationClosed(ApplicationClosedInfo),
    /// The embedded area received an activation-class input message.
    ApplicationActivated,
    WindowTitleChanged { caption: String },
}

/*
 * Observer contract between a `HostControl` and the shell hosting it.
 * `query_window` is the escalation path used when no window matched the
 * configured title criteria: the shell may offer the candidates to the user
 * and return the handle to embed, or `None` to give up.
 */
pub trait HostEventHandler: Send {
    fn handle_event(&mut self, event: HostEvent);

    fn query_window(&mut self, _candidates: &[ProcessWindowInfo]) -> Option<WindowHandle> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_allows_only_documented_transitions() {
        use ApplicationState::*;
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Starting.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Stopped));

        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Starting.can_transition_to(Starting));
        assert!(!Stopped.can_transition_to(Stopped));
    }

    #[test]
    fn style_helpers_add_and_remove_flags() {
        let style = WindowStyle::OVERLAPPEDWINDOW | WindowStyle::TABSTOP;
        assert!(style.contains(WindowStyle::CAPTION));
        let cleared = style.without(WindowStyle::TABSTOP);
        assert!(!cleared.contains(WindowStyle::TABSTOP));
        assert!(cleared.with(WindowStyle::CHILD).contains(WindowStyle::CHILD));
    }

    #[test]
    fn degenerate_rects_have_no_area() {
        assert!(Rect::from_xywh(10, 10, 0, 50).is_degenerate());
        assert!(Rect::from_xywh(10, 10, 50, 0).is_degenerate());
        let rect = Rect::from_xywh(10, 20, 30, 40);
        assert!(!rect.is_degenerate());
        assert_eq!(rect.right, 40);
        assert_eq!(rect.bottom, 60);
    }

    #[test]
    fn rect_edges_saturate_near_coordinate_limits() {
        let rect = Rect::from_xywh(i32::MAX - 1, i32::MAX - 5, 10, 10);
        assert_eq!(rect.right, i32::MAX);
        assert_eq!(rect.bottom, i32::MAX);
        assert_eq!(rect.width(), 1);
    }

    #[test]
    fn bitmap_allocates_four_bytes_per_pixel() {
        let bmp = Bitmap::new(3, 2);
        assert_eq!(bmp.pixels.len(), 24);
    }
}
