//! Provider callbacks the input engine consumes
//!
//! Each presentation source registers an [`InputProvider`] that performs the
//! platform side of focus and capture. The engine treats a `false` return as
//! an ordinary outcome, never as an error.

use crate::cursor::Cursor;
use crate::input::{Point, SourceId};

/// Platform side of a presentation source
pub trait InputProvider {
    /// Ask the platform to give this source keyboard focus
    ///
    /// With `check_only` set, only report whether acquisition would succeed.
    fn acquire_focus(&self, check_only: bool) -> bool;

    /// Ask the platform to route all pointer input to this source
    fn capture_mouse(&self) -> bool;

    /// Release a platform pointer capture taken by [`capture_mouse`](Self::capture_mouse)
    fn release_mouse_capture(&self);

    /// Show the given cursor while the pointer is over this source
    fn set_cursor(&self, cursor: Cursor) -> bool;
}

/// Answers which presentation source lies under a screen point
///
/// Used only for global hit testing when the mouse resynchronizes.
pub trait WindowLocator {
    fn source_at(&self, screen: Point) -> Option<SourceId>;
}
