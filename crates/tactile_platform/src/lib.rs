//! Tactile Platform Contract
//!
//! This crate defines what the input engine receives from, and asks of, the
//! platform layer: raw device reports, per-source provider callbacks, cursor
//! shapes, and the stylus worker that hands pen packets to the UI thread.
//!
//! # Architecture
//!
//! - [`InputReport`] - immutable, timestamped raw report from a driver
//! - [`InputProvider`] - platform focus/capture/cursor callbacks for one source
//! - [`WindowLocator`] - which source is under a screen point
//! - [`StylusWorker`] - background pen read loop feeding a [`ReportQueue`]
//!
//! # Example
//!
//! ```ignore
//! use tactile_platform::*;
//!
//! let queue = ReportQueue::new(256);
//! let worker = StylusWorker::start(reader, SourceId(1), queue.clone(), None)?;
//!
//! // Later, on the UI thread:
//! for report in queue.drain() {
//!     // hand to the input engine
//! }
//! ```

mod cursor;
mod error;
mod input;
mod provider;
mod stylus;

// Re-export all public types
pub use cursor::Cursor;
pub use error::{PlatformError, Result};
pub use input::{
    DeviceKind, InputReport, Key, KeyAction, Modifiers, MouseButton, MouseEvent, PenPacket,
    PenPhase, Point, RawKeyboard, ReportPayload, SourceId, TouchEvent,
};
pub use provider::{InputProvider, WindowLocator};
pub use stylus::{PenReader, ReportQueue, StylusWorker, WakeCallback};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cursor::Cursor;
    pub use crate::error::{PlatformError, Result};
    pub use crate::input::{
        InputReport, Key, KeyAction, Modifiers, MouseButton, MouseEvent, PenPacket, PenPhase,
        Point, RawKeyboard, ReportPayload, SourceId, TouchEvent,
    };
    pub use crate::provider::{InputProvider, WindowLocator};
    pub use crate::stylus::{PenReader, ReportQueue, StylusWorker};
}
