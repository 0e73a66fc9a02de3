//! Tactile Input Engine
//!
//! Turns raw device reports into semantic, routed events against a retained
//! element tree, and owns keyboard focus, mouse capture, and per-contact
//! touch state for one UI thread.
//!
//! # Architecture
//!
//! - [`InputContext`] - per-thread handle owning the tree, pipeline, and devices
//! - Staging area - LIFO stack of pending items bracketed by markers
//! - Pipeline - pre-process, pre-notify, dispatch, post-notify, post-process
//! - [`KeyboardDevice`] - focus protocol and key translation
//! - [`MouseDevice`] - hit testing, capture, enter/leave, clicks, cursor
//! - [`TouchDevice`] - per-contact capture and gesture promotion
//! - [`RoutedDispatch`] - delivers events along tunnel/bubble/direct routes
//! - [`Scheduler`] - cooperative queue for deferred continuations
//!
//! # Example
//!
//! ```ignore
//! use std::rc::Rc;
//! use tactile_input::prelude::*;
//!
//! let scheduler = Rc::new(LocalScheduler::new());
//! let handlers = Rc::new(HandlerRegistry::new());
//! let ctx = InputContext::builder(scheduler.clone(), handlers.clone()).build();
//!
//! let root = ctx.insert_element(None, ElementProps::new(Rect::new(0.0, 0.0, 800.0, 600.0)))?;
//! let button = ctx.insert_element(Some(root), ElementProps::new(Rect::new(10.0, 10.0, 80.0, 24.0)).focusable(true))?;
//! ctx.register_source(SourceId(1), root, None)?;
//!
//! handlers.on(button, RoutedEvent::MouseDown, move |ctx, _, args| {
//!     ctx.focus(Some(button))?;
//!     args.mark_handled();
//!     Ok(())
//! });
//!
//! ctx.process_report(report)?;
//! scheduler.run_pending();
//! ```

mod config;
mod context;
mod dispatch;
mod error;
mod event;
mod keyboard;
mod manager;
mod mouse;
mod reevaluate;
mod scheduler;
mod staging;
mod touch;
mod tree;

#[cfg(test)]
mod testing;

// Re-export all public types
pub use config::InputConfig;
pub use context::{InputContext, InputContextBuilder, WeakInputContext};
pub use dispatch::{HandlerRegistry, RoutedDispatch, RoutedHandler};
pub use error::{InputError, Result};
pub use event::{
    EventPayload, EventTags, FocusChange, InputDevice, InputEventArgs, KeyData, MouseData,
    RoutedEvent, RoutingStrategy, TouchData,
};
pub use hit_test::{BoundsHitTester, CaptureMode, HitResult, HitTester};
pub use keyboard::{is_focusable, KeyboardDevice, TextServices};
pub use manager::{Phase, PhaseHandler, ProcessInputArgs, SubscriptionId};
pub use mouse::MouseDevice;
pub use scheduler::{LocalScheduler, Priority, Scheduler, Task};
pub use staging::MarkerId;
pub use touch::{GestureEngine, TouchDevice};
pub use tree::{Ancestors, ElementId, ElementProps, ElementTree, Rect, Tracker};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::InputConfig;
    pub use crate::context::InputContext;
    pub use crate::dispatch::{HandlerRegistry, RoutedDispatch};
    pub use crate::error::{InputError, Result};
    pub use crate::event::{EventPayload, InputDevice, InputEventArgs, RoutedEvent};
    pub use crate::hit_test::{CaptureMode, HitTester};
    pub use crate::manager::{Phase, ProcessInputArgs};
    pub use crate::scheduler::{LocalScheduler, Priority, Scheduler};
    pub use crate::tree::{ElementId, ElementProps, Rect};
    pub use tactile_platform::prelude::*;
}
