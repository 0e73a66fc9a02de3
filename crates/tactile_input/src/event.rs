//! Events flowing through the input pipeline
//!
//! Everything staged in the pipeline is an [`InputEventArgs`]: either a raw
//! report ([`RoutedEvent::InputReport`], never dispatched) or a semantic
//! event the devices synthesized from one.

use tactile_platform::{Cursor, InputReport, Key, Modifiers, MouseButton, Point, SourceId};

use crate::tree::ElementId;

/// How a routed event travels through the tree
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoutingStrategy {
    /// Root to target
    Tunnel,
    /// Target to root
    Bubble,
    /// Target only
    Direct,
}

/// Routed event identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoutedEvent {
    /// A raw device report; consumed by the devices, never dispatched
    InputReport,

    PreviewKeyDown,
    KeyDown,
    PreviewKeyUp,
    KeyUp,

    PreviewLostKeyboardFocus,
    PreviewGotKeyboardFocus,
    LostKeyboardFocus,
    GotKeyboardFocus,
    PreviewProviderAcquireFocus,
    ProviderAcquireFocus,

    PreviewMouseMove,
    MouseMove,
    PreviewMouseDown,
    MouseDown,
    PreviewMouseUp,
    MouseUp,
    PreviewMouseWheel,
    MouseWheel,
    MouseEnter,
    MouseLeave,
    PreviewMouseDownOutsideCapturedElement,
    PreviewMouseUpOutsideCapturedElement,
    GotMouseCapture,
    LostMouseCapture,
    QueryCursor,

    PreviewTouchDown,
    TouchDown,
    PreviewTouchMove,
    TouchMove,
    PreviewTouchUp,
    TouchUp,
    TouchEnter,
    TouchLeave,
    GotTouchCapture,
    LostTouchCapture,
}

impl RoutedEvent {
    pub fn routing(self) -> RoutingStrategy {
        use RoutedEvent::*;
        match self {
            PreviewKeyDown | PreviewKeyUp | PreviewLostKeyboardFocus | PreviewGotKeyboardFocus
            | PreviewProviderAcquireFocus | PreviewMouseMove | PreviewMouseDown
            | PreviewMouseUp | PreviewMouseWheel | PreviewTouchDown | PreviewTouchMove
            | PreviewTouchUp => RoutingStrategy::Tunnel,
            InputReport | MouseEnter | MouseLeave | TouchEnter | TouchLeave
            | PreviewMouseDownOutsideCapturedElement | PreviewMouseUpOutsideCapturedElement => {
                RoutingStrategy::Direct
            }
            _ => RoutingStrategy::Bubble,
        }
    }

    /// The bubbling event raised after this tunneling one
    pub fn bubble_counterpart(self) -> Option<RoutedEvent> {
        use RoutedEvent::*;
        Some(match self {
            PreviewKeyDown => KeyDown,
            PreviewKeyUp => KeyUp,
            PreviewMouseMove => MouseMove,
            PreviewMouseDown => MouseDown,
            PreviewMouseUp => MouseUp,
            PreviewMouseWheel => MouseWheel,
            PreviewTouchDown => TouchDown,
            PreviewTouchMove => TouchMove,
            PreviewTouchUp => TouchUp,
            _ => return None,
        })
    }
}

/// Logical device an event belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputDevice {
    Keyboard,
    Mouse,
    /// A touch contact, by contact id
    Touch(u64),
    Stylus,
}

/// Key event data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyData {
    pub key: Key,
    pub modifiers: Modifiers,
    pub is_repeat: bool,
}

/// Focus transition data
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FocusChange {
    pub old: Option<ElementId>,
    pub new: Option<ElementId>,
}

/// Pointer event data
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MouseData {
    /// Position in the active source's client coordinates
    pub position: Point,
    pub button: Option<MouseButton>,
    pub click_count: u32,
    pub wheel_delta: f32,
}

impl MouseData {
    pub fn at(position: Point) -> Self {
        Self {
            position,
            button: None,
            click_count: 0,
            wheel_delta: 0.0,
        }
    }
}

/// Touch event data
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TouchData {
    pub contact: u64,
    pub position: Point,
}

/// Event-specific payload
#[derive(Clone, Debug)]
pub enum EventPayload {
    None,
    Report(InputReport),
    Key(KeyData),
    Focus(FocusChange),
    /// Provider focus acquisition; `succeeded` is None before the attempt
    AcquireFocus {
        element: ElementId,
        succeeded: Option<bool>,
    },
    Mouse(MouseData),
    /// QueryCursor: handlers may choose a cursor
    Cursor(Option<Cursor>),
    Touch(TouchData),
}

/// Per-event scratch storage used by the devices
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventTags {
    /// Root of the source the event was hit tested in
    pub root: Option<ElementId>,
    /// Raw hit before the enabled-ancestor filter
    pub raw_over: Option<ElementId>,
    /// Forced, globally hit-tested resynchronization
    pub synchronize: bool,
    /// Mouse report synthesized from a pen packet
    pub promoted_from_pen: bool,
}

/// A staged pipeline item
#[derive(Clone, Debug)]
pub struct InputEventArgs {
    event: RoutedEvent,
    device: InputDevice,
    source: Option<SourceId>,
    timestamp: u64,
    target: Option<ElementId>,
    payload: EventPayload,
    /// Set by handlers; a handled event stops ordinary handlers on its route
    pub handled: bool,
    /// The event came from real hardware rather than code
    pub user_initiated: bool,
    pub tags: EventTags,
}

impl InputEventArgs {
    /// A semantic event aimed at `target`
    pub fn new(
        event: RoutedEvent,
        device: InputDevice,
        target: Option<ElementId>,
        payload: EventPayload,
    ) -> Self {
        Self {
            event,
            device,
            source: None,
            timestamp: 0,
            target,
            payload,
            handled: false,
            user_initiated: false,
            tags: EventTags::default(),
        }
    }

    /// Wrap a raw report for staging
    pub fn report(report: InputReport) -> Self {
        let device = match &report.payload {
            tactile_platform::ReportPayload::Keyboard(_) => InputDevice::Keyboard,
            tactile_platform::ReportPayload::Mouse(_) => InputDevice::Mouse,
            tactile_platform::ReportPayload::Touch(t) => InputDevice::Touch(t.id()),
            tactile_platform::ReportPayload::Pen(_) => InputDevice::Stylus,
        };
        Self {
            event: RoutedEvent::InputReport,
            device,
            source: Some(report.source),
            timestamp: report.timestamp,
            target: None,
            payload: EventPayload::Report(report),
            handled: false,
            user_initiated: true,
            tags: EventTags::default(),
        }
    }

    /// Derive a new event of another kind from this one
    ///
    /// Source, timestamp, user-initiated flag, and tags carry over.
    pub fn derive(&self, event: RoutedEvent, target: Option<ElementId>, payload: EventPayload) -> Self {
        Self {
            event,
            device: self.device,
            source: self.source,
            timestamp: self.timestamp,
            target,
            payload,
            handled: false,
            user_initiated: self.user_initiated,
            tags: self.tags.clone(),
        }
    }

    pub fn with_source(mut self, source: Option<SourceId>) -> Self {
        self.source = source;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn event(&self) -> RoutedEvent {
        self.event
    }

    pub fn device(&self) -> InputDevice {
        self.device
    }

    pub fn source(&self) -> Option<SourceId> {
        self.source
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn target(&self) -> Option<ElementId> {
        self.target
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut EventPayload {
        &mut self.payload
    }

    /// The raw report, for [`RoutedEvent::InputReport`] items
    pub fn as_report(&self) -> Option<&InputReport> {
        match &self.payload {
            EventPayload::Report(report) => Some(report),
            _ => None,
        }
    }

    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    /// For QueryCursor: choose the cursor to show
    pub fn set_cursor(&mut self, cursor: Cursor) {
        if let EventPayload::Cursor(slot) = &mut self.payload {
            *slot = Some(cursor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tactile_platform::{ReportPayload, TouchEvent};

    #[test]
    fn test_preview_events_tunnel_and_pair() {
        assert_eq!(RoutedEvent::PreviewKeyDown.routing(), RoutingStrategy::Tunnel);
        assert_eq!(RoutedEvent::KeyDown.routing(), RoutingStrategy::Bubble);
        assert_eq!(RoutedEvent::MouseEnter.routing(), RoutingStrategy::Direct);
        assert_eq!(
            RoutedEvent::PreviewTouchUp.bubble_counterpart(),
            Some(RoutedEvent::TouchUp)
        );
        assert_eq!(RoutedEvent::GotKeyboardFocus.bubble_counterpart(), None);
    }

    #[test]
    fn test_report_args_device() {
        let report = InputReport::new(
            SourceId(2),
            42,
            ReportPayload::Touch(TouchEvent::Cancelled { id: 11 }),
        );
        let args = InputEventArgs::report(report);
        assert_eq!(args.event(), RoutedEvent::InputReport);
        assert_eq!(args.device(), InputDevice::Touch(11));
        assert_eq!(args.timestamp(), 42);
        assert!(args.user_initiated);

        let derived = args.derive(RoutedEvent::TouchEnter, None, EventPayload::None);
        assert_eq!(derived.source(), Some(SourceId(2)));
        assert!(!derived.handled);
    }
}
