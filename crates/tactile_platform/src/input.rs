//! Raw input reports for keyboard, mouse, touch, and pen
//!
//! A report is what a platform driver hands to the input engine: a device
//! kind, a timestamp, the presentation source it arrived on, and the raw
//! payload. Reports are immutable once built.

use std::ops::{Add, Sub};

/// A point in client or screen coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    /// The origin
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    /// Create a new point
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance(self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Identifier of a presentation source (a top-level window or surface)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u32);

/// Kind of device that produced a report
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Keyboard,
    Mouse,
    Touch,
    Pen,
}

/// A raw, timestamped device report
#[derive(Clone, Debug)]
pub struct InputReport {
    /// Source the report arrived on
    pub source: SourceId,
    /// Milliseconds on the platform's monotonic input clock
    pub timestamp: u64,
    /// The raw device payload
    pub payload: ReportPayload,
}

impl InputReport {
    /// Create a new report
    pub fn new(source: SourceId, timestamp: u64, payload: ReportPayload) -> Self {
        Self {
            source,
            timestamp,
            payload,
        }
    }

    /// Kind of device this report came from
    pub fn device_kind(&self) -> DeviceKind {
        match self.payload {
            ReportPayload::Keyboard(_) => DeviceKind::Keyboard,
            ReportPayload::Mouse(_) => DeviceKind::Mouse,
            ReportPayload::Touch(_) => DeviceKind::Touch,
            ReportPayload::Pen(_) => DeviceKind::Pen,
        }
    }
}

/// Device-specific report contents
#[derive(Clone, Debug)]
pub enum ReportPayload {
    Keyboard(RawKeyboard),
    Mouse(MouseEvent),
    Touch(TouchEvent),
    Pen(PenPacket),
}

// ============================================================================
// Keyboard
// ============================================================================

/// Raw keyboard report
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawKeyboard {
    /// What happened
    pub action: KeyAction,
    /// Modifier keys held at the time of the report
    pub modifiers: Modifiers,
}

impl RawKeyboard {
    /// A key-down report
    pub fn down(key: Key) -> Self {
        Self {
            action: KeyAction::Down(key),
            modifiers: Modifiers::default(),
        }
    }

    /// A key-up report
    pub fn up(key: Key) -> Self {
        Self {
            action: KeyAction::Up(key),
            modifiers: Modifiers::default(),
        }
    }

    /// Attach modifier state
    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

/// Keyboard report action
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    /// Key transitioned to pressed
    Down(Key),
    /// Key transitioned to released
    Up(Key),
    /// The source became the active keyboard target
    Activate,
    /// The source stopped being the active keyboard target
    Deactivate,
}

/// Modifier key state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Modifiers {
    /// Shift key is held
    pub shift: bool,
    /// Control key is held
    pub ctrl: bool,
    /// Alt key is held (Option on macOS)
    pub alt: bool,
    /// Meta key is held (Command on macOS, Windows key on Windows)
    pub meta: bool,
}

impl Modifiers {
    /// Check if no modifiers are held
    pub fn is_empty(&self) -> bool {
        !self.shift && !self.ctrl && !self.alt && !self.meta
    }
}

/// Key identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// A key producing a character
    Char(char),
    /// Function key F1..F24
    Function(u8),
    Space,
    Enter,
    Escape,
    Backspace,
    Tab,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Left,
    Right,
    Up,
    Down,
    Shift,
    Ctrl,
    Alt,
    Meta,
    /// Platform scan code with no mapping
    Unknown(u32),
}

// ============================================================================
// Mouse
// ============================================================================

/// Raw mouse report
#[derive(Clone, Debug, PartialEq)]
pub enum MouseEvent {
    /// Pointer moved
    Moved {
        /// Position in source client coordinates
        position: Point,
        /// Coalesced positions since the previous report, oldest first
        history: Vec<Point>,
    },
    /// Button pressed
    ButtonPressed { button: MouseButton, position: Point },
    /// Button released
    ButtonReleased { button: MouseButton, position: Point },
    /// Wheel rotated
    Wheel { delta: f32, position: Point },
    /// Pointer entered the source
    Entered,
    /// Pointer left the source
    Left,
}

impl MouseEvent {
    /// Position carried by the report, if any
    pub fn position(&self) -> Option<Point> {
        match self {
            MouseEvent::Moved { position, .. }
            | MouseEvent::ButtonPressed { position, .. }
            | MouseEvent::ButtonReleased { position, .. }
            | MouseEvent::Wheel { position, .. } => Some(*position),
            MouseEvent::Entered | MouseEvent::Left => None,
        }
    }
}

/// Mouse buttons
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
    Other(u16),
}

// ============================================================================
// Touch
// ============================================================================

/// Raw touch contact report
#[derive(Clone, Debug, PartialEq)]
pub enum TouchEvent {
    /// A contact went down
    Started { id: u64, position: Point },
    /// A contact moved
    Moved { id: u64, position: Point },
    /// A contact lifted
    Ended { id: u64, position: Point },
    /// The platform took the contact away (e.g. a system gesture)
    Cancelled { id: u64 },
}

impl TouchEvent {
    /// Contact identifier
    pub fn id(&self) -> u64 {
        match self {
            TouchEvent::Started { id, .. }
            | TouchEvent::Moved { id, .. }
            | TouchEvent::Ended { id, .. }
            | TouchEvent::Cancelled { id } => *id,
        }
    }

    /// Position (None for Cancelled)
    pub fn position(&self) -> Option<Point> {
        match self {
            TouchEvent::Started { position, .. }
            | TouchEvent::Moved { position, .. }
            | TouchEvent::Ended { position, .. } => Some(*position),
            TouchEvent::Cancelled { .. } => None,
        }
    }
}

// ============================================================================
// Pen
// ============================================================================

/// Pen packet phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PenPhase {
    InRange,
    Down,
    Move,
    Up,
    OutOfRange,
}

/// A packet read from the digitizer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PenPacket {
    pub phase: PenPhase,
    /// Position in source client coordinates
    pub position: Point,
    /// Normalized pressure (0.0 - 1.0)
    pub pressure: f32,
    /// Digitizer timestamp in milliseconds
    pub timestamp: u64,
}
