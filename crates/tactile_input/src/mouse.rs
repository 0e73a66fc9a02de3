//! Mouse capture, directly-over tracking, and click counting
//!
//! Raw mouse reports are hit tested during pre-notify, which is also where
//! `MouseEnter`/`MouseLeave` fire, and translated into routed
//! `PreviewMouse*` events during post-process. The bubbling counterpart of
//! each preview is staged once the preview finishes.
//!
//! Hit testing is local to the report's source on ordinary moves. A forced
//! resynchronization (after capture changes or tree invalidation) asks the
//! window locator which source lies under the pointer first.

use std::cell::{Cell, RefCell};

use smallvec::SmallVec;
use tactile_platform::{
    Cursor, InputReport, MouseButton, MouseEvent, PenPacket, PenPhase, Point, ReportPayload,
    SourceId,
};

use crate::config::InputConfig;
use crate::context::InputContext;
use crate::error::{InputError, Result};
use crate::event::{EventPayload, InputDevice, InputEventArgs, MouseData, RoutedEvent};
use crate::hit_test::{resolve_capture, CaptureMode};
use crate::manager::{Phase, ProcessInputArgs};
use crate::reevaluate::{Reevaluation, ReevaluationSet};
use crate::tree::{diff_paths, ElementId, Tracker};

/// Multi-click detection
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct ClickState {
    button: Option<MouseButton>,
    time: u64,
    position: Point,
    count: u32,
}

impl ClickState {
    /// Record a press and return its click count
    pub fn register_press(
        &mut self,
        button: MouseButton,
        time: u64,
        position: Point,
        config: &InputConfig,
    ) -> u32 {
        // A clock that runs backwards never continues a sequence.
        let repeated = self.button == Some(button)
            && time >= self.time
            && time - self.time < config.double_click_time_ms
            && position.distance(self.position) < config.double_click_distance;
        self.count = if repeated { self.count + 1 } else { 1 };
        self.button = Some(button);
        self.time = time;
        self.position = position;
        self.count
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[derive(Default)]
struct MouseState {
    /// Source the pointer was last reported on
    source: Option<SourceId>,
    position: Option<Point>,
    timestamp: u64,
    /// Points of the last move, oldest first, ending at `position`
    history: Vec<Point>,
    last_hit: Option<(SourceId, Point)>,

    over: Option<ElementId>,
    raw_over: Option<ElementId>,
    over_path: SmallVec<[ElementId; 8]>,
    physically_over_capture: bool,

    captured: Option<ElementId>,
    capture_mode: CaptureMode,
    capture_source: Option<SourceId>,

    pressed: SmallVec<[MouseButton; 4]>,
    click: ClickState,
    cursor: Cursor,
    override_cursor: Option<Cursor>,
}

/// Mouse device state machine
pub struct MouseDevice {
    state: RefCell<MouseState>,
    reevaluation: ReevaluationSet,
    synchronize_pending: Cell<bool>,
}

impl MouseDevice {
    pub(crate) fn new() -> Self {
        Self {
            state: RefCell::new(MouseState::default()),
            reevaluation: ReevaluationSet::default(),
            synchronize_pending: Cell::new(false),
        }
    }

    pub(crate) fn install(ctx: &InputContext) {
        ctx.subscribe(Phase::PreNotify, |ctx, args| ctx.mouse().pre_notify(ctx, args));
        ctx.subscribe(Phase::PostProcess, |ctx, args| ctx.mouse().post_process(ctx, args));
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub(crate) fn captured(&self, ctx: &InputContext) -> Option<ElementId> {
        let captured = self.state.borrow().captured;
        captured.filter(|c| ctx.tree().contains(*c))
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.state.borrow().capture_mode
    }

    pub(crate) fn directly_over(&self, ctx: &InputContext) -> Option<ElementId> {
        let over = self.state.borrow().over;
        over.filter(|o| ctx.tree().contains(*o))
    }

    pub fn button_state(&self, button: MouseButton) -> bool {
        self.state.borrow().pressed.contains(&button)
    }

    /// Cursor last handed to the provider
    pub fn cursor(&self) -> Cursor {
        self.state.borrow().cursor
    }

    /// Last known position in the active source, or relative to an element
    pub(crate) fn position(&self, ctx: &InputContext, relative_to: Option<ElementId>) -> Result<Point> {
        let (source, position) = {
            let state = self.state.borrow();
            (state.source, state.position.unwrap_or(Point::ZERO))
        };
        ctx.translate_point(source, position, relative_to)
    }

    /// Copy the last move's coalesced points into `buffer`
    pub(crate) fn intermediate_points(
        &self,
        ctx: &InputContext,
        relative_to: Option<ElementId>,
        buffer: &mut [Point],
    ) -> Result<usize> {
        let (source, points) = {
            let state = self.state.borrow();
            (state.source, state.history.clone())
        };
        if buffer.len() < points.len() {
            return Err(InputError::BufferTooSmall {
                needed: points.len(),
                available: buffer.len(),
            });
        }
        let count = points.len();
        for (slot, point) in buffer.iter_mut().zip(points) {
            *slot = ctx.translate_point(source, point, relative_to)?;
        }
        Ok(count)
    }

    // =========================================================================
    // Capture
    // =========================================================================

    pub(crate) fn capture(
        &self,
        ctx: &InputContext,
        element: Option<ElementId>,
        mode: CaptureMode,
    ) -> Result<bool> {
        let element = if mode == CaptureMode::None { None } else { element };
        let mode = if element.is_none() { CaptureMode::None } else { mode };

        if let Some(e) = element {
            let tree = ctx.tree();
            if !tree.contains(e) {
                return Err(InputError::InvalidElement(e));
            }
            if !tree.is_effectively_enabled(e) || !tree.is_effectively_visible(e) {
                tracing::debug!("Refusing mouse capture to {:?}", e);
                return Ok(false);
            }
        }

        let (old, old_source) = {
            let state = self.state.borrow();
            (state.captured, state.capture_source)
        };
        if old == element {
            self.state.borrow_mut().capture_mode = mode;
            return Ok(true);
        }

        let new_source = element.and_then(|e| ctx.tree().source_of(e));
        if element.is_some() {
            if let Some(provider) = new_source.and_then(|s| ctx.provider(s)) {
                if !provider.capture_mouse() {
                    tracing::warn!("Provider refused mouse capture for {:?}", element);
                    return Ok(false);
                }
            }
        }
        if let Some(previous) = old_source.filter(|s| Some(*s) != new_source) {
            if let Some(provider) = ctx.provider(previous) {
                provider.release_mouse_capture();
            }
        }

        {
            let mut tree = ctx.tree_mut();
            if let Some(o) = old {
                tree.detach_tracker(o, Tracker::MouseCapture);
                if let Some(flags) = tree.flags_mut(o) {
                    flags.mouse_captured = false;
                }
            }
            if let Some(n) = element {
                tree.attach_tracker(n, Tracker::MouseCapture);
                if let Some(flags) = tree.flags_mut(n) {
                    flags.mouse_captured = true;
                }
            }
        }
        {
            let mut state = self.state.borrow_mut();
            state.captured = element;
            state.capture_mode = mode;
            state.capture_source = new_source;
        }
        tracing::debug!("Mouse capture {:?} -> {:?} ({:?})", old, element, mode);

        if let Some(o) = old.filter(|o| ctx.tree().contains(*o)) {
            ctx.process_input(self.event(RoutedEvent::LostMouseCapture, Some(o), EventPayload::None))?;
        }
        if let Some(n) = element {
            ctx.process_input(self.event(RoutedEvent::GotMouseCapture, Some(n), EventPayload::None))?;
        }

        self.synchronize(ctx)?;
        Ok(true)
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Re-hit-test at the last position, globally and unconditionally
    pub(crate) fn synchronize(&self, ctx: &InputContext) -> Result<()> {
        let (source, position, timestamp) = {
            let state = self.state.borrow();
            (state.source, state.position, state.timestamp)
        };
        let (Some(source), Some(position)) = (source, position) else {
            // Nothing to hit test against; only drop an over that went away.
            if self.state.borrow().over.is_some() && self.directly_over(ctx).is_none() {
                self.set_over(ctx, None)?;
            }
            return Ok(());
        };
        if ctx.source_root(source).is_none() {
            return self.set_over(ctx, None);
        }

        tracing::trace!("Synchronizing mouse at {:?}", position);
        let report = InputReport::new(
            source,
            timestamp,
            ReportPayload::Mouse(MouseEvent::Moved {
                position,
                history: Vec::new(),
            }),
        );
        let mut args = InputEventArgs::report(report);
        args.user_initiated = false;
        args.tags.synchronize = true;
        ctx.process_input(args)?;
        Ok(())
    }

    /// Coalesce resynchronization requests into one scheduled task
    pub(crate) fn request_synchronize(&self, ctx: &InputContext) {
        if self.synchronize_pending.replace(true) {
            return;
        }
        ctx.schedule(ctx.config().synchronize_priority, |ctx| {
            let mouse = ctx.mouse();
            mouse.synchronize_pending.set(false);
            if let Err(err) = mouse.synchronize(ctx) {
                tracing::warn!("Mouse synchronize failed: {}", err);
            }
        });
    }

    pub(crate) fn queue_reevaluation(&self, ctx: &InputContext, entry: Reevaluation) {
        if self.reevaluation.queue(entry) {
            tracing::debug!("Scheduling mouse reevaluation");
            ctx.schedule(ctx.config().reevaluate_priority, |ctx| {
                if let Err(err) = ctx.mouse().reevaluate(ctx) {
                    tracing::warn!("Mouse reevaluation failed: {}", err);
                }
            });
        }
    }

    fn reevaluate(&self, ctx: &InputContext) -> Result<()> {
        let entries = self.reevaluation.take();
        let captured = self.state.borrow().captured;
        if let Some(c) = captured {
            let valid = {
                let tree = ctx.tree();
                tree.is_effectively_enabled(c) && tree.is_effectively_visible(c)
            };
            if !valid {
                tracing::debug!("Releasing mouse capture from {:?}", c);
                // Releasing resynchronizes as well.
                self.capture(ctx, None, CaptureMode::None)?;
                return Ok(());
            }
        }
        if entries.iter().any(|e| e.tracker == Tracker::MouseOver) {
            self.synchronize(ctx)?;
        }
        Ok(())
    }

    // =========================================================================
    // Cursor
    // =========================================================================

    pub(crate) fn set_override_cursor(&self, ctx: &InputContext, cursor: Option<Cursor>) -> Result<()> {
        self.state.borrow_mut().override_cursor = cursor;
        if let Some(over) = self.directly_over(ctx) {
            let query = self.event(RoutedEvent::QueryCursor, Some(over), EventPayload::Cursor(None));
            ctx.process_input(query)?;
        }
        Ok(())
    }

    fn apply_cursor(&self, ctx: &InputContext, input: &InputEventArgs) {
        let chosen = match input.payload() {
            EventPayload::Cursor(cursor) => *cursor,
            _ => None,
        };
        let cursor = {
            let mut state = self.state.borrow_mut();
            let cursor = state.override_cursor.or(chosen).unwrap_or_default();
            state.cursor = cursor;
            cursor
        };
        if let Some(provider) = input.source().and_then(|s| ctx.provider(s)) {
            provider.set_cursor(cursor);
        }
    }

    // =========================================================================
    // Hit testing
    // =========================================================================

    fn pre_notify(&self, ctx: &InputContext, args: &mut ProcessInputArgs) -> Result<()> {
        let (event, source, timestamp) = match args.input().as_report() {
            Some(InputReport {
                payload: ReportPayload::Mouse(event),
                source,
                timestamp,
            }) => (event.clone(), *source, *timestamp),
            _ => return Ok(()),
        };
        let synchronize = args.input().tags.synchronize;

        match &event {
            MouseEvent::Entered => {
                self.state.borrow_mut().source = Some(source);
                return Ok(());
            }
            MouseEvent::Left => {
                let release = {
                    let state = self.state.borrow();
                    state.source == Some(source) && state.captured.is_none()
                };
                if release {
                    {
                        let mut state = self.state.borrow_mut();
                        state.position = None;
                        state.last_hit = None;
                    }
                    self.set_over(ctx, None)?;
                }
                return Ok(());
            }
            _ => {}
        }

        let Some(position) = event.position() else {
            return Ok(());
        };
        {
            let mut state = self.state.borrow_mut();
            state.source = Some(source);
            state.position = Some(position);
            state.timestamp = timestamp;
            if let MouseEvent::Moved { history, .. } = &event {
                if !synchronize {
                    state.history = history.clone();
                    state.history.push(position);
                }
            }
        }

        self.update_over(ctx, synchronize, synchronize)?;

        let (root, raw_over) = {
            let state = self.state.borrow();
            (state.source.and_then(|s| ctx.source_root(s)), state.raw_over)
        };
        let input = args.input_mut();
        input.tags.root = root;
        input.tags.raw_over = raw_over;
        Ok(())
    }

    fn update_over(&self, ctx: &InputContext, force: bool, global: bool) -> Result<()> {
        let (mut source, mut position, last_hit, captured, mode) = {
            let state = self.state.borrow();
            match (state.source, state.position) {
                (Some(source), Some(position)) => (
                    source,
                    position,
                    state.last_hit,
                    state.captured,
                    state.capture_mode,
                ),
                _ => return Ok(()),
            }
        };

        if global {
            let screen = ctx.source_origin(source) + position;
            if let Some(found) = ctx.locate_source(screen).filter(|f| *f != source) {
                position = screen - ctx.source_origin(found);
                source = found;
                let mut state = self.state.borrow_mut();
                state.source = Some(source);
                state.position = Some(position);
            }
        }

        if !force && last_hit == Some((source, position)) {
            return Ok(());
        }

        let hit = ctx.hit_test_source(source, position);
        let resolved = {
            let tree = ctx.tree();
            resolve_capture(&tree, hit.and_then(|h| h.enabled), captured, mode)
        };
        {
            let mut state = self.state.borrow_mut();
            state.last_hit = Some((source, position));
            state.raw_over = hit.map(|h| h.original);
            state.physically_over_capture = resolved.physically_over_capture;
        }
        self.set_over(ctx, resolved.over)
    }

    /// Move directly-over, raising leave/enter along the changed part of the path
    fn set_over(&self, ctx: &InputContext, new: Option<ElementId>) -> Result<()> {
        let new = new.filter(|n| ctx.tree().contains(*n));
        let new_path = match new {
            Some(n) => ctx.tree().path(n),
            None => SmallVec::new(),
        };
        let (old, old_path) = {
            let state = self.state.borrow();
            (state.over, state.over_path.clone())
        };
        if old == new && old_path == new_path {
            return Ok(());
        }

        let (leaves, enters) = diff_paths(&old_path, &new_path);
        {
            let mut tree = ctx.tree_mut();
            if let Some(o) = old {
                tree.detach_tracker(o, Tracker::MouseOver);
            }
            if let Some(n) = new {
                tree.attach_tracker(n, Tracker::MouseOver);
            }
            for element in &leaves {
                if let Some(flags) = tree.flags_mut(*element) {
                    flags.mouse_over = false;
                }
            }
            for element in &enters {
                if let Some(flags) = tree.flags_mut(*element) {
                    flags.mouse_over = true;
                }
            }
        }
        let position = {
            let mut state = self.state.borrow_mut();
            state.over = new;
            state.over_path = new_path;
            state.position.unwrap_or(Point::ZERO)
        };
        tracing::trace!("Mouse over {:?} -> {:?}", old, new);

        for element in leaves {
            if ctx.tree().contains(element) {
                let leave = self.event(RoutedEvent::MouseLeave, Some(element), EventPayload::Mouse(MouseData::at(position)));
                ctx.process_input(leave)?;
            }
        }
        for element in enters {
            if ctx.tree().contains(element) {
                let enter = self.event(RoutedEvent::MouseEnter, Some(element), EventPayload::Mouse(MouseData::at(position)));
                ctx.process_input(enter)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Translation
    // =========================================================================

    fn post_process(&self, ctx: &InputContext, args: &mut ProcessInputArgs) -> Result<()> {
        match args.input().event() {
            RoutedEvent::InputReport if !args.input().handled => self.translate_report(ctx, args),
            RoutedEvent::PreviewMouseMove
            | RoutedEvent::PreviewMouseDown
            | RoutedEvent::PreviewMouseUp
            | RoutedEvent::PreviewMouseWheel => {
                args.push_bubble_counterpart();
                Ok(())
            }
            RoutedEvent::QueryCursor => {
                self.apply_cursor(ctx, args.input());
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn translate_report(&self, ctx: &InputContext, args: &mut ProcessInputArgs) -> Result<()> {
        let (payload, source) = match args.input().as_report() {
            Some(report) => (report.payload.clone(), report.source),
            None => return Ok(()),
        };
        match payload {
            ReportPayload::Mouse(event) => {
                self.translate_mouse(ctx, args, event);
                Ok(())
            }
            ReportPayload::Pen(packet) if ctx.config().promote_pen_to_mouse => {
                promote_pen(args, source, packet);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn translate_mouse(&self, ctx: &InputContext, args: &mut ProcessInputArgs, event: MouseEvent) {
        let (over, captured, mode, physically_over) = {
            let state = self.state.borrow();
            (
                state.over.filter(|o| ctx.tree().contains(*o)),
                state.captured.filter(|c| ctx.tree().contains(*c)),
                state.capture_mode,
                state.physically_over_capture,
            )
        };
        let outside_capture = captured.is_some() && mode == CaptureMode::Element && !physically_over;
        let timestamp = args.input().timestamp();

        let mut pushed: SmallVec<[InputEventArgs; 3]> = SmallVec::new();
        match event {
            MouseEvent::Moved { position, .. } => {
                let data = MouseData::at(position);
                pushed.push(args.input().derive(RoutedEvent::PreviewMouseMove, over, EventPayload::Mouse(data)));
                if over.is_some() {
                    pushed.push(args.input().derive(RoutedEvent::QueryCursor, over, EventPayload::Cursor(None)));
                }
            }
            MouseEvent::ButtonPressed { button, position } => {
                let click_count = {
                    let mut state = self.state.borrow_mut();
                    if !state.pressed.contains(&button) {
                        state.pressed.push(button);
                    }
                    state.click.register_press(button, timestamp, position, ctx.config())
                };
                let data = EventPayload::Mouse(MouseData {
                    position,
                    button: Some(button),
                    click_count,
                    wheel_delta: 0.0,
                });
                if outside_capture {
                    pushed.push(args.input().derive(
                        RoutedEvent::PreviewMouseDownOutsideCapturedElement,
                        captured,
                        data.clone(),
                    ));
                }
                pushed.push(args.input().derive(RoutedEvent::PreviewMouseDown, over, data));
            }
            MouseEvent::ButtonReleased { button, position } => {
                let click_count = {
                    let mut state = self.state.borrow_mut();
                    state.pressed.retain(|b| *b != button);
                    state.click.count()
                };
                let data = EventPayload::Mouse(MouseData {
                    position,
                    button: Some(button),
                    click_count,
                    wheel_delta: 0.0,
                });
                if outside_capture {
                    pushed.push(args.input().derive(
                        RoutedEvent::PreviewMouseUpOutsideCapturedElement,
                        captured,
                        data.clone(),
                    ));
                }
                pushed.push(args.input().derive(RoutedEvent::PreviewMouseUp, over, data));
            }
            MouseEvent::Wheel { delta, position } => {
                let data = MouseData {
                    wheel_delta: delta,
                    ..MouseData::at(position)
                };
                pushed.push(args.input().derive(RoutedEvent::PreviewMouseWheel, over, EventPayload::Mouse(data)));
            }
            MouseEvent::Entered | MouseEvent::Left => {}
        }

        for next in pushed {
            args.push_input(next);
        }
    }

    fn event(&self, event: RoutedEvent, target: Option<ElementId>, payload: EventPayload) -> InputEventArgs {
        let state = self.state.borrow();
        InputEventArgs::new(event, InputDevice::Mouse, target, payload)
            .with_source(state.source)
            .with_timestamp(state.timestamp)
    }
}

/// Stage the mouse report a pen packet stands for
fn promote_pen(args: &mut ProcessInputArgs, source: SourceId, packet: PenPacket) {
    let position = packet.position;
    let event = match packet.phase {
        PenPhase::Down => MouseEvent::ButtonPressed {
            button: MouseButton::Left,
            position,
        },
        PenPhase::Move => MouseEvent::Moved {
            position,
            history: Vec::new(),
        },
        PenPhase::Up => MouseEvent::ButtonReleased {
            button: MouseButton::Left,
            position,
        },
        PenPhase::InRange | PenPhase::OutOfRange => return,
    };
    let report = InputReport::new(source, args.input().timestamp(), ReportPayload::Mouse(event));
    let mut promoted = InputEventArgs::report(report);
    promoted.user_initiated = args.input().user_initiated;
    promoted.tags.promoted_from_pen = true;
    args.push_input(promoted);
}
