//! Test doubles and fixtures shared by the unit tests

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tactile_platform::{
    Cursor, InputProvider, InputReport, MouseEvent, PenPacket, PenPhase, Point, RawKeyboard,
    ReportPayload, SourceId, TouchEvent,
};

use crate::config::InputConfig;
use crate::context::InputContext;
use crate::dispatch::RoutedDispatch;
use crate::error::Result;
use crate::event::{EventPayload, InputEventArgs, RoutedEvent};
use crate::keyboard::TextServices;
use crate::scheduler::LocalScheduler;
use crate::touch::GestureEngine;
use crate::tree::{ElementId, ElementProps, Rect};

pub(crate) const SOURCE: SourceId = SourceId(1);

/// Install a log subscriber once; later calls are ignored
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Dispatcher
// =============================================================================

#[derive(Clone, Debug)]
pub(crate) struct Record {
    pub event: RoutedEvent,
    pub target: ElementId,
    pub payload: EventPayload,
}

type Hook = Rc<dyn Fn(&InputContext, &mut InputEventArgs)>;

/// Dispatcher that records every routed event it is handed
#[derive(Default)]
pub(crate) struct Recorder {
    records: RefCell<Vec<Record>>,
    handled: RefCell<Vec<RoutedEvent>>,
    hooks: RefCell<Vec<(RoutedEvent, Hook)>>,
}

impl Recorder {
    pub fn records(&self) -> Vec<Record> {
        self.records.borrow().clone()
    }

    pub fn events(&self) -> Vec<(RoutedEvent, ElementId)> {
        self.records
            .borrow()
            .iter()
            .map(|r| (r.event, r.target))
            .collect()
    }

    pub fn payloads(&self) -> Vec<EventPayload> {
        self.records
            .borrow()
            .iter()
            .map(|r| r.payload.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.records.borrow_mut().clear();
    }

    /// Mark every event of this kind handled
    pub fn handle(&self, event: RoutedEvent) {
        self.handled.borrow_mut().push(event);
    }

    pub fn on_event<F>(&self, event: RoutedEvent, hook: F)
    where
        F: Fn(&InputContext, &mut InputEventArgs) + 'static,
    {
        self.hooks.borrow_mut().push((event, Rc::new(hook)));
    }
}

impl RoutedDispatch for Recorder {
    fn dispatch(
        &self,
        ctx: &InputContext,
        target: ElementId,
        args: &mut InputEventArgs,
    ) -> Result<bool> {
        self.records.borrow_mut().push(Record {
            event: args.event(),
            target,
            payload: args.payload().clone(),
        });
        let hooks: Vec<Hook> = self
            .hooks
            .borrow()
            .iter()
            .filter(|(e, _)| *e == args.event())
            .map(|(_, h)| Rc::clone(h))
            .collect();
        for hook in hooks {
            hook(ctx, args);
        }
        if self.handled.borrow().contains(&args.event()) {
            args.mark_handled();
        }
        Ok(args.handled)
    }
}

// =============================================================================
// Provider
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ProviderCall {
    AcquireFocus,
    CaptureMouse,
    ReleaseMouseCapture,
    SetCursor(Cursor),
}

/// Provider whose answers the test scripts
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    calls: RefCell<Vec<ProviderCall>>,
    refuse_focus: Cell<bool>,
    refuse_capture: Cell<bool>,
}

impl ScriptedProvider {
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.borrow().clone()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn refuse_focus(&self, refuse: bool) {
        self.refuse_focus.set(refuse);
    }

    pub fn refuse_capture(&self, refuse: bool) {
        self.refuse_capture.set(refuse);
    }
}

impl InputProvider for ScriptedProvider {
    fn acquire_focus(&self, _check_only: bool) -> bool {
        self.calls.borrow_mut().push(ProviderCall::AcquireFocus);
        !self.refuse_focus.get()
    }

    fn capture_mouse(&self) -> bool {
        self.calls.borrow_mut().push(ProviderCall::CaptureMouse);
        !self.refuse_capture.get()
    }

    fn release_mouse_capture(&self) {
        self.calls.borrow_mut().push(ProviderCall::ReleaseMouseCapture);
    }

    fn set_cursor(&self, cursor: Cursor) -> bool {
        self.calls.borrow_mut().push(ProviderCall::SetCursor(cursor));
        true
    }
}

// =============================================================================
// Collaborators
// =============================================================================

#[derive(Default)]
pub(crate) struct RecordingText {
    changes: RefCell<Vec<(Option<ElementId>, Option<ElementId>)>>,
}

impl RecordingText {
    pub fn changes(&self) -> Vec<(Option<ElementId>, Option<ElementId>)> {
        self.changes.borrow().clone()
    }
}

impl TextServices for RecordingText {
    fn focus_changed(&self, old: Option<ElementId>, new: Option<ElementId>) {
        self.changes.borrow_mut().push((old, new));
    }
}

#[derive(Default)]
pub(crate) struct RecordingGestures {
    added: RefCell<Vec<(u64, ElementId)>>,
    removed: RefCell<Vec<u64>>,
    reported: Cell<usize>,
    consume: Cell<bool>,
}

impl RecordingGestures {
    pub fn added(&self) -> Vec<(u64, ElementId)> {
        self.added.borrow().clone()
    }

    pub fn removed(&self) -> Vec<u64> {
        self.removed.borrow().clone()
    }

    pub fn reported(&self) -> usize {
        self.reported.get()
    }

    pub fn consume(&self, consume: bool) {
        self.consume.set(consume);
    }
}

impl GestureEngine for RecordingGestures {
    fn add_contact(&self, contact: u64, element: ElementId, _position: Point) {
        self.added.borrow_mut().push((contact, element));
    }

    fn report(&self, _contact: u64, _event: &TouchEvent) -> bool {
        self.reported.set(self.reported.get() + 1);
        self.consume.get()
    }

    fn remove_contact(&self, contact: u64) {
        self.removed.borrow_mut().push(contact);
    }
}

// =============================================================================
// Fixture
// =============================================================================

/// One source with this layout (client coordinates):
///
/// ```text
/// root  (0,0 400x300)       source root
/// └─ panel (0,0 200x200)
///    ├─ a  (10,10 50x50)    focusable
///    └─ b  (100,10 50x50)   focusable
/// ```
pub(crate) struct Fixture {
    pub ctx: InputContext,
    pub scheduler: Rc<LocalScheduler>,
    pub recorder: Rc<Recorder>,
    pub provider: Rc<ScriptedProvider>,
    pub text: Rc<RecordingText>,
    pub root: ElementId,
    pub panel: ElementId,
    pub a: ElementId,
    pub b: ElementId,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_gestures(gestures: Rc<RecordingGestures>) -> Self {
        Self::build(Some(gestures))
    }

    fn build(gestures: Option<Rc<RecordingGestures>>) -> Self {
        init_tracing();
        let scheduler = Rc::new(LocalScheduler::new());
        let recorder = Rc::new(Recorder::default());
        let provider = Rc::new(ScriptedProvider::default());
        let text = Rc::new(RecordingText::default());

        let mut builder = InputContext::builder(scheduler.clone(), recorder.clone())
            .config(InputConfig::testing())
            .text_services(text.clone());
        if let Some(gestures) = gestures {
            builder = builder.gesture_engine(gestures);
        }
        let ctx = builder.build();

        let root = ctx
            .insert_element(None, ElementProps::new(Rect::new(0.0, 0.0, 400.0, 300.0)))
            .unwrap();
        let source_provider: Rc<dyn InputProvider> = provider.clone();
        ctx.register_source(SOURCE, root, Some(source_provider)).unwrap();
        let panel = ctx
            .insert_element(Some(root), ElementProps::new(Rect::new(0.0, 0.0, 200.0, 200.0)))
            .unwrap();
        let a = ctx
            .insert_element(
                Some(panel),
                ElementProps::new(Rect::new(10.0, 10.0, 50.0, 50.0)).focusable(true),
            )
            .unwrap();
        let b = ctx
            .insert_element(
                Some(panel),
                ElementProps::new(Rect::new(100.0, 10.0, 50.0, 50.0)).focusable(true),
            )
            .unwrap();
        scheduler.run_pending();

        Self {
            ctx,
            scheduler,
            recorder,
            provider,
            text,
            root,
            panel,
            a,
            b,
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

pub(crate) fn key_report(raw: RawKeyboard) -> InputReport {
    InputReport::new(SOURCE, 0, ReportPayload::Keyboard(raw))
}

pub(crate) fn mouse_report(timestamp: u64, event: MouseEvent) -> InputReport {
    InputReport::new(SOURCE, timestamp, ReportPayload::Mouse(event))
}

pub(crate) fn touch_report(event: TouchEvent) -> InputReport {
    InputReport::new(SOURCE, 0, ReportPayload::Touch(event))
}

pub(crate) fn pen_report(phase: PenPhase, position: Point) -> InputReport {
    InputReport::new(
        SOURCE,
        0,
        ReportPayload::Pen(PenPacket {
            phase,
            position,
            pressure: 0.5,
            timestamp: 0,
        }),
    )
}
