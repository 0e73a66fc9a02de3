//! Per-thread input context
//!
//! [`InputContext`] owns the element tree, the pipeline, and the three device
//! state machines for one UI thread. It is a cheap `Rc` handle: clone it into
//! handlers freely. Being `Rc`-based it is `!Send`, which confines all input
//! state to the thread that built it.
//!
//! # Example
//!
//! ```ignore
//! let scheduler = Rc::new(LocalScheduler::new());
//! let handlers = Rc::new(HandlerRegistry::new());
//! let ctx = InputContext::builder(scheduler.clone(), handlers.clone())
//!     .config(InputConfig::standard())
//!     .build();
//!
//! let root = ctx.insert_element(None, ElementProps::new(Rect::new(0.0, 0.0, 800.0, 600.0)))?;
//! ctx.register_source(SourceId(1), root, Some(provider))?;
//! ctx.process_report(report)?;
//! scheduler.run_pending();
//! ```

use std::cell::{Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use tactile_platform::{Cursor, InputProvider, InputReport, Point, ReportQueue, SourceId, WindowLocator};

use crate::config::InputConfig;
use crate::dispatch::RoutedDispatch;
use crate::error::{InputError, Result};
use crate::event::{InputDevice, InputEventArgs};
use crate::hit_test::{BoundsHitTester, CaptureMode, HitResult, HitTester};
use crate::keyboard::{KeyboardDevice, TextServices};
use crate::manager::{InputManager, Phase, ProcessInputArgs, SubscriptionId};
use crate::mouse::MouseDevice;
use crate::reevaluate::Reevaluation;
use crate::scheduler::{Priority, Scheduler};
use crate::touch::{GestureEngine, TouchDevice};
use crate::tree::{ElementId, ElementProps, ElementTree, Rect, Tracker};

struct SourceEntry {
    root: ElementId,
    provider: Option<Rc<dyn InputProvider>>,
    /// Client origin in screen coordinates
    origin: Point,
}

struct ContextInner {
    config: InputConfig,
    tree: RefCell<ElementTree>,
    sources: RefCell<FxHashMap<SourceId, SourceEntry>>,
    manager: InputManager,
    keyboard: KeyboardDevice,
    mouse: MouseDevice,
    touch: TouchDevice,
    scheduler: Rc<dyn Scheduler>,
    dispatcher: Rc<dyn RoutedDispatch>,
    hit_tester: Rc<dyn HitTester>,
    locator: Option<Rc<dyn WindowLocator>>,
    text_services: Option<Rc<dyn TextServices>>,
    gestures: Option<Rc<dyn GestureEngine>>,
}

/// Handle to the input engine of one UI thread
#[derive(Clone)]
pub struct InputContext {
    inner: Rc<ContextInner>,
}

/// Non-owning handle, used by scheduled tasks
#[derive(Clone)]
pub struct WeakInputContext {
    inner: Weak<ContextInner>,
}

impl WeakInputContext {
    pub fn upgrade(&self) -> Option<InputContext> {
        self.inner.upgrade().map(|inner| InputContext { inner })
    }
}

/// Builder for [`InputContext`]
pub struct InputContextBuilder {
    config: InputConfig,
    scheduler: Rc<dyn Scheduler>,
    dispatcher: Rc<dyn RoutedDispatch>,
    hit_tester: Rc<dyn HitTester>,
    locator: Option<Rc<dyn WindowLocator>>,
    text_services: Option<Rc<dyn TextServices>>,
    gestures: Option<Rc<dyn GestureEngine>>,
}

impl InputContextBuilder {
    pub fn config(mut self, config: InputConfig) -> Self {
        self.config = config;
        self
    }

    pub fn hit_tester(mut self, hit_tester: Rc<dyn HitTester>) -> Self {
        self.hit_tester = hit_tester;
        self
    }

    pub fn window_locator(mut self, locator: Rc<dyn WindowLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn text_services(mut self, text_services: Rc<dyn TextServices>) -> Self {
        self.text_services = Some(text_services);
        self
    }

    pub fn gesture_engine(mut self, gestures: Rc<dyn GestureEngine>) -> Self {
        self.gestures = Some(gestures);
        self
    }

    pub fn build(self) -> InputContext {
        let ctx = InputContext {
            inner: Rc::new(ContextInner {
                config: self.config,
                tree: RefCell::new(ElementTree::new()),
                sources: RefCell::new(FxHashMap::default()),
                manager: InputManager::new(),
                keyboard: KeyboardDevice::new(),
                mouse: MouseDevice::new(),
                touch: TouchDevice::new(),
                scheduler: self.scheduler,
                dispatcher: self.dispatcher,
                hit_tester: self.hit_tester,
                locator: self.locator,
                text_services: self.text_services,
                gestures: self.gestures,
            }),
        };

        // Devices subscribe first so that host handlers run before them.
        KeyboardDevice::install(&ctx);
        MouseDevice::install(&ctx);
        TouchDevice::install(&ctx);

        tracing::debug!("Input context created");
        ctx
    }
}

impl InputContext {
    pub fn builder(scheduler: Rc<dyn Scheduler>, dispatcher: Rc<dyn RoutedDispatch>) -> InputContextBuilder {
        InputContextBuilder {
            config: InputConfig::default(),
            scheduler,
            dispatcher,
            hit_tester: Rc::new(BoundsHitTester),
            locator: None,
            text_services: None,
            gestures: None,
        }
    }

    pub fn downgrade(&self) -> WeakInputContext {
        WeakInputContext {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &InputConfig {
        &self.inner.config
    }

    /// Read access to the element tree
    ///
    /// Do not hold the guard across calls back into the context.
    pub fn tree(&self) -> Ref<'_, ElementTree> {
        self.inner.tree.borrow()
    }

    pub(crate) fn tree_mut(&self) -> RefMut<'_, ElementTree> {
        self.inner.tree.borrow_mut()
    }

    pub(crate) fn manager(&self) -> &InputManager {
        &self.inner.manager
    }

    pub fn keyboard(&self) -> &KeyboardDevice {
        &self.inner.keyboard
    }

    pub fn mouse(&self) -> &MouseDevice {
        &self.inner.mouse
    }

    pub fn touch(&self) -> &TouchDevice {
        &self.inner.touch
    }

    pub(crate) fn dispatcher(&self) -> Rc<dyn RoutedDispatch> {
        Rc::clone(&self.inner.dispatcher)
    }

    pub(crate) fn text_services(&self) -> Option<Rc<dyn TextServices>> {
        self.inner.text_services.clone()
    }

    pub(crate) fn gestures(&self) -> Option<Rc<dyn GestureEngine>> {
        self.inner.gestures.clone()
    }

    /// Run `f` later at `priority`; dropped if the context is gone by then
    pub(crate) fn schedule(&self, priority: Priority, f: impl FnOnce(&InputContext) + 'static) {
        let weak = self.downgrade();
        self.inner.scheduler.schedule(
            priority,
            Box::new(move || {
                if let Some(ctx) = weak.upgrade() {
                    f(&ctx);
                }
            }),
        );
    }

    // =========================================================================
    // Presentation sources
    // =========================================================================

    /// Attach an unparented root element to a presentation source
    pub fn register_source(
        &self,
        source: SourceId,
        root: ElementId,
        provider: Option<Rc<dyn InputProvider>>,
    ) -> Result<()> {
        {
            let mut tree = self.tree_mut();
            if !tree.contains(root) || tree.parent(root).is_some() {
                return Err(InputError::InvalidElement(root));
            }
            tree.set_source(root, Some(source))?;
        }
        self.inner.sources.borrow_mut().insert(
            source,
            SourceEntry {
                root,
                provider,
                origin: Point::ZERO,
            },
        );
        tracing::debug!("Registered source {:?}", source);
        Ok(())
    }

    pub fn unregister_source(&self, source: SourceId) -> Result<()> {
        let entry = self
            .inner
            .sources
            .borrow_mut()
            .remove(&source)
            .ok_or(InputError::UnknownSource(source))?;
        // The root may already be gone; that is fine.
        let _ = self.tree_mut().set_source(entry.root, None);
        self.invalidate_hit_test();
        Ok(())
    }

    /// Move a source's client origin in screen space
    pub fn set_source_origin(&self, source: SourceId, origin: Point) -> Result<()> {
        let mut sources = self.inner.sources.borrow_mut();
        let entry = sources
            .get_mut(&source)
            .ok_or(InputError::UnknownSource(source))?;
        entry.origin = origin;
        Ok(())
    }

    pub fn source_root(&self, source: SourceId) -> Option<ElementId> {
        self.inner.sources.borrow().get(&source).map(|e| e.root)
    }

    pub(crate) fn source_origin(&self, source: SourceId) -> Point {
        self.inner
            .sources
            .borrow()
            .get(&source)
            .map_or(Point::ZERO, |e| e.origin)
    }

    pub(crate) fn provider(&self, source: SourceId) -> Option<Rc<dyn InputProvider>> {
        self.inner
            .sources
            .borrow()
            .get(&source)
            .and_then(|e| e.provider.clone())
    }

    /// Local hit test inside one source
    pub(crate) fn hit_test_source(&self, source: SourceId, point: Point) -> Option<HitResult> {
        let root = self.source_root(source)?;
        let tree = self.tree();
        self.inner.hit_tester.hit_test(&tree, root, point)
    }

    /// Source under a screen point, for global hit testing
    pub(crate) fn locate_source(&self, screen: Point) -> Option<SourceId> {
        self.inner
            .locator
            .as_ref()
            .and_then(|locator| locator.source_at(screen))
            .filter(|s| self.inner.sources.borrow().contains_key(s))
    }

    /// Convert a client point of `source` into `relative_to`'s space
    ///
    /// `None` keeps the source's client coordinates.
    pub(crate) fn translate_point(
        &self,
        source: Option<SourceId>,
        point: Point,
        relative_to: Option<ElementId>,
    ) -> Result<Point> {
        let Some(element) = relative_to else {
            return Ok(point);
        };
        let tree = self.tree();
        if !tree.contains(element) {
            return Err(InputError::InvalidElement(element));
        }
        let screen = source.map_or(Point::ZERO, |s| self.source_origin(s)) + point;
        let target_origin = tree
            .source_of(element)
            .map_or(Point::ZERO, |s| self.source_origin(s));
        Ok(screen - target_origin - tree.absolute_origin(element))
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    /// Synchronously process an item and everything it causes
    pub fn process_input(&self, input: InputEventArgs) -> Result<bool> {
        self.manager().process_input(self, input)
    }

    /// Process a raw report from a provider
    pub fn process_report(&self, report: InputReport) -> Result<bool> {
        self.process_input(InputEventArgs::report(report))
    }

    /// Stage an item for the scheduled continuation
    pub fn post_input(&self, input: InputEventArgs) {
        self.manager().post_input(self, input);
    }

    pub fn subscribe<F>(&self, phase: Phase, handler: F) -> SubscriptionId
    where
        F: Fn(&InputContext, &mut ProcessInputArgs) -> Result<()> + 'static,
    {
        self.manager().subscribe(phase, Rc::new(handler))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.manager().unsubscribe(id)
    }

    /// Device of the last semantic event processed
    pub fn most_recent_device(&self) -> Option<InputDevice> {
        self.manager().most_recent_device()
    }

    /// Stylus handoff queue sized from the configuration
    pub fn stylus_queue(&self) -> ReportQueue {
        ReportQueue::new(self.config().stylus_queue_capacity)
    }

    /// Post every report a background worker queued; returns how many
    pub fn pump_reports(&self, queue: &ReportQueue) -> usize {
        let reports = queue.drain();
        let count = reports.len();
        for report in reports {
            self.post_input(InputEventArgs::report(report));
        }
        if count > 0 {
            tracing::trace!("Pumped {} queued reports", count);
        }
        count
    }

    // =========================================================================
    // Tree mutation
    // =========================================================================

    pub fn insert_element(&self, parent: Option<ElementId>, props: ElementProps) -> Result<ElementId> {
        let id = self.tree_mut().insert(parent, props)?;
        if parent.is_some() {
            self.invalidate_hit_test();
        }
        Ok(id)
    }

    pub fn set_enabled(&self, id: ElementId, enabled: bool) -> Result<()> {
        self.update_props(id, |p| p.enabled = enabled)?;
        Ok(())
    }

    pub fn set_visible(&self, id: ElementId, visible: bool) -> Result<()> {
        if self.update_props(id, |p| p.visible = visible)? {
            self.invalidate_hit_test();
        }
        Ok(())
    }

    pub fn set_focusable(&self, id: ElementId, focusable: bool) -> Result<()> {
        self.update_props(id, |p| p.focusable = focusable)?;
        Ok(())
    }

    pub fn set_bounds(&self, id: ElementId, bounds: Rect) -> Result<()> {
        if self.update_props(id, |p| p.bounds = bounds)? {
            self.invalidate_hit_test();
        }
        Ok(())
    }

    pub fn set_manipulable(&self, id: ElementId, manipulable: bool) -> Result<()> {
        self.update_props(id, |p| p.manipulable = manipulable)?;
        Ok(())
    }

    /// Remove an element and its subtree
    ///
    /// Devices tracking anything inside it are reevaluated later, starting
    /// from the removed subtree's parent.
    pub fn detach_element(&self, id: ElementId) -> Result<()> {
        let (affected, parent) = {
            let mut tree = self.tree_mut();
            if !tree.contains(id) {
                return Err(InputError::InvalidElement(id));
            }
            let affected = tree.trackers_in_subtree(id);
            let parent = tree.parent(id);
            tree.remove_subtree(id)?;
            (affected, parent)
        };
        tracing::debug!("Detached {:?} ({} tracked)", id, affected.len());
        self.queue_reevaluation(affected, parent);
        self.invalidate_hit_test();
        Ok(())
    }

    /// Schedule one mouse resynchronization for after layout settles
    pub fn invalidate_hit_test(&self) {
        self.mouse().request_synchronize(self);
    }

    fn update_props(&self, id: ElementId, f: impl FnOnce(&mut ElementProps)) -> Result<bool> {
        let affected = {
            let mut tree = self.tree_mut();
            if !tree.update_props(id, f)? {
                return Ok(false);
            }
            tree.trackers_in_subtree(id)
        };
        self.queue_reevaluation(affected, None);
        Ok(true)
    }

    fn queue_reevaluation(&self, affected: Vec<(ElementId, Tracker)>, previous_ancestor: Option<ElementId>) {
        for (element, tracker) in affected {
            let entry = Reevaluation {
                element,
                tracker,
                previous_ancestor,
            };
            match tracker {
                Tracker::KeyboardFocus => self.keyboard().queue_reevaluation(self, entry),
                Tracker::MouseCapture | Tracker::MouseOver => self.mouse().queue_reevaluation(self, entry),
                Tracker::TouchCapture(_) | Tracker::TouchOver(_) => {
                    self.touch().queue_reevaluation(self, entry)
                }
            }
        }
    }

    // =========================================================================
    // Keyboard
    // =========================================================================

    /// Move keyboard focus; returns the element focused afterwards
    pub fn focus(&self, element: Option<ElementId>) -> Result<Option<ElementId>> {
        self.keyboard().focus(self, element)
    }

    pub fn clear_focus(&self) -> Result<()> {
        self.keyboard().focus(self, None)?;
        Ok(())
    }

    pub fn focused_element(&self) -> Option<ElementId> {
        self.keyboard().focused(self)
    }

    pub fn is_focusable(&self, element: ElementId) -> bool {
        crate::keyboard::is_focusable(&self.tree(), element)
    }

    /// Whether focus is on `element` or one of its descendants
    pub fn is_keyboard_focus_within(&self, element: ElementId) -> bool {
        self.focused_element()
            .is_some_and(|f| self.tree().is_within(f, element))
    }

    // =========================================================================
    // Mouse
    // =========================================================================

    /// Capture the mouse to `element`; `None` or [`CaptureMode::None`] releases
    pub fn mouse_capture(&self, element: Option<ElementId>, mode: CaptureMode) -> Result<bool> {
        self.mouse().capture(self, element, mode)
    }

    pub fn mouse_captured(&self) -> Option<ElementId> {
        self.mouse().captured(self)
    }

    pub fn mouse_directly_over(&self) -> Option<ElementId> {
        self.mouse().directly_over(self)
    }

    pub fn mouse_position(&self, relative_to: Option<ElementId>) -> Result<Point> {
        self.mouse().position(self, relative_to)
    }

    pub fn synchronize_mouse(&self) -> Result<()> {
        self.mouse().synchronize(self)
    }

    pub fn mouse_intermediate_points(
        &self,
        relative_to: Option<ElementId>,
        buffer: &mut [Point],
    ) -> Result<usize> {
        self.mouse().intermediate_points(self, relative_to, buffer)
    }

    /// Force a cursor regardless of what QueryCursor handlers choose
    pub fn set_override_cursor(&self, cursor: Option<Cursor>) -> Result<()> {
        self.mouse().set_override_cursor(self, cursor)
    }

    // =========================================================================
    // Touch
    // =========================================================================

    pub fn touch_capture(&self, contact: u64, element: Option<ElementId>, mode: CaptureMode) -> Result<bool> {
        self.touch().capture(self, contact, element, mode)
    }

    pub fn touch_captured(&self, contact: u64) -> Result<Option<ElementId>> {
        self.touch().captured(self, contact)
    }

    pub fn touch_directly_over(&self, contact: u64) -> Result<Option<ElementId>> {
        self.touch().directly_over(self, contact)
    }

    pub fn touch_position(&self, contact: u64, relative_to: Option<ElementId>) -> Result<Point> {
        self.touch().position(self, contact, relative_to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RoutedEvent;
    use crate::scheduler::LocalScheduler;
    use crate::testing::{init_tracing, pen_report, Fixture, Recorder, SOURCE};
    use tactile_platform::PenPhase;

    struct FixedLocator(SourceId);

    impl WindowLocator for FixedLocator {
        fn source_at(&self, _screen: Point) -> Option<SourceId> {
            Some(self.0)
        }
    }

    #[test]
    fn test_register_source_requires_unparented_root() {
        let fx = Fixture::new();
        assert_eq!(
            fx.ctx.register_source(SourceId(2), fx.panel, None),
            Err(InputError::InvalidElement(fx.panel))
        );
        assert_eq!(
            fx.ctx.unregister_source(SourceId(9)),
            Err(InputError::UnknownSource(SourceId(9)))
        );
        assert_eq!(fx.ctx.source_root(SOURCE), Some(fx.root));
        assert!(fx.ctx.tree().is_source_root(fx.root));
    }

    #[test]
    fn test_pump_reports_posts_in_order() {
        let fx = Fixture::new();
        let queue = fx.ctx.stylus_queue();
        for phase in [PenPhase::Down, PenPhase::Move, PenPhase::Up] {
            assert!(queue.push(pen_report(phase, Point::new(20.0, 20.0))));
        }

        assert_eq!(fx.ctx.pump_reports(&queue), 3);
        assert!(queue.is_empty());
        assert!(fx.recorder.events().is_empty());

        fx.scheduler.run_pending();
        let events: Vec<_> = fx.recorder.events().into_iter().map(|(e, _)| e).collect();
        let down = events.iter().position(|e| *e == RoutedEvent::MouseDown);
        let up = events.iter().position(|e| *e == RoutedEvent::MouseUp);
        assert!(down.is_some());
        assert!(down < up);
        assert!(!fx.ctx.mouse().button_state(tactile_platform::MouseButton::Left));
    }

    #[test]
    fn test_global_synchronize_switches_source() {
        init_tracing();
        let scheduler = Rc::new(LocalScheduler::new());
        let recorder = Rc::new(Recorder::default());
        let ctx = InputContext::builder(scheduler.clone(), recorder.clone())
            .window_locator(Rc::new(FixedLocator(SourceId(2))))
            .build();

        let first = ctx
            .insert_element(None, ElementProps::new(Rect::new(0.0, 0.0, 100.0, 100.0)))
            .unwrap();
        let second = ctx
            .insert_element(None, ElementProps::new(Rect::new(0.0, 0.0, 100.0, 100.0)))
            .unwrap();
        let inner = ctx
            .insert_element(Some(second), ElementProps::new(Rect::new(5.0, 5.0, 20.0, 20.0)))
            .unwrap();
        ctx.register_source(SourceId(1), first, None).unwrap();
        ctx.register_source(SourceId(2), second, None).unwrap();
        ctx.set_source_origin(SourceId(2), Point::new(10.0, 10.0)).unwrap();

        ctx.process_report(InputReport::new(
            SourceId(1),
            0,
            tactile_platform::ReportPayload::Mouse(tactile_platform::MouseEvent::Moved {
                position: Point::new(20.0, 20.0),
                history: Vec::new(),
            }),
        ))
        .unwrap();
        // Ordinary moves stay local to their source.
        assert_eq!(ctx.mouse_directly_over(), Some(first));

        ctx.synchronize_mouse().unwrap();
        assert_eq!(ctx.mouse_directly_over(), Some(inner));
        assert_eq!(ctx.mouse_position(None).unwrap(), Point::new(10.0, 10.0));
        assert_eq!(ctx.mouse_position(Some(inner)).unwrap(), Point::new(5.0, 5.0));
        scheduler.run_pending();
    }

    #[test]
    fn test_detach_unknown_element_fails() {
        let fx = Fixture::new();
        let a = fx.a;
        fx.ctx.detach_element(a).unwrap();
        assert_eq!(fx.ctx.detach_element(a), Err(InputError::InvalidElement(a)));
        assert_eq!(fx.ctx.set_enabled(a, false), Err(InputError::InvalidElement(a)));
        assert_eq!(fx.ctx.focus(Some(a)), Err(InputError::InvalidElement(a)));
    }

    #[test]
    fn test_keyboard_focus_within() {
        let fx = Fixture::new();
        fx.ctx.focus(Some(fx.a)).unwrap();
        assert!(fx.ctx.is_keyboard_focus_within(fx.panel));
        assert!(fx.ctx.is_keyboard_focus_within(fx.a));
        assert!(!fx.ctx.is_keyboard_focus_within(fx.b));
    }

    #[test]
    fn test_scheduled_tasks_outlive_context() {
        let fx = Fixture::new();
        let weak = fx.ctx.downgrade();
        assert!(weak.upgrade().is_some());
        let Fixture { ctx, scheduler, .. } = fx;
        ctx.invalidate_hit_test();
        drop(ctx);
        assert!(weak.upgrade().is_none());
        // Tasks scheduled before the drop become no-ops.
        scheduler.run_pending();
    }
}
