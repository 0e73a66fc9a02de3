//! The five-phase input pipeline
//!
//! # Architecture
//!
//! ```text
//! process_input(args)
//!     ↓ push marker, push args
//! drain until own marker:
//!     pop item
//!     ↓ pre-process   (may cancel, may push)
//!     ↓ pre-notify    (informational)
//!     ↓ dispatch      (routed, may set handled)
//!     ↓ post-notify   (informational)
//!     ↓ post-process  (may push derived events)
//! ```
//!
//! Handlers run in reverse subscription order in every phase, so the most
//! recently installed handler sees each item first. Items a handler pushes
//! are staged once its phase finishes, in submission order, above every
//! older item.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::context::InputContext;
use crate::error::{InputError, Result};
use crate::event::{InputDevice, InputEventArgs, RoutedEvent};
use crate::staging::{MarkerPosition, StagingArea};

/// Pipeline phases handlers can subscribe to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    PreProcess,
    PreNotify,
    PostNotify,
    PostProcess,
}

impl Phase {
    const ALL: [Phase; 4] = [
        Phase::PreProcess,
        Phase::PreNotify,
        Phase::PostNotify,
        Phase::PostProcess,
    ];

    fn index(self) -> usize {
        match self {
            Phase::PreProcess => 0,
            Phase::PreNotify => 1,
            Phase::PostNotify => 2,
            Phase::PostProcess => 3,
        }
    }
}

/// Handle returned by [`InputContext::subscribe`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Phase handler
///
/// Returning `Err` skips the remaining handlers of this phase for this item.
pub type PhaseHandler = Rc<dyn Fn(&InputContext, &mut ProcessInputArgs) -> Result<()>>;

/// What a phase handler sees
pub struct ProcessInputArgs {
    phase: Phase,
    input: Box<InputEventArgs>,
    canceled: bool,
    pushed: Vec<InputEventArgs>,
}

impl ProcessInputArgs {
    fn new(input: Box<InputEventArgs>) -> Self {
        Self {
            phase: Phase::PreProcess,
            input,
            canceled: false,
            pushed: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn input(&self) -> &InputEventArgs {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputEventArgs {
        &mut self.input
    }

    /// Drop the item: remaining phases are skipped
    ///
    /// Only honored during pre-process.
    pub fn cancel(&mut self) {
        if self.phase == Phase::PreProcess {
            self.canceled = true;
        } else {
            tracing::warn!("cancel() ignored outside pre-process ({:?})", self.phase);
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Stage a new item ahead of everything queued before the current one
    pub fn push_input(&mut self, input: InputEventArgs) {
        self.pushed.push(input);
    }

    /// Stage the bubbling twin of a preview, carrying its handled state
    pub(crate) fn push_bubble_counterpart(&mut self) {
        let input = &self.input;
        if let Some(bubble) = input.event().bubble_counterpart() {
            let mut next = input.derive(bubble, input.target(), input.payload().clone());
            next.handled = input.handled;
            self.pushed.push(next);
        }
    }
}

pub(crate) struct InputManager {
    staging: RefCell<StagingArea>,
    /// Items posted for the continuation, oldest first
    posted: RefCell<VecDeque<InputEventArgs>>,
    handlers: RefCell<[Vec<(SubscriptionId, PhaseHandler)>; 4]>,
    next_subscription: Cell<u64>,
    continuation_pending: Cell<bool>,
    most_recent_device: Cell<Option<InputDevice>>,
}

impl InputManager {
    pub fn new() -> Self {
        Self {
            staging: RefCell::new(StagingArea::default()),
            posted: RefCell::new(VecDeque::new()),
            handlers: RefCell::new(Default::default()),
            next_subscription: Cell::new(0),
            continuation_pending: Cell::new(false),
            most_recent_device: Cell::new(None),
        }
    }

    pub fn subscribe(&self, phase: Phase, handler: PhaseHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.get());
        self.next_subscription.set(id.0 + 1);
        self.handlers.borrow_mut()[phase.index()].push((id, handler));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        for phase in Phase::ALL {
            let list = &mut handlers[phase.index()];
            if let Some(pos) = list.iter().position(|(sid, _)| *sid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn most_recent_device(&self) -> Option<InputDevice> {
        self.most_recent_device.get()
    }

    pub fn is_continuation_pending(&self) -> bool {
        self.continuation_pending.get()
    }

    pub fn staged_len(&self) -> usize {
        self.staging.borrow().len()
    }

    pub fn posted_len(&self) -> usize {
        self.posted.borrow().len()
    }

    /// Synchronously process one item and everything it causes
    pub fn process_input(&self, ctx: &InputContext, input: InputEventArgs) -> Result<bool> {
        let marker = {
            let mut staging = self.staging.borrow_mut();
            let marker = staging.push_marker();
            staging.push(input);
            marker
        };
        tracing::trace!("process_input: marker {:?}", marker.id);

        self.request_continuation(ctx);
        let result = self.drain_to(ctx, marker);
        if self.staging.borrow().has_items() || !self.posted.borrow().is_empty() {
            self.request_continuation(ctx);
        }
        result
    }

    /// Queue an item without draining; the continuation stages it
    ///
    /// Posted items are processed in posting order, each once the staging
    /// area is otherwise empty.
    pub fn post_input(&self, ctx: &InputContext, input: InputEventArgs) {
        self.posted.borrow_mut().push_back(input);
        self.request_continuation(ctx);
    }

    /// Schedule the drain continuation unless one is already pending
    fn request_continuation(&self, ctx: &InputContext) {
        if self.continuation_pending.replace(true) {
            return;
        }
        tracing::trace!("Scheduling input continuation");
        ctx.schedule(ctx.config().input_priority, |ctx| {
            ctx.manager().run_continuation(ctx);
        });
    }

    /// Drain whatever is staged above the topmost marker, then posted items
    fn run_continuation(&self, ctx: &InputContext) {
        self.continuation_pending.set(false);
        loop {
            self.drain_unmarked(ctx);
            if self.staging.borrow().len() > 0 {
                // A marker is on top: an active drain owns the rest.
                tracing::trace!("Continuation stopped at a marker");
                break;
            }
            let next = self.posted.borrow_mut().pop_front();
            let Some(item) = next else { break };
            self.staging.borrow_mut().push(item);
        }
    }

    fn drain_unmarked(&self, ctx: &InputContext) {
        loop {
            let next = self.staging.borrow_mut().pop_item();
            let Some(item) = next else { break };
            if let Err(err) = self.process_item(ctx, item) {
                tracing::warn!("Input continuation: {}", err);
            }
        }
    }

    fn drain_to(&self, ctx: &InputContext, marker: MarkerPosition) -> Result<bool> {
        let mut handled = false;
        let mut first_error: Option<InputError> = None;

        loop {
            let next = self.staging.borrow_mut().pop_to(marker)?;
            let Some(item) = next else { break };
            match self.process_item(ctx, item) {
                Ok(h) => handled |= h,
                Err(err) => {
                    tracing::warn!("Input handler error: {}", err);
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(handled),
        }
    }

    fn process_item(&self, ctx: &InputContext, item: Box<InputEventArgs>) -> Result<bool> {
        let mut args = ProcessInputArgs::new(item);
        if args.input.event() != RoutedEvent::InputReport {
            self.most_recent_device.set(Some(args.input.device()));
        }
        tracing::trace!("Processing {:?}", args.input.event());

        self.run_phase(ctx, Phase::PreProcess, &mut args)?;
        if args.canceled {
            tracing::trace!("{:?} canceled in pre-process", args.input.event());
            return Ok(false);
        }

        self.run_phase(ctx, Phase::PreNotify, &mut args)?;

        if args.input.event() != RoutedEvent::InputReport {
            if let Some(target) = args.input.target() {
                if ctx.tree().contains(target) {
                    let handled = ctx.dispatcher().dispatch(ctx, target, &mut args.input)?;
                    args.input.handled |= handled;
                }
            }
        }

        self.run_phase(ctx, Phase::PostNotify, &mut args)?;
        self.run_phase(ctx, Phase::PostProcess, &mut args)?;

        Ok(args.input.handled)
    }

    /// Fan out one phase in reverse subscription order, then stage pushes
    fn run_phase(&self, ctx: &InputContext, phase: Phase, args: &mut ProcessInputArgs) -> Result<()> {
        args.phase = phase;
        let handlers: Vec<PhaseHandler> = self.handlers.borrow()[phase.index()]
            .iter()
            .map(|(_, h)| Rc::clone(h))
            .collect();

        let mut result = Ok(());
        for handler in handlers.iter().rev() {
            if let Err(err) = handler(ctx, args) {
                result = Err(err);
                break;
            }
        }

        if !args.pushed.is_empty() {
            let batch = std::mem::take(&mut args.pushed);
            self.staging.borrow_mut().push_batch(batch);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use crate::testing::Fixture;
    use crate::tree::ElementId;

    fn item(event: RoutedEvent, target: ElementId) -> InputEventArgs {
        InputEventArgs::new(event, InputDevice::Mouse, Some(target), EventPayload::None)
    }

    #[test]
    fn test_pushed_items_run_in_submission_order() {
        let fx = Fixture::new();
        let (a, b) = (fx.a, fx.b);
        fx.ctx.subscribe(Phase::PostProcess, move |_, args| {
            if args.input().event() == RoutedEvent::GotMouseCapture {
                args.push_input(item(RoutedEvent::LostMouseCapture, a));
                args.push_input(item(RoutedEvent::MouseEnter, b));
            }
            Ok(())
        });

        fx.ctx.process_input(item(RoutedEvent::GotMouseCapture, a)).unwrap();
        assert_eq!(
            fx.recorder.events(),
            vec![
                (RoutedEvent::GotMouseCapture, a),
                (RoutedEvent::LostMouseCapture, a),
                (RoutedEvent::MouseEnter, b),
            ]
        );
    }

    #[test]
    fn test_pushed_items_drain_depth_first() {
        let fx = Fixture::new();
        let (a, b) = (fx.a, fx.b);
        fx.ctx.subscribe(Phase::PostProcess, move |_, args| {
            match args.input().event() {
                RoutedEvent::GotMouseCapture => {
                    args.push_input(item(RoutedEvent::LostMouseCapture, a));
                    args.push_input(item(RoutedEvent::MouseEnter, b));
                }
                RoutedEvent::LostMouseCapture => {
                    args.push_input(item(RoutedEvent::MouseLeave, a));
                }
                _ => {}
            }
            Ok(())
        });

        fx.ctx.process_input(item(RoutedEvent::GotMouseCapture, a)).unwrap();
        let events: Vec<_> = fx.recorder.events().into_iter().map(|(e, _)| e).collect();
        assert_eq!(
            events,
            vec![
                RoutedEvent::GotMouseCapture,
                RoutedEvent::LostMouseCapture,
                RoutedEvent::MouseLeave,
                RoutedEvent::MouseEnter,
            ]
        );
    }

    #[test]
    fn test_nested_process_input_drains_only_its_own_items() {
        let fx = Fixture::new();
        let (a, b) = (fx.a, fx.b);
        fx.recorder.on_event(RoutedEvent::GotMouseCapture, move |ctx, _| {
            ctx.process_input(item(RoutedEvent::MouseEnter, b)).unwrap();
        });

        fx.ctx.post_input(item(RoutedEvent::MouseLeave, a));
        fx.ctx.process_input(item(RoutedEvent::GotMouseCapture, a)).unwrap();
        assert_eq!(
            fx.recorder.events(),
            vec![(RoutedEvent::GotMouseCapture, a), (RoutedEvent::MouseEnter, b)]
        );
        assert_eq!(fx.ctx.manager().posted_len(), 1);
        assert_eq!(fx.ctx.manager().staged_len(), 0);

        fx.scheduler.run_pending();
        assert_eq!(fx.recorder.events().last(), Some(&(RoutedEvent::MouseLeave, a)));
        assert_eq!(fx.ctx.manager().posted_len(), 0);
    }

    #[test]
    fn test_posted_items_keep_posting_order() {
        let fx = Fixture::new();
        fx.ctx.post_input(item(RoutedEvent::MouseEnter, fx.a));
        fx.ctx.post_input(item(RoutedEvent::MouseLeave, fx.a));
        assert!(fx.ctx.manager().is_continuation_pending());
        assert_eq!(fx.scheduler.pending(), 1);
        assert!(fx.recorder.events().is_empty());

        fx.scheduler.run_pending();
        assert_eq!(
            fx.recorder.events(),
            vec![(RoutedEvent::MouseEnter, fx.a), (RoutedEvent::MouseLeave, fx.a)]
        );
        assert!(!fx.ctx.manager().is_continuation_pending());
    }

    #[test]
    fn test_cancel_skips_dispatch() {
        let fx = Fixture::new();
        fx.ctx.subscribe(Phase::PreProcess, |_, args| {
            args.cancel();
            Ok(())
        });
        let handled = fx.ctx.process_input(item(RoutedEvent::GotMouseCapture, fx.a)).unwrap();
        assert!(!handled);
        assert!(fx.recorder.events().is_empty());
    }

    #[test]
    fn test_cancel_outside_pre_process_is_ignored() {
        let fx = Fixture::new();
        fx.ctx.subscribe(Phase::PreNotify, |_, args| {
            args.cancel();
            assert!(!args.is_canceled());
            Ok(())
        });
        fx.ctx.process_input(item(RoutedEvent::GotMouseCapture, fx.a)).unwrap();
        assert_eq!(fx.recorder.events().len(), 1);
    }

    #[test]
    fn test_handler_error_stops_phase_but_drain_continues() {
        let fx = Fixture::new();
        let (a, b) = (fx.a, fx.b);
        let observed = Rc::new(Cell::new(0));
        let counter = observed.clone();
        fx.ctx.subscribe(Phase::PostProcess, move |_, args| {
            if args.input().event() == RoutedEvent::GotMouseCapture {
                counter.set(counter.get() + 1);
            }
            Ok(())
        });
        fx.ctx.subscribe(Phase::PostProcess, move |_, args| {
            if args.input().event() == RoutedEvent::GotMouseCapture {
                args.push_input(item(RoutedEvent::MouseEnter, b));
                return Err(InputError::handler("boom"));
            }
            Ok(())
        });

        let result = fx.ctx.process_input(item(RoutedEvent::GotMouseCapture, a));
        assert_eq!(result, Err(InputError::Handler("boom".into())));
        assert_eq!(observed.get(), 0);
        assert!(fx.recorder.events().contains(&(RoutedEvent::MouseEnter, b)));
        assert_eq!(fx.ctx.manager().staged_len(), 0);
    }

    #[test]
    fn test_handlers_run_in_reverse_subscription_order() {
        let fx = Fixture::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = log.clone();
        let second = log.clone();
        fx.ctx.subscribe(Phase::PreNotify, move |_, _| {
            first.borrow_mut().push("first");
            Ok(())
        });
        let id = fx.ctx.subscribe(Phase::PreNotify, move |_, _| {
            second.borrow_mut().push("second");
            Ok(())
        });

        fx.ctx.process_input(item(RoutedEvent::GotMouseCapture, fx.a)).unwrap();
        assert_eq!(*log.borrow(), vec!["second", "first"]);

        assert!(fx.ctx.unsubscribe(id));
        assert!(!fx.ctx.unsubscribe(id));
        fx.ctx.process_input(item(RoutedEvent::GotMouseCapture, fx.a)).unwrap();
        assert_eq!(*log.borrow(), vec!["second", "first", "first"]);
    }

    #[test]
    fn test_dead_target_is_not_dispatched() {
        let fx = Fixture::new();
        let a = fx.a;
        fx.ctx.detach_element(a).unwrap();
        let handled = fx.ctx.process_input(item(RoutedEvent::GotMouseCapture, a)).unwrap();
        assert!(!handled);
        assert!(fx.recorder.events().is_empty());
        assert_eq!(fx.ctx.most_recent_device(), Some(InputDevice::Mouse));
    }
}
