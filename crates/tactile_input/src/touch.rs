//! Touch contacts: per-contact capture, directly-over, and gesture promotion
//!
//! Each active contact carries the same capture/over state the mouse has,
//! keyed by contact id. A contact captured to a manipulable element is
//! promoted: the [`GestureEngine`] is told about it on got-capture, sees its
//! moves and lifts first, and is told to forget it on lost-capture. Routed
//! touch events for a promoted contact are raised only when the engine does
//! not consume the report.

use std::cell::RefCell;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tactile_platform::{InputReport, Point, ReportPayload, SourceId, TouchEvent};

use crate::context::InputContext;
use crate::error::{InputError, Result};
use crate::event::{EventPayload, InputDevice, InputEventArgs, RoutedEvent, TouchData};
use crate::hit_test::{resolve_capture, CaptureMode};
use crate::manager::{Phase, ProcessInputArgs};
use crate::reevaluate::{Reevaluation, ReevaluationSet};
use crate::tree::{diff_paths, ElementId, Tracker};

/// Sibling engine that consumes promoted contacts
pub trait GestureEngine {
    fn add_contact(&self, contact: u64, element: ElementId, position: Point);
    /// Returns true when the engine consumed the report
    fn report(&self, contact: u64, event: &TouchEvent) -> bool;
    fn remove_contact(&self, contact: u64);
}

#[derive(Clone, Debug)]
struct Contact {
    source: SourceId,
    position: Point,
    timestamp: u64,
    last_hit: Option<Point>,
    over: Option<ElementId>,
    over_path: SmallVec<[ElementId; 8]>,
    captured: Option<ElementId>,
    capture_mode: CaptureMode,
    promoted: bool,
}

impl Contact {
    fn new(source: SourceId, position: Point, timestamp: u64) -> Self {
        Self {
            source,
            position,
            timestamp,
            last_hit: None,
            over: None,
            over_path: SmallVec::new(),
            captured: None,
            capture_mode: CaptureMode::None,
            promoted: false,
        }
    }
}

/// Touch device state machine
pub struct TouchDevice {
    contacts: RefCell<FxHashMap<u64, Contact>>,
    reevaluation: ReevaluationSet,
}

impl TouchDevice {
    pub(crate) fn new() -> Self {
        Self {
            contacts: RefCell::new(FxHashMap::default()),
            reevaluation: ReevaluationSet::default(),
        }
    }

    pub(crate) fn install(ctx: &InputContext) {
        ctx.subscribe(Phase::PreNotify, |ctx, args| ctx.touch().pre_notify(ctx, args));
        ctx.subscribe(Phase::PostProcess, |ctx, args| ctx.touch().post_process(ctx, args));
    }

    /// Number of contacts currently down
    pub fn active_contacts(&self) -> usize {
        self.contacts.borrow().len()
    }

    pub fn is_active(&self, contact: u64) -> bool {
        self.contacts.borrow().contains_key(&contact)
    }

    /// Whether the gesture engine currently owns the contact
    pub fn is_promoted(&self, contact: u64) -> bool {
        self.contacts.borrow().get(&contact).is_some_and(|c| c.promoted)
    }

    fn contact(&self, contact: u64) -> Result<Contact> {
        self.contacts
            .borrow()
            .get(&contact)
            .cloned()
            .ok_or(InputError::UnknownContact(contact))
    }

    pub(crate) fn captured(&self, ctx: &InputContext, contact: u64) -> Result<Option<ElementId>> {
        let captured = self.contact(contact)?.captured;
        Ok(captured.filter(|c| ctx.tree().contains(*c)))
    }

    pub(crate) fn directly_over(&self, ctx: &InputContext, contact: u64) -> Result<Option<ElementId>> {
        let over = self.contact(contact)?.over;
        Ok(over.filter(|o| ctx.tree().contains(*o)))
    }

    pub(crate) fn position(
        &self,
        ctx: &InputContext,
        contact: u64,
        relative_to: Option<ElementId>,
    ) -> Result<Point> {
        let state = self.contact(contact)?;
        ctx.translate_point(Some(state.source), state.position, relative_to)
    }

    // =========================================================================
    // Capture
    // =========================================================================

    pub(crate) fn capture(
        &self,
        ctx: &InputContext,
        contact: u64,
        element: Option<ElementId>,
        mode: CaptureMode,
    ) -> Result<bool> {
        let state = self.contact(contact)?;
        let element = if mode == CaptureMode::None { None } else { element };
        let mode = if element.is_none() { CaptureMode::None } else { mode };

        let manipulable = match element {
            Some(e) => {
                let tree = ctx.tree();
                if !tree.contains(e) {
                    return Err(InputError::InvalidElement(e));
                }
                if !tree.is_effectively_enabled(e) || !tree.is_effectively_visible(e) {
                    tracing::debug!("Refusing touch capture of {} to {:?}", contact, e);
                    return Ok(false);
                }
                tree.props(e).is_some_and(|p| p.manipulable)
            }
            None => false,
        };

        let old = state.captured;
        if old == element {
            if let Some(c) = self.contacts.borrow_mut().get_mut(&contact) {
                c.capture_mode = mode;
            }
            return Ok(true);
        }

        let tracker = Tracker::TouchCapture(contact);
        {
            let mut tree = ctx.tree_mut();
            if let Some(o) = old {
                tree.detach_tracker(o, tracker);
                if let Some(flags) = tree.flags_mut(o) {
                    flags.touches_captured = flags.touches_captured.saturating_sub(1);
                }
            }
            if let Some(n) = element {
                tree.attach_tracker(n, tracker);
                if let Some(flags) = tree.flags_mut(n) {
                    flags.touches_captured += 1;
                }
            }
        }

        let gestures = ctx.gestures();
        let promote = manipulable && gestures.is_some();
        if let Some(c) = self.contacts.borrow_mut().get_mut(&contact) {
            c.captured = element;
            c.capture_mode = mode;
            c.promoted = promote;
        }
        tracing::debug!("Touch {} capture {:?} -> {:?}", contact, old, element);

        if let Some(gestures) = &gestures {
            if state.promoted {
                gestures.remove_contact(contact);
            }
        }
        if let Some(o) = old.filter(|o| ctx.tree().contains(*o)) {
            let lost = self.event(&state, contact, RoutedEvent::LostTouchCapture, Some(o));
            ctx.process_input(lost)?;
        }
        if let (Some(n), Some(gestures)) = (element, &gestures) {
            if promote {
                tracing::debug!("Promoting touch {} to gestures on {:?}", contact, n);
                gestures.add_contact(contact, n, state.position);
            }
        }
        if let Some(n) = element {
            let got = self.event(&state, contact, RoutedEvent::GotTouchCapture, Some(n));
            ctx.process_input(got)?;
        }

        self.update_over(ctx, contact, true)?;
        Ok(true)
    }

    pub(crate) fn queue_reevaluation(&self, ctx: &InputContext, entry: Reevaluation) {
        if self.reevaluation.queue(entry) {
            tracing::debug!("Scheduling touch reevaluation");
            ctx.schedule(ctx.config().reevaluate_priority, |ctx| {
                if let Err(err) = ctx.touch().reevaluate(ctx) {
                    tracing::warn!("Touch reevaluation failed: {}", err);
                }
            });
        }
    }

    fn reevaluate(&self, ctx: &InputContext) -> Result<()> {
        let entries = self.reevaluation.take();
        let mut contacts: SmallVec<[u64; 4]> = entries
            .iter()
            .filter_map(|e| match e.tracker {
                Tracker::TouchCapture(c) | Tracker::TouchOver(c) => Some(c),
                _ => None,
            })
            .collect();
        contacts.sort_unstable();
        contacts.dedup();

        for contact in contacts {
            let Ok(state) = self.contact(contact) else {
                continue;
            };
            if let Some(c) = state.captured {
                let valid = {
                    let tree = ctx.tree();
                    tree.is_effectively_enabled(c) && tree.is_effectively_visible(c)
                };
                if !valid {
                    self.capture(ctx, contact, None, CaptureMode::None)?;
                    continue;
                }
            }
            self.update_over(ctx, contact, true)?;
        }
        Ok(())
    }

    // =========================================================================
    // Hit testing
    // =========================================================================

    fn update_over(&self, ctx: &InputContext, contact: u64, force: bool) -> Result<()> {
        let Ok(state) = self.contact(contact) else {
            return Ok(());
        };
        if !force && state.last_hit == Some(state.position) {
            return Ok(());
        }
        let hit = ctx.hit_test_source(state.source, state.position);
        let resolved = {
            let tree = ctx.tree();
            resolve_capture(&tree, hit.and_then(|h| h.enabled), state.captured, state.capture_mode)
        };
        if let Some(c) = self.contacts.borrow_mut().get_mut(&contact) {
            c.last_hit = Some(state.position);
        }
        self.set_over(ctx, contact, resolved.over)
    }

    fn set_over(&self, ctx: &InputContext, contact: u64, new: Option<ElementId>) -> Result<()> {
        let Ok(state) = self.contact(contact) else {
            return Ok(());
        };
        let new = new.filter(|n| ctx.tree().contains(*n));
        let new_path = match new {
            Some(n) => ctx.tree().path(n),
            None => SmallVec::new(),
        };
        if state.over == new && state.over_path == new_path {
            return Ok(());
        }

        let (leaves, enters) = diff_paths(&state.over_path, &new_path);
        let tracker = Tracker::TouchOver(contact);
        {
            let mut tree = ctx.tree_mut();
            if let Some(o) = state.over {
                tree.detach_tracker(o, tracker);
            }
            if let Some(n) = new {
                tree.attach_tracker(n, tracker);
            }
            for element in &leaves {
                if let Some(flags) = tree.flags_mut(*element) {
                    flags.touches_over = flags.touches_over.saturating_sub(1);
                }
            }
            for element in &enters {
                if let Some(flags) = tree.flags_mut(*element) {
                    flags.touches_over += 1;
                }
            }
        }
        if let Some(c) = self.contacts.borrow_mut().get_mut(&contact) {
            c.over = new;
            c.over_path = new_path;
        }

        for element in leaves {
            if ctx.tree().contains(element) {
                ctx.process_input(self.event(&state, contact, RoutedEvent::TouchLeave, Some(element)))?;
            }
        }
        for element in enters {
            if ctx.tree().contains(element) {
                ctx.process_input(self.event(&state, contact, RoutedEvent::TouchEnter, Some(element)))?;
            }
        }
        Ok(())
    }

    fn pre_notify(&self, ctx: &InputContext, args: &mut ProcessInputArgs) -> Result<()> {
        let (event, source, timestamp) = match args.input().as_report() {
            Some(InputReport {
                payload: ReportPayload::Touch(event),
                source,
                timestamp,
            }) => (event.clone(), *source, *timestamp),
            _ => return Ok(()),
        };
        let contact = event.id();
        let Some(position) = event.position() else {
            return Ok(());
        };
        if matches!(event, TouchEvent::Started { .. }) && self.is_active(contact) {
            tracing::warn!("Touch contact {} restarted without ending", contact);
            self.deactivate(ctx, contact)?;
        }

        {
            let mut contacts = self.contacts.borrow_mut();
            match &event {
                TouchEvent::Started { .. } => {
                    contacts.insert(contact, Contact::new(source, position, timestamp));
                }
                _ => match contacts.get_mut(&contact) {
                    Some(c) => {
                        c.position = position;
                        c.timestamp = timestamp;
                    }
                    None => {
                        tracing::warn!("Report for unknown touch contact {}", contact);
                        return Ok(());
                    }
                },
            }
        }

        self.update_over(ctx, contact, false)?;
        args.input_mut().tags.root = ctx.source_root(source);
        Ok(())
    }

    // =========================================================================
    // Translation
    // =========================================================================

    fn post_process(&self, ctx: &InputContext, args: &mut ProcessInputArgs) -> Result<()> {
        match args.input().event() {
            RoutedEvent::InputReport if !args.input().handled => self.translate_report(ctx, args),
            RoutedEvent::PreviewTouchDown | RoutedEvent::PreviewTouchMove | RoutedEvent::PreviewTouchUp => {
                args.push_bubble_counterpart();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn translate_report(&self, ctx: &InputContext, args: &mut ProcessInputArgs) -> Result<()> {
        let event = match args.input().as_report() {
            Some(InputReport {
                payload: ReportPayload::Touch(event),
                ..
            }) => event.clone(),
            _ => return Ok(()),
        };
        let contact = event.id();
        if !self.is_active(contact) {
            return Ok(());
        }

        match event {
            TouchEvent::Started { position, .. } => {
                let target = self.directly_over(ctx, contact)?;
                let manipulable = target.and_then(|t| ctx.tree().manipulable_ancestor(t));
                if let Some(m) = manipulable {
                    self.capture(ctx, contact, Some(m), CaptureMode::Element)?;
                }
                let target = self.directly_over(ctx, contact)?;
                let next = self.derive(args.input(), RoutedEvent::PreviewTouchDown, target, contact, position);
                args.push_input(next);
            }
            TouchEvent::Moved { position, .. } => {
                if self.consumed_by_gestures(ctx, contact, &event) {
                    return Ok(());
                }
                let target = self.directly_over(ctx, contact)?;
                let next = self.derive(args.input(), RoutedEvent::PreviewTouchMove, target, contact, position);
                args.push_input(next);
            }
            TouchEvent::Ended { position, .. } => {
                if !self.consumed_by_gestures(ctx, contact, &event) {
                    let target = self.directly_over(ctx, contact)?;
                    let up = self.derive(args.input(), RoutedEvent::PreviewTouchUp, target, contact, position);
                    // The contact is torn down right after, so the up must run now.
                    ctx.process_input(up)?;
                }
                self.deactivate(ctx, contact)?;
            }
            TouchEvent::Cancelled { .. } => {
                self.deactivate(ctx, contact)?;
            }
        }
        Ok(())
    }

    fn consumed_by_gestures(&self, ctx: &InputContext, contact: u64, event: &TouchEvent) -> bool {
        if !self.is_promoted(contact) {
            return false;
        }
        ctx.gestures().is_some_and(|g| g.report(contact, event))
    }

    /// Release capture, clear over, and forget the contact
    fn deactivate(&self, ctx: &InputContext, contact: u64) -> Result<()> {
        if !self.is_active(contact) {
            return Ok(());
        }
        self.capture(ctx, contact, None, CaptureMode::None)?;
        self.set_over(ctx, contact, None)?;
        self.contacts.borrow_mut().remove(&contact);
        tracing::trace!("Touch {} deactivated", contact);
        Ok(())
    }

    fn derive(
        &self,
        input: &InputEventArgs,
        event: RoutedEvent,
        target: Option<ElementId>,
        contact: u64,
        position: Point,
    ) -> InputEventArgs {
        input.derive(event, target, EventPayload::Touch(TouchData { contact, position }))
    }

    fn event(&self, state: &Contact, contact: u64, event: RoutedEvent, target: Option<ElementId>) -> InputEventArgs {
        InputEventArgs::new(
            event,
            InputDevice::Touch(contact),
            target,
            EventPayload::Touch(TouchData {
                contact,
                position: state.position,
            }),
        )
        .with_source(Some(state.source))
        .with_timestamp(state.timestamp)
    }
}
