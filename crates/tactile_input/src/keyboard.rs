//! Keyboard focus and key translation
//!
//! # Focus protocol
//!
//! ```text
//! focus(candidate)
//!     ↓ same as current → nothing happens
//!     ↓ ask old:  PreviewLostKeyboardFocus (handled → abort)
//!     ↓ ask new:  PreviewGotKeyboardFocus  (handled → abort)
//!     ↓ acquire:  provider.acquire_focus, bracketed by
//!                 PreviewProviderAcquireFocus / ProviderAcquireFocus
//!     ↓ commit:   trackers, is_focused flags, focus scope, text services
//!     ↓ LostKeyboardFocus(old), GotKeyboardFocus(new)
//! ```
//!
//! Tree changes never move focus inline; they queue a reevaluation that a
//! scheduled continuation flushes.

use std::cell::RefCell;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tactile_platform::{Key, KeyAction, Modifiers, ReportPayload, SourceId};

use crate::context::InputContext;
use crate::error::{InputError, Result};
use crate::event::{EventPayload, FocusChange, InputDevice, InputEventArgs, KeyData, RoutedEvent};
use crate::manager::{Phase, ProcessInputArgs};
use crate::reevaluate::{resume_point, Reevaluation, ReevaluationSet};
use crate::tree::{ElementId, ElementTree, Tracker};

/// Text-input collaborator told about every committed focus change
pub trait TextServices {
    fn focus_changed(&self, old: Option<ElementId>, new: Option<ElementId>);
}

/// Whether keyboard focus may land on `id`
pub fn is_focusable(tree: &ElementTree, id: ElementId) -> bool {
    let Some(props) = tree.props(id) else {
        return false;
    };
    tree.is_effectively_visible(id)
        && tree.is_effectively_enabled(id)
        && (props.focusable || props.focus_scope || tree.is_source_root(id))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FocusRequest {
    ask_old: bool,
    ask_new: bool,
    force_to_none: bool,
}

impl FocusRequest {
    const USER: FocusRequest = FocusRequest {
        ask_old: true,
        ask_new: true,
        force_to_none: false,
    };

    const REEVALUATE: FocusRequest = FocusRequest {
        ask_old: false,
        ask_new: true,
        force_to_none: true,
    };

    const SILENT: FocusRequest = FocusRequest {
        ask_old: false,
        ask_new: false,
        force_to_none: false,
    };
}

#[derive(Default)]
struct FocusState {
    focused: Option<ElementId>,
    active_source: Option<SourceId>,
    pressed: SmallVec<[Key; 8]>,
    modifiers: Modifiers,
    /// Focus remembered when a source was deactivated
    restore: FxHashMap<SourceId, ElementId>,
}

/// Keyboard device state machine
pub struct KeyboardDevice {
    state: RefCell<FocusState>,
    reevaluation: ReevaluationSet,
}

impl KeyboardDevice {
    pub(crate) fn new() -> Self {
        Self {
            state: RefCell::new(FocusState::default()),
            reevaluation: ReevaluationSet::default(),
        }
    }

    pub(crate) fn install(ctx: &InputContext) {
        ctx.subscribe(Phase::PostProcess, |ctx, args| {
            ctx.keyboard().post_process(ctx, args)
        });
    }

    /// Focused element, if it is still alive
    pub(crate) fn focused(&self, ctx: &InputContext) -> Option<ElementId> {
        let focused = self.state.borrow().focused;
        focused.filter(|f| ctx.tree().contains(*f))
    }

    /// Source that currently holds keyboard focus
    pub fn active_source(&self) -> Option<SourceId> {
        self.state.borrow().active_source
    }

    pub fn is_key_down(&self, key: Key) -> bool {
        self.state.borrow().pressed.contains(&key)
    }

    pub fn modifiers(&self) -> Modifiers {
        self.state.borrow().modifiers
    }

    /// User-initiated focus change
    pub(crate) fn focus(&self, ctx: &InputContext, candidate: Option<ElementId>) -> Result<Option<ElementId>> {
        if let Some(c) = candidate {
            if !ctx.tree().contains(c) {
                return Err(InputError::InvalidElement(c));
            }
        }
        self.change_focus(ctx, candidate, FocusRequest::USER)
    }

    fn change_focus(
        &self,
        ctx: &InputContext,
        candidate: Option<ElementId>,
        request: FocusRequest,
    ) -> Result<Option<ElementId>> {
        let old = self.focused(ctx);
        if candidate == old {
            // Drop a stale id left by a detached element.
            self.state.borrow_mut().focused = old;
            return Ok(old);
        }
        if let Some(c) = candidate {
            if !is_focusable(&ctx.tree(), c) {
                tracing::debug!("{:?} is not focusable", c);
                return Ok(old);
            }
        }

        let change = FocusChange { old, new: candidate };
        let source = candidate.and_then(|c| ctx.tree().source_of(c));

        if request.ask_old {
            if let Some(o) = old {
                let preview = focus_event(RoutedEvent::PreviewLostKeyboardFocus, o, change, source);
                if ctx.process_input(preview)? {
                    tracing::debug!("Focus change vetoed by {:?}", o);
                    return Ok(self.focused(ctx));
                }
            }
        }
        if request.ask_new {
            if let Some(c) = candidate {
                let preview = focus_event(RoutedEvent::PreviewGotKeyboardFocus, c, change, source);
                if ctx.process_input(preview)? {
                    tracing::debug!("Focus change vetoed by {:?}", c);
                    if request.force_to_none && self.focused(ctx) == old {
                        return self.change_focus(ctx, None, request);
                    }
                    return Ok(self.focused(ctx));
                }
            }
        }

        // Preview handlers may have moved focus themselves or removed the candidate.
        if self.focused(ctx) != old {
            return Ok(self.focused(ctx));
        }
        if let Some(c) = candidate {
            if !ctx.tree().contains(c) {
                return Ok(old);
            }
            if !self.acquire(ctx, c, source)? {
                if request.force_to_none {
                    return self.change_focus(ctx, None, request);
                }
                return Ok(old);
            }
        }

        self.commit(ctx, old, candidate);

        if let Some(o) = old.filter(|o| ctx.tree().contains(*o)) {
            ctx.process_input(focus_event(RoutedEvent::LostKeyboardFocus, o, change, source))?;
        }
        if let Some(n) = candidate.filter(|n| ctx.tree().contains(*n)) {
            ctx.process_input(focus_event(RoutedEvent::GotKeyboardFocus, n, change, source))?;
        }
        Ok(self.focused(ctx))
    }

    fn acquire(&self, ctx: &InputContext, element: ElementId, source: Option<SourceId>) -> Result<bool> {
        let preview = InputEventArgs::new(
            RoutedEvent::PreviewProviderAcquireFocus,
            InputDevice::Keyboard,
            Some(element),
            EventPayload::AcquireFocus {
                element,
                succeeded: None,
            },
        )
        .with_source(source);
        ctx.process_input(preview)?;

        // A source without a provider has nothing to refuse.
        let succeeded = match source.and_then(|s| ctx.provider(s)) {
            Some(provider) => provider.acquire_focus(false),
            None => true,
        };
        if !succeeded {
            tracing::warn!("Provider refused focus for {:?}", element);
        }

        let outcome = InputEventArgs::new(
            RoutedEvent::ProviderAcquireFocus,
            InputDevice::Keyboard,
            Some(element),
            EventPayload::AcquireFocus {
                element,
                succeeded: Some(succeeded),
            },
        )
        .with_source(source);
        ctx.process_input(outcome)?;
        Ok(succeeded)
    }

    fn commit(&self, ctx: &InputContext, old: Option<ElementId>, new: Option<ElementId>) {
        let source = {
            let mut tree = ctx.tree_mut();
            if let Some(o) = old {
                tree.detach_tracker(o, Tracker::KeyboardFocus);
                if let Some(flags) = tree.flags_mut(o) {
                    flags.focused = false;
                }
            }
            if let Some(n) = new {
                tree.attach_tracker(n, Tracker::KeyboardFocus);
                if let Some(flags) = tree.flags_mut(n) {
                    flags.focused = true;
                }
                tree.remember_scope_focus(n);
            }
            new.and_then(|n| tree.source_of(n))
        };
        {
            let mut state = self.state.borrow_mut();
            state.focused = new;
            if source.is_some() {
                state.active_source = source;
            }
        }
        tracing::debug!("Keyboard focus {:?} -> {:?}", old, new);

        if let Some(text) = ctx.text_services() {
            text.focus_changed(old, new);
        }
    }

    // =========================================================================
    // Reevaluation
    // =========================================================================

    pub(crate) fn queue_reevaluation(&self, ctx: &InputContext, entry: Reevaluation) {
        if self.reevaluation.queue(entry) {
            tracing::debug!("Scheduling focus reevaluation");
            ctx.schedule(ctx.config().reevaluate_priority, |ctx| {
                if let Err(err) = ctx.keyboard().reevaluate(ctx) {
                    tracing::warn!("Focus reevaluation failed: {}", err);
                }
            });
        }
    }

    fn reevaluate(&self, ctx: &InputContext) -> Result<()> {
        let entries = self.reevaluation.take();
        let Some(focused) = self.state.borrow().focused else {
            return Ok(());
        };

        let candidate = {
            let tree = ctx.tree();
            if is_focusable(&tree, focused) {
                return Ok(());
            }
            resume_point(&entries, &tree, focused)
                .and_then(|start| tree.ancestors(start).find(|a| is_focusable(&tree, *a)))
        };
        tracing::debug!("Reevaluating focus {:?} -> {:?}", focused, candidate);
        self.change_focus(ctx, candidate, FocusRequest::REEVALUATE)?;
        Ok(())
    }

    // =========================================================================
    // Key translation
    // =========================================================================

    fn post_process(&self, ctx: &InputContext, args: &mut ProcessInputArgs) -> Result<()> {
        match args.input().event() {
            RoutedEvent::InputReport if !args.input().handled => self.translate_report(ctx, args),
            RoutedEvent::PreviewKeyDown | RoutedEvent::PreviewKeyUp => {
                args.push_bubble_counterpart();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn translate_report(&self, ctx: &InputContext, args: &mut ProcessInputArgs) -> Result<()> {
        let (raw, source) = match args.input().as_report() {
            Some(report) => match &report.payload {
                ReportPayload::Keyboard(raw) => (raw.clone(), report.source),
                _ => return Ok(()),
            },
            None => return Ok(()),
        };

        let (event, key, is_repeat) = match raw.action {
            KeyAction::Down(key) => {
                let mut state = self.state.borrow_mut();
                state.modifiers = raw.modifiers;
                let is_repeat = state.pressed.contains(&key);
                if !is_repeat {
                    state.pressed.push(key);
                }
                (RoutedEvent::PreviewKeyDown, key, is_repeat)
            }
            KeyAction::Up(key) => {
                let mut state = self.state.borrow_mut();
                state.modifiers = raw.modifiers;
                state.pressed.retain(|k| *k != key);
                (RoutedEvent::PreviewKeyUp, key, false)
            }
            KeyAction::Activate => return self.activate(ctx, source),
            KeyAction::Deactivate => return self.deactivate(ctx, source),
        };

        let target = self.focused(ctx).or_else(|| ctx.source_root(source));
        let data = KeyData {
            key,
            modifiers: raw.modifiers,
            is_repeat,
        };
        let next = args.input().derive(event, target, EventPayload::Key(data));
        args.push_input(next);
        Ok(())
    }

    fn activate(&self, ctx: &InputContext, source: SourceId) -> Result<()> {
        let remembered = self.state.borrow_mut().restore.remove(&source);
        let target = remembered
            .filter(|r| is_focusable(&ctx.tree(), *r))
            .or_else(|| ctx.source_root(source));
        tracing::debug!("Source {:?} activated, restoring {:?}", source, target);
        self.state.borrow_mut().active_source = Some(source);
        if let Some(target) = target {
            self.change_focus(ctx, Some(target), FocusRequest::USER)?;
        }
        Ok(())
    }

    fn deactivate(&self, ctx: &InputContext, source: SourceId) -> Result<()> {
        let Some(focused) = self.focused(ctx) else {
            return Ok(());
        };
        if ctx.tree().source_of(focused) != Some(source) {
            return Ok(());
        }
        {
            let mut state = self.state.borrow_mut();
            state.restore.insert(source, focused);
            state.pressed.clear();
            state.modifiers = Modifiers::default();
        }
        tracing::debug!("Source {:?} deactivated, remembering {:?}", source, focused);
        self.change_focus(ctx, None, FocusRequest::SILENT)?;
        Ok(())
    }
}

fn focus_event(
    event: RoutedEvent,
    target: ElementId,
    change: FocusChange,
    source: Option<SourceId>,
) -> InputEventArgs {
    InputEventArgs::new(event, InputDevice::Keyboard, Some(target), EventPayload::Focus(change))
        .with_source(source)
}
