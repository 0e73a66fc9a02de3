//! Routed dispatch of events to element handlers
//!
//! # Architecture
//!
//! ```text
//! InputManager (resolved target)
//!     ↓ RoutedDispatch::dispatch
//! HandlerRegistry (handlers indexed by (ElementId, RoutedEvent))
//!     ↓ tunnel: root → target, bubble: target → root, direct: target
//! Handler callback invoked
//! ```
//!
//! # Example
//!
//! ```ignore
//! let registry = Rc::new(HandlerRegistry::new());
//! registry.on(button, RoutedEvent::MouseDown, |ctx, _current, args| {
//!     ctx.focus(Some(button))?;
//!     args.mark_handled();
//!     Ok(())
//! });
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::context::InputContext;
use crate::error::Result;
use crate::event::{InputEventArgs, RoutedEvent, RoutingStrategy};
use crate::tree::{ElementId, ElementTree};

/// Delivers one event along its route; returns whether it ended handled
pub trait RoutedDispatch {
    fn dispatch(
        &self,
        ctx: &InputContext,
        target: ElementId,
        args: &mut InputEventArgs,
    ) -> Result<bool>;
}

/// Callback for handling routed events
///
/// Receives the element currently being visited. Uses Rc since input is
/// single-threaded.
pub type RoutedHandler = Rc<dyn Fn(&InputContext, ElementId, &mut InputEventArgs) -> Result<()>>;

#[derive(Clone)]
struct Registered {
    handler: RoutedHandler,
    handled_too: bool,
}

/// Element handler storage that doubles as the default dispatcher
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RefCell<FxHashMap<(ElementId, RoutedEvent), Vec<Registered>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler that is skipped once the event is handled
    pub fn on<F>(&self, element: ElementId, event: RoutedEvent, handler: F)
    where
        F: Fn(&InputContext, ElementId, &mut InputEventArgs) -> Result<()> + 'static,
    {
        self.insert(element, event, Rc::new(handler), false);
    }

    /// Register a handler that also sees already-handled events
    pub fn on_handled_too<F>(&self, element: ElementId, event: RoutedEvent, handler: F)
    where
        F: Fn(&InputContext, ElementId, &mut InputEventArgs) -> Result<()> + 'static,
    {
        self.insert(element, event, Rc::new(handler), true);
    }

    fn insert(&self, element: ElementId, event: RoutedEvent, handler: RoutedHandler, handled_too: bool) {
        self.handlers
            .borrow_mut()
            .entry((element, event))
            .or_default()
            .push(Registered {
                handler,
                handled_too,
            });
    }

    pub fn has_handler(&self, element: ElementId, event: RoutedEvent) -> bool {
        self.handlers.borrow().contains_key(&(element, event))
    }

    /// Drop every handler registered on `element`
    pub fn remove_element(&self, element: ElementId) {
        self.handlers.borrow_mut().retain(|(el, _), _| *el != element);
    }

    /// Elements visited for an event with the given routing
    pub fn route(tree: &ElementTree, target: ElementId, strategy: RoutingStrategy) -> SmallVec<[ElementId; 8]> {
        match strategy {
            RoutingStrategy::Tunnel => tree.path(target),
            RoutingStrategy::Bubble => tree.ancestors(target).collect(),
            RoutingStrategy::Direct => {
                let mut route = SmallVec::new();
                if tree.contains(target) {
                    route.push(target);
                }
                route
            }
        }
    }
}

impl RoutedDispatch for HandlerRegistry {
    fn dispatch(
        &self,
        ctx: &InputContext,
        target: ElementId,
        args: &mut InputEventArgs,
    ) -> Result<bool> {
        let route = {
            let tree = ctx.tree();
            Self::route(&tree, target, args.event().routing())
        };

        for node in route {
            // A handler earlier on the route may have detached this node.
            if !ctx.tree().contains(node) {
                continue;
            }
            let registered = self.handlers.borrow().get(&(node, args.event())).cloned();
            let Some(registered) = registered else {
                continue;
            };
            for entry in registered {
                if args.handled && !entry.handled_too {
                    continue;
                }
                (entry.handler)(ctx, node, args)?;
            }
        }

        Ok(args.handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::LocalScheduler;
    use crate::testing::{init_tracing, mouse_report, SOURCE};
    use crate::tree::{ElementProps, Rect};
    use tactile_platform::{MouseButton, MouseEvent, Point};

    type Visits = Rc<RefCell<Vec<(RoutedEvent, ElementId)>>>;

    struct Setup {
        ctx: InputContext,
        registry: Rc<HandlerRegistry>,
        root: ElementId,
        panel: ElementId,
        leaf: ElementId,
    }

    fn setup() -> Setup {
        init_tracing();
        let scheduler = Rc::new(LocalScheduler::new());
        let registry = Rc::new(HandlerRegistry::new());
        let ctx = InputContext::builder(scheduler, registry.clone()).build();
        let root = ctx
            .insert_element(None, ElementProps::new(Rect::new(0.0, 0.0, 200.0, 200.0)))
            .unwrap();
        ctx.register_source(SOURCE, root, None).unwrap();
        let panel = ctx
            .insert_element(Some(root), ElementProps::new(Rect::new(0.0, 0.0, 100.0, 100.0)))
            .unwrap();
        let leaf = ctx
            .insert_element(Some(panel), ElementProps::new(Rect::new(10.0, 10.0, 20.0, 20.0)))
            .unwrap();
        Setup {
            ctx,
            registry,
            root,
            panel,
            leaf,
        }
    }

    fn record(registry: &HandlerRegistry, visits: &Visits, element: ElementId, event: RoutedEvent) {
        let visits = visits.clone();
        registry.on(element, event, move |_, node, args| {
            visits.borrow_mut().push((args.event(), node));
            Ok(())
        });
    }

    fn press(ctx: &InputContext) {
        ctx.process_report(mouse_report(
            0,
            MouseEvent::ButtonPressed {
                button: MouseButton::Left,
                position: Point::new(15.0, 15.0),
            },
        ))
        .unwrap();
    }

    #[test]
    fn test_tunnel_then_bubble_order() {
        let s = setup();
        let visits: Visits = Rc::default();
        for element in [s.root, s.panel, s.leaf] {
            record(&s.registry, &visits, element, RoutedEvent::PreviewMouseDown);
            record(&s.registry, &visits, element, RoutedEvent::MouseDown);
        }

        press(&s.ctx);

        assert_eq!(
            *visits.borrow(),
            vec![
                (RoutedEvent::PreviewMouseDown, s.root),
                (RoutedEvent::PreviewMouseDown, s.panel),
                (RoutedEvent::PreviewMouseDown, s.leaf),
                (RoutedEvent::MouseDown, s.leaf),
                (RoutedEvent::MouseDown, s.panel),
                (RoutedEvent::MouseDown, s.root),
            ]
        );
    }

    #[test]
    fn test_handled_skips_ordinary_handlers() {
        let s = setup();
        let visits: Visits = Rc::default();
        s.registry.on(s.panel, RoutedEvent::MouseDown, |_, _, args| {
            args.mark_handled();
            Ok(())
        });
        record(&s.registry, &visits, s.root, RoutedEvent::MouseDown);
        let seen = visits.clone();
        s.registry
            .on_handled_too(s.root, RoutedEvent::MouseDown, move |_, node, args| {
                assert!(args.handled);
                seen.borrow_mut().push((RoutedEvent::MouseUp, node));
                Ok(())
            });

        press(&s.ctx);

        // Only the handled-too handler saw the event at the root.
        assert_eq!(*visits.borrow(), vec![(RoutedEvent::MouseUp, s.root)]);
    }

    #[test]
    fn test_handled_preview_carries_to_bubble() {
        let s = setup();
        let visits: Visits = Rc::default();
        s.registry.on(s.root, RoutedEvent::PreviewMouseDown, |_, _, args| {
            args.mark_handled();
            Ok(())
        });
        record(&s.registry, &visits, s.leaf, RoutedEvent::PreviewMouseDown);
        record(&s.registry, &visits, s.leaf, RoutedEvent::MouseDown);

        press(&s.ctx);

        assert!(visits.borrow().is_empty());
    }

    #[test]
    fn test_routes_and_removal() {
        let s = setup();
        {
            let tree = s.ctx.tree();
            assert_eq!(
                HandlerRegistry::route(&tree, s.leaf, RoutingStrategy::Bubble).as_slice(),
                &[s.leaf, s.panel, s.root]
            );
            assert_eq!(
                HandlerRegistry::route(&tree, s.leaf, RoutingStrategy::Direct).as_slice(),
                &[s.leaf]
            );
        }

        let visits: Visits = Rc::default();
        record(&s.registry, &visits, s.leaf, RoutedEvent::MouseDown);
        assert!(s.registry.has_handler(s.leaf, RoutedEvent::MouseDown));
        s.registry.remove_element(s.leaf);
        assert!(!s.registry.has_handler(s.leaf, RoutedEvent::MouseDown));

        s.ctx.detach_element(s.leaf).unwrap();
        let tree = s.ctx.tree();
        assert!(HandlerRegistry::route(&tree, s.leaf, RoutingStrategy::Direct).is_empty());
        assert!(HandlerRegistry::route(&tree, s.leaf, RoutingStrategy::Tunnel).is_empty());
    }

    #[test]
    fn test_handler_error_propagates() {
        let s = setup();
        s.registry.on(s.leaf, RoutedEvent::PreviewMouseDown, |_, _, _| {
            Err(crate::error::InputError::handler("refused"))
        });
        let result = s.ctx.process_report(mouse_report(
            0,
            MouseEvent::ButtonPressed {
                button: MouseButton::Left,
                position: Point::new(15.0, 15.0),
            },
        ));
        assert!(result.is_err());
    }
}
