//! Overlay-aware keyboard routing.
//!
//! Consumers (the focused pane, the command palette, confirmation modals)
//! register on a stack; the topmost consumer reporting itself active
//! receives each key event first and decides whether it was consumed.
//! The core only sees routed keys; sequence resolution happens upstream.

/// A key event as the front-end delivers it: a symbolic key name,
/// modifier flags, and the raw byte sequence to forward to a PTY.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyEvent {
    /// Symbolic name ("a", "enter", "f5", ...).
    pub key: String,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
    /// Raw bytes to write when the event is passed to a child.
    pub sequence: Vec<u8>,
}

impl KeyEvent {
    pub fn plain(key: &str, sequence: &[u8]) -> Self {
        Self {
            key: key.to_string(),
            sequence: sequence.to_vec(),
            ..Self::default()
        }
    }
}

/// Something that can consume key events while active.
pub trait KeyConsumer {
    /// Whether this consumer currently wants events (e.g. an overlay is
    /// open).
    fn is_active(&self) -> bool;
    /// Handle one event; return true when consumed.
    fn handle_key(&mut self, event: &KeyEvent) -> bool;
}

/// Token identifying a registered consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerId(u64);

/// Ordered overlay stack; later registrations sit on top.
#[derive(Default)]
pub struct KeyboardRouter {
    stack: Vec<(ConsumerId, Box<dyn KeyConsumer>)>,
    next_id: u64,
}

impl KeyboardRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a consumer onto the top of the stack.
    pub fn push(&mut self, consumer: Box<dyn KeyConsumer>) -> ConsumerId {
        self.next_id += 1;
        let id = ConsumerId(self.next_id);
        self.stack.push((id, consumer));
        id
    }

    /// Remove a consumer wherever it sits in the stack.
    pub fn remove(&mut self, id: ConsumerId) -> bool {
        let before = self.stack.len();
        self.stack.retain(|(cid, _)| *cid != id);
        self.stack.len() != before
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Route an event to the topmost active consumer. Returns true when
    /// some consumer reported it consumed.
    pub fn dispatch(&mut self, event: &KeyEvent) -> bool {
        for (_, consumer) in self.stack.iter_mut().rev() {
            if consumer.is_active() {
                return consumer.handle_key(event);
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder {
        active: Rc<RefCell<bool>>,
        seen: Rc<RefCell<Vec<String>>>,
        consume: bool,
        name: &'static str,
    }

    impl KeyConsumer for Recorder {
        fn is_active(&self) -> bool {
            *self.active.borrow()
        }

        fn handle_key(&mut self, event: &KeyEvent) -> bool {
            self.seen.borrow_mut().push(format!("{}:{}", self.name, event.key));
            self.consume
        }
    }

    fn recorder(
        name: &'static str,
        consume: bool,
    ) -> (Recorder, Rc<RefCell<bool>>, Rc<RefCell<Vec<String>>>) {
        let active = Rc::new(RefCell::new(true));
        let seen = Rc::new(RefCell::new(Vec::new()));
        (
            Recorder {
                active: Rc::clone(&active),
                seen: Rc::clone(&seen),
                consume,
                name,
            },
            active,
            seen,
        )
    }

    #[test]
    fn topmost_active_consumer_wins() {
        let mut router = KeyboardRouter::new();
        let (base, _, base_seen) = recorder("pane", true);
        let (overlay, _, overlay_seen) = recorder("palette", true);
        router.push(Box::new(base));
        router.push(Box::new(overlay));

        assert!(router.dispatch(&KeyEvent::plain("a", b"a")));
        assert_eq!(*overlay_seen.borrow(), vec!["palette:a"]);
        assert!(base_seen.borrow().is_empty());
    }

    #[test]
    fn inactive_overlays_are_skipped() {
        let mut router = KeyboardRouter::new();
        let (base, _, base_seen) = recorder("pane", true);
        let (overlay, overlay_active, overlay_seen) = recorder("modal", true);
        router.push(Box::new(base));
        router.push(Box::new(overlay));

        *overlay_active.borrow_mut() = false;
        assert!(router.dispatch(&KeyEvent::plain("x", b"x")));
        assert!(overlay_seen.borrow().is_empty());
        assert_eq!(*base_seen.borrow(), vec!["pane:x"]);
    }

    #[test]
    fn unconsumed_events_report_false_without_falling_through() {
        let mut router = KeyboardRouter::new();
        let (base, _, base_seen) = recorder("pane", true);
        let (overlay, _, _) = recorder("passive", false);
        router.push(Box::new(base));
        router.push(Box::new(overlay));

        // The active overlay declined the event; it is NOT retried on
        // lower layers.
        assert!(!router.dispatch(&KeyEvent::plain("q", b"q")));
        assert!(base_seen.borrow().is_empty());
    }

    #[test]
    fn removing_an_overlay_restores_the_layer_below() {
        let mut router = KeyboardRouter::new();
        let (base, _, base_seen) = recorder("pane", true);
        let (overlay, _, _) = recorder("modal", true);
        router.push(Box::new(base));
        let overlay_id = router.push(Box::new(overlay));

        assert!(router.remove(overlay_id));
        assert!(!router.remove(overlay_id));
        router.dispatch(&KeyEvent::plain("z", b"z"));
        assert_eq!(*base_seen.borrow(), vec!["pane:z"]);
    }

    #[test]
    fn empty_router_consumes_nothing() {
        let mut router = KeyboardRouter::new();
        assert!(!router.dispatch(&KeyEvent::plain("a", b"a")));
        assert!(router.is_empty());
    }
}
