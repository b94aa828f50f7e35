//! Fan-out of PTY events to registered subscribers.
//!
//! Each PTY has independent channels for unified updates, scroll state,
//! title changes, and exit. Delivery is synchronous; a panicking subscriber
//! is logged and does not prevent delivery to its siblings. Exit callbacks
//! fire exactly once per PTY lifetime.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::term::{DirtyUpdate, ScrollState};

/// Structured exit information for a PTY child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// Token returned by every subscribe call; pass it back to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// Non-update notices delivered on the update channel's side band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineNotice {
    /// Scrollback archiving failed; older lines will be dropped.
    ScrollbackTruncated { pty_id: u64 },
    /// Persisting a session failed; the manager retries on the next tick.
    SessionPersistFailed { session_id: String, message: String },
}

type UpdateCallback = Box<dyn FnMut(&DirtyUpdate)>;
type ScrollCallback = Box<dyn FnMut(&ScrollState)>;
type TitleCallback = Box<dyn FnMut(&str)>;
type ExitCallback = Box<dyn FnMut(&ExitStatus)>;
type NoticeCallback = Box<dyn FnMut(&EngineNotice)>;

#[derive(Default)]
struct PtyChannels {
    update: Vec<(Subscription, UpdateCallback)>,
    scroll: Vec<(Subscription, ScrollCallback)>,
    title: Vec<(Subscription, TitleCallback)>,
    exit: Vec<(Subscription, ExitCallback)>,
    exit_fired: bool,
}

/// Per-PTY subscriber registry.
#[derive(Default)]
pub struct SubscriptionBus {
    channels: HashMap<u64, PtyChannels>,
    notices: Vec<(Subscription, NoticeCallback)>,
    next_token: u64,
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn token(&mut self) -> Subscription {
        self.next_token += 1;
        Subscription(self.next_token)
    }

    pub fn on_update(&mut self, pty_id: u64, cb: UpdateCallback) -> Subscription {
        let token = self.token();
        self.channels.entry(pty_id).or_default().update.push((token, cb));
        token
    }

    pub fn on_scroll(&mut self, pty_id: u64, cb: ScrollCallback) -> Subscription {
        let token = self.token();
        self.channels.entry(pty_id).or_default().scroll.push((token, cb));
        token
    }

    pub fn on_title(&mut self, pty_id: u64, cb: TitleCallback) -> Subscription {
        let token = self.token();
        self.channels.entry(pty_id).or_default().title.push((token, cb));
        token
    }

    /// Register an exit callback. If the PTY already exited, the callback
    /// is NOT invoked; exit delivery happens exactly once per PTY.
    pub fn on_exit(&mut self, pty_id: u64, cb: ExitCallback) -> Subscription {
        let token = self.token();
        self.channels.entry(pty_id).or_default().exit.push((token, cb));
        token
    }

    /// Engine-wide one-shot notices (scrollback truncation, persist
    /// failures). Not tied to one PTY.
    pub fn on_notice(&mut self, cb: NoticeCallback) -> Subscription {
        let token = self.token();
        self.notices.push((token, cb));
        token
    }

    /// Release a subscription from whichever channel holds it.
    pub fn unsubscribe(&mut self, token: Subscription) {
        for channels in self.channels.values_mut() {
            channels.update.retain(|(t, _)| *t != token);
            channels.scroll.retain(|(t, _)| *t != token);
            channels.title.retain(|(t, _)| *t != token);
            channels.exit.retain(|(t, _)| *t != token);
        }
        self.notices.retain(|(t, _)| *t != token);
    }

    /// Drop every subscription for a PTY (suspend path). Exit-fired state
    /// is preserved so a later resubscribe cannot re-arm exit delivery.
    pub fn detach_pty(&mut self, pty_id: u64) {
        if let Some(channels) = self.channels.get_mut(&pty_id) {
            channels.update.clear();
            channels.scroll.clear();
            channels.title.clear();
            channels.exit.clear();
        }
    }

    /// Forget a PTY entirely (destroy path).
    pub fn remove_pty(&mut self, pty_id: u64) {
        self.channels.remove(&pty_id);
    }

    pub fn emit_update(&mut self, pty_id: u64, update: &DirtyUpdate) {
        if let Some(channels) = self.channels.get_mut(&pty_id) {
            for (_, cb) in &mut channels.update {
                deliver(|| cb(update), "update");
            }
        }
    }

    pub fn emit_scroll(&mut self, pty_id: u64, scroll: &ScrollState) {
        if let Some(channels) = self.channels.get_mut(&pty_id) {
            for (_, cb) in &mut channels.scroll {
                deliver(|| cb(scroll), "scroll");
            }
        }
    }

    pub fn emit_title(&mut self, pty_id: u64, title: &str) {
        if let Some(channels) = self.channels.get_mut(&pty_id) {
            for (_, cb) in &mut channels.title {
                deliver(|| cb(title), "title");
            }
        }
    }

    /// Deliver exit to every exit subscriber, exactly once per PTY. Later
    /// calls are no-ops.
    pub fn emit_exit(&mut self, pty_id: u64, status: &ExitStatus) {
        if let Some(channels) = self.channels.get_mut(&pty_id) {
            if channels.exit_fired {
                return;
            }
            channels.exit_fired = true;
            for (_, cb) in &mut channels.exit {
                deliver(|| cb(status), "exit");
            }
        }
    }

    pub fn emit_notice(&mut self, notice: &EngineNotice) {
        for (_, cb) in &mut self.notices {
            deliver(|| cb(notice), "notice");
        }
    }
}

/// Run one subscriber, containing panics so siblings still get the event.
fn deliver(f: impl FnOnce(), channel: &str) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        log::warn!("{channel} subscriber panicked; continuing delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn update() -> DirtyUpdate {
        DirtyUpdate {
            is_full: false,
            full: None,
            dirty_rows: Vec::new(),
            cursor: Default::default(),
            modes: Default::default(),
            scroll: Default::default(),
        }
    }

    #[test]
    fn update_subscribers_receive_events_until_unsubscribed() {
        let mut bus = SubscriptionBus::new();
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        let token = bus.on_update(1, Box::new(move |_| *sink.borrow_mut() += 1));

        bus.emit_update(1, &update());
        bus.emit_update(2, &update());
        assert_eq!(*count.borrow(), 1);

        bus.unsubscribe(token);
        bus.emit_update(1, &update());
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_block_siblings() {
        let mut bus = SubscriptionBus::new();
        let count = Rc::new(RefCell::new(0));
        bus.on_title(5, Box::new(|_| panic!("boom")));
        let sink = Rc::clone(&count);
        bus.on_title(5, Box::new(move |_| *sink.borrow_mut() += 1));

        bus.emit_title(5, "still delivered");
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn exit_fires_exactly_once() {
        let mut bus = SubscriptionBus::new();
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        bus.on_exit(9, Box::new(move |_| *sink.borrow_mut() += 1));

        let status = ExitStatus {
            code: Some(0),
            signal: None,
        };
        bus.emit_exit(9, &status);
        bus.emit_exit(9, &status);
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn exit_subscribers_added_after_exit_never_fire() {
        let mut bus = SubscriptionBus::new();
        bus.on_exit(3, Box::new(|_| {}));
        bus.emit_exit(3, &ExitStatus::default());

        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        bus.on_exit(3, Box::new(move |_| *sink.borrow_mut() += 1));
        bus.emit_exit(3, &ExitStatus::default());
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn detach_drops_subscribers_but_keeps_exit_state() {
        let mut bus = SubscriptionBus::new();
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        bus.on_update(4, Box::new(move |_| *sink.borrow_mut() += 1));
        bus.emit_exit(4, &ExitStatus::default());

        bus.detach_pty(4);
        bus.emit_update(4, &update());
        assert_eq!(*count.borrow(), 0);

        // Exit stays armed as "already fired" across the detach.
        let again = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&again);
        bus.on_exit(4, Box::new(move |_| *sink.borrow_mut() += 1));
        bus.emit_exit(4, &ExitStatus::default());
        assert_eq!(*again.borrow(), 0);
    }

    #[test]
    fn notices_reach_global_subscribers() {
        let mut bus = SubscriptionBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        bus.on_notice(Box::new(move |notice| sink.borrow_mut().push(notice.clone())));

        bus.emit_notice(&EngineNotice::ScrollbackTruncated { pty_id: 7 });
        assert_eq!(
            *seen.borrow(),
            vec![EngineNotice::ScrollbackTruncated { pty_id: 7 }]
        );
    }
}
