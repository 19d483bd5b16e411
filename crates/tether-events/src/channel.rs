// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bridged event channel.
//
// One logical event type, many subscribers, exactly one native listener.
// The native "start listening" command is issued when the subscriber count
// goes 0 -> 1 and "stop listening" when it goes 1 -> 0. Counts in between
// never touch the native side.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use tether_bridge::traits::NativeInvoke;
use tether_core::config::ReplayPolicy;
use tether_core::error::Result;
use tether_core::report::ErrorReport;
use tether_core::types::SubscriberId;

use crate::guard::{lock, run_isolated};

/// Native command that starts the underlying listener.
pub const START_COMMAND: &str = "startEvent";
/// Native command that stops it.
pub const STOP_COMMAND: &str = "stopEvent";

/// Subscriber callback. Returning `Err` is logged and counted, nothing more.
pub type EventHandler = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// Channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No subscribers, no native listener.
    Idle,
    /// At least one subscriber; native start was issued.
    Active,
}

/// Outcome of a single `dispatch`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that returned `Ok`.
    pub delivered: usize,
    /// Handlers that returned `Err` or panicked.
    pub failed: usize,
}

struct Inner {
    subscribers: Vec<(SubscriberId, EventHandler)>,
    native_active: bool,
    last_native_error: Option<ErrorReport>,
    last_payload: Option<Value>,
}

/// A named event multiplexed over many subscribers.
pub struct EventChannel {
    event_name: String,
    plugin_id: String,
    native: Arc<dyn NativeInvoke>,
    replay: ReplayPolicy,
    /// Serializes 0 <-> 1 transitions so start/stop are never reordered.
    transition: Mutex<()>,
    inner: Mutex<Inner>,
}

impl EventChannel {
    pub fn new(
        plugin_id: impl Into<String>,
        event_name: impl Into<String>,
        native: Arc<dyn NativeInvoke>,
    ) -> Self {
        Self {
            event_name: event_name.into(),
            plugin_id: plugin_id.into(),
            native,
            replay: ReplayPolicy::None,
            transition: Mutex::new(()),
            inner: Mutex::new(Inner {
                subscribers: Vec::new(),
                native_active: false,
                last_native_error: None,
                last_payload: None,
            }),
        }
    }

    pub fn with_replay(mut self, replay: ReplayPolicy) -> Self {
        self.replay = replay;
        self
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn replay_policy(&self) -> ReplayPolicy {
        self.replay
    }

    /// Add a subscriber.
    ///
    /// The first subscriber starts the native listener. A native failure is
    /// logged and kept in [`last_native_error`](Self::last_native_error); the
    /// subscription itself stays. Subscribing again with a known id swaps the
    /// handler without changing the count.
    #[instrument(skip_all, fields(event = %self.event_name, subscriber = %id))]
    pub fn subscribe<F>(&self, id: SubscriberId, handler: F)
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);

        let replay = {
            let _transition = lock(&self.transition);
            let (first, replay) = {
                let mut inner = lock(&self.inner);
                if let Some(slot) = inner.subscribers.iter_mut().find(|(sid, _)| *sid == id) {
                    slot.1 = handler;
                    debug!("subscriber handler replaced");
                    return;
                }
                inner.subscribers.push((id, handler.clone()));
                let replay = match self.replay {
                    ReplayPolicy::None => None,
                    ReplayPolicy::Latest => inner.last_payload.clone(),
                    ReplayPolicy::Once => inner.last_payload.take(),
                };
                (inner.subscribers.len() == 1, replay)
            };

            if first {
                self.start_native();
            }
            replay
        };

        // Replay runs outside both locks: the handler may unsubscribe.
        if let Some(payload) = replay {
            debug!("replaying last payload to late subscriber");
            self.invoke(&handler, &payload);
        }
    }

    /// Remove a subscriber. The last one out stops the native listener.
    ///
    /// Returns `false` if the id was not subscribed.
    #[instrument(skip_all, fields(event = %self.event_name, subscriber = %id))]
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        let _transition = lock(&self.transition);
        let (now_empty, native_active) = {
            let mut inner = lock(&self.inner);
            let Some(pos) = inner.subscribers.iter().position(|(sid, _)| sid == id) else {
                debug!("unsubscribe for unknown subscriber ignored");
                return false;
            };
            inner.subscribers.remove(pos);
            (inner.subscribers.is_empty(), inner.native_active)
        };

        if now_empty {
            if native_active {
                self.stop_native();
            } else {
                debug!("native listener was never started; nothing to stop");
            }
        }
        true
    }

    /// Deliver `payload` to every subscriber in registration order.
    ///
    /// A failing or panicking handler is logged and skipped; the remaining
    /// handlers still run.
    pub fn dispatch(&self, payload: &Value) -> DispatchReport {
        let handlers: Vec<(SubscriberId, EventHandler)> = {
            let mut inner = lock(&self.inner);
            if self.replay != ReplayPolicy::None {
                inner.last_payload = Some(payload.clone());
            }
            inner.subscribers.clone()
        };

        let mut report = DispatchReport::default();
        for (id, handler) in &handlers {
            if self.invoke_as(id, handler, payload) {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }

        debug!(
            event = %self.event_name,
            delivered = report.delivered,
            failed = report.failed,
            "event dispatched"
        );
        report
    }

    /// Store a payload for replay without dispatching it.
    ///
    /// Used for data that exists before anyone subscribes (launch requests).
    /// Has no effect on channels without a replay policy.
    pub fn prime(&self, payload: Value) {
        if self.replay == ReplayPolicy::None {
            debug!(event = %self.event_name, "prime ignored: channel has no replay policy");
            return;
        }
        lock(&self.inner).last_payload = Some(payload);
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }

    pub fn is_subscribed(&self, id: &SubscriberId) -> bool {
        lock(&self.inner).subscribers.iter().any(|(sid, _)| sid == id)
    }

    /// True when there are subscribers and the native start succeeded.
    pub fn is_native_active(&self) -> bool {
        lock(&self.inner).native_active
    }

    pub fn state(&self) -> ChannelState {
        if lock(&self.inner).subscribers.is_empty() {
            ChannelState::Idle
        } else {
            ChannelState::Active
        }
    }

    /// The most recent native start/stop failure, if any.
    pub fn last_native_error(&self) -> Option<ErrorReport> {
        lock(&self.inner).last_native_error.clone()
    }

    fn native_args(&self) -> Value {
        json!({ "eventName": self.event_name })
    }

    fn start_native(&self) {
        match self
            .native
            .invoke_native(&self.plugin_id, START_COMMAND, &self.native_args())
        {
            Ok(_) => {
                let mut inner = lock(&self.inner);
                inner.native_active = true;
                inner.last_native_error = None;
                info!(plugin = %self.plugin_id, event = %self.event_name, "native listener started");
            }
            Err(e) => {
                warn!(
                    plugin = %self.plugin_id,
                    event = %self.event_name,
                    error = %e,
                    "error initializing native listener"
                );
                let mut inner = lock(&self.inner);
                inner.native_active = false;
                inner.last_native_error = Some(e.report());
            }
        }
    }

    fn stop_native(&self) {
        let result = self
            .native
            .invoke_native(&self.plugin_id, STOP_COMMAND, &self.native_args());
        let mut inner = lock(&self.inner);
        inner.native_active = false;
        match result {
            Ok(_) => {
                info!(plugin = %self.plugin_id, event = %self.event_name, "native listener stopped");
            }
            Err(e) => {
                warn!(
                    plugin = %self.plugin_id,
                    event = %self.event_name,
                    error = %e,
                    "error stopping native listener"
                );
                inner.last_native_error = Some(e.report());
            }
        }
    }

    fn invoke(&self, handler: &EventHandler, payload: &Value) -> bool {
        match run_isolated(|| handler(payload)) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(event = %self.event_name, error = %e, "subscriber failed");
                false
            }
            Err(panic) => {
                warn!(event = %self.event_name, %panic, "subscriber panicked");
                false
            }
        }
    }

    fn invoke_as(&self, id: &SubscriberId, handler: &EventHandler, payload: &Value) -> bool {
        let ok = self.invoke(handler, payload);
        if !ok {
            debug!(event = %self.event_name, subscriber = %id, "delivery failed");
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tether_bridge::LoopbackBridge;
    use tether_core::error::TetherError;
    use tether_core::report::ErrorCode;

    fn channel(bridge: &Arc<LoopbackBridge>, event: &str) -> EventChannel {
        EventChannel::new("com.blackberry.connection", event, bridge.clone())
    }

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, impl Fn(&Value) -> Result<()> + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v: &Value| {
            sink.lock().expect("lock").push(v.clone());
            Ok(())
        })
    }

    #[test]
    fn start_and_stop_once_for_many_subscribers() {
        let bridge = Arc::new(LoopbackBridge::new());
        let ch = channel(&bridge, "connectionchange");
        let ids: Vec<SubscriberId> = (0..5).map(|i| SubscriberId::new(format!("s{i}"))).collect();

        for id in &ids {
            ch.subscribe(id.clone(), |_| Ok(()));
        }
        assert_eq!(bridge.count_of(START_COMMAND), 1);
        assert_eq!(ch.state(), ChannelState::Active);

        // Leave in a different order than we joined.
        for i in [3, 0, 4, 1] {
            assert!(ch.unsubscribe(&ids[i]));
            assert_eq!(bridge.count_of(STOP_COMMAND), 0);
        }
        assert!(ch.unsubscribe(&ids[2]));
        assert_eq!(bridge.count_of(START_COMMAND), 1);
        assert_eq!(bridge.count_of(STOP_COMMAND), 1);
        assert_eq!(ch.state(), ChannelState::Idle);
        assert!(!ch.is_native_active());
    }

    #[test]
    fn native_args_carry_event_name() {
        let bridge = Arc::new(LoopbackBridge::new());
        let ch = channel(&bridge, "connectionchange");
        ch.subscribe("s1".into(), |_| Ok(()));

        let calls = bridge.invocations();
        assert_eq!(calls[0].plugin_id, "com.blackberry.connection");
        assert_eq!(calls[0].args, json!({"eventName": "connectionchange"}));
    }

    #[test]
    fn connectionchange_scenario() {
        let bridge = Arc::new(LoopbackBridge::new());
        let ch = channel(&bridge, "connectionchange");
        let (s1_seen, s1) = recorder();
        let (s2_seen, s2) = recorder();

        ch.subscribe("s1".into(), s1);
        assert_eq!(bridge.count_of(START_COMMAND), 1);
        ch.subscribe("s2".into(), s2);
        assert_eq!(bridge.count_of(START_COMMAND), 1);

        let payload = json!({"oldType": "wifi", "newType": "none"});
        let report = ch.dispatch(&payload);
        assert_eq!(report, DispatchReport { delivered: 2, failed: 0 });
        assert_eq!(*s1_seen.lock().expect("lock"), vec![payload.clone()]);
        assert_eq!(*s2_seen.lock().expect("lock"), vec![payload]);

        ch.unsubscribe(&"s1".into());
        assert_eq!(bridge.count_of(STOP_COMMAND), 0);
        ch.unsubscribe(&"s2".into());
        assert_eq!(bridge.count_of(STOP_COMMAND), 1);
    }

    #[test]
    fn failing_handler_does_not_block_others() {
        let bridge = Arc::new(LoopbackBridge::new());
        let ch = channel(&bridge, "entercover");
        let a = Arc::new(AtomicUsize::new(0));
        let c = Arc::new(AtomicUsize::new(0));

        let a2 = a.clone();
        ch.subscribe("a".into(), move |_| {
            a2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        ch.subscribe("b".into(), |_| Err(TetherError::Handler("b is broken".into())));
        let c2 = c.clone();
        ch.subscribe("c".into(), move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let report = ch.dispatch(&Value::Null);
        assert_eq!(report, DispatchReport { delivered: 2, failed: 1 });
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(c.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let bridge = Arc::new(LoopbackBridge::new());
        let ch = channel(&bridge, "entercover");
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = hits.clone();
        ch.subscribe("a".into(), move |_| {
            h1.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        ch.subscribe("b".into(), |_| panic!("subscriber bug"));
        let h3 = hits.clone();
        ch.subscribe("c".into(), move |_| {
            h3.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let report = ch.dispatch(&Value::Null);
        assert_eq!(report.failed, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        // Channel state survives the panic.
        assert_eq!(ch.subscriber_count(), 3);
    }

    #[test]
    fn delivery_follows_registration_order() {
        let bridge = Arc::new(LoopbackBridge::new());
        let ch = channel(&bridge, "oncardresize");
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let order = order.clone();
            ch.subscribe(name.into(), move |_| {
                order.lock().expect("lock").push(name);
                Ok(())
            });
        }
        ch.dispatch(&Value::Null);
        assert_eq!(*order.lock().expect("lock"), vec!["first", "second", "third"]);
    }

    #[test]
    fn resubscribe_replaces_handler_without_counting() {
        let bridge = Arc::new(LoopbackBridge::new());
        let ch = channel(&bridge, "connectionchange");
        let (old_seen, old) = recorder();
        let (new_seen, new) = recorder();

        ch.subscribe("s1".into(), old);
        ch.subscribe("s1".into(), new);
        assert_eq!(ch.subscriber_count(), 1);

        ch.dispatch(&json!(1));
        assert!(old_seen.lock().expect("lock").is_empty());
        assert_eq!(new_seen.lock().expect("lock").len(), 1);

        ch.unsubscribe(&"s1".into());
        assert_eq!(bridge.count_of(STOP_COMMAND), 1);
    }

    #[test]
    fn unknown_unsubscribe_is_noop() {
        let bridge = Arc::new(LoopbackBridge::new());
        let ch = channel(&bridge, "connectionchange");
        assert!(!ch.unsubscribe(&"ghost".into()));
        assert_eq!(bridge.count_of(STOP_COMMAND), 0);
    }

    #[test]
    fn native_start_failure_keeps_subscription() {
        let bridge = Arc::new(LoopbackBridge::new());
        bridge.fail_command(START_COMMAND);
        let ch = channel(&bridge, "connectionchange");
        let (seen, handler) = recorder();

        ch.subscribe("s1".into(), handler);
        assert_eq!(ch.subscriber_count(), 1);
        assert!(!ch.is_native_active());
        assert_eq!(
            ch.last_native_error().map(|r| r.code),
            Some(ErrorCode::NativeUnavailable)
        );

        // Events that still reach the channel are delivered.
        ch.dispatch(&json!("late"));
        assert_eq!(seen.lock().expect("lock").len(), 1);

        // Nothing was started, so nothing is stopped.
        ch.unsubscribe(&"s1".into());
        assert_eq!(bridge.count_of(STOP_COMMAND), 0);
    }

    #[test]
    fn restart_after_idle() {
        let bridge = Arc::new(LoopbackBridge::new());
        let ch = channel(&bridge, "exitcover");
        ch.subscribe("a".into(), |_| Ok(()));
        ch.unsubscribe(&"a".into());
        ch.subscribe("b".into(), |_| Ok(()));
        assert_eq!(bridge.count_of(START_COMMAND), 2);
        assert_eq!(bridge.count_of(STOP_COMMAND), 1);
        assert!(ch.is_native_active());
    }

    #[test]
    fn latest_replay_reaches_late_subscriber_without_extra_start() {
        let bridge = Arc::new(LoopbackBridge::new());
        let ch = channel(&bridge, "invoked").with_replay(ReplayPolicy::Latest);
        ch.subscribe("early".into(), |_| Ok(()));
        ch.dispatch(&json!({"action": "bb.action.SHARE"}));

        let (seen, late) = recorder();
        ch.subscribe("late".into(), late);
        assert_eq!(*seen.lock().expect("lock"), vec![json!({"action": "bb.action.SHARE"})]);
        assert_eq!(bridge.count_of(START_COMMAND), 1);
    }

    #[test]
    fn once_replay_is_consumed_by_first_late_subscriber() {
        let bridge = Arc::new(LoopbackBridge::new());
        let ch = channel(&bridge, "invoked").with_replay(ReplayPolicy::Once);
        ch.prime(json!({"uri": "file:///launch"}));

        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();
        ch.subscribe("first".into(), first);
        ch.subscribe("second".into(), second);

        assert_eq!(first_seen.lock().expect("lock").len(), 1);
        assert!(second_seen.lock().expect("lock").is_empty());
        assert_eq!(bridge.count_of(START_COMMAND), 1);
    }

    #[test]
    fn no_replay_without_policy() {
        let bridge = Arc::new(LoopbackBridge::new());
        let ch = channel(&bridge, "connectionchange");
        ch.prime(json!("ignored"));
        ch.dispatch(&json!("nobody listening"));

        let (seen, handler) = recorder();
        ch.subscribe("s1".into(), handler);
        assert!(seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn handler_may_unsubscribe_during_replay() {
        let bridge = Arc::new(LoopbackBridge::new());
        let ch = Arc::new(channel(&bridge, "invoked").with_replay(ReplayPolicy::Latest));
        ch.prime(json!("launch"));

        let inner = ch.clone();
        ch.subscribe("self-removing".into(), move |_| {
            inner.unsubscribe(&"self-removing".into());
            Ok(())
        });
        assert_eq!(ch.subscriber_count(), 0);
        assert_eq!(bridge.count_of(STOP_COMMAND), 1);
    }
}
