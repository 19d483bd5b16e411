// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Callback correlation table.
//
// Native replies arrive as loosely structured events carrying an id. The
// table maps that id back to whoever issued the original request. One-shot
// entries disappear after their first delivery; streaming entries stay until
// a terminal reply or an explicit `clear`. Replies for unknown ids are
// dropped: the native side routinely sends late events for calls that were
// already stopped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use tether_core::config::CollisionPolicy;
use tether_core::error::{Result, TetherError};
use tether_core::report::{ErrorCode, ErrorReport};
use tether_core::types::{CallOutcome, CallbackId};

use crate::guard::{lock, run_isolated};

/// Receives every outcome delivered for one callback id.
pub type CallbackHandler = Arc<dyn Fn(CallOutcome) + Send + Sync>;

struct PendingCall {
    handler: CallbackHandler,
    registered_at: DateTime<Utc>,
    deadline: Option<DateTime<Utc>>,
}

/// Pending native calls for one plugin, keyed by callback id.
pub struct CallbackTable {
    /// Owner name, used in logs only.
    name: String,
    pending: Mutex<HashMap<CallbackId, PendingCall>>,
    policy: CollisionPolicy,
    /// Optional expiry. The platform itself never expires pending calls.
    timeout: Option<chrono::Duration>,
}

impl CallbackTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pending: Mutex::new(HashMap::new()),
            policy: CollisionPolicy::default(),
            timeout: None,
        }
    }

    pub fn with_policy(mut self, policy: CollisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Expire entries that stay pending longer than `timeout`.
    ///
    /// Expiry only happens when `expire` runs (directly or via
    /// [`spawn_sweeper`]); expired calls are rejected with `Timeout`.
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = chrono::Duration::from_std(timeout).ok();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    /// Store `handler` under `id`.
    ///
    /// With `CollisionPolicy::Replace` a pending handler under the same id is
    /// dropped without being called. With `Reject` the call fails with
    /// `DuplicateCallbackId` and the existing handler stays.
    pub fn register<F>(&self, id: impl Into<CallbackId>, handler: F) -> Result<()>
    where
        F: Fn(CallOutcome) + Send + Sync + 'static,
    {
        self.insert(id.into(), Arc::new(handler))
    }

    /// Register a one-shot call and get a receiver for its single outcome.
    pub fn register_oneshot(
        &self,
        id: impl Into<CallbackId>,
    ) -> Result<oneshot::Receiver<CallOutcome>> {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        self.register(id, move |outcome| {
            if let Some(tx) = lock(&slot).take() {
                // Receiver dropped means nobody cares any more.
                let _ = tx.send(outcome);
            }
        })?;
        Ok(rx)
    }

    /// Register a streaming call and get a receiver for every outcome.
    pub fn register_stream(
        &self,
        id: impl Into<CallbackId>,
    ) -> Result<mpsc::UnboundedReceiver<CallOutcome>> {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let label = id.clone();
        self.register(id, move |outcome| {
            if tx.send(outcome).is_err() {
                debug!(callback_id = %label, "stream receiver dropped");
            }
        })?;
        Ok(rx)
    }

    fn insert(&self, id: CallbackId, handler: CallbackHandler) -> Result<()> {
        let now = Utc::now();
        let deadline = self.timeout.map(|t| now + t);
        let mut pending = lock(&self.pending);

        if pending.contains_key(&id) {
            match self.policy {
                CollisionPolicy::Reject => {
                    warn!(table = %self.name, callback_id = %id, "callback id already pending");
                    return Err(TetherError::DuplicateCallbackId(id.0));
                }
                CollisionPolicy::Replace => {
                    debug!(table = %self.name, callback_id = %id, "replacing pending callback");
                }
            }
        }

        pending.insert(
            id.clone(),
            PendingCall {
                handler,
                registered_at: now,
                deadline,
            },
        );
        debug!(table = %self.name, callback_id = %id, pending = pending.len(), "callback registered");
        Ok(())
    }

    /// Deliver `outcome` to the handler registered under `id`.
    ///
    /// With `keep_alive` (and a successful outcome) the entry stays
    /// registered for further replies; otherwise it is removed before the
    /// handler runs. Fails with `UnknownCallbackId` when nothing is pending
    /// under `id`.
    pub fn settle(&self, id: &CallbackId, outcome: CallOutcome, keep_alive: bool) -> Result<()> {
        let keep = keep_alive && outcome.is_ok();
        let handler = {
            let mut pending = lock(&self.pending);
            if keep {
                pending.get(id).map(|call| call.handler.clone())
            } else {
                pending.remove(id).map(|call| call.handler)
            }
        }
        .ok_or_else(|| TetherError::UnknownCallbackId(id.0.clone()))?;

        self.deliver(id, &handler, outcome);
        Ok(())
    }

    /// Deliver `payload` to the handler registered under `id`.
    ///
    /// Unknown ids are dropped and `false` is returned.
    pub fn resolve(&self, id: &CallbackId, payload: Value, keep_alive: bool) -> bool {
        match self.settle(id, CallOutcome::Ok(payload), keep_alive) {
            Ok(()) => true,
            Err(e) => {
                debug!(table = %self.name, error = %e, "dropping reply");
                false
            }
        }
    }

    /// Deliver an error to the handler under `id` and remove the entry.
    pub fn reject(&self, id: &CallbackId, report: ErrorReport) -> bool {
        match self.settle(id, CallOutcome::Err(report), false) {
            Ok(()) => true,
            Err(e) => {
                debug!(table = %self.name, error = %e, "dropping error");
                false
            }
        }
    }

    /// Remove `id` without calling its handler.
    pub fn clear(&self, id: &CallbackId) -> bool {
        let removed = lock(&self.pending).remove(id).is_some();
        if removed {
            debug!(table = %self.name, callback_id = %id, "callback cleared");
        }
        removed
    }

    pub fn contains(&self, id: &CallbackId) -> bool {
        lock(&self.pending).contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When `id` was registered, if it is still pending.
    pub fn registered_at(&self, id: &CallbackId) -> Option<DateTime<Utc>> {
        lock(&self.pending).get(id).map(|call| call.registered_at)
    }

    /// Reject every entry whose deadline is before `now`.
    ///
    /// Returns the expired ids. Entries registered without a timeout never
    /// expire.
    pub fn expire(&self, now: DateTime<Utc>) -> Vec<CallbackId> {
        let expired: Vec<(CallbackId, CallbackHandler)> = {
            let mut pending = lock(&self.pending);
            let ids: Vec<CallbackId> = pending
                .iter()
                .filter(|(_, call)| call.deadline.is_some_and(|d| d <= now))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|call| (id, call.handler)))
                .collect()
        };

        for (id, handler) in &expired {
            let report = ErrorReport::new(
                ErrorCode::Timeout,
                TetherError::Timeout(id.0.clone()).to_string(),
            );
            self.deliver(id, handler, CallOutcome::Err(report));
        }

        if !expired.is_empty() {
            info!(table = %self.name, count = expired.len(), "expired pending callbacks");
        }
        expired.into_iter().map(|(id, _)| id).collect()
    }

    fn deliver(&self, id: &CallbackId, handler: &CallbackHandler, outcome: CallOutcome) {
        if let Err(panic) = run_isolated(|| handler(outcome)) {
            warn!(table = %self.name, callback_id = %id, %panic, "callback handler panicked");
        }
    }
}

/// Periodically expire stale entries of `table` on the tokio runtime.
///
/// The task runs until aborted through the returned handle.
pub fn spawn_sweeper(
    table: Arc<CallbackTable>,
    period: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            table.expire(Utc::now());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting(table: &CallbackTable, id: &str) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        table
            .register(id, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("register");
        hits
    }

    #[test]
    fn one_shot_delivers_at_most_once() {
        let table = CallbackTable::new("test");
        let hits = counting(&table, "cb-1");
        let id = CallbackId::from("cb-1");

        assert!(table.resolve(&id, json!("first"), false));
        assert!(!table.resolve(&id, json!("second"), false));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn settle_reports_unknown_ids() {
        let table = CallbackTable::new("test");
        let hits = counting(&table, "cb-1");

        assert!(matches!(
            table.settle(&"gone".into(), CallOutcome::Ok(json!(1)), false),
            Err(TetherError::UnknownCallbackId(id)) if id == "gone"
        ));
        table
            .settle(&"cb-1".into(), CallOutcome::Ok(json!(1)), true)
            .expect("pending");
        assert!(table.contains(&"cb-1".into()));

        // An error always finishes the call, keep-alive or not.
        let report = ErrorReport::new(ErrorCode::Internal, "gone away");
        table
            .settle(&"cb-1".into(), CallOutcome::Err(report), true)
            .expect("pending");
        assert!(table.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn streaming_entry_survives_until_cleared() {
        let table = CallbackTable::new("test");
        let hits = counting(&table, "scan");
        let id = CallbackId::from("scan");

        for frame in 0..3 {
            assert!(table.resolve(&id, json!(frame), true));
        }
        assert!(table.contains(&id));
        assert!(table.clear(&id));
        assert!(!table.resolve(&id, json!("late"), true));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn terminal_resolve_removes_streaming_entry() {
        let table = CallbackTable::new("test");
        let hits = counting(&table, "scan");
        let id = CallbackId::from("scan");

        table.resolve(&id, json!("frame"), true);
        table.resolve(&id, json!("ended"), false);
        assert!(!table.contains(&id));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_ids_are_dropped() {
        let table = CallbackTable::new("test");
        let id = CallbackId::from("never-registered");
        assert!(!table.resolve(&id, Value::Null, false));
        assert!(!table.reject(&id, ErrorReport::new(ErrorCode::Internal, "x")));
        assert!(!table.clear(&id));
    }

    #[test]
    fn replace_policy_keeps_last_handler() {
        let table = CallbackTable::new("test");
        let first = counting(&table, "push.create.callback");
        let second = counting(&table, "push.create.callback");

        table.resolve(&"push.create.callback".into(), json!(0), false);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reject_policy_refuses_duplicates() {
        let table = CallbackTable::new("test").with_policy(CollisionPolicy::Reject);
        let first = counting(&table, "dup");
        let result = table.register("dup", |_| {});
        assert!(matches!(result, Err(TetherError::DuplicateCallbackId(id)) if id == "dup"));

        table.resolve(&"dup".into(), Value::Null, false);
        assert_eq!(first.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reject_delivers_error_and_removes() {
        let table = CallbackTable::new("test");
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        table
            .register("cb", move |outcome| *sink.lock().expect("lock") = Some(outcome))
            .expect("register");

        let report = ErrorReport::new(ErrorCode::NativeUnavailable, "no library");
        assert!(table.reject(&"cb".into(), report.clone()));
        assert_eq!(*seen.lock().expect("lock"), Some(CallOutcome::Err(report)));
        assert!(table.is_empty());
    }

    #[test]
    fn handler_may_reenter_table() {
        let table = Arc::new(CallbackTable::new("test"));
        let inner = table.clone();
        table
            .register("outer", move |_| {
                inner.register("follow-up", |_| {}).expect("nested register");
            })
            .expect("register");

        table.resolve(&"outer".into(), Value::Null, false);
        assert!(table.contains(&"follow-up".into()));
    }

    #[test]
    fn panicking_handler_still_consumes_entry() {
        let table = CallbackTable::new("test");
        table
            .register("bad", |_| panic!("handler bug"))
            .expect("register");
        assert!(table.resolve(&"bad".into(), Value::Null, false));
        assert!(table.is_empty());
    }

    #[test]
    fn replies_in_any_order() {
        let table = CallbackTable::new("test");
        let a = counting(&table, "a");
        let b = counting(&table, "b");
        let c = counting(&table, "c");

        for id in ["c", "a", "b"] {
            table.resolve(&id.into(), Value::Null, false);
        }
        for hits in [a, b, c] {
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn expire_rejects_overdue_entries_with_timeout() {
        let table = CallbackTable::new("test").with_timeout(Duration::from_secs(5));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        table
            .register("slow", move |outcome| sink.lock().expect("lock").push(outcome))
            .expect("register");

        assert!(table.expire(Utc::now()).is_empty());

        let later = Utc::now() + chrono::Duration::seconds(10);
        let expired = table.expire(later);
        assert_eq!(expired, vec![CallbackId::from("slow")]);

        let outcomes = seen.lock().expect("lock");
        match &outcomes[..] {
            [CallOutcome::Err(report)] => assert_eq!(report.code, ErrorCode::Timeout),
            other => panic!("unexpected outcomes: {other:?}"),
        }
    }

    #[test]
    fn entries_without_timeout_never_expire() {
        let table = CallbackTable::new("test");
        counting(&table, "forever");
        let far = Utc::now() + chrono::Duration::days(365);
        assert!(table.expire(far).is_empty());
        assert!(table.registered_at(&"forever".into()).is_some());
    }

    #[tokio::test]
    async fn oneshot_receiver_gets_payload() {
        let table = CallbackTable::new("test");
        let rx = table.register_oneshot("cb").expect("register");
        table.resolve(&"cb".into(), json!({"ok": true}), false);
        assert_eq!(rx.await.expect("outcome"), CallOutcome::Ok(json!({"ok": true})));
    }

    #[tokio::test]
    async fn stream_receiver_gets_every_reply() {
        let table = CallbackTable::new("test");
        let mut rx = table.register_stream("scan").expect("register");
        let id = CallbackId::from("scan");
        table.resolve(&id, json!(1), true);
        table.resolve(&id, json!(2), true);
        table.resolve(&id, json!(3), false);

        let mut got = Vec::new();
        while let Some(outcome) = rx.recv().await {
            got.push(outcome.into_result().expect("ok"));
        }
        assert_eq!(got, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn sweeper_expires_in_background() {
        let table = Arc::new(CallbackTable::new("test").with_timeout(Duration::from_millis(20)));
        let rx = table.register_oneshot("slow").expect("register");
        let sweeper = spawn_sweeper(table.clone(), Duration::from_millis(5));

        let outcome = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("expired in time")
            .expect("outcome");
        sweeper.abort();

        match outcome {
            CallOutcome::Err(report) => assert_eq!(report.code, ErrorCode::Timeout),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(table.is_empty());
    }
}
