// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-webview listener registry.
//
// Several web views can live in one process (the application plus cards it
// opened). Each one starts and stops its own system event listener for a
// plugin event; the registry keeps them apart so that stopping one never
// detaches another's listener.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, instrument, warn};

use tether_bridge::traits::{ListenerToken, SystemEvents, SystemListener};
use tether_core::config::DuplicatePolicy;
use tether_core::error::{Result, TetherError};
use tether_core::types::WebviewId;

use crate::guard::lock;

/// Tracks the system event listener attached for each `(event, webview)`.
pub struct WebviewRegistry {
    plugin_id: String,
    events: Arc<dyn SystemEvents>,
    /// Plugin event name -> platform system event name.
    actions: HashMap<String, String>,
    policy: DuplicatePolicy,
    listeners: Mutex<HashMap<(String, WebviewId), ListenerToken>>,
}

impl WebviewRegistry {
    pub fn new(
        plugin_id: impl Into<String>,
        events: Arc<dyn SystemEvents>,
        policy: DuplicatePolicy,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            events,
            actions: HashMap::new(),
            policy,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Map a plugin event name to the system event it listens on.
    pub fn with_action(mut self, event_name: &str, system_event: &str) -> Self {
        self.actions
            .insert(event_name.to_owned(), system_event.to_owned());
        self
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// The system event behind `event_name`.
    pub fn system_event(&self, event_name: &str) -> Result<&str> {
        self.actions
            .get(event_name)
            .map(String::as_str)
            .ok_or_else(|| TetherError::UnknownEvent(event_name.to_owned()))
    }

    /// Attach `listener` for `(event_name, webview)`.
    ///
    /// If one is already attached for that pair, `DuplicatePolicy::Replace`
    /// detaches it first and `DuplicatePolicy::Reject` fails with
    /// `DuplicateSubscription`.
    #[instrument(skip(self, listener), fields(plugin = %self.plugin_id))]
    pub fn start_event(
        &self,
        event_name: &str,
        webview: &WebviewId,
        listener: SystemListener,
    ) -> Result<()> {
        let system_event = self.system_event(event_name)?;
        let key = (event_name.to_owned(), webview.clone());
        let mut listeners = lock(&self.listeners);

        if let Some(existing) = listeners.get(&key).copied() {
            match self.policy {
                DuplicatePolicy::Reject => {
                    return Err(TetherError::DuplicateSubscription {
                        event: event_name.to_owned(),
                        webview: webview.to_string(),
                    });
                }
                DuplicatePolicy::Replace => {
                    listeners.remove(&key);
                    if let Err(e) = self.events.remove_listener(system_event, existing) {
                        warn!(event_name, %webview, error = %e, "failed to detach replaced listener");
                    } else {
                        debug!(event_name, %webview, "replaced running listener");
                    }
                }
            }
        }

        let token = self.events.add_listener(system_event, listener)?;
        listeners.insert(key, token);
        info!(event_name, system_event, %webview, "listener started");
        Ok(())
    }

    /// Detach the listener for `(event_name, webview)`.
    ///
    /// Fails with `NotStarted` when nothing was attached for that pair.
    #[instrument(skip(self), fields(plugin = %self.plugin_id))]
    pub fn stop_event(&self, event_name: &str, webview: &WebviewId) -> Result<()> {
        let system_event = self.system_event(event_name)?;
        let key = (event_name.to_owned(), webview.clone());

        let token = lock(&self.listeners)
            .remove(&key)
            .ok_or_else(|| TetherError::NotStarted {
                event: event_name.to_owned(),
                webview: webview.to_string(),
            })?;

        self.events.remove_listener(system_event, token)?;
        info!(event_name, system_event, %webview, "listener stopped");
        Ok(())
    }

    pub fn is_started(&self, event_name: &str, webview: &WebviewId) -> bool {
        lock(&self.listeners).contains_key(&(event_name.to_owned(), webview.clone()))
    }

    /// Number of attached listeners across all events and web views.
    pub fn active_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tether_bridge::LoopbackBridge;

    fn registry(bridge: &Arc<LoopbackBridge>, policy: DuplicatePolicy) -> WebviewRegistry {
        WebviewRegistry::new("com.blackberry.ui.cover", bridge.clone(), policy)
            .with_action("entercover", "windowCoverEnter")
            .with_action("exitcover", "windowCoverExit")
    }

    fn counter() -> (Arc<AtomicUsize>, SystemListener) {
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = hits.clone();
        (
            hits,
            Arc::new(move |_: &Value| {
                inner.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn webviews_are_isolated() {
        let bridge = Arc::new(LoopbackBridge::new());
        let reg = registry(&bridge, DuplicatePolicy::Replace);
        let (app_hits, app) = counter();
        let (card_hits, card) = counter();

        reg.start_event("entercover", &"1".into(), app).expect("start app");
        reg.start_event("entercover", &"2".into(), card).expect("start card");
        assert_eq!(bridge.listener_count("windowCoverEnter"), 2);

        reg.stop_event("entercover", &"1".into()).expect("stop app");
        assert!(!reg.is_started("entercover", &"1".into()));
        assert!(reg.is_started("entercover", &"2".into()));

        bridge.emit("windowCoverEnter", &Value::Null);
        assert_eq!(app_hits.load(Ordering::SeqCst), 0);
        assert_eq!(card_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn replace_policy_detaches_previous_listener() {
        let bridge = Arc::new(LoopbackBridge::new());
        let reg = registry(&bridge, DuplicatePolicy::Replace);
        let (old_hits, old) = counter();
        let (new_hits, new) = counter();

        reg.start_event("exitcover", &"1".into(), old).expect("first start");
        reg.start_event("exitcover", &"1".into(), new).expect("second start");
        assert_eq!(bridge.listener_count("windowCoverExit"), 1);
        assert_eq!(reg.active_count(), 1);

        bridge.emit("windowCoverExit", &json!(null));
        assert_eq!(old_hits.load(Ordering::SeqCst), 0);
        assert_eq!(new_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reject_policy_refuses_second_start() {
        let bridge = Arc::new(LoopbackBridge::new());
        let reg = registry(&bridge, DuplicatePolicy::Reject);
        let (_, first) = counter();
        let (_, second) = counter();

        reg.start_event("entercover", &"1".into(), first).expect("first start");
        let err = reg
            .start_event("entercover", &"1".into(), second)
            .expect_err("duplicate");
        assert!(matches!(err, TetherError::DuplicateSubscription { .. }));
        assert_eq!(bridge.listener_count("windowCoverEnter"), 1);
    }

    #[test]
    fn stop_without_start_is_not_started() {
        let bridge = Arc::new(LoopbackBridge::new());
        let reg = registry(&bridge, DuplicatePolicy::Replace);
        let err = reg.stop_event("entercover", &"7".into()).expect_err("not started");
        assert_eq!(
            err.to_string(),
            "underlying listener for entercover never started for webview 7"
        );
    }

    #[test]
    fn unknown_event_is_rejected() {
        let bridge = Arc::new(LoopbackBridge::new());
        let reg = registry(&bridge, DuplicatePolicy::Replace);
        let (_, listener) = counter();
        assert!(matches!(
            reg.start_event("batterychange", &"1".into(), listener),
            Err(TetherError::UnknownEvent(_))
        ));
    }

    #[test]
    fn failed_attach_records_nothing() {
        let bridge: Arc<dyn SystemEvents> = Arc::new(tether_bridge::StubBridge);
        let reg = WebviewRegistry::new("p", bridge, DuplicatePolicy::Replace)
            .with_action("entercover", "windowCoverEnter");
        let (_, listener) = counter();
        assert!(matches!(
            reg.start_event("entercover", &"1".into(), listener),
            Err(TetherError::NativeUnavailable)
        ));
        assert_eq!(reg.active_count(), 0);
    }
}
