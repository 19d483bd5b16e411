// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Invocation facade: requests that launched or were sent to the app, and the
// card lifecycle when the app runs as a card inside another one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use tether_bridge::PlatformBridge;
use tether_bridge::traits::{NativeInvocation, NativeInvoke, StartupMode};
use tether_core::config::{ReplayPolicy, TetherConfig};
use tether_core::error::{Result, TetherError};
use tether_core::types::SubscriberId;
use tether_events::{EventChannel, EventRouter};

use crate::{Plugin, invoker};

pub const ID: &str = "com.blackberry.invoked";
pub const INVOKED: &str = "invoked";
pub const CARD_RESIZE: &str = "oncardresize";
pub const CARD_CLOSED: &str = "oncardclosed";

/// How a card peek is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeekType {
    /// Peek at the card's content only.
    Content,
    /// Peek back to the root of the card stack.
    Root,
}

/// A card asking its parent to close it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureRequest {
    pub reason: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
}

impl ClosureRequest {
    pub fn validate(&self) -> Result<()> {
        if self.reason.is_empty() {
            return Err(TetherError::InvalidArgument("closure reason is empty".into()));
        }
        Ok(())
    }
}

pub struct Invoked {
    native: Arc<dyn NativeInvoke>,
    invoked: Arc<EventChannel>,
    card_resize: Arc<EventChannel>,
    card_closed: Arc<EventChannel>,
}

impl Invoked {
    /// Build the facade. When the app was started to service a request, that
    /// request is held for the first `invoked` subscriber.
    pub fn new(bridge: Arc<dyn PlatformBridge>, config: &TetherConfig) -> Self {
        let native = invoker(&bridge);
        let channel = |name: &str, fallback| {
            Arc::new(
                EventChannel::new(ID, name, native.clone())
                    .with_replay(config.replay_for(name, fallback)),
            )
        };
        let invoked = channel(INVOKED, ReplayPolicy::Once);
        let card_resize = channel(CARD_RESIZE, ReplayPolicy::None);
        let card_closed = channel(CARD_CLOSED, ReplayPolicy::None);

        match (bridge.startup_mode(), bridge.launch_request()) {
            (Ok(StartupMode::Launch), _) => {}
            (Ok(mode), Ok(Some(request))) => {
                info!(?mode, "holding launch request for first invoked subscriber");
                invoked.prime(request);
            }
            (Ok(mode), Ok(None)) => debug!(?mode, "started without a launch request"),
            (Err(e), _) | (_, Err(e)) => warn!(error = %e, "startup mode unavailable"),
        }

        Self {
            native,
            invoked,
            card_resize,
            card_closed,
        }
    }

    pub fn on_invoked<F>(&self, id: SubscriberId, handler: F)
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        self.invoked.subscribe(id, handler);
    }

    pub fn on_card_resize<F>(&self, id: SubscriberId, handler: F)
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        self.card_resize.subscribe(id, handler);
    }

    pub fn on_card_closed<F>(&self, id: SubscriberId, handler: F)
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        self.card_closed.subscribe(id, handler);
    }

    /// Remove `id` from whichever channel `event_name` names.
    pub fn remove_listener(&self, event_name: &str, id: &SubscriberId) -> Result<bool> {
        let channel = match event_name {
            INVOKED => &self.invoked,
            CARD_RESIZE => &self.card_resize,
            CARD_CLOSED => &self.card_closed,
            other => return Err(TetherError::UnknownEvent(other.to_owned())),
        };
        Ok(channel.unsubscribe(id))
    }

    /// Tell the parent the card finished laying out after a resize.
    #[instrument(skip(self))]
    pub fn card_resize_done(&self) -> Result<()> {
        self.send("cardResizeDone", Value::Null)
    }

    #[instrument(skip(self))]
    pub fn card_start_peek(&self, peek_type: PeekType) -> Result<()> {
        self.send("cardStartPeek", json!({ "peekType": peek_type }))
    }

    #[instrument(skip_all)]
    pub fn card_request_closure(&self, request: &ClosureRequest) -> Result<()> {
        request.validate()?;
        self.send("cardRequestClosure", json!({ "request": request }))
    }

    fn send(&self, command: &str, args: Value) -> Result<()> {
        self.native.invoke_native(ID, command, &args)?;
        Ok(())
    }
}

impl Plugin for Invoked {
    fn id(&self) -> &'static str {
        ID
    }

    fn attach(&self, router: &mut EventRouter) {
        router.add_channel(self.invoked.clone());
        router.add_channel(self.card_resize.clone());
        router.add_channel(self.card_closed.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tether_bridge::LoopbackBridge;

    fn recorder() -> (
        Arc<Mutex<Vec<Value>>>,
        impl Fn(&Value) -> Result<()> + Send + Sync + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v: &Value| {
            sink.lock().expect("lock").push(v.clone());
            Ok(())
        })
    }

    #[test]
    fn launch_request_goes_to_first_subscriber_only() {
        let bridge = Arc::new(LoopbackBridge::new());
        let request = json!({"action": "bb.action.OPEN", "uri": "file:///photo.jpg"});
        bridge.set_startup(StartupMode::Invoke, Some(request.clone()));
        let invoked = Invoked::new(bridge.clone(), &TetherConfig::default());

        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();
        invoked.on_invoked("first".into(), first);
        invoked.on_invoked("second".into(), second);

        assert_eq!(*first_seen.lock().expect("lock"), vec![request]);
        assert!(second_seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn plain_launch_has_nothing_to_replay() {
        let bridge = Arc::new(LoopbackBridge::new());
        bridge.set_startup(StartupMode::Launch, Some(json!({"ignored": true})));
        let invoked = Invoked::new(bridge.clone(), &TetherConfig::default());

        let (seen, handler) = recorder();
        invoked.on_invoked("s1".into(), handler);
        assert!(seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn later_invocations_are_broadcast() {
        let bridge = Arc::new(LoopbackBridge::new());
        let invoked = Invoked::new(bridge.clone(), &TetherConfig::default());
        let mut router = EventRouter::new();
        invoked.attach(&mut router);

        let (seen, handler) = recorder();
        invoked.on_card_resize("s1".into(), handler);
        router.on_native_event(r#"{"event":"oncardresize","payload":{"width":720,"height":1280}}"#);
        assert_eq!(*seen.lock().expect("lock"), vec![json!({"width": 720, "height": 1280})]);

        assert!(invoked.remove_listener(CARD_RESIZE, &"s1".into()).expect("known"));
        assert!(invoked.remove_listener("bogus", &"s1".into()).is_err());
    }

    #[test]
    fn card_calls_pass_through() {
        let bridge = Arc::new(LoopbackBridge::new());
        let invoked = Invoked::new(bridge.clone(), &TetherConfig::default());

        invoked.card_resize_done().expect("resize done");
        invoked.card_start_peek(PeekType::Root).expect("peek");
        invoked
            .card_request_closure(&ClosureRequest {
                reason: "Save".into(),
                kind: "mime/type".into(),
                data: "done".into(),
            })
            .expect("closure");

        let calls = bridge.invocations();
        assert_eq!(calls[0].command, "cardResizeDone");
        assert_eq!(calls[1].args, json!({"peekType": "root"}));
        assert_eq!(
            calls[2].args,
            json!({"request": {"reason": "Save", "type": "mime/type", "data": "done"}})
        );
    }

    #[test]
    fn closure_without_reason_is_invalid() {
        let bridge = Arc::new(LoopbackBridge::new());
        let invoked = Invoked::new(bridge.clone(), &TetherConfig::default());
        let request = ClosureRequest {
            reason: String::new(),
            kind: String::new(),
            data: String::new(),
        };
        assert!(matches!(
            invoked.card_request_closure(&request),
            Err(TetherError::InvalidArgument(_))
        ));
        assert!(bridge.invocations().is_empty());
    }
}
