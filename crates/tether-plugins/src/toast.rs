// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Toast facade.
//
// `show` is one streaming call: the platform reports `created` (with the
// toast id), then any number of `buttonClicked`, then `dismissed`, after
// which the call is finished.

use std::sync::{Arc, OnceLock, Weak};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use tether_bridge::PlatformBridge;
use tether_bridge::traits::NativeInvoke;
use tether_core::config::TetherConfig;
use tether_core::error::{Result, TetherError};
use tether_core::types::{CallOutcome, CallbackId};
use tether_events::router::CorrelationRule;
use tether_events::{CallbackTable, EventRouter};

use crate::{Plugin, invoker, table_for};

pub const ID: &str = "com.blackberry.ui.toast";
/// Event carrying replies to `show`.
pub const SHOW_EVENT: &str = "toast.show.callback";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToastOptions {
    /// Adds a button to the toast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_text: Option<String>,
    /// Display time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

impl ToastOptions {
    pub fn validate(&self) -> Result<()> {
        if self.button_text.as_deref().is_some_and(str::is_empty) {
            return Err(TetherError::InvalidArgument("toast button text is empty".into()));
        }
        if self.timeout == Some(0) {
            return Err(TetherError::InvalidArgument("toast timeout must be positive".into()));
        }
        Ok(())
    }
}

/// What happened to a shown toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToastEvent {
    Created { toast_id: i64 },
    ButtonClicked,
    Dismissed,
    /// The call failed or expired before the toast went away.
    Failed(String),
}

impl ToastEvent {
    fn from_payload(payload: &Value) -> Option<Self> {
        match payload.get("reason").and_then(Value::as_str)? {
            "created" => payload
                .get("toastId")
                .and_then(Value::as_i64)
                .map(|toast_id| Self::Created { toast_id }),
            "buttonClicked" => Some(Self::ButtonClicked),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

/// A toast that was handed to the platform.
#[derive(Debug, Clone)]
pub struct ToastHandle {
    pub callback_id: CallbackId,
    toast_id: Arc<OnceLock<i64>>,
}

impl ToastHandle {
    /// Platform toast id, known once `created` arrived.
    pub fn toast_id(&self) -> Option<i64> {
        self.toast_id.get().copied()
    }
}

pub struct Toast {
    native: Arc<dyn NativeInvoke>,
    table: Arc<CallbackTable>,
}

impl Toast {
    pub fn new(bridge: Arc<dyn PlatformBridge>, config: &TetherConfig) -> Self {
        Self {
            native: invoker(&bridge),
            table: Arc::new(table_for(ID, config)),
        }
    }

    pub fn table(&self) -> &Arc<CallbackTable> {
        &self.table
    }

    /// Show `message`. `on_event` sees every reply for this toast.
    #[instrument(skip(self, options, on_event))]
    pub fn show<F>(&self, message: &str, options: &ToastOptions, on_event: F) -> Result<ToastHandle>
    where
        F: Fn(ToastEvent) + Send + Sync + 'static,
    {
        if message.is_empty() {
            return Err(TetherError::InvalidArgument("toast message is empty".into()));
        }
        options.validate()?;

        let id = CallbackId::generate();
        let toast_id = Arc::new(OnceLock::new());
        let handle = ToastHandle {
            callback_id: id.clone(),
            toast_id: toast_id.clone(),
        };

        let table: Weak<CallbackTable> = Arc::downgrade(&self.table);
        let own_id = id.clone();
        self.table.register(id.clone(), move |outcome| {
            let event = match outcome {
                CallOutcome::Ok(payload) => match ToastEvent::from_payload(&payload) {
                    Some(event) => event,
                    None => {
                        debug!(%payload, "ignoring unrecognised toast reply");
                        return;
                    }
                },
                CallOutcome::Err(report) => ToastEvent::Failed(report.message),
            };
            match &event {
                ToastEvent::Created { toast_id: tid } => {
                    let _ = toast_id.set(*tid);
                }
                ToastEvent::Dismissed => {
                    if let Some(table) = table.upgrade() {
                        table.clear(&own_id);
                    }
                }
                _ => {}
            }
            on_event(event);
        })?;

        let args = json!({ "message": message, "options": options, "callbackId": id });
        if let Err(e) = self.native.invoke_native(ID, "show", &args) {
            warn!(error = %e, "toast could not be shown");
            self.table.clear(&id);
            return Err(e);
        }
        Ok(handle)
    }
}

impl Plugin for Toast {
    fn id(&self) -> &'static str {
        ID
    }

    fn attach(&self, router: &mut EventRouter) {
        router.add_rule(SHOW_EVENT, CorrelationRule::streaming(self.table.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tether_bridge::LoopbackBridge;
    use tether_core::types::NativeEvent;

    fn setup() -> (Arc<LoopbackBridge>, Toast, EventRouter) {
        let bridge = Arc::new(LoopbackBridge::new());
        let toast = Toast::new(bridge.clone(), &TetherConfig::default());
        let mut router = EventRouter::new();
        toast.attach(&mut router);
        (bridge, toast, router)
    }

    fn reply(id: &CallbackId, payload: Value) -> NativeEvent {
        NativeEvent::reply(SHOW_EVENT, id.clone(), payload)
    }

    #[test]
    fn full_toast_lifecycle() {
        let (bridge, toast, router) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let handle = toast
            .show(
                "Saved",
                &ToastOptions {
                    button_text: Some("Undo".into()),
                    timeout: Some(3000),
                },
                move |event| sink.lock().expect("lock").push(event),
            )
            .expect("show");

        let call = &bridge.invocations()[0];
        assert_eq!(call.command, "show");
        assert_eq!(call.args["message"], "Saved");
        assert_eq!(call.args["options"], json!({"buttonText": "Undo", "timeout": 3000}));

        let id = &handle.callback_id;
        router.route(reply(id, json!({"reason": "created", "toastId": 12})));
        assert_eq!(handle.toast_id(), Some(12));
        router.route(reply(id, json!({"reason": "buttonClicked"})));
        router.route(reply(id, json!({"reason": "buttonClicked"})));
        assert!(toast.table().contains(id));
        router.route(reply(id, json!({"reason": "dismissed"})));
        assert!(!toast.table().contains(id));

        assert_eq!(
            *seen.lock().expect("lock"),
            vec![
                ToastEvent::Created { toast_id: 12 },
                ToastEvent::ButtonClicked,
                ToastEvent::ButtonClicked,
                ToastEvent::Dismissed,
            ]
        );
    }

    #[test]
    fn unknown_reason_is_ignored() {
        let (_bridge, toast, router) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = toast
            .show("Hi", &ToastOptions::default(), move |e| sink.lock().expect("lock").push(e))
            .expect("show");

        router.route(reply(&handle.callback_id, json!({"reason": "wobbled"})));
        assert!(seen.lock().expect("lock").is_empty());
        assert!(toast.table().contains(&handle.callback_id));
    }

    #[test]
    fn invalid_input_is_rejected() {
        let (bridge, toast, _router) = setup();
        assert!(matches!(
            toast.show("", &ToastOptions::default(), |_| {}),
            Err(TetherError::InvalidArgument(_))
        ));
        let bad = ToastOptions {
            button_text: Some(String::new()),
            timeout: None,
        };
        assert!(toast.show("x", &bad, |_| {}).is_err());
        assert!(bridge.invocations().is_empty());
        assert!(toast.table().is_empty());
    }

    #[test]
    fn native_failure_leaves_nothing_pending() {
        let (bridge, toast, _router) = setup();
        bridge.fail_command("show");
        assert!(matches!(
            toast.show("x", &ToastOptions::default(), |_| {}),
            Err(TetherError::NativeUnavailable)
        ));
        assert!(toast.table().is_empty());
    }
}
