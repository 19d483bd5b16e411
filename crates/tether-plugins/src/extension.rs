// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Extension half of a channel-backed plugin.
//
// The client issues `startEvent`/`stopEvent` when its channel goes active or
// idle. The extension answers by attaching or detaching a system listener for
// the calling web view; whatever that listener produces goes back to the web
// view through an `EventSink`.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use tether_bridge::traits::SystemListener;
use tether_core::error::{Result, TetherError};
use tether_core::types::{NativeEvent, WebviewId};
use tether_events::WebviewRegistry;
use tether_events::channel::{START_COMMAND, STOP_COMMAND};

/// Delivers events produced by an extension to a web view.
pub type EventSink = Arc<dyn Fn(&WebviewId, NativeEvent) + Send + Sync>;

/// Handles start/stop commands for a plugin's events.
pub trait EventExtension: Send + Sync {
    fn registry(&self) -> &WebviewRegistry;

    /// Build the system listener that serves `event_name` for `webview`.
    fn listener(&self, event_name: &str, webview: &WebviewId) -> SystemListener;

    fn start_event(&self, event_name: &str, webview: &WebviewId) -> Result<()> {
        // Unknown names fail here, before a listener is built.
        self.registry().system_event(event_name)?;
        let listener = self.listener(event_name, webview);
        self.registry().start_event(event_name, webview, listener)
    }

    fn stop_event(&self, event_name: &str, webview: &WebviewId) -> Result<()> {
        self.registry().stop_event(event_name, webview)
    }

    /// Dispatch a native command as issued by the client channel.
    fn handle(&self, command: &str, args: &Value, webview: &WebviewId) -> Result<()> {
        let event_name = event_name_arg(args)?;
        debug!(command, event_name, %webview, "extension command");
        match command {
            START_COMMAND => self.start_event(event_name, webview),
            STOP_COMMAND => self.stop_event(event_name, webview),
            other => Err(TetherError::InvalidArgument(format!(
                "unsupported extension command: {other}"
            ))),
        }
    }
}

fn event_name_arg(args: &Value) -> Result<&str> {
    args.get("eventName")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| TetherError::InvalidArgument("missing eventName argument".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_name_is_required() {
        assert_eq!(
            event_name_arg(&json!({"eventName": "entercover"})).expect("name"),
            "entercover"
        );
        for args in [json!({}), json!({"eventName": ""}), json!({"eventName": 3})] {
            assert!(matches!(
                event_name_arg(&args),
                Err(TetherError::InvalidArgument(_))
            ));
        }
    }
}
