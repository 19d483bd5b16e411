// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Event router: the single inbound entry point for native events.
//
// Every raw event is decoded once, then either resolved against a callback
// table (unicast reply) or dispatched on the channel registered under its
// name (broadcast). Anything we cannot place is dropped and logged; a bad
// event must never take the delivery loop down.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use tether_core::types::{CallOutcome, CallbackId, NativeEvent};

use crate::channel::{DispatchReport, EventChannel};
use crate::correlation::CallbackTable;
use crate::envelope;

/// Where the correlation id of an event comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationKey {
    /// The callback id carried by the event.
    CallbackId,
    /// The event name itself (bridges that keep one pending call per event).
    /// A trailing token on such events is data, not an id; it is delivered as
    /// `{"data": <payload>, "trailer": <token>}`.
    EventName,
}

/// How replies for one event name are correlated.
#[derive(Clone)]
pub struct CorrelationRule {
    pub table: Arc<CallbackTable>,
    pub key: CorrelationKey,
    /// Keep the entry after delivery unless the event says otherwise.
    pub keep_alive: bool,
    /// Always remove the entry after delivery.
    pub terminal: bool,
    /// Deliver `{"event": <name>, "data": <payload>}` so one handler can
    /// tell several event names apart.
    pub tag_event: bool,
}

impl CorrelationRule {
    pub fn one_shot(table: Arc<CallbackTable>) -> Self {
        Self {
            table,
            key: CorrelationKey::CallbackId,
            keep_alive: false,
            terminal: false,
            tag_event: false,
        }
    }

    pub fn streaming(table: Arc<CallbackTable>) -> Self {
        Self {
            keep_alive: true,
            ..Self::one_shot(table)
        }
    }

    pub fn terminal(table: Arc<CallbackTable>) -> Self {
        Self {
            terminal: true,
            ..Self::one_shot(table)
        }
    }

    pub fn keyed_by_name(mut self) -> Self {
        self.key = CorrelationKey::EventName;
        self
    }

    pub fn tagged(mut self) -> Self {
        self.tag_event = true;
        self
    }
}

/// Why an event went nowhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Malformed(String),
    /// Broadcast for an event name with no channel.
    NoChannel,
    /// Reply for an id with no pending call.
    UnknownCallback(CallbackId),
}

/// What happened to one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Broadcast { event: String, report: DispatchReport },
    Correlated { event: String, callback_id: CallbackId },
    Dropped { event: Option<String>, reason: DropReason },
}

/// Routes native events to channels and callback tables.
///
/// Built once at startup (channels and rules are added through `&mut self`),
/// then shared immutably.
pub struct EventRouter {
    channels: HashMap<String, Arc<EventChannel>>,
    rules: HashMap<String, CorrelationRule>,
    /// Used for events that carry a callback id but have no rule.
    default_table: Option<Arc<CallbackTable>>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            rules: HashMap::new(),
            default_table: None,
        }
    }

    pub fn with_default_table(mut self, table: Arc<CallbackTable>) -> Self {
        self.default_table = Some(table);
        self
    }

    /// Register a broadcast channel under its event name.
    pub fn add_channel(&mut self, channel: Arc<EventChannel>) {
        let name = channel.event_name().to_owned();
        if self.channels.insert(name.clone(), channel).is_some() {
            warn!(event = %name, "channel registered twice; keeping the newer one");
        }
    }

    pub fn add_rule(&mut self, event_name: impl Into<String>, rule: CorrelationRule) {
        self.rules.insert(event_name.into(), rule);
    }

    pub fn channel(&self, event_name: &str) -> Option<&Arc<EventChannel>> {
        self.channels.get(event_name)
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Decode and route one raw native event.
    pub fn on_native_event(&self, raw: &str) -> Routed {
        match envelope::decode(raw) {
            Ok(event) => self.route(event),
            Err(e) => {
                warn!(error = %e, "dropping malformed native event");
                Routed::Dropped {
                    event: None,
                    reason: DropReason::Malformed(e.to_string()),
                }
            }
        }
    }

    /// Route an already-decoded event.
    pub fn route(&self, mut event: NativeEvent) -> Routed {
        trace!(event = %event.name, callback = ?event.callback_id, "routing native event");

        if let Some(rule) = self.rules.get(&event.name) {
            return self.route_correlated(event, rule);
        }

        if let Some(id) = event.callback_id.clone() {
            let pending = self
                .default_table
                .as_ref()
                .filter(|table| table.contains(&id));
            match (pending, self.channels.contains_key(&event.name)) {
                (Some(table), _) => {
                    let keep_alive = event.keep_alive.unwrap_or(false);
                    return Self::resolve(table, event.name, id, event.payload, keep_alive);
                }
                // No call waits on the token, so it is part of the broadcast data.
                (None, true) => event = rejoin_trailer(event),
                (None, false) => {
                    if let Some(table) = &self.default_table {
                        return Self::resolve(table, event.name, id, event.payload, false);
                    }
                }
            }
        }

        match self.channels.get(&event.name) {
            Some(channel) => {
                let report = channel.dispatch(&event.payload);
                Routed::Broadcast {
                    event: event.name,
                    report,
                }
            }
            None => {
                debug!(event = %event.name, "no channel for broadcast event");
                Routed::Dropped {
                    event: Some(event.name),
                    reason: DropReason::NoChannel,
                }
            }
        }
    }

    fn route_correlated(&self, event: NativeEvent, rule: &CorrelationRule) -> Routed {
        let keep_alive = if rule.terminal {
            false
        } else {
            event.keep_alive.unwrap_or(rule.keep_alive)
        };

        let tag = |name: &str, payload: Value| {
            if rule.tag_event {
                json!({ "event": name, "data": payload })
            } else {
                payload
            }
        };

        match rule.key {
            CorrelationKey::EventName => {
                let id = CallbackId::new(event.name.clone());
                let payload = match event.callback_id {
                    Some(trailer) => json!({ "data": event.payload, "trailer": trailer }),
                    None => event.payload,
                };
                let payload = tag(&event.name, payload);
                Self::resolve(&rule.table, event.name, id, payload, keep_alive)
            }
            CorrelationKey::CallbackId => match event.callback_id {
                Some(id) => {
                    let payload = tag(&event.name, event.payload);
                    Self::resolve(&rule.table, event.name, id, payload, keep_alive)
                }
                None => {
                    debug!(event = %event.name, "correlated event without callback id");
                    Routed::Dropped {
                        event: Some(event.name),
                        reason: DropReason::UnknownCallback(CallbackId::new("")),
                    }
                }
            },
        }
    }

    fn resolve(
        table: &CallbackTable,
        event: String,
        id: CallbackId,
        payload: Value,
        keep_alive: bool,
    ) -> Routed {
        match table.settle(&id, CallOutcome::Ok(payload), keep_alive) {
            Ok(()) => Routed::Correlated {
                event,
                callback_id: id,
            },
            Err(e) => {
                debug!(%event, error = %e, "reply not correlated");
                Routed::Dropped {
                    event: Some(event),
                    reason: DropReason::UnknownCallback(id),
                }
            }
        }
    }
}

/// Put a legacy trailing token back into scalar broadcast data.
///
/// `"oncardclosed closed by user"` decodes as data `"closed by"` with id
/// `"user"`; for a broadcast the whole text is the data. Structured payloads
/// keep their value and the token is discarded.
fn rejoin_trailer(mut event: NativeEvent) -> NativeEvent {
    let Some(trailer) = event.callback_id.take() else {
        return event;
    };
    let head = match &event.payload {
        Value::String(text) => text.clone(),
        Value::Number(_) | Value::Bool(_) => event.payload.to_string(),
        Value::Null => String::new(),
        _ => {
            debug!(event = %event.name, %trailer, "trailing token on structured broadcast ignored");
            return event;
        }
    };
    event.payload = Value::String(if head.is_empty() {
        trailer.0
    } else {
        format!("{head} {trailer}")
    });
    event
}
