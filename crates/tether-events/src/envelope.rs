// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Boundary decoding of raw native event strings.
//
// Two encodings reach us:
//
//   JSON envelope   {"event": "...", "callbackId": "...", "payload": ..., "keepAlive": true}
//   legacy string   "<event> <data> <callbackId>"
//
// The legacy form is what JNEXT extensions emit. `<data>` is JSON when it
// parses as JSON and a plain string otherwise; `<callbackId>` is optional.

use serde_json::Value;

use tether_core::error::{Result, TetherError};
use tether_core::types::{CallbackId, NativeEvent};

/// Decode one raw native event.
pub fn decode(raw: &str) -> Result<NativeEvent> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TetherError::MalformedEvent("empty event string".into()));
    }

    if trimmed.starts_with('{') {
        let event: NativeEvent = serde_json::from_str(trimmed)
            .map_err(|e| TetherError::MalformedEvent(format!("envelope: {e}")))?;
        if event.name.is_empty() {
            return Err(TetherError::MalformedEvent("envelope without event name".into()));
        }
        return Ok(event);
    }

    decode_legacy(trimmed)
}

fn decode_legacy(raw: &str) -> Result<NativeEvent> {
    let (name, rest) = match raw.split_once(' ') {
        Some((name, rest)) => (name, rest.trim()),
        None => (raw, ""),
    };

    if rest.is_empty() {
        return Ok(NativeEvent::broadcast(name, Value::Null));
    }

    // Data containing spaces is only possible as a single JSON document; a
    // trailing token after it is the callback id.
    if let Ok(payload) = serde_json::from_str::<Value>(rest) {
        return Ok(NativeEvent::broadcast(name, payload));
    }

    match rest.rsplit_once(' ') {
        Some((data, callback)) if !callback.is_empty() => Ok(NativeEvent {
            name: name.to_owned(),
            callback_id: Some(CallbackId::new(callback)),
            payload: parse_data(data.trim()),
            keep_alive: None,
        }),
        _ => Ok(NativeEvent::broadcast(name, parse_data(rest))),
    }
}

fn parse_data(data: &str) -> Value {
    serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.to_owned()))
}

/// Render an event in the legacy space-delimited form.
///
/// Payloads are written as compact JSON except plain strings, which are
/// written bare. Used by hosts that replay native logs.
pub fn encode_legacy(event: &NativeEvent) -> String {
    let data = match &event.payload {
        Value::String(s) => s.clone(),
        Value::Null if event.callback_id.is_none() => return event.name.clone(),
        other => other.to_string(),
    };
    match &event.callback_id {
        Some(id) => format!("{} {} {}", event.name, data, id),
        None => format!("{} {}", event.name, data),
    }
}
