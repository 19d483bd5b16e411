// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types shared by the bridge, the event core and the plugins.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::report::ErrorReport;

/// Opaque token linking a native reply to the call that requested it.
///
/// Generated by the caller (`CallbackId::generate`) or handed over by the
/// native layer. Numeric native tokens convert into their decimal form, both
/// through `From<u64>` and when deserialized from a JSON number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CallbackId(pub String);

impl<'de> Deserialize<'de> for CallbackId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Token {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match Token::deserialize(deserializer)? {
            Token::Text(id) => Self(id),
            Token::Unsigned(id) => Self::from(id),
            Token::Signed(id) => Self(id.to_string()),
        })
    }
}

impl CallbackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id for caller-originated requests.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallbackId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for CallbackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for CallbackId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Identifies one logical subscriber on an event channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub String);

impl SubscriberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Identifies the web view hosting a page (application, card, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebviewId(pub String);

impl WebviewId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for WebviewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WebviewId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<u32> for WebviewId {
    fn from(id: u32) -> Self {
        Self(id.to_string())
    }
}

/// Whatever the native layer returned synchronously from an invocation.
///
/// Most native calls return an empty string; some (JNEXT `extractPushPayload`)
/// return data inline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeToken(pub String);

impl InvokeToken {
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A native event after boundary decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeEvent {
    /// Event identifier shared by native and web layers.
    #[serde(rename = "event")]
    pub name: String,
    /// Present for unicast replies to a specific call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<CallbackId>,
    #[serde(default)]
    pub payload: Value,
    /// Explicit keep-alive flag; `None` defers to the routing rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<bool>,
}

impl NativeEvent {
    /// A broadcast event (no callback id).
    pub fn broadcast(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            callback_id: None,
            payload,
            keep_alive: None,
        }
    }

    /// A reply addressed to one pending call.
    pub fn reply(name: impl Into<String>, callback_id: CallbackId, payload: Value) -> Self {
        Self {
            name: name.into(),
            callback_id: Some(callback_id),
            payload,
            keep_alive: None,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }
}

/// What a pending caller eventually receives.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Ok(Value),
    Err(ErrorReport),
}

impl CallOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Err(_) => None,
        }
    }

    pub fn into_result(self) -> std::result::Result<Value, ErrorReport> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Err(report) => Err(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ErrorCode;
    use serde_json::json;

    #[test]
    fn numeric_callback_ids_use_decimal_form() {
        assert_eq!(CallbackId::from(42u64).as_str(), "42");
    }

    #[test]
    fn callback_ids_deserialize_from_strings_and_numbers() {
        for (raw, expected) in [
            (json!("cb-1"), "cb-1"),
            (json!(7), "7"),
            (json!(-3), "-3"),
        ] {
            let id: CallbackId = serde_json::from_value(raw.clone()).expect("id");
            assert_eq!(id.as_str(), expected, "from {raw}");
        }
        assert!(serde_json::from_value::<CallbackId>(json!(1.5)).is_err());
        assert!(serde_json::from_value::<CallbackId>(json!({"id": 1})).is_err());
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(CallbackId::generate(), CallbackId::generate());
        assert_ne!(SubscriberId::generate(), SubscriberId::generate());
    }

    #[test]
    fn native_event_envelope_field_names() {
        let event = NativeEvent::reply("toast", "cb-1".into(), json!({"reason": "created"}))
            .with_keep_alive(true);
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            value,
            json!({
                "event": "toast",
                "callbackId": "cb-1",
                "payload": {"reason": "created"},
                "keepAlive": true
            })
        );
    }

    #[test]
    fn broadcast_omits_optional_fields() {
        let value = serde_json::to_value(NativeEvent::broadcast("entercover", Value::Null))
            .expect("serialize");
        assert_eq!(value, json!({"event": "entercover", "payload": null}));
    }

    #[test]
    fn outcome_into_result() {
        let ok = CallOutcome::Ok(json!(1));
        assert!(ok.is_ok());
        assert_eq!(ok.into_result(), Ok(json!(1)));

        let err = CallOutcome::Err(ErrorReport::new(ErrorCode::Timeout, "late"));
        assert!(err.payload().is_none());
        assert_eq!(err.into_result().unwrap_err().code, ErrorCode::Timeout);
    }
}
