// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Push service facade.
//
// The push extension keeps at most one pending call per operation, so every
// reply is keyed by its fixed event name rather than by a callback id. A new
// call of the same operation replaces the pending one.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use tether_bridge::PlatformBridge;
use tether_bridge::traits::NativeInvoke;
use tether_core::config::TetherConfig;
use tether_core::error::{Result, TetherError};
use tether_core::report::{ErrorCode, ErrorReport};
use tether_core::sync::lock;
use tether_core::types::{CallOutcome, CallbackId};
use tether_events::router::CorrelationRule;
use tether_events::{CallbackTable, EventRouter};

use crate::{Plugin, Reply, invoker, register_reply, table_for};

pub const ID: &str = "com.blackberry.push";

pub const CREATE_CALLBACK: &str = "push.create.callback";
pub const SIM_CHANGE_CALLBACK: &str = "push.create.simChangeCallback";
pub const TRANSPORT_READY_CALLBACK: &str = "push.create.pushTransportReadyCallback";
pub const CONNECTION_READY_CALLBACK: &str = "push.create.pushServiceConnectionReadyCallback";
pub const CREATE_CHANNEL_CALLBACK: &str = "push.createChannel.callback";
pub const DESTROY_CHANNEL_CALLBACK: &str = "push.destroyChannel.callback";
pub const LAUNCH_ON_PUSH_CALLBACK: &str = "push.launchApplicationOnPush.callback";

/// Result codes reported by the push service.
pub mod status {
    pub const SUCCESS: i64 = 0;
    pub const INTERNAL_ERROR: i64 = 500;
    pub const PUSH_SERVICE_CONNECTION_CLOSED: i64 = 501;
    pub const PUSH_SERVICE_CONNECTION_PERMISSION_ERROR: i64 = 502;
    pub const INVALID_DEVICE_PIN: i64 = 10001;
    pub const INVALID_PROVIDER_APPLICATION_ID: i64 = 10002;
    pub const CHANNEL_ALREADY_DESTROYED: i64 = 10004;
    pub const CHANNEL_ALREADY_DESTROYED_BY_PROVIDER: i64 = 10005;
    pub const INVALID_PPG_SUBSCRIBER_STATE: i64 = 10006;
    pub const PPG_SUBSCRIBER_NOT_FOUND: i64 = 10007;
    pub const EXPIRED_AUTHENTICATION_TOKEN_PROVIDED_TO_PPG: i64 = 10008;
    pub const INVALID_AUTHENTICATION_TOKEN_PROVIDED_TO_PPG: i64 = 10009;
    pub const PPG_SUBSCRIBER_LIMIT_REACHED: i64 = 10010;
    pub const INVALID_OS_VERSION_OR_DEVICE_MODEL_NUMBER: i64 = 10011;
    pub const CHANNEL_SUSPENDED_BY_PROVIDER: i64 = 10012;
    pub const CREATE_SESSION_NOT_DONE: i64 = 10100;
    pub const MISSING_PPG_URL: i64 = 10102;
    pub const PUSH_TRANSPORT_UNAVAILABLE: i64 = 10103;
    pub const OPERATION_NOT_SUPPORTED: i64 = 10105;
    pub const CREATE_CHANNEL_NOT_DONE: i64 = 10106;
    pub const MISSING_PORT_FROM_PPG: i64 = 10107;
    pub const MISSING_SUBSCRIPTION_RETURN_CODE_FROM_PPG: i64 = 10108;
    pub const PPG_SERVER_ERROR: i64 = 10110;
    pub const MISSING_INVOKE_TARGET_ID: i64 = 10111;
    pub const SESSION_ALREADY_EXISTS: i64 = 10112;
    pub const INVALID_PPG_URL: i64 = 10114;
}

const PUSH_ACTION: &str = "bb.action.PUSH";
const INVALID_INVOKE: &str =
    "the invoke object was invalid and no push payload could be extracted from it";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOptions {
    pub invoke_target_id: String,
    pub app_id: String,
    /// Push proxy gateway; empty for enterprise push.
    pub ppg_url: String,
}

/// Reply to `create_channel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCreated {
    pub result: i64,
    /// Push token to hand to the push initiator; absent on failure.
    pub token: Option<String>,
}

/// A push extracted from an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub id: String,
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub is_acknowledge_required: bool,
}

type Session = Arc<Mutex<Option<PushOptions>>>;

pub struct Push {
    native: Arc<dyn NativeInvoke>,
    table: Arc<CallbackTable>,
    /// Options of the service started by `start_service`.
    session: Session,
}

impl Push {
    pub fn new(bridge: Arc<dyn PlatformBridge>, config: &TetherConfig) -> Self {
        Self::with_invoker(invoker(&bridge), config)
    }

    pub(crate) fn with_invoker(native: Arc<dyn NativeInvoke>, config: &TetherConfig) -> Self {
        Self {
            native,
            table: Arc::new(table_for(ID, config)),
            session: Arc::new(Mutex::new(None)),
        }
    }

    pub fn table(&self) -> &Arc<CallbackTable> {
        &self.table
    }

    /// Start the push service. Resolves with the service's result code.
    ///
    /// Starting again is allowed only with the same invoke target and app id.
    /// A failed start forgets the options.
    #[instrument(skip(self), fields(target = %options.invoke_target_id))]
    pub fn start_service(&self, options: &PushOptions) -> Result<Reply<i64>> {
        {
            let mut session = lock(&self.session);
            if let Some(current) = session.as_ref() {
                if current.invoke_target_id != options.invoke_target_id {
                    return Err(TetherError::InvalidArgument(
                        "cannot start the push service again with a different invokeTargetId"
                            .into(),
                    ));
                }
                if current.app_id != options.app_id {
                    return Err(TetherError::InvalidArgument(
                        "cannot start the push service again with a different appId".into(),
                    ));
                }
            }
            *session = Some(options.clone());
        }

        let session = Arc::downgrade(&self.session);
        let reply = register_reply(&self.table, CREATE_CALLBACK.into(), move |payload| {
            let code = result_code(&payload)?;
            if code != status::SUCCESS {
                if let Some(session) = session.upgrade() {
                    *lock(&session) = None;
                }
                warn!(code, "push service failed to start");
            }
            Ok(code)
        })?;

        if let Err(e) = self.call("startService", CREATE_CALLBACK, json!(options)) {
            *lock(&self.session) = None;
            return Err(e);
        }
        Ok(reply)
    }

    pub fn create_channel(&self) -> Result<Reply<ChannelCreated>> {
        let reply = register_reply(&self.table, CREATE_CHANNEL_CALLBACK.into(), |payload| {
            channel_created(&payload)
        })?;
        self.call("createChannel", CREATE_CHANNEL_CALLBACK, Value::Null)?;
        Ok(reply)
    }

    pub fn destroy_channel(&self) -> Result<Reply<i64>> {
        let reply = register_reply(&self.table, DESTROY_CHANNEL_CALLBACK.into(), |payload| {
            result_code(&payload)
        })?;
        self.call("destroyChannel", DESTROY_CHANNEL_CALLBACK, Value::Null)?;
        Ok(reply)
    }

    /// Have the platform launch the app when a push arrives while it is not
    /// running.
    pub fn launch_application_on_push(&self, should_launch: bool) -> Result<Reply<i64>> {
        let reply = register_reply(&self.table, LAUNCH_ON_PUSH_CALLBACK.into(), |payload| {
            result_code(&payload)
        })?;
        self.call(
            "launchApplicationOnPush",
            LAUNCH_ON_PUSH_CALLBACK,
            json!({ "shouldLaunch": should_launch }),
        )?;
        Ok(reply)
    }

    /// Called once when the SIM card changes.
    pub fn on_sim_change<F>(&self, handler: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register_callback(SIM_CHANGE_CALLBACK, move |_| handler())
    }

    /// Called every time the push transport becomes available again after a
    /// failed operation.
    pub fn on_transport_ready<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        self.register_callback(TRANSPORT_READY_CALLBACK, move |code| handler(code))
    }

    /// Called once the connection to the push service is up (or gave up).
    pub fn on_connection_ready<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        self.register_callback(CONNECTION_READY_CALLBACK, move |code| handler(code))
    }

    /// Extract the push carried by an invocation request.
    #[instrument(skip_all)]
    pub fn extract_push_payload(&self, invoke: &Value) -> Result<PushPayload> {
        let action = invoke.get("action").and_then(Value::as_str);
        let data = invoke.get("data").filter(|d| match d {
            Value::String(s) => !s.is_empty(),
            Value::Null => false,
            _ => true,
        });
        let data = match (action, data) {
            (Some(PUSH_ACTION), Some(data)) => data,
            _ => return Err(TetherError::InvalidArgument(INVALID_INVOKE.into())),
        };

        let token = self
            .native
            .invoke_native(ID, "extractPushPayload", &json!({ "data": data }))?;
        let raw = token.as_str();
        let body = match (raw.find('{'), raw.rfind('}')) {
            (Some(start), Some(end)) if start < end => &raw[start..=end],
            _ => return Err(TetherError::MalformedEvent(format!("push payload: {raw}"))),
        };
        let value: Value = serde_json::from_str(body)?;
        if !value.get("valid").and_then(Value::as_bool).unwrap_or(false) {
            return Err(TetherError::InvalidArgument(INVALID_INVOKE.into()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Accept or reject a push that requires acknowledgement.
    #[instrument(skip(self))]
    pub fn acknowledge(&self, push_id: &str, accept: bool) -> Result<()> {
        self.native.invoke_native(
            ID,
            "acknowledge",
            &json!({ "id": push_id, "shouldAcceptPush": accept }),
        )?;
        Ok(())
    }

    fn register_callback<F>(&self, event: &str, handler: F) -> Result<()>
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        self.table.register(event, move |outcome| match outcome {
            CallOutcome::Ok(payload) => handler(result_code(&payload).unwrap_or(status::SUCCESS)),
            CallOutcome::Err(report) => debug!(%report, "push callback failed"),
        })?;
        self.call("registerCallback", event, json!({ "id": event }))
    }

    /// Issue a native command; on failure the pending entry under `event`
    /// is dropped again.
    fn call(&self, command: &str, event: &str, args: Value) -> Result<()> {
        match self.native.invoke_native(ID, command, &args) {
            Ok(_) => {
                info!(command, "push command issued");
                Ok(())
            }
            Err(e) => {
                warn!(command, error = %e, "push command failed");
                self.table.clear(&CallbackId::from(event));
                Err(e)
            }
        }
    }
}

impl Plugin for Push {
    fn id(&self) -> &'static str {
        ID
    }

    fn attach(&self, router: &mut EventRouter) {
        let one_shot = || CorrelationRule::one_shot(self.table.clone()).keyed_by_name();
        router.add_rule(CREATE_CALLBACK, one_shot());
        router.add_rule(SIM_CHANGE_CALLBACK, one_shot());
        router.add_rule(CONNECTION_READY_CALLBACK, one_shot());
        router.add_rule(CREATE_CHANNEL_CALLBACK, one_shot());
        router.add_rule(DESTROY_CHANNEL_CALLBACK, one_shot());
        router.add_rule(LAUNCH_ON_PUSH_CALLBACK, one_shot());
        router.add_rule(
            TRANSPORT_READY_CALLBACK,
            CorrelationRule::streaming(self.table.clone()).keyed_by_name(),
        );
    }
}

fn malformed(what: &str, payload: &Value) -> ErrorReport {
    ErrorReport::new(ErrorCode::MalformedEvent, format!("{what}: {payload}"))
}

/// Unwrap `{"data": .., "trailer": ..}` produced for trailing tokens.
fn split_trailer(payload: &Value) -> (&Value, Option<&str>) {
    match (payload.get("data"), payload.get("trailer")) {
        (Some(data), Some(trailer)) => (data, trailer.as_str()),
        _ => (payload, None),
    }
}

fn as_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn result_code(payload: &Value) -> std::result::Result<i64, ErrorReport> {
    let (data, _) = split_trailer(payload);
    as_code(data).ok_or_else(|| malformed("push result code", payload))
}

fn channel_created(payload: &Value) -> std::result::Result<ChannelCreated, ErrorReport> {
    // JSON envelopes carry {"result", "token"}; the legacy form carries the
    // token as a trailing word.
    if let Some(result) = payload.get("result").and_then(as_code) {
        let token = payload.get("token").and_then(Value::as_str).map(str::to_owned);
        return Ok(ChannelCreated { result, token });
    }
    let (data, trailer) = split_trailer(payload);
    let result = as_code(data).ok_or_else(|| malformed("createChannel result", payload))?;
    Ok(ChannelCreated {
        result,
        token: trailer.map(str::to_owned),
    })
}
