// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Barcode scanner facade.
//
// `start_read` opens one streaming call that receives every scanner event
// until `ended`. `stop_read` asks the scanner to stop; the `ended` reply
// closes both the stop call and the read it belongs to.

use std::sync::{Arc, Mutex, Weak};

use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use tether_bridge::PlatformBridge;
use tether_bridge::traits::NativeInvoke;
use tether_core::config::TetherConfig;
use tether_core::error::{Result, TetherError};
use tether_core::report::ErrorReport;
use tether_core::sync::lock;
use tether_core::types::{CallOutcome, CallbackId};
use tether_events::router::CorrelationRule;
use tether_events::{CallbackTable, EventRouter};

use crate::{Plugin, Reply, invoker, register_reply, table_for};

pub const ID: &str = "com.blackberry.barcodescanner";

pub const STARTED: &str = "community.barcodescanner.started.native";
pub const CODE_FOUND: &str = "community.barcodescanner.codefound.native";
pub const ERROR_FOUND: &str = "community.barcodescanner.errorfound.native";
pub const FRAME_AVAILABLE: &str = "community.barcodescanner.frameavailable.native";
pub const ENDED: &str = "community.barcodescanner.ended.native";

/// One event of a running scan.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Started,
    CodeFound(Value),
    ErrorFound(Value),
    /// A preview frame was written to `frame`.
    FrameAvailable { frame: String },
    Ended(Value),
    /// The read call itself failed or expired.
    Failed(ErrorReport),
}

impl ScanEvent {
    /// Parse a payload tagged with its event name.
    fn from_tagged(payload: &Value) -> Option<Self> {
        let data = payload.get("data").cloned().unwrap_or(Value::Null);
        Some(match payload.get("event").and_then(Value::as_str)? {
            STARTED => Self::Started,
            CODE_FOUND => Self::CodeFound(data),
            ERROR_FOUND => Self::ErrorFound(data),
            FRAME_AVAILABLE => Self::FrameAvailable {
                frame: data.get("frame").and_then(Value::as_str)?.to_owned(),
            },
            ENDED => Self::Ended(data),
            _ => return None,
        })
    }
}

type Reading = Arc<Mutex<Option<CallbackId>>>;

pub struct BarcodeScanner {
    native: Arc<dyn NativeInvoke>,
    table: Arc<CallbackTable>,
    /// Callback id of the running read.
    reading: Reading,
}

impl BarcodeScanner {
    pub fn new(bridge: Arc<dyn PlatformBridge>, config: &TetherConfig) -> Self {
        Self {
            native: invoker(&bridge),
            table: Arc::new(table_for(ID, config)),
            reading: Arc::new(Mutex::new(None)),
        }
    }

    pub fn table(&self) -> &Arc<CallbackTable> {
        &self.table
    }

    pub fn is_reading(&self) -> bool {
        lock(&self.reading).is_some()
    }

    /// Start scanning. `on_event` receives every event of this read.
    #[instrument(skip_all)]
    pub fn start_read<F>(&self, on_event: F) -> Result<CallbackId>
    where
        F: Fn(ScanEvent) + Send + Sync + 'static,
    {
        let id = {
            let mut reading = lock(&self.reading);
            if reading.is_some() {
                return Err(TetherError::InvalidArgument(
                    "Stop Scanning before scanning again".into(),
                ));
            }
            let id = CallbackId::generate();
            *reading = Some(id.clone());
            id
        };

        let weak: Weak<Mutex<Option<CallbackId>>> = Arc::downgrade(&self.reading);
        let own_id = id.clone();
        let registered = self.table.register(id.clone(), move |outcome| {
            let event = match outcome {
                CallOutcome::Ok(payload) => match ScanEvent::from_tagged(&payload) {
                    Some(event) => event,
                    None => {
                        debug!(%payload, "ignoring unrecognised scanner event");
                        return;
                    }
                },
                CallOutcome::Err(report) => ScanEvent::Failed(report),
            };
            if matches!(event, ScanEvent::Ended(_) | ScanEvent::Failed(_)) {
                finish_read(&weak, &own_id);
            }
            on_event(event);
        });

        let started = registered.and_then(|()| {
            self.native
                .invoke_native(ID, "startRead", &json!({ "callbackId": id }))
        });
        if let Err(e) = started {
            warn!(error = %e, "scanner did not start");
            self.table.clear(&id);
            lock(&self.reading).take();
            return Err(e);
        }
        info!(callback_id = %id, "scan started");
        Ok(id)
    }

    /// Stop the running scan. Resolves with the `ended` data.
    #[instrument(skip_all)]
    pub fn stop_read(&self) -> Result<Reply<Value>> {
        let read_id = lock(&self.reading)
            .clone()
            .ok_or_else(|| TetherError::InvalidArgument("no scan in progress".into()))?;

        let stop_id = CallbackId::generate();
        let table = Arc::downgrade(&self.table);
        let reading = Arc::downgrade(&self.reading);
        let reply = register_reply(&self.table, stop_id.clone(), move |payload| {
            if let Some(table) = table.upgrade() {
                table.clear(&read_id);
            }
            finish_read(&reading, &read_id);
            Ok(payload.get("data").cloned().unwrap_or(payload))
        })?;

        if let Err(e) = self
            .native
            .invoke_native(ID, "stopRead", &json!({ "callbackId": stop_id }))
        {
            warn!(error = %e, "scanner did not accept stop");
            self.table.clear(&stop_id);
            return Err(e);
        }
        Ok(reply)
    }
}

/// Forget the running read if it is still `id`.
fn finish_read(reading: &Weak<Mutex<Option<CallbackId>>>, id: &CallbackId) {
    if let Some(reading) = reading.upgrade() {
        let mut current = lock(&reading);
        if current.as_ref() == Some(id) {
            *current = None;
            debug!(callback_id = %id, "scan finished");
        }
    }
}

impl Plugin for BarcodeScanner {
    fn id(&self) -> &'static str {
        ID
    }

    fn attach(&self, router: &mut EventRouter) {
        for event in [STARTED, CODE_FOUND, ERROR_FOUND, FRAME_AVAILABLE] {
            router.add_rule(event, CorrelationRule::streaming(self.table.clone()).tagged());
        }
        router.add_rule(ENDED, CorrelationRule::terminal(self.table.clone()).tagged());
    }
}
