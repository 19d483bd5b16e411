// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Tether plugins: device capability facades built on the event core.
//!
//! Each facade owns its channels and callback tables and plugs them into an
//! [`EventRouter`] through [`Plugin::attach`]. Facades that watch platform
//! system events also come with an extension half (see [`extension`]) which
//! keeps one system listener per web view.

pub mod barcode;
pub mod connection;
pub mod cover;
pub mod extension;
pub mod invoked;
pub mod push;
pub mod sensors;
pub mod toast;

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

use tether_bridge::PlatformBridge;
use tether_bridge::traits::{NativeInvoke, SystemEvents};
use tether_core::config::TetherConfig;
use tether_core::error::Result;
use tether_core::report::ErrorReport;
use tether_core::sync::lock;
use tether_core::types::{CallOutcome, CallbackId};
use tether_events::{CallbackTable, EventRouter};

pub use barcode::BarcodeScanner;
pub use connection::{Connection, ConnectionExtension, ConnectionType};
pub use cover::{Cover, CoverExtension, CoverPlugin};
pub use extension::{EventExtension, EventSink};
pub use invoked::Invoked;
pub use push::Push;
pub use sensors::{Sensor, SensorOptions, Sensors};
pub use toast::Toast;

/// A device capability that receives native events.
pub trait Plugin: Send + Sync {
    /// Native plugin id (`com.blackberry.connection`, ...).
    fn id(&self) -> &'static str;

    /// Register this plugin's channels and correlation rules.
    fn attach(&self, router: &mut EventRouter);
}

/// What a correlated call eventually resolves to.
pub type Reply<T> = oneshot::Receiver<std::result::Result<T, ErrorReport>>;

pub(crate) fn invoker(bridge: &Arc<dyn PlatformBridge>) -> Arc<dyn NativeInvoke> {
    Arc::new(Arc::clone(bridge))
}

pub(crate) fn system_events(bridge: &Arc<dyn PlatformBridge>) -> Arc<dyn SystemEvents> {
    Arc::new(Arc::clone(bridge))
}

/// A callback table configured from the host settings.
pub(crate) fn table_for(name: &str, config: &TetherConfig) -> CallbackTable {
    let table = CallbackTable::new(name).with_policy(config.collision_policy);
    match config.pending_timeout() {
        Some(timeout) => table.with_timeout(timeout),
        None => table,
    }
}

/// Register a one-shot call whose payload is converted by `map`.
pub(crate) fn register_reply<T, F>(table: &CallbackTable, id: CallbackId, map: F) -> Result<Reply<T>>
where
    T: Send + 'static,
    F: Fn(Value) -> std::result::Result<T, ErrorReport> + Send + Sync + 'static,
{
    let (tx, rx) = oneshot::channel();
    let slot = Mutex::new(Some(tx));
    table.register(id, move |outcome| {
        let reply = match outcome {
            CallOutcome::Ok(payload) => map(payload),
            CallOutcome::Err(report) => Err(report),
        };
        if let Some(tx) = lock(&slot).take() {
            let _ = tx.send(reply);
        }
    })?;
    Ok(rx)
}
