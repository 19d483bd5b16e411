// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Network connection facade.
//
// Client half: the current connection type and a `connectionchange` channel.
// Extension half: one `connectionChange` system listener per web view that
// turns raw device notifications into `{oldType, newType}` events, emitted
// only when the mapped type really changed.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use tether_bridge::PlatformBridge;
use tether_bridge::traits::{NativeConnectivity, SystemListener};
use tether_core::config::{ReplayPolicy, TetherConfig};
use tether_core::error::Result;
use tether_core::sync::lock;
use tether_core::types::{NativeEvent, SubscriberId, WebviewId};
use tether_events::{EventChannel, EventRouter, WebviewRegistry};

use crate::extension::{EventExtension, EventSink};
use crate::{Plugin, invoker, system_events};

pub const ID: &str = "com.blackberry.connection";
pub const CONNECTION_CHANGE: &str = "connectionchange";
const SYSTEM_EVENT: &str = "connectionChange";

/// Connection type as exposed to applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "ethernet")]
    Ethernet,
    #[serde(rename = "wifi")]
    Wifi,
    #[serde(rename = "bluetooth_dun")]
    BluetoothDun,
    #[serde(rename = "usb")]
    Usb,
    #[serde(rename = "vpn")]
    Vpn,
    #[serde(rename = "rim-bb")]
    Bb,
    #[serde(rename = "2g")]
    Cell2g,
    #[serde(rename = "3g")]
    Cell3g,
    #[serde(rename = "4g")]
    Cell4g,
    #[serde(rename = "none")]
    None,
}

impl ConnectionType {
    /// Map the platform's `(type, technology)` pair.
    pub fn from_native(kind: &str, technology: Option<&str>) -> Self {
        match kind {
            "wired" => Self::Ethernet,
            "wifi" => Self::Wifi,
            "bluetooth_dun" => Self::BluetoothDun,
            "usb" => Self::Usb,
            "vpn" => Self::Vpn,
            "bb" => Self::Bb,
            "none" => Self::None,
            "cellular" => match technology {
                Some("edge" | "gsm") => Self::Cell2g,
                Some("evdo" | "umts") => Self::Cell3g,
                Some("lte") => Self::Cell4g,
                _ => Self::Unknown,
            },
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Ethernet => "ethernet",
            Self::Wifi => "wifi",
            Self::BluetoothDun => "bluetooth_dun",
            Self::Usb => "usb",
            Self::Vpn => "vpn",
            Self::Bb => "rim-bb",
            Self::Cell2g => "2g",
            Self::Cell3g => "3g",
            Self::Cell4g => "4g",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `connectionchange` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionChange {
    pub old_type: ConnectionType,
    pub new_type: ConnectionType,
}

fn current_type<D: NativeConnectivity + ?Sized>(device: &D) -> Result<ConnectionType> {
    Ok(match device.active_connection()? {
        Some(conn) => ConnectionType::from_native(&conn.kind, conn.technology.as_deref()),
        None => ConnectionType::None,
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct Connection {
    bridge: Arc<dyn PlatformBridge>,
    change: Arc<EventChannel>,
}

impl Connection {
    pub fn new(bridge: Arc<dyn PlatformBridge>, config: &TetherConfig) -> Self {
        let change = EventChannel::new(ID, CONNECTION_CHANGE, invoker(&bridge))
            .with_replay(config.replay_for(CONNECTION_CHANGE, ReplayPolicy::None));
        Self {
            bridge,
            change: Arc::new(change),
        }
    }

    /// Current connection type; `Unknown` when the platform cannot say.
    #[instrument(skip(self))]
    pub fn connection_type(&self) -> ConnectionType {
        current_type(&*self.bridge).unwrap_or_else(|e| {
            warn!(error = %e, "could not read active connection");
            ConnectionType::Unknown
        })
    }

    /// Subscribe to typed connection changes.
    pub fn on_change<F>(&self, id: SubscriberId, handler: F)
    where
        F: Fn(ConnectionChange) -> Result<()> + Send + Sync + 'static,
    {
        self.change.subscribe(id, move |payload| {
            let change: ConnectionChange = serde_json::from_value(payload.clone())?;
            handler(change)
        });
    }

    pub fn remove_change_listener(&self, id: &SubscriberId) -> bool {
        self.change.unsubscribe(id)
    }

    pub fn channel(&self) -> &Arc<EventChannel> {
        &self.change
    }
}

impl Plugin for Connection {
    fn id(&self) -> &'static str {
        ID
    }

    fn attach(&self, router: &mut EventRouter) {
        router.add_channel(self.change.clone());
    }
}

// ---------------------------------------------------------------------------
// Extension
// ---------------------------------------------------------------------------

pub struct ConnectionExtension {
    bridge: Arc<dyn PlatformBridge>,
    registry: WebviewRegistry,
    sink: EventSink,
}

impl ConnectionExtension {
    pub fn new(bridge: Arc<dyn PlatformBridge>, config: &TetherConfig, sink: EventSink) -> Self {
        let registry = WebviewRegistry::new(ID, system_events(&bridge), config.duplicate_policy)
            .with_action(CONNECTION_CHANGE, SYSTEM_EVENT);
        Self {
            bridge,
            registry,
            sink,
        }
    }
}

impl EventExtension for ConnectionExtension {
    fn registry(&self) -> &WebviewRegistry {
        &self.registry
    }

    fn listener(&self, event_name: &str, webview: &WebviewId) -> SystemListener {
        let bridge = self.bridge.clone();
        let sink = self.sink.clone();
        let webview = webview.clone();
        let event_name = event_name.to_owned();
        // Each web view tracks its own last type.
        let last = Mutex::new(current_type(&*bridge).ok());

        Arc::new(move |_: &Value| {
            let current = match current_type(&*bridge) {
                Ok(current) => current,
                Err(e) => {
                    warn!(error = %e, %webview, "connection change without readable type");
                    return;
                }
            };
            let previous = lock(&last).replace(current);

            match previous {
                Some(old) if old != current => {
                    let payload = json!({ "oldType": old, "newType": current });
                    sink(&webview, NativeEvent::broadcast(event_name.as_str(), payload));
                }
                _ => debug!(%current, %webview, "connection type unchanged"),
            }
        })
    }
}
