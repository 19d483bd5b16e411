// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic trait definitions for native capabilities.
//
// The event core only needs the call/response/event contract of the native
// side. Each contract is a small trait; `PlatformBridge` groups them.

use std::sync::Arc;

use serde_json::Value;
use tether_core::error::Result;
use tether_core::types::InvokeToken;

/// Callback attached to a system event source.
pub type SystemListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned when a listener is attached; needed to detach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(pub u64);

/// Unified bridge that groups all native capabilities.
pub trait PlatformBridge:
    NativeInvoke + SystemEvents + NativeConnectivity + NativeInvocation + NativeCover + Send + Sync
{
    /// Human-readable platform name (e.g. "BlackBerry 10", "Loopback").
    fn platform_name(&self) -> &str;
}

/// Outbound command channel into the native extension of a plugin.
pub trait NativeInvoke: Send + Sync {
    /// Fire a command. Returns immediately; results arrive later as events.
    fn invoke_native(&self, plugin_id: &str, command: &str, args: &Value) -> Result<InvokeToken>;
}

/// Platform system event source (device events, application events, ...).
pub trait SystemEvents: Send + Sync {
    /// Attach `listener` to `system_event`.
    fn add_listener(&self, system_event: &str, listener: SystemListener) -> Result<ListenerToken>;

    /// Detach a listener previously returned by `add_listener`.
    fn remove_listener(&self, system_event: &str, token: ListenerToken) -> Result<()>;
}

/// Active network connection as the platform reports it.
pub trait NativeConnectivity {
    /// Returns None when no connection is active.
    fn active_connection(&self) -> Result<Option<ActiveConnection>>;
}

/// How the application was started.
pub trait NativeInvocation {
    fn startup_mode(&self) -> Result<StartupMode>;

    /// The invocation request that started the application, if any.
    fn launch_request(&self) -> Result<Option<Value>>;
}

/// Application cover (the minimised-window tile).
pub trait NativeCover {
    /// Cover dimensions as reported by the platform.
    fn cover_size(&self) -> Result<CoverSize>;

    /// Replace the cover. `{"cover": "reset"}` restores the default.
    fn update_cover(&self, cover: &Value) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Info structs
// ---------------------------------------------------------------------------

/// Raw connection info (`type`, `technology`) before mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveConnection {
    pub kind: String,
    /// Radio technology for cellular connections (`lte`, `umts`, ...).
    pub technology: Option<String>,
}

impl ActiveConnection {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            technology: None,
        }
    }

    pub fn cellular(technology: impl Into<String>) -> Self {
        Self {
            kind: "cellular".into(),
            technology: Some(technology.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// Plain launch from the home screen.
    Launch,
    /// Started to service an invocation.
    Invoke,
    /// Started as a card for another application.
    Card,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverSize {
    pub width: u32,
    pub height: u32,
}

// ---------------------------------------------------------------------------
// Shared-pointer forwarding
// ---------------------------------------------------------------------------

impl<B: NativeInvoke + ?Sized> NativeInvoke for Arc<B> {
    fn invoke_native(&self, plugin_id: &str, command: &str, args: &Value) -> Result<InvokeToken> {
        (**self).invoke_native(plugin_id, command, args)
    }
}

impl<B: SystemEvents + ?Sized> SystemEvents for Arc<B> {
    fn add_listener(&self, system_event: &str, listener: SystemListener) -> Result<ListenerToken> {
        (**self).add_listener(system_event, listener)
    }

    fn remove_listener(&self, system_event: &str, token: ListenerToken) -> Result<()> {
        (**self).remove_listener(system_event, token)
    }
}
