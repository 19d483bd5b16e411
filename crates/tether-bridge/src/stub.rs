// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stub bridge for hosts where the native platform is unavailable.
//
// Every trait method returns `NativeUnavailable`.

use serde_json::Value;
use tether_core::error::{Result, TetherError};
use tether_core::types::InvokeToken;

use crate::traits::*;

/// No-op bridge returned when no native platform is present.
pub struct StubBridge;

impl PlatformBridge for StubBridge {
    fn platform_name(&self) -> &str {
        "Desktop (stub)"
    }
}

impl NativeInvoke for StubBridge {
    fn invoke_native(&self, plugin_id: &str, command: &str, _args: &Value) -> Result<InvokeToken> {
        tracing::warn!(plugin_id, command, "NativeInvoke::invoke_native called on stub bridge");
        Err(TetherError::NativeUnavailable)
    }
}

impl SystemEvents for StubBridge {
    fn add_listener(&self, system_event: &str, _listener: SystemListener) -> Result<ListenerToken> {
        tracing::warn!(system_event, "SystemEvents::add_listener called on stub bridge");
        Err(TetherError::NativeUnavailable)
    }

    fn remove_listener(&self, _system_event: &str, _token: ListenerToken) -> Result<()> {
        Err(TetherError::NativeUnavailable)
    }
}

impl NativeConnectivity for StubBridge {
    fn active_connection(&self) -> Result<Option<ActiveConnection>> {
        Err(TetherError::NativeUnavailable)
    }
}

impl NativeInvocation for StubBridge {
    fn startup_mode(&self) -> Result<StartupMode> {
        Err(TetherError::NativeUnavailable)
    }

    fn launch_request(&self) -> Result<Option<Value>> {
        Err(TetherError::NativeUnavailable)
    }
}

impl NativeCover for StubBridge {
    fn cover_size(&self) -> Result<CoverSize> {
        Err(TetherError::NativeUnavailable)
    }

    fn update_cover(&self, _cover: &Value) -> Result<()> {
        tracing::warn!("NativeCover::update_cover called on stub bridge");
        Err(TetherError::NativeUnavailable)
    }
}
