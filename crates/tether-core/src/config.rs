// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Host configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TetherError};

/// Which native bridge the host talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeKind {
    /// Every native call fails with `NativeUnavailable`.
    Stub,
    /// In-process bridge that records calls and emits events on demand.
    #[default]
    Loopback,
}

/// What to do when a callback id is registered while one is still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Last write wins; the previous handler is dropped without being called.
    #[default]
    Replace,
    /// Fail with `DuplicateCallbackId` and keep the existing handler.
    Reject,
}

/// What to do when a per-webview listener is started twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Detach the running listener and attach the new one.
    #[default]
    Replace,
    /// Fail with `DuplicateSubscription`.
    Reject,
}

/// Whether a channel replays its last payload to late subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
    #[default]
    None,
    /// Every late subscriber gets the latest payload once on join.
    Latest,
    /// Only the first late subscriber gets it; the value is then discarded.
    Once,
}

/// Persistent host settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Native bridge implementation.
    pub bridge: BridgeKind,
    /// Collision handling for the callback correlation tables.
    pub collision_policy: CollisionPolicy,
    /// Duplicate handling for per-webview listeners.
    pub duplicate_policy: DuplicatePolicy,
    /// Expire pending correlated calls after this many milliseconds.
    /// `None` keeps them until cleared (the platform's own behaviour).
    pub pending_timeout_ms: Option<u64>,
    /// How often the timeout sweeper runs.
    pub sweep_interval_ms: u64,
    /// Per-event replay overrides, keyed by event name.
    pub replay: BTreeMap<String, ReplayPolicy>,
    /// Web view id used by the host when none is supplied.
    pub default_webview: String,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeKind::Loopback,
            collision_policy: CollisionPolicy::Replace,
            duplicate_policy: DuplicatePolicy::Replace,
            pending_timeout_ms: None,
            sweep_interval_ms: 1_000,
            replay: BTreeMap::new(),
            default_webview: "1".into(),
        }
    }
}

impl TetherConfig {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        info!(path = %path.display(), bridge = ?config.bridge, "configuration loaded");
        Ok(config)
    }

    /// Write settings as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_ms == 0 {
            return Err(TetherError::Config(
                "sweep_interval_ms must be greater than zero".into(),
            ));
        }
        if self.pending_timeout_ms == Some(0) {
            return Err(TetherError::Config(
                "pending_timeout_ms must be greater than zero when set".into(),
            ));
        }
        if self.default_webview.trim().is_empty() {
            return Err(TetherError::Config("default_webview is empty".into()));
        }
        Ok(())
    }

    pub fn pending_timeout(&self) -> Option<Duration> {
        self.pending_timeout_ms.map(Duration::from_millis)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Replay policy for an event, falling back to `fallback`.
    pub fn replay_for(&self, event_name: &str, fallback: ReplayPolicy) -> ReplayPolicy {
        self.replay.get(event_name).copied().unwrap_or(fallback)
    }
}
