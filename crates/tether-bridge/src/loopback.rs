// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process bridge for desktop hosts and tests.
//
// Records every native invocation, keeps real system event listener lists,
// and lets the host (or a test) emit system events and script the device
// state (active connection, startup mode, cover size).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tether_core::error::{Result, TetherError};
use tether_core::sync::lock;
use tether_core::types::InvokeToken;
use tracing::debug;

use crate::traits::*;

/// Serves native commands for one plugin id inside the host process.
pub type CommandHandler = Arc<dyn Fn(&str, &Value) -> Result<()> + Send + Sync>;

/// A native command as it was issued.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub plugin_id: String,
    pub command: String,
    pub args: Value,
}

struct StartupState {
    mode: StartupMode,
    request: Option<Value>,
}

/// Bridge that loops native traffic back into the host process.
pub struct LoopbackBridge {
    invocations: Mutex<Vec<Invocation>>,
    listeners: Mutex<HashMap<String, Vec<(ListenerToken, SystemListener)>>>,
    next_token: AtomicU64,
    failing_commands: Mutex<HashSet<String>>,
    connection: Mutex<Option<ActiveConnection>>,
    startup: Mutex<StartupState>,
    cover: Mutex<(CoverSize, Option<Value>)>,
    handlers: Mutex<HashMap<String, CommandHandler>>,
}

impl Default for LoopbackBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBridge {
    pub fn new() -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
            listeners: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            failing_commands: Mutex::new(HashSet::new()),
            connection: Mutex::new(None),
            startup: Mutex::new(StartupState {
                mode: StartupMode::Launch,
                request: None,
            }),
            cover: Mutex::new((
                CoverSize {
                    width: 334,
                    height: 396,
                },
                None,
            )),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver `payload` to every listener on `system_event`.
    ///
    /// Listeners run after the registry lock is released, so they may add or
    /// remove listeners themselves. Returns the number of listeners called.
    pub fn emit(&self, system_event: &str, payload: &Value) -> usize {
        let targets: Vec<SystemListener> = lock(&self.listeners)
            .get(system_event)
            .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        debug!(system_event, listeners = targets.len(), "loopback emit");
        for listener in &targets {
            listener(payload);
        }
        targets.len()
    }

    /// Every invocation so far, oldest first.
    pub fn invocations(&self) -> Vec<Invocation> {
        lock(&self.invocations).clone()
    }

    /// How many times `command` was issued (any plugin).
    pub fn count_of(&self, command: &str) -> usize {
        lock(&self.invocations)
            .iter()
            .filter(|inv| inv.command == command)
            .count()
    }

    pub fn clear_invocations(&self) {
        lock(&self.invocations).clear();
    }

    /// Make subsequent invocations of `command` fail with `NativeUnavailable`.
    pub fn fail_command(&self, command: &str) {
        lock(&self.failing_commands).insert(command.to_owned());
    }

    pub fn restore_command(&self, command: &str) {
        lock(&self.failing_commands).remove(command);
    }

    /// Number of listeners attached to `system_event`.
    pub fn listener_count(&self, system_event: &str) -> usize {
        lock(&self.listeners)
            .get(system_event)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn set_active_connection(&self, connection: Option<ActiveConnection>) {
        *lock(&self.connection) = connection;
    }

    pub fn set_startup(&self, mode: StartupMode, request: Option<Value>) {
        *lock(&self.startup) = StartupState { mode, request };
    }

    /// Hand every later command for `plugin_id` to `handler` after it is
    /// recorded. A handler error is returned to the caller.
    pub fn serve(&self, plugin_id: &str, handler: CommandHandler) {
        if lock(&self.handlers)
            .insert(plugin_id.to_owned(), handler)
            .is_some()
        {
            debug!(plugin_id, "loopback command handler replaced");
        }
    }

    /// The last cover handed to `update_cover`.
    pub fn current_cover(&self) -> Option<Value> {
        lock(&self.cover).1.clone()
    }
}

impl PlatformBridge for LoopbackBridge {
    fn platform_name(&self) -> &str {
        "Loopback"
    }
}

impl NativeInvoke for LoopbackBridge {
    fn invoke_native(&self, plugin_id: &str, command: &str, args: &Value) -> Result<InvokeToken> {
        if lock(&self.failing_commands).contains(command) {
            debug!(plugin_id, command, "loopback command scripted to fail");
            return Err(TetherError::NativeUnavailable);
        }

        lock(&self.invocations).push(Invocation {
            plugin_id: plugin_id.to_owned(),
            command: command.to_owned(),
            args: args.clone(),
        });
        debug!(plugin_id, command, "loopback invoke");

        let handler = lock(&self.handlers).get(plugin_id).cloned();
        if let Some(handler) = handler {
            handler(command, args)?;
        }
        Ok(InvokeToken::empty())
    }
}

impl SystemEvents for LoopbackBridge {
    fn add_listener(&self, system_event: &str, listener: SystemListener) -> Result<ListenerToken> {
        let token = ListenerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners)
            .entry(system_event.to_owned())
            .or_default()
            .push((token, listener));
        Ok(token)
    }

    fn remove_listener(&self, system_event: &str, token: ListenerToken) -> Result<()> {
        let mut listeners = lock(&self.listeners);
        let list = listeners
            .get_mut(system_event)
            .ok_or_else(|| TetherError::UnknownEvent(system_event.to_owned()))?;
        let before = list.len();
        list.retain(|(t, _)| *t != token);
        if list.len() == before {
            return Err(TetherError::Bridge(format!(
                "listener {} not attached to {system_event}",
                token.0
            )));
        }
        Ok(())
    }
}

impl NativeConnectivity for LoopbackBridge {
    fn active_connection(&self) -> Result<Option<ActiveConnection>> {
        Ok(lock(&self.connection).clone())
    }
}

impl NativeInvocation for LoopbackBridge {
    fn startup_mode(&self) -> Result<StartupMode> {
        Ok(lock(&self.startup).mode)
    }

    fn launch_request(&self) -> Result<Option<Value>> {
        Ok(lock(&self.startup).request.clone())
    }
}

impl NativeCover for LoopbackBridge {
    fn cover_size(&self) -> Result<CoverSize> {
        Ok(lock(&self.cover).0)
    }

    fn update_cover(&self, cover: &Value) -> Result<()> {
        lock(&self.cover).1 = Some(cover.clone());
        Ok(())
    }
}
