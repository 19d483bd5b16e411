// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Replay host: every plugin wired to one router, fed from an event log.
//
// Log lines are raw native events (legacy `name payload [id]` or JSON
// envelopes). Lines starting with `@` drive the loopback bridge instead:
//
//   @systemEvent <name> [json]    emit a platform system event
//   @connection <kind> [tech]     change the active connection (`none` clears)
//
// Blank lines and `#` comments are skipped.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tether_bridge::traits::ActiveConnection;
use tether_bridge::{LoopbackBridge, PlatformBridge, platform_bridge};
use tether_core::config::{BridgeKind, TetherConfig};
use tether_core::error::{Result, TetherError};
use tether_core::types::{NativeEvent, SubscriberId, WebviewId};
use tether_events::channel::{START_COMMAND, STOP_COMMAND};
use tether_events::{CallbackTable, EventRouter, Routed, spawn_sweeper};
use tether_plugins::{connection, cover};
use tether_plugins::{
    BarcodeScanner, Connection, ConnectionExtension, CoverExtension, CoverPlugin, EventExtension,
    EventSink, Invoked, Plugin, Push, Sensors, Toast,
};

/// Subscriber id used for the host's own logging handlers.
const LOG_SUBSCRIBER: &str = "tether-log";

/// Running totals for one replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub lines: usize,
    pub broadcasts: usize,
    pub delivered: usize,
    pub failed: usize,
    pub correlated: usize,
    pub dropped: usize,
}

impl ReplayStats {
    fn record(&mut self, routed: &Routed) {
        match routed {
            Routed::Broadcast { report, .. } => {
                self.broadcasts += 1;
                self.delivered += report.delivered;
                self.failed += report.failed;
            }
            Routed::Correlated { .. } => self.correlated += 1,
            Routed::Dropped { .. } => self.dropped += 1,
        }
    }
}

impl fmt::Display for ReplayStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lines: {} broadcasts ({} delivered, {} failed), {} correlated, {} dropped",
            self.lines, self.broadcasts, self.delivered, self.failed, self.correlated, self.dropped
        )
    }
}

pub struct Host {
    config: TetherConfig,
    webview: WebviewId,
    router: EventRouter,
    /// Set when the loopback bridge is in use; `@` directives need it.
    loopback: Option<Arc<LoopbackBridge>>,
    extension_events: mpsc::UnboundedReceiver<(WebviewId, NativeEvent)>,
    tables: Vec<Arc<CallbackTable>>,
    connection: Connection,
    cover: CoverPlugin,
    invoked: Invoked,
    // The loopback only holds weak references to these.
    _extensions: Vec<Arc<dyn EventExtension>>,
    stats: ReplayStats,
}

impl Host {
    /// Build every plugin on the configured bridge.
    ///
    /// On the loopback bridge the extension halves serve the plugins' native
    /// `startEvent`/`stopEvent` commands for `webview`, so system listeners
    /// come and go with the client channels' subscribers.
    pub fn new(config: TetherConfig, webview: WebviewId) -> Result<Self> {
        config.validate()?;

        let (loopback, bridge): (Option<Arc<LoopbackBridge>>, Arc<dyn PlatformBridge>) =
            match config.bridge {
                BridgeKind::Loopback => {
                    let loopback = Arc::new(LoopbackBridge::new());
                    (Some(loopback.clone()), loopback as Arc<dyn PlatformBridge>)
                }
                kind => (None, platform_bridge(kind)),
            };

        let (tx, extension_events) = mpsc::unbounded_channel();
        let sink: EventSink = Arc::new(move |webview: &WebviewId, event: NativeEvent| {
            if tx.send((webview.clone(), event)).is_err() {
                debug!(%webview, "host gone; extension event discarded");
            }
        });

        let connection = Connection::new(bridge.clone(), &config);
        let cover = CoverPlugin::new(bridge.clone(), &config);
        let invoked = Invoked::new(bridge.clone(), &config);
        let toast = Toast::new(bridge.clone(), &config);
        let push = Push::new(bridge.clone(), &config);
        let barcode = BarcodeScanner::new(bridge.clone(), &config);
        let sensors = Sensors::new(bridge.clone(), &config);

        let mut default_table = CallbackTable::new("default").with_policy(config.collision_policy);
        if let Some(timeout) = config.pending_timeout() {
            default_table = default_table.with_timeout(timeout);
        }
        let default_table = Arc::new(default_table);

        let mut router = EventRouter::new().with_default_table(default_table.clone());
        let plugins: [&dyn Plugin; 7] = [
            &connection,
            &cover,
            &invoked,
            &toast,
            &push,
            &barcode,
            &sensors,
        ];
        for plugin in plugins {
            plugin.attach(&mut router);
            debug!(plugin = plugin.id(), "plugin attached");
        }

        let tables = vec![
            default_table,
            toast.table().clone(),
            push.table().clone(),
            barcode.table().clone(),
            sensors.table().clone(),
        ];

        let connection_ext: Arc<dyn EventExtension> =
            Arc::new(ConnectionExtension::new(bridge.clone(), &config, sink.clone()));
        let cover_ext: Arc<dyn EventExtension> =
            Arc::new(CoverExtension::new(bridge.clone(), &config, sink));
        if let Some(loopback) = &loopback {
            serve_extension(loopback, connection::ID, &connection_ext, &webview);
            serve_extension(loopback, cover::ID, &cover_ext, &webview);
        }

        let host = Self {
            config,
            webview,
            router,
            loopback,
            extension_events,
            tables,
            connection,
            cover,
            invoked,
            _extensions: vec![connection_ext, cover_ext],
            stats: ReplayStats::default(),
        };
        host.subscribe_logging();
        info!(webview = %host.webview, bridge = ?host.config.bridge, "host ready");
        Ok(host)
    }

    // Subscribing starts the extension listeners through the loopback.
    fn subscribe_logging(&self) {
        let id = || SubscriberId::from(LOG_SUBSCRIBER);

        self.connection.on_change(id(), |change| {
            info!(old = %change.old_type, new = %change.new_type, "connection changed");
            Ok(())
        });
        self.cover.on_enter(id(), || {
            info!("entered cover mode");
            Ok(())
        });
        self.cover.on_exit(id(), || {
            info!("left cover mode");
            Ok(())
        });
        self.invoked.on_invoked(id(), |request: &Value| {
            info!(%request, "invoked");
            Ok(())
        });
        self.invoked.on_card_resize(id(), |size: &Value| {
            info!(%size, "card resized");
            Ok(())
        });
        self.invoked.on_card_closed(id(), |reason: &Value| {
            info!(%reason, "card closed");
            Ok(())
        });
    }

    /// Start one timeout sweeper per callback table. Nothing is spawned
    /// unless a pending timeout is configured.
    pub fn spawn_sweepers(&self) -> Vec<JoinHandle<()>> {
        if self.config.pending_timeout().is_none() {
            return Vec::new();
        }
        let period = self.config.sweep_interval();
        self.tables
            .iter()
            .map(|table| spawn_sweeper(table.clone(), period))
            .collect()
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    /// Replay one log line. Returns what happened to every event it caused.
    pub fn replay_line(&mut self, line: &str) -> Result<Vec<Routed>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(Vec::new());
        }
        self.stats.lines += 1;

        let mut routed = Vec::new();
        if let Some(directive) = line.strip_prefix('@') {
            self.directive(directive)?;
        } else {
            routed.push(self.router.on_native_event(line));
        }

        while let Ok((webview, event)) = self.extension_events.try_recv() {
            if webview != self.webview {
                debug!(%webview, event = %event.name, "event for another web view");
                continue;
            }
            routed.push(self.router.route(event));
        }

        for outcome in &routed {
            self.stats.record(outcome);
            debug!(?outcome, "routed");
        }
        Ok(routed)
    }

    fn directive(&self, directive: &str) -> Result<()> {
        let (command, rest) = directive
            .split_once(char::is_whitespace)
            .map_or((directive, ""), |(c, r)| (c, r.trim()));

        let Some(loopback) = &self.loopback else {
            warn!(command, "directive ignored: bridge is not loopback");
            return Ok(());
        };

        match command {
            "systemEvent" => {
                let (name, payload) = rest
                    .split_once(char::is_whitespace)
                    .map_or((rest, ""), |(n, p)| (n, p.trim()));
                if name.is_empty() {
                    return Err(TetherError::InvalidArgument(
                        "@systemEvent needs an event name".into(),
                    ));
                }
                let payload = if payload.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(payload)?
                };
                let listeners = loopback.emit(name, &payload);
                debug!(name, listeners, "system event emitted");
            }
            "connection" => {
                let mut parts = rest.split_whitespace();
                let connection = match (parts.next(), parts.next()) {
                    (None, _) | (Some("none"), _) => None,
                    (Some(kind), technology) => Some(ActiveConnection {
                        kind: kind.to_owned(),
                        technology: technology.map(str::to_owned),
                    }),
                };
                loopback.set_active_connection(connection);
            }
            other => {
                return Err(TetherError::InvalidArgument(format!(
                    "unknown directive: @{other}"
                )));
            }
        }
        Ok(())
    }
}

/// Route a plugin's start/stop commands to its extension half.
fn serve_extension(
    loopback: &LoopbackBridge,
    plugin_id: &str,
    extension: &Arc<dyn EventExtension>,
    webview: &WebviewId,
) {
    let extension = Arc::downgrade(extension);
    let webview = webview.clone();
    loopback.serve(
        plugin_id,
        Arc::new(move |command: &str, args: &Value| {
            if command != START_COMMAND && command != STOP_COMMAND {
                return Ok(());
            }
            match extension.upgrade() {
                Some(extension) => extension.handle(command, args, &webview),
                None => {
                    debug!(command, %webview, "extension gone; command not served");
                    Ok(())
                }
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_events::router::DropReason;
    use tether_plugins::connection::CONNECTION_CHANGE;
    use tether_plugins::cover::{ENTER_COVER, EXIT_COVER};

    fn host() -> Host {
        Host::new(TetherConfig::default(), WebviewId::from("1")).expect("host")
    }

    #[test]
    fn connection_change_reaches_the_channel() {
        let mut host = host();
        host.replay_line("@connection wifi").expect("directive");
        let routed = host
            .replay_line("@systemEvent connectionChange {}")
            .expect("emit");

        assert_eq!(routed.len(), 1);
        match &routed[0] {
            Routed::Broadcast { event, report } => {
                assert_eq!(event, CONNECTION_CHANGE);
                assert_eq!(report.delivered, 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        // Same type again: the extension stays quiet.
        let routed = host
            .replay_line("@systemEvent connectionChange {}")
            .expect("emit");
        assert!(routed.is_empty());
    }

    #[test]
    fn listeners_follow_channel_subscribers() {
        let host = host();
        let loopback = host.loopback.clone().expect("loopback");
        assert_eq!(loopback.listener_count("connectionChange"), 1);
        assert_eq!(loopback.listener_count("windowCoverEnter"), 1);
        assert_eq!(loopback.listener_count("windowCoverExit"), 1);

        // A second subscriber shares the running listener.
        host.connection.on_change("second".into(), |_| Ok(()));
        assert_eq!(loopback.listener_count("connectionChange"), 1);

        assert!(host.connection.remove_change_listener(&"second".into()));
        assert_eq!(loopback.listener_count("connectionChange"), 1);
        assert!(host.connection.remove_change_listener(&LOG_SUBSCRIBER.into()));
        assert_eq!(loopback.listener_count("connectionChange"), 0);

        assert!(host.cover.remove_exit_listener(&LOG_SUBSCRIBER.into()));
        assert_eq!(loopback.listener_count("windowCoverExit"), 0);
        assert_eq!(loopback.listener_count("windowCoverEnter"), 1);
        assert_eq!(loopback.count_of(STOP_COMMAND), 2);
    }

    #[test]
    fn cover_system_events_become_broadcasts() {
        let mut host = host();
        let routed = host.replay_line("@systemEvent windowCoverEnter").expect("emit");
        assert!(matches!(
            &routed[..],
            [Routed::Broadcast { event, .. }] if event == ENTER_COVER
        ));
        let routed = host.replay_line("@systemEvent windowCoverExit").expect("emit");
        assert!(matches!(
            &routed[..],
            [Routed::Broadcast { event, .. }] if event == EXIT_COVER
        ));
    }

    #[test]
    fn raw_lines_are_routed_and_counted() {
        let mut host = host();
        host.replay_line("# a comment").expect("comment");
        host.replay_line("").expect("blank");
        host.replay_line(r#"oncardresize {"width":720}"#).expect("legacy");
        host.replay_line(r#"{"event":"oncardclosed","payload":{"reason":"closed"}}"#)
            .expect("json");
        let routed = host.replay_line("toast.show.callback {} 42").expect("reply");
        assert!(matches!(
            &routed[..],
            [Routed::Dropped { reason: DropReason::UnknownCallback(_), .. }]
        ));
        host.replay_line("nosuchevent {}").expect("unknown");

        let stats = host.stats();
        assert_eq!(stats.lines, 4);
        assert_eq!(stats.broadcasts, 2);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dropped, 2);
    }

    #[test]
    fn bad_directives_are_errors() {
        let mut host = host();
        assert!(host.replay_line("@teleport now").is_err());
        assert!(host.replay_line("@systemEvent").is_err());
        assert!(host.replay_line("@systemEvent x {not json").is_err());
    }

    #[test]
    fn stub_bridge_ignores_directives() {
        let config = TetherConfig {
            bridge: BridgeKind::Stub,
            ..TetherConfig::default()
        };
        let mut host = Host::new(config, WebviewId::from("1")).expect("host");
        let routed = host
            .replay_line("@systemEvent windowCoverEnter")
            .expect("ignored");
        assert!(routed.is_empty());
        assert!(host.spawn_sweepers().is_empty());
    }

    #[tokio::test]
    async fn sweepers_follow_the_timeout_setting() {
        let config = TetherConfig {
            pending_timeout_ms: Some(5_000),
            ..TetherConfig::default()
        };
        let host = Host::new(config, WebviewId::from("1")).expect("host");
        let sweepers = host.spawn_sweepers();
        assert_eq!(sweepers.len(), 5);
        for sweeper in sweepers {
            sweeper.abort();
        }
    }
}
