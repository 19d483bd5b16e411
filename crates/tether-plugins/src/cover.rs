// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application cover facade: the tile shown while the app is minimised.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};

use tether_bridge::PlatformBridge;
use tether_bridge::traits::{CoverSize, NativeCover, SystemListener};
use tether_core::config::{ReplayPolicy, TetherConfig};
use tether_core::error::{Result, TetherError};
use tether_core::types::{NativeEvent, SubscriberId, WebviewId};
use tether_events::{EventChannel, EventRouter, WebviewRegistry};

use crate::extension::{EventExtension, EventSink};
use crate::{Plugin, invoker, system_events};

pub const ID: &str = "com.blackberry.ui.cover";
pub const ENTER_COVER: &str = "entercover";
pub const EXIT_COVER: &str = "exitcover";

/// What the cover shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CoverContent {
    /// A static image file.
    File { path: String },
    /// A live capture of the application window.
    Snapshot {
        #[serde(default)]
        capture: Map<String, Value>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Fade,
    None,
    Default,
    Slide,
}

/// One line of text drawn over the cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverLabel {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap: Option<bool>,
}

impl CoverLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            size: None,
            color: None,
            wrap: None,
        }
    }
}

fn default_badges() -> bool {
    true
}

/// A complete cover description as handed to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cover {
    pub cover: CoverContent,
    #[serde(default)]
    pub text: Vec<CoverLabel>,
    #[serde(default = "default_badges")]
    pub badges: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
}

impl Default for Cover {
    fn default() -> Self {
        Self::snapshot()
    }
}

impl Cover {
    pub fn snapshot() -> Self {
        Self {
            cover: CoverContent::Snapshot {
                capture: Map::new(),
            },
            text: Vec::new(),
            badges: true,
            transition: None,
        }
    }

    pub fn image(path: impl Into<String>) -> Self {
        Self {
            cover: CoverContent::File { path: path.into() },
            ..Self::snapshot()
        }
    }

    pub fn with_label(mut self, label: CoverLabel) -> Self {
        self.text.push(label);
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transition = Some(transition);
        self
    }

    pub fn with_badges(mut self, badges: bool) -> Self {
        self.badges = badges;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let CoverContent::File { path } = &self.cover {
            if path.trim().is_empty() {
                return Err(TetherError::InvalidArgument("cover image path is empty".into()));
            }
        }
        if self.text.iter().any(|l| l.label.is_empty()) {
            return Err(TetherError::InvalidArgument("cover label is empty".into()));
        }
        Ok(())
    }

    /// The platform wants plain file paths, not `file://` URLs.
    fn normalized(&self) -> Self {
        let mut cover = self.clone();
        if let CoverContent::File { path } = &mut cover.cover {
            *path = path.replacen("file://", "", 1);
        }
        cover
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct CoverPlugin {
    bridge: Arc<dyn PlatformBridge>,
    enter: Arc<EventChannel>,
    exit: Arc<EventChannel>,
}

impl CoverPlugin {
    pub fn new(bridge: Arc<dyn PlatformBridge>, config: &TetherConfig) -> Self {
        let channel = |name: &str| {
            Arc::new(
                EventChannel::new(ID, name, invoker(&bridge))
                    .with_replay(config.replay_for(name, ReplayPolicy::None)),
            )
        };
        let enter = channel(ENTER_COVER);
        let exit = channel(EXIT_COVER);
        Self {
            bridge,
            enter,
            exit,
        }
    }

    #[instrument(skip(self))]
    pub fn cover_size(&self) -> Result<CoverSize> {
        self.bridge.cover_size().map_err(|e| {
            warn!(error = %e, "cover size unavailable");
            TetherError::Bridge("Unable to get coverSize".into())
        })
    }

    /// Restore the platform's default cover.
    #[instrument(skip(self))]
    pub fn reset_cover(&self) -> Result<()> {
        self.bridge
            .update_cover(&json!({ "cover": "reset" }))
            .map_err(|e| {
                warn!(error = %e, "cover reset failed");
                TetherError::Bridge("Unable to reset cover".into())
            })
    }

    #[instrument(skip_all)]
    pub fn update_cover(&self, cover: &Cover) -> Result<()> {
        cover.validate()?;
        let value = serde_json::to_value(cover.normalized())?;
        debug!(cover = %value, "updating cover");
        self.bridge.update_cover(&value).map_err(|e| {
            warn!(error = %e, "cover update failed");
            TetherError::Bridge("Unable to update cover".into())
        })
    }

    pub fn on_enter<F>(&self, id: SubscriberId, handler: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.enter.subscribe(id, move |_| handler());
    }

    pub fn on_exit<F>(&self, id: SubscriberId, handler: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.exit.subscribe(id, move |_| handler());
    }

    pub fn remove_enter_listener(&self, id: &SubscriberId) -> bool {
        self.enter.unsubscribe(id)
    }

    pub fn remove_exit_listener(&self, id: &SubscriberId) -> bool {
        self.exit.unsubscribe(id)
    }
}

impl Plugin for CoverPlugin {
    fn id(&self) -> &'static str {
        ID
    }

    fn attach(&self, router: &mut EventRouter) {
        router.add_channel(self.enter.clone());
        router.add_channel(self.exit.clone());
    }
}

// ---------------------------------------------------------------------------
// Extension
// ---------------------------------------------------------------------------

pub struct CoverExtension {
    registry: WebviewRegistry,
    sink: EventSink,
}

impl CoverExtension {
    pub fn new(bridge: Arc<dyn PlatformBridge>, config: &TetherConfig, sink: EventSink) -> Self {
        let registry = WebviewRegistry::new(ID, system_events(&bridge), config.duplicate_policy)
            .with_action(ENTER_COVER, "windowCoverEnter")
            .with_action(EXIT_COVER, "windowCoverExit");
        Self { registry, sink }
    }
}

impl EventExtension for CoverExtension {
    fn registry(&self) -> &WebviewRegistry {
        &self.registry
    }

    fn listener(&self, event_name: &str, webview: &WebviewId) -> SystemListener {
        let sink = self.sink.clone();
        let webview = webview.clone();
        let event_name = event_name.to_owned();
        Arc::new(move |_: &Value| {
            sink(&webview, NativeEvent::broadcast(event_name.as_str(), Value::Null));
        })
    }
}
