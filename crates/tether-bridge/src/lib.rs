// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Tether: native platform bridge abstractions.
//!
//! This crate defines the contract the event core needs from the native
//! side (command invocation, system event listeners, a few device queries)
//! and the bridges available on a desktop host: a stub that reports every
//! capability as unavailable, and a loopback bridge that keeps everything
//! in-process.

pub mod loopback;
pub mod stub;
pub mod traits;

use std::sync::Arc;

use tether_core::config::BridgeKind;

pub use loopback::LoopbackBridge;
pub use stub::StubBridge;
pub use traits::PlatformBridge;

/// Builds the bridge implementation selected in the configuration.
///
/// RETURNS: a shared trait object (`dyn PlatformBridge`) that abstracts away
/// the underlying native details.
pub fn platform_bridge(kind: BridgeKind) -> Arc<dyn PlatformBridge> {
    match kind {
        BridgeKind::Stub => {
            tracing::info!("using stub native bridge");
            Arc::new(StubBridge)
        }
        BridgeKind::Loopback => {
            tracing::info!("using loopback native bridge");
            Arc::new(LoopbackBridge::new())
        }
    }
}
