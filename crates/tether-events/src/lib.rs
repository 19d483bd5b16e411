// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tether events: reference-counted native event channels, callback
// correlation for request/reply traffic, per-webview listener bookkeeping and
// the router that feeds raw native events into all of them.

pub mod channel;
pub mod correlation;
pub mod envelope;
mod guard;
pub mod router;
pub mod webview;

pub use channel::{ChannelState, DispatchReport, EventChannel, EventHandler};
pub use correlation::{CallbackHandler, CallbackTable, spawn_sweeper};
pub use router::{CorrelationKey, CorrelationRule, DropReason, EventRouter, Routed};
pub use webview::WebviewRegistry;
