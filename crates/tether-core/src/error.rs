// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Tether.

use thiserror::Error;

/// Top-level error type for all Tether operations.
#[derive(Debug, Error)]
pub enum TetherError {
    // -- Native bridge --
    #[error("native capability unavailable")]
    NativeUnavailable,

    #[error("native bridge error: {0}")]
    Bridge(String),

    // -- Correlation --
    #[error("no pending call for callback id {0}")]
    UnknownCallbackId(String),

    #[error("callback id {0} is already pending")]
    DuplicateCallbackId(String),

    #[error("pending call {0} timed out")]
    Timeout(String),

    // -- Listeners --
    #[error("underlying listener for {event} already running for webview {webview}")]
    DuplicateSubscription { event: String, webview: String },

    #[error("underlying listener for {event} never started for webview {webview}")]
    NotStarted { event: String, webview: String },

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("event handler failed: {0}")]
    Handler(String),

    // -- Boundary decoding / validation --
    #[error("malformed native event: {0}")]
    MalformedEvent(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // -- Configuration / persistence --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TetherError>;
