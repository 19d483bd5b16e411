// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Machine-readable error reports handed back to web callers.
//
// A `TetherError` never crosses into the web layer directly. Facades convert
// it into an `ErrorReport` (stable code + message) which is what a rejected
// call or an error callback carries.

use serde::{Deserialize, Serialize};

use crate::error::TetherError;

/// Stable error codes exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    /// The native capability failed to initialise or is missing.
    NativeUnavailable,
    /// A native reply referenced a callback id nobody is waiting for.
    UnknownCallbackId,
    /// A callback id was registered twice under the `Reject` policy.
    DuplicateCallbackId,
    /// A listener is already running for this event and web view.
    DuplicateSubscription,
    /// Stop was requested for a listener that was never started.
    NotStarted,
    /// The event name has no mapping in this plugin.
    UnknownEvent,
    /// The pending call expired before the native side replied.
    Timeout,
    /// Caller-supplied options failed validation.
    InvalidArgument,
    /// The native side sent something we could not decode.
    MalformedEvent,
    /// Anything else coming out of the bridge or the host.
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NativeUnavailable => "nativeUnavailable",
            Self::UnknownCallbackId => "unknownCallbackId",
            Self::DuplicateCallbackId => "duplicateCallbackId",
            Self::DuplicateSubscription => "duplicateSubscription",
            Self::NotStarted => "notStarted",
            Self::UnknownEvent => "unknownEvent",
            Self::Timeout => "timeout",
            Self::InvalidArgument => "invalidArgument",
            Self::MalformedEvent => "malformedEvent",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error object delivered to web callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorReport {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl TetherError {
    /// The stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            TetherError::NativeUnavailable => ErrorCode::NativeUnavailable,
            TetherError::UnknownCallbackId(_) => ErrorCode::UnknownCallbackId,
            TetherError::DuplicateCallbackId(_) => ErrorCode::DuplicateCallbackId,
            TetherError::DuplicateSubscription { .. } => ErrorCode::DuplicateSubscription,
            TetherError::NotStarted { .. } => ErrorCode::NotStarted,
            TetherError::UnknownEvent(_) => ErrorCode::UnknownEvent,
            TetherError::Timeout(_) => ErrorCode::Timeout,
            TetherError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            TetherError::MalformedEvent(_) | TetherError::Serialization(_) => {
                ErrorCode::MalformedEvent
            }
            TetherError::Bridge(_)
            | TetherError::Handler(_)
            | TetherError::Config(_)
            | TetherError::Io(_) => ErrorCode::Internal,
        }
    }

    /// Convert into the report shape handed to callers.
    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.code(), self.to_string())
    }
}

impl From<&TetherError> for ErrorReport {
    fn from(err: &TetherError) -> Self {
        err.report()
    }
}

impl From<TetherError> for ErrorReport {
    fn from(err: TetherError) -> Self {
        err.report()
    }
}
