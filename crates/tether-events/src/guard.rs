// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Handler isolation shared by the table, channel and registry.

use std::panic::{AssertUnwindSafe, catch_unwind};

pub(crate) use tether_core::sync::lock;

/// Run a subscriber callback, turning a panic into an error string.
pub(crate) fn run_isolated<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| {
        if let Some(msg) = panic.downcast_ref::<&str>() {
            (*msg).to_owned()
        } else if let Some(msg) = panic.downcast_ref::<String>() {
            msg.clone()
        } else {
            "handler panicked".to_owned()
        }
    })
}
