// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! Tracing subscriber setup.
//!
//! Honors `LOG_FORMAT` (`json` or `pretty`, default `pretty`) and the
//! standard `RUST_LOG` filter. Call once from the embedding application.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Safe to call once; subsequent calls are ignored (the first subscriber
/// wins).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}
