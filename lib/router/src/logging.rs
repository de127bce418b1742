// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide tracing setup.
//!
//! Filters come from the `SEMGATE_LOG` environment variable using the usual
//! `tracing_subscriber` directive syntax. When unset, the default is `info`
//! with the HTTP/2 and transport crates pinned to `error` so per-frame noise
//! does not drown the routing decisions.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// ENV used to set the log filter
const FILTER_ENV: &str = "SEMGATE_LOG";

/// Directives applied when `SEMGATE_LOG` is not set
const DEFAULT_FILTER: &str = "info,h2=error,tower=error,hyper_util=error,tonic=error";

static INIT: Once = Once::new();

/// Initialize the global tracing subscriber. Safe to call more than once;
/// only the first call installs anything.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}
