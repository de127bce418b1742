// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Envoy external-processor service.
//!
//! [`handler::StreamHandler`] is the per-stream state machine: one instance
//! per ExtProc stream, fed one inbound message at a time, emitting exactly
//! one directive per message. [`service::ExtProcService`] drives it from the
//! gRPC stream, and [`server::ExtProcServer`] is the process shell that
//! binds, serves, and drains on shutdown.

pub mod proto;

mod handler;
mod server;
mod service;

pub use server::{ExtProcServer, ExtProcServerConfigBuilder};
pub use service::ExtProcService;
