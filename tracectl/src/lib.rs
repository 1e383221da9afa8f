// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]

//! Runtime control of tracing levels. Crates declare their targets with [`trace_target!`]
//! and the daemon adjusts levels by tag from its command line.

pub mod control;
pub mod targets;

// re-exports
pub use control::{TraceCtlError, TracingControl, get_trace_ctl};
pub use tracing_subscriber::filter::LevelFilter;
