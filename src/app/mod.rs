//! Application core: pure command orchestration, zero I/O.
//!
//! Business rules for tint control live here: request validation, the
//! claim → dwell → dispatch → commit pipeline, pending-confirmation
//! reconciliation, and audit emission. All interaction with devices and
//! storage happens through the **port traits** in [`ports`], keeping this
//! layer fully testable with mock adapters.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
