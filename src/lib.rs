//! tintd control core.
//!
//! Issues tint-level commands to electrochromic panels and panel groups,
//! guaranteeing that no panel is commanded faster than its settling time
//! allows, that overlapping commands from different control sources do not
//! corrupt each other's intent, and that every command lands in a durable
//! audit log.
//!
//! The crate is hexagonal: the domain core (`dwell`, `arbiter`, `registry`,
//! `audit`, `app`) performs no I/O of its own and talks to the outside world
//! through the port traits in [`app::ports`]. Concrete backends and stores
//! live under [`adapters`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod arbiter;
pub mod audit;
pub mod config;
pub mod dwell;
pub mod error;
pub mod registry;
