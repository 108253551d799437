//! Driven adapters: concrete implementations of the port traits in
//! [`crate::app::ports`].
//!
//! Everything that touches the filesystem, the network, or the wall clock
//! lives here, behind the ports the domain core consumes.

pub mod remote;
pub mod sim;
pub mod store;
pub mod time;

pub use remote::RemoteBackend;
pub use sim::SimulatedBackend;
pub use store::{JsonFileStore, MemoryStore};
pub use time::{ManualClock, WallClock};
