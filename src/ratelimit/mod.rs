//! Keyed token-bucket admission control.

mod bucket;
mod controller;
mod entry;
mod stats;
mod store;

pub use bucket::{Limit, TokenBucket};
pub use controller::{AdmissionController, Decider, Mode, Outcome, MAX_WAIT};
pub use entry::{LimiterEntry, Reservation, SharedEntry};
pub use stats::{Stats, StatsSnapshot};
pub use store::{EvictionListener, LimiterStore, Lookup};
