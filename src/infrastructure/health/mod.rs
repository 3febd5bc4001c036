//! Per-connection health scoring and fleet-wide aggregation.
//!
//! - [`HealthScorer`] - consumes probe results, maintains one
//!   [`ConnectionHealth`](record) record per connection, emits alerts on
//!   discrete state changes.
//! - [`AlertChannel`] - bounded, lossy alert delivery shared with recovery.

mod alerts;
mod record;
mod scorer;

pub use alerts::{AlertChannel, AlertStats};
pub use scorer::HealthScorer;
