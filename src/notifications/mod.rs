//! Notification aggregation for the SIGA dashboard bell.
//!
//! - `derive`: pure records -> notifications
//! - `store`: dismissal and sent-slot maps
//! - `signature`: new/changed detection between loads
//! - `bell`: dropdown/dialog view state and text rendering
//! - `aggregator`: load cycle, delivery decisions and timers

pub mod aggregator;
pub mod bell;
pub mod derive;
pub mod signature;
pub mod store;

pub use aggregator::{AggregatorSettings, LoadOutcome, LoadReport, NotificationAggregator};
