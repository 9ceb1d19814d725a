//! Trade aggregation and time-series performance analytics.
//!
//! The [`engine::AnalyticsEngine`] turns closed trades into day, ISO week,
//! month and per-instrument snapshots. [`service::AnalyticsService`] wires it
//! to trade and snapshot storage; [`database::Database`] is the SQLite backend.

pub mod analytics;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod service;
pub mod types;

pub use analytics::{AggregateResult, AnalyticsSnapshot, SnapshotKey, SnapshotScope};
pub use engine::AnalyticsEngine;
pub use error::AnalyticsError;
pub use service::{AnalyticsService, RefreshOutcome, SnapshotStore, TradeQuery, TradeSource};
