//! Container control and state reconciliation for fleetctl.
//!
//! The [`engine::Engine`] is the only path to the container runtime.
//! [`poller::Poller`] turns its answers into immutable snapshots,
//! [`dispatch::Dispatcher`] serializes mutating actions per container, and
//! [`logs::LogStream`] follows container output with a bounded buffer.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod dispatch;
pub mod engine;
pub mod logs;
pub mod metrics;
pub mod normalize;
pub mod poller;
pub mod snapshot;
