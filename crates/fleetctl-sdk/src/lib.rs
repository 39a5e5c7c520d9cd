//! # fleetctl-sdk
//!
//! Public SDK for driving fleetctl as a Rust library.
//!
//! Provides three main entry points:
//! - [`ControllerBuilder`](builder::ControllerBuilder): Fluent API for configuring the engine connection and poll loop.
//! - [`FleetController`](controller::FleetController): Query and command surface over the managed fleet.
//! - [`EventListener`](event::EventListener): Subscribes to container lifecycle events for monitoring.
//!
//! # Example
//!
//! ```rust,no_run
//! use fleetctl_sdk::builder::ControllerBuilder;
//!
//! # async fn demo() -> fleetctl_common::error::Result<()> {
//! let controller = ControllerBuilder::new()
//!     .endpoint("unix:///var/run/docker.sock")
//!     .managed_prefix("nexus-")
//!     .build()?;
//! let _ = controller.refresh_now().await;
//! for view in controller.containers().containers {
//!     println!("{} {}", view.name, view.lifecycle_state);
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod builder;
pub mod controller;
pub mod event;

pub use builder::ControllerBuilder;
pub use controller::FleetController;
pub use event::{EventListener, FleetEvent};
