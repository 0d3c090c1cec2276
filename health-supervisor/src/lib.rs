//! Two-phase startup supervisor: a health endpoint that binds immediately,
//! and an application launched on its own thread after a grace period.

pub mod app;
pub mod config;
pub mod error;
pub mod guard;
pub mod launcher;
pub mod metrics;
pub mod router;
pub mod server;
