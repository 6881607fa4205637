//! Core engine for the Jenkins idler
//!
//! This crate provides:
//! - The per-namespace user model and idle policy inputs
//! - The supervisor routing observation events into per-user idlers
//! - The per-user idler state machines
//! - Platform, tenant-directory and feature-toggle clients
//! - Watchers for the platform's build and deployment-config streams
//! - Metrics and health infrastructure

pub mod cluster;
pub mod health;
pub mod idler;
pub mod models;
pub mod observability;
pub mod platform;
pub mod supervisor;
pub mod tenant;
pub mod toggles;
pub mod watch;

pub use health::{ComponentStatus, HealthRegistry};
pub use models::*;
pub use observability::IdlerMetrics;
