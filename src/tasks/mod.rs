//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Maintenance: sweeps tombstones and demotes hot entries over budget

mod maintenance;

pub use maintenance::spawn_maintenance_task;
