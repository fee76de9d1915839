//! # keeldb-heartbeat
//!
//! Heartbeat supervision for keeldb worker processes.
//!
//! This crate provides:
//! - Process registration with the master over a dedicated channel
//! - The supervisory loop that detects a vanished master
//! - The self-termination policy behind an injectable seam

pub mod error;
pub mod monitor;
pub mod registration;

pub use error::HeartbeatError;
pub use monitor::{
    register_to_master, HeartbeatMonitor, ProcessExit, Terminate, SHUTDOWN_GRACE,
};
pub use registration::{ProcType, ProcessRegistration, PID_ENV};
