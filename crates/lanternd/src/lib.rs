//! The lantern daemon: process supervision for the ambient lighting
//! workers.
//!
//! `lanternd` owns the configuration and the worker processes; the workers
//! own the domain work. Each worker is an independent executable that
//! connects back over the control channel whose endpoint it was given on
//! the command line. See [`manager::ServiceManager`] for the supervision
//! surface and [`workers`] for the worker implementations.

pub mod logging;
pub mod manager;
pub mod signal;
pub mod workers;
