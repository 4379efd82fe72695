//! Core library for the vehicle health-monitoring daemon.
//!
//! The daemon performs two coupled jobs: liveness supervision of registered
//! in-vehicle client processes at three deadline tiers, and periodic
//! collection/ranking of whole-system and per-process I/O and CPU-wait
//! performance data sampled from `/proc`.

pub mod admin;
pub mod collector;
pub mod config;
pub mod controller;
pub mod error;
pub mod eventloop;
pub mod rank;
pub mod supervisor;
pub mod transport;
