//! Review routing engine: advances applications through ordered review steps and decides
//! who may act on the pending one.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
