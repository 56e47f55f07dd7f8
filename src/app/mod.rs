//! Application core — public service surface, zero platform I/O.
//!
//! This module holds the orchestration facade and the boundary contracts:
//! the service wires the dispatcher, registries and policy machinery
//! together, while all interaction with the platform happens through
//! **port traits** defined in [`ports`], keeping this layer fully testable
//! with mock adapters.

pub mod events;
pub mod ports;
pub mod service;
