//! Stability patterns for bounding load on downstream resources

pub mod admission_gate;

pub use admission_gate::{AdmissionGate, GatePermit};
