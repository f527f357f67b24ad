//! Schema definitions for the Alcor health-check system
//!
//! This crate contains the shared data structures for the Alcor ecosystem:
//! the [`Axis`] taxonomy, [`Responsible`] team references, and the wire-exact
//! report DTOs. All types implement JSON Schema generation for external
//! consumption, and the JSON layout is a stable contract (see
//! [`HEALTH_CHECK_REPORT_DTO_VERSION`]).

pub mod axis;
pub mod report;
pub mod responsible;

// Testing modules
#[cfg(test)]
mod json_roundtrip_tests;

// Re-export the schema types for convenience
pub use axis::*;
pub use report::*;
pub use responsible::*;
