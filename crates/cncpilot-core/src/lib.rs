//! # cncpilot Core
//!
//! Core types shared by the cncpilot crates: machine coordinates, job
//! progress, and the error taxonomy used across the SPJS command path.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{JobStatus, Position};
