//! Core domain types
//!
//! These structures represent the fundamental entities of the job-launcher
//! domain and are shared between the backend client (wire shapes) and the
//! agent (execution state).

pub mod artifact;
pub mod job;
pub mod log;
pub mod node;
