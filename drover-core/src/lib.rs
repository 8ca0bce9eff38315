//! Drover Core
//!
//! Core types for the Drover worker-node agent.
//!
//! This crate contains the domain types shared between the backend client
//! and the agent: jobs and their templates, artifact references, node
//! capability descriptors, and job log entries.

pub mod domain;
