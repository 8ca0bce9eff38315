//! Scheduler
//!
//! The poll loop that fetches jobs from the backend, dispatches them to an
//! executor, supervises the running job, and reports the outcome.

mod poller;

pub use poller::JobPoller;
