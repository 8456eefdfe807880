//! Orchestrator behaviour tests with scripted collaborators.

mod fixtures;
mod resume;
mod session;
