//! Unit tests for the remote session module.
//!
//! The test suite is split across focused submodules to keep individual files
//! small while remaining easy to navigate.

mod connect;
