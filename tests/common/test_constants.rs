//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file
//! in `tests/`). Placing shared constants under `tests/common/` avoids
//! creating an additional integration test binary while still allowing reuse
//! via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// Device name used across provisioning tests.
pub const DEFAULT_DEVICE: &str = "edge-01";

/// Region used wherever tests need a plausible one.
pub const DEFAULT_REGION: &str = "eu-west-2";
