//! Common utilities for the experiment binaries and the integration tests.
//!
//! - **`synthetic`**: Builds symmetric positive-definite quadratic problems with a
//!   prescribed spectrum, so Ritz values and minimizers can be checked against a
//!   known ground truth.

pub mod synthetic;
