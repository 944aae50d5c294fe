//! Test utilities for the login pipeline crate.
//!
//! This module provides shared helpers for both unit tests (in `src/`) and
//! integration tests (in `tests/`). It is only compiled for tests or when the
//! `test-support` feature is enabled.

pub mod pipeline;
