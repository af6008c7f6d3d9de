//! Shared test utilities for annex-watch
//!
//! - A scripted git-annex that stands in for the real binaries
//! - Temporary repository and engine fixtures

pub mod fixtures;
