//! Integration tests for annex-watch
//!
//! These drive the real engine components against a scripted git-annex.

#[path = "../common/mod.rs"]
pub mod common;

pub mod change_detection;
pub mod engine_flow;
pub mod scheduler_flow;
