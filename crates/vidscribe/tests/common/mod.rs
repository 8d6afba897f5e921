//! Shared test utilities for vidscribe integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs with temp directories and an in-memory store
//! - Scripted stage adapters that record calls and fail on demand

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::{document_xml, TestHarness};
