//! Test utilities for the benchmark and its backends.
//!
//! This crate provides utilities to facilitate testing of the benchmark driver. See the modules
//! for all available utilities.

pub mod backend;
pub mod tracing;
