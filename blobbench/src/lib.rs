//! Throughput benchmark for blob storage services.
//!
//! A run generates one random payload, uploads it to a fixed set of object keys through a bounded
//! pool of concurrent workers, downloads every object again, and reports the aggregate throughput
//! of both phases in MB/s. Storage backends live in the `blobbench-backend` crate and are treated
//! as opaque here.
#![warn(missing_debug_implementations)]

pub mod benchmark;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod error;
pub mod observability;
pub mod payload;
pub mod report;
pub mod runner;
pub mod transfer;
