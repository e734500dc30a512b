//! kvs-producer - Embedded H.264/MKV producer for Amazon Kinesis Video
//! Streams PutMedia.
//!
//! This crate provides the core functionality for an embedded-grade KVS
//! producer: NAL unit handling, MKV fragment generation, a lock-protected
//! stream buffer, AWS SigV4 signing, a blocking-TLS REST/PutMedia client,
//! IoT credential exchange, and the [`coordinator`] that ties them together
//! behind an open/add_frame/do_work/close lifecycle.

pub mod config;
pub mod coordinator;
pub mod endian;
pub mod error;
pub mod iot;
pub mod mkv;
pub mod nalu;
pub mod rest;
pub mod sigv4;
pub mod stream;

pub use error::{KvsError, Result};

/// Sent as the `User-Agent` header on every REST and PutMedia request.
pub const USER_AGENT: &str = concat!("kvs-producer/", env!("CARGO_PKG_VERSION"));
