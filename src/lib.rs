//! Throttled - Keyed Admission Control Service
//!
//! This crate decides whether to admit, delay or reject an operation for a client-supplied key
//! using a per-key token bucket. Limiter state lives in a capacity-bounded in-memory store that
//! evicts the least recently used keys.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
