//! HTTP transport for the admission service.

mod server;
mod service;

pub use server::HttpServer;
pub use service::{router, status_for, AccessRecord, DecisionParams};
