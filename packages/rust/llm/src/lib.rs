//! Generation service access with rate-limit and quota handling.
//!
//! - [`Generator`]: the one-call service boundary
//! - [`OpenRouterGenerator`]: HTTP implementation
//! - [`ResilientInvoker`]: pacing, retries and classification
//! - [`unwrap_json`]: explicit response unwrapping rules

pub mod classify;
pub mod generator;
pub mod invoker;
pub mod openrouter;
pub mod unwrap;

pub use classify::{FailureClass, classify, retry_hint};
pub use generator::{Generator, ServiceError};
pub use invoker::ResilientInvoker;
pub use openrouter::OpenRouterGenerator;
pub use unwrap::{strip_code_fences, unwrap_json};
