//! The generation service boundary.

use std::future::Future;
use std::time::Duration;

/// A failed generation call, as reported by the service.
///
/// The invoker classifies these from all available signals, so providers
/// should pass through the response body text rather than summarising it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
    pub message: String,
    /// Explicit retry hint, e.g. from a `Retry-After` header.
    pub retry_after: Option<Duration>,
}

impl ServiceError {
    /// A failure with no response (DNS, TLS, timeout, reset).
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {status}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ServiceError {}

/// One call to a text generation model: prompt in, text out.
pub trait Generator {
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String, ServiceError>>;
}

impl<G: Generator> Generator for &G {
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String, ServiceError>> {
        (**self).generate(prompt)
    }
}
