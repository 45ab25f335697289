//! Resilient invocation: pacing, retry and failure classification around a
//! [`Generator`].

use serde_json::Value;
use specweaver_shared::{Result, RetryPolicy, SpecWeaverError};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, instrument, warn};

use crate::classify::{FailureClass, classify};
use crate::generator::Generator;
use crate::unwrap::unwrap_json;

/// Wraps a generator with call pacing and the retry policy.
///
/// The last-call timestamp lives only in this process; a fresh invoker
/// starts unpaced.
pub struct ResilientInvoker<G> {
    generator: G,
    policy: RetryPolicy,
    last_call: Mutex<Option<Instant>>,
}

impl<G: Generator> ResilientInvoker<G> {
    pub fn new(generator: G, policy: RetryPolicy) -> Self {
        Self {
            generator,
            policy,
            last_call: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Call the generator until it succeeds or the policy gives up.
    ///
    /// Rate limits are retried until `max_attempts` calls have been made,
    /// connection failures are retried once, quota exhaustion is returned
    /// immediately.
    #[instrument(skip_all, fields(prompt_chars = prompt.len()))]
    pub async fn invoke(&self, prompt: &str) -> Result<String> {
        let mut attempts = 0u32;
        let mut reconnected = false;

        loop {
            attempts += 1;
            self.pace().await;

            let error = match self.generator.generate(prompt).await {
                Ok(text) => {
                    debug!(attempts, response_chars = text.len(), "generation succeeded");
                    return Ok(text);
                }
                Err(e) => e,
            };

            match classify(&error, &self.policy) {
                FailureClass::QuotaExhausted => {
                    warn!(%error, "quota exhausted");
                    return Err(SpecWeaverError::QuotaExhausted {
                        message: error.to_string(),
                    });
                }
                FailureClass::RateLimited { wait } => {
                    if attempts >= self.policy.max_attempts {
                        warn!(attempts, %error, "rate limit retry budget spent");
                        return Err(SpecWeaverError::RateLimited {
                            attempts,
                            message: error.to_string(),
                        });
                    }
                    warn!(
                        attempt = attempts,
                        wait_secs = wait.as_secs_f64(),
                        "rate limited, backing off"
                    );
                    sleep(wait).await;
                }
                FailureClass::Connection => {
                    if reconnected {
                        return Err(SpecWeaverError::Connection {
                            message: error.to_string(),
                        });
                    }
                    reconnected = true;
                    warn!(%error, "generation call failed, retrying once");
                    sleep(self.policy.connection_retry_delay).await;
                }
            }
        }
    }

    /// [`invoke`](Self::invoke), then parse the response as JSON.
    pub async fn invoke_structured(&self, prompt: &str) -> Result<Value> {
        let raw = self.invoke(prompt).await?;
        unwrap_json(&raw)
    }

    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.policy.min_call_interval {
                let wait = self.policy.min_call_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "pacing generation call");
                sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ServiceError;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Replays scripted responses, repeating the last one forever.
    struct Scripted {
        responses: StdMutex<VecDeque<std::result::Result<String, ServiceError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(responses: Vec<std::result::Result<String, ServiceError>>) -> Self {
            Self {
                responses: StdMutex::new(responses.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Generator for Scripted {
        async fn generate(&self, _prompt: &str) -> std::result::Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut queue = self.responses.lock().unwrap();
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            }
        }
    }

    fn throttled() -> std::result::Result<String, ServiceError> {
        Err(ServiceError::http(429, "Rate limit exceeded, retry in 2s"))
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let invoker = ResilientInvoker::new(
            Scripted::new(vec![Ok("hello".into())]),
            RetryPolicy::immediate(3),
        );
        assert_eq!(invoker.policy().max_attempts, 3);
        assert_eq!(invoker.invoke("p").await.unwrap(), "hello");
        assert_eq!(invoker.generator().calls(), 1);
    }

    #[tokio::test]
    async fn retry_budget_stops_after_exactly_max_attempts() {
        for max_attempts in [1, 3, 5] {
            let invoker = ResilientInvoker::new(
                Scripted::new(vec![throttled()]),
                RetryPolicy::immediate(max_attempts),
            );
            let err = invoker.invoke("p").await.unwrap_err();
            assert!(matches!(err, SpecWeaverError::RateLimited { attempts, .. } if attempts == max_attempts));
            assert_eq!(invoker.generator().calls(), max_attempts);
        }
    }

    #[tokio::test]
    async fn recovers_after_rate_limit() {
        let invoker = ResilientInvoker::new(
            Scripted::new(vec![throttled(), throttled(), Ok("done".into())]),
            RetryPolicy::immediate(3),
        );
        assert_eq!(invoker.invoke("p").await.unwrap(), "done");
        assert_eq!(invoker.generator().calls(), 3);
    }

    #[tokio::test]
    async fn quota_fails_without_retry() {
        let invoker = ResilientInvoker::new(
            Scripted::new(vec![Err(ServiceError::http(429, "daily quota exhausted"))]),
            RetryPolicy::immediate(3),
        );
        let err = invoker.invoke("p").await.unwrap_err();
        assert!(matches!(err, SpecWeaverError::QuotaExhausted { .. }));
        assert!(err.is_terminal());
        assert_eq!(invoker.generator().calls(), 1);
    }

    #[tokio::test]
    async fn connection_failure_retried_once() {
        let invoker = ResilientInvoker::new(
            Scripted::new(vec![Err(ServiceError::transport("connection refused"))]),
            RetryPolicy::immediate(5),
        );
        let err = invoker.invoke("p").await.unwrap_err();
        assert!(matches!(err, SpecWeaverError::Connection { .. }));
        assert_eq!(invoker.generator().calls(), 2);

        let invoker = ResilientInvoker::new(
            Scripted::new(vec![
                Err(ServiceError::transport("connection refused")),
                Ok("back".into()),
            ]),
            RetryPolicy::immediate(5),
        );
        assert_eq!(invoker.invoke("p").await.unwrap(), "back");
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_hinted_delay_and_paces_calls() {
        let policy = RetryPolicy {
            min_call_interval: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        let invoker = ResilientInvoker::new(
            Scripted::new(vec![throttled(), Ok("ok".into())]),
            policy,
        );

        let start = Instant::now();
        invoker.invoke("p").await.unwrap();
        // 2s hinted backoff, which already exceeds the pacing interval.
        assert!(start.elapsed() >= Duration::from_secs(2));

        let before_second = Instant::now();
        invoker.invoke("p").await.unwrap();
        assert!(before_second.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn structured_invocation_unwraps_fences() {
        let invoker = ResilientInvoker::new(
            Scripted::new(vec![Ok("```json\n{\"model\": []}\n```".into())]),
            RetryPolicy::immediate(1),
        );
        let value = invoker.invoke_structured("p").await.unwrap();
        assert!(value["model"].as_array().unwrap().is_empty());

        let invoker = ResilientInvoker::new(
            Scripted::new(vec![Ok("not json at all".into())]),
            RetryPolicy::immediate(1),
        );
        let err = invoker.invoke_structured("p").await.unwrap_err();
        assert!(matches!(err, SpecWeaverError::MalformedOutput { .. }));
    }
}
