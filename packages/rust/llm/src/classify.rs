//! Failure classification for generation calls.
//!
//! A failure counts as throttling only on a throttling status (429, 503) or
//! rate-limit wording. Once it does, retry hints (header, structured dumps or
//! prose) and quota wording decide between a short wait and a hard stop.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use specweaver_shared::RetryPolicy;

use crate::generator::ServiceError;

/// What the invoker should do about a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Short-lived throttling: sleep `wait`, then call again.
    RateLimited { wait: Duration },
    /// Long-term block: stop all further work.
    QuotaExhausted,
    /// Anything else: one reconnect attempt.
    Connection,
}

static THROTTLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate[\s_-]?limit|too many requests|resource[\s_-]?exhausted|quota|\b429\b")
        .expect("valid regex")
});

/// Wording that means the block will not lift within a retry window.
static LONG_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)per[\s_-]?day|daily|billing|insufficient[\s_-]?(credits|funds|quota)|credit balance",
    )
    .expect("valid regex")
});

static QUOTA_EXCEEDED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)quota\W+(?:\w+\W+){0,4}?(exceeded|exhausted|reached)|(exceeded|exhausted)\W+(?:\w+\W+){0,3}?quota")
        .expect("valid regex")
});

/// `retry_delay { seconds: 41 }`, as printed by protobuf-style error dumps.
static PROTO_DELAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)retry[_\s-]?delay\s*\{\s*seconds:\s*(\d+)").expect("valid regex")
});

/// `"retryDelay": "41s"`, as found in JSON error bodies.
static JSON_DELAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"?retry_?delay"?\s*:\s*"?(\d+(?:\.\d+)?)s?\b"#).expect("valid regex")
});

/// `retry in 12s`, `Retry-After: 30`, `try again in 2 minutes`.
static PROSE_DELAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:retry[_\s-]?after|retry\s+in|try\s+again\s+in|wait)\s*:?\s*(\d+(?:\.\d+)?)\s*(milliseconds?|ms|seconds?|secs?|s|minutes?|mins?|m|hours?|h)?\b",
    )
    .expect("valid regex")
});

/// Classify a failed call under `policy`.
pub fn classify(error: &ServiceError, policy: &RetryPolicy) -> FailureClass {
    if error.status == Some(402) {
        return FailureClass::QuotaExhausted;
    }

    let text = error.message.as_str();
    let throttled = matches!(error.status, Some(429 | 503)) || THROTTLE_RE.is_match(text);
    if !throttled {
        return FailureClass::Connection;
    }
    let hint = error.retry_after.or_else(|| retry_hint(text));

    if LONG_BLOCK_RE.is_match(text) {
        return FailureClass::QuotaExhausted;
    }

    match hint {
        Some(wait) if wait > policy.quota_threshold => FailureClass::QuotaExhausted,
        Some(wait) => FailureClass::RateLimited {
            wait: wait.min(policy.max_wait),
        },
        None if QUOTA_EXCEEDED_RE.is_match(text) => FailureClass::QuotaExhausted,
        None => FailureClass::RateLimited {
            wait: policy.default_wait.min(policy.max_wait),
        },
    }
}

/// Extract a retry delay from free-form error text.
pub fn retry_hint(text: &str) -> Option<Duration> {
    if let Some(caps) = PROTO_DELAY_RE.captures(text) {
        return seconds(&caps[1], None);
    }
    if let Some(caps) = JSON_DELAY_RE.captures(text) {
        return seconds(&caps[1], None);
    }
    let caps = PROSE_DELAY_RE.captures(text)?;
    seconds(&caps[1], caps.get(2).map(|m| m.as_str()))
}

fn seconds(value: &str, unit: Option<&str>) -> Option<Duration> {
    let value: f64 = value.parse().ok()?;
    let factor = match unit.map(str::to_ascii_lowercase).as_deref() {
        Some("ms" | "millisecond" | "milliseconds") => 0.001,
        Some("m" | "min" | "mins" | "minute" | "minutes") => 60.0,
        Some("h" | "hour" | "hours") => 3600.0,
        _ => 1.0,
    };
    let secs = value * factor;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}
