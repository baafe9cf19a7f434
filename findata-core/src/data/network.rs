//! HTTP session with browser-like headers, proxy routing and a retry policy.
//!
//! Retryable statuses (429 and 5xx by default) and connect/timeout failures
//! are retried up to `max_retries` times. The wait before retry `n` is the
//! server's `Retry-After` when present, otherwise
//! `backoff_factor * 2^(n-1)` seconds; either way capped at two minutes. Everything else
//! is handed back to the caller untouched.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::ProviderError;

/// Upper bound on computed backoff between attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// Network settings for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkOptions {
    pub proxy: Option<String>,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_backoff_factor: f64,
    pub retryable_status_codes: BTreeSet<u16>,
    /// Bounds, in seconds, of the random pause before each request.
    pub jittered_delay_range: (f64, f64),
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout_seconds: 30,
            max_retries: 3,
            retry_backoff_factor: 0.5,
            retryable_status_codes: [429, 500, 502, 503, 504].into_iter().collect(),
            jittered_delay_range: (0.5, 2.0),
        }
    }
}

impl NetworkOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_seconds == 0 {
            return Err("timeout must be at least one second".into());
        }
        if !(self.retry_backoff_factor.is_finite() && self.retry_backoff_factor > 0.0) {
            return Err(format!(
                "retry backoff factor must be positive, got {}",
                self.retry_backoff_factor
            ));
        }
        let (min, max) = self.jittered_delay_range;
        if !(min.is_finite() && max.is_finite()) || min < 0.0 || min > max {
            return Err(format!("invalid delay range ({min}, {max})"));
        }
        if max > MAX_BACKOFF.as_secs_f64() {
            return Err(format!(
                "maximum delay {max}s exceeds the {}s ceiling",
                MAX_BACKOFF.as_secs()
            ));
        }
        if let Some(code) = self
            .retryable_status_codes
            .iter()
            .find(|c| !(100..=599).contains(*c))
        {
            return Err(format!("{code} is not an HTTP status code"));
        }
        if let Some(proxy) = &self.proxy {
            if proxy.trim().is_empty() {
                return Err("proxy URL must not be empty".into());
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_factor: self.retry_backoff_factor,
            status_codes: self.retryable_status_codes.clone(),
        }
    }
}

/// Prefix `http://` when the proxy URL has no scheme.
pub fn normalize_proxy(proxy: &str) -> String {
    let proxy = proxy.trim();
    if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{proxy}")
    }
}

/// When and how long to wait before re-sending a request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub status_codes: BTreeSet<u16>,
}

impl RetryPolicy {
    /// Total attempts including the first one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.status_codes.contains(&status)
    }

    /// Backoff before retry number `retry` (1-based).
    /// Wait before retry `retry`: the server's `Retry-After` when given,
    /// otherwise the computed backoff. Never longer than [`MAX_BACKOFF`].
    pub fn wait(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        retry_after
            .unwrap_or_else(|| self.backoff(retry))
            .min(MAX_BACKOFF)
    }

    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(32) as i32;
        let secs = self.backoff_factor * 2f64.powi(exp);
        if !secs.is_finite() || secs >= MAX_BACKOFF.as_secs_f64() {
            return MAX_BACKOFF;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP-date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking HTTP session shared by both entry points of a source.
pub struct HttpSession {
    client: reqwest::blocking::Client,
    policy: RetryPolicy,
}

impl HttpSession {
    pub fn new(options: &NetworkOptions) -> Result<Self, ProviderError> {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .default_headers(browser_headers())
            .timeout(Duration::from_secs(options.timeout_seconds));

        if let Some(proxy) = &options.proxy {
            let url = normalize_proxy(proxy);
            let proxy = reqwest::Proxy::all(&url)
                .map_err(|e| ProviderError::Setup(format!("invalid proxy '{url}': {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ProviderError::Setup(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            policy: options.retry_policy(),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET with retries. Non-retryable responses, including 4xx, are returned
    /// as they are for the caller to interpret.
    pub fn get(&self, url: &str, query: &[(&str, String)]) -> Result<HttpResponse, ProviderError> {
        let attempts = self.policy.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(url, attempt, "sending request");

            match self.client.get(url).query(query).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if !self.policy.is_retryable(status) {
                        return read_response(resp);
                    }
                    if attempt >= attempts {
                        warn!(url, status, attempts, "retries exhausted");
                        return Err(ProviderError::RetriesExhausted { status, attempts });
                    }
                    let retry_after = resp
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| parse_retry_after(v, Utc::now()));
                    let wait = self.policy.wait(attempt, retry_after);
                    warn!(
                        url,
                        status,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "retryable status, backing off"
                    );
                    std::thread::sleep(wait);
                }
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < attempts => {
                    let wait = self.policy.backoff(attempt);
                    warn!(
                        url,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "transport failure, backing off"
                    );
                    std::thread::sleep(wait);
                }
                Err(e) => return Err(ProviderError::Network(e.to_string())),
            }
        }
    }
}

fn read_response(resp: reqwest::blocking::Response) -> Result<HttpResponse, ProviderError> {
    let status = resp.status().as_u16();
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = resp
        .text()
        .map_err(|e| ProviderError::Network(format!("failed to read response body: {e}")))?;
    Ok(HttpResponse {
        status,
        content_type,
        body,
    })
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/json,text/csv;q=0.9,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(REFERER, HeaderValue::from_static("https://finance.yahoo.com/"));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("same-site"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn proxy_scheme_defaults_to_http() {
        assert_eq!(normalize_proxy("10.0.0.1:8080"), "http://10.0.0.1:8080");
        assert_eq!(normalize_proxy(" proxy.local:3128 "), "http://proxy.local:3128");
        assert_eq!(normalize_proxy("socks5://10.0.0.1:1080"), "socks5://10.0.0.1:1080");
        assert_eq!(normalize_proxy("https://p.example"), "https://p.example");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = NetworkOptions::default().retry_policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
        assert_eq!(policy.backoff(30), MAX_BACKOFF);
    }

    #[test]
    fn retry_after_is_honoured_but_capped() {
        let policy = NetworkOptions::default().retry_policy();
        assert_eq!(policy.wait(1, Some(Duration::from_secs(7))), Duration::from_secs(7));
        assert_eq!(policy.wait(1, Some(Duration::from_secs(86_400))), MAX_BACKOFF);
        assert_eq!(policy.wait(2, None), Duration::from_secs(1));
    }

    #[test]
    fn retry_policy_matches_status_set() {
        let policy = NetworkOptions::default().retry_policy();
        assert_eq!(policy.attempts(), 4);
        assert!(policy.is_retryable(429));
        assert!(policy.is_retryable(503));
        assert!(!policy.is_retryable(404));
        assert!(!policy.is_retryable(200));
    }

    #[test]
    fn retry_after_seconds_and_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 30).unwrap();
        assert_eq!(parse_retry_after("5", now), Some(Duration::from_secs(5)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn default_options_are_valid() {
        assert!(NetworkOptions::default().validate().is_ok());
    }

    #[test]
    fn invalid_options_are_rejected() {
        let base = NetworkOptions::default();

        let mut o = base.clone();
        o.timeout_seconds = 0;
        assert!(o.validate().is_err());

        let mut o = base.clone();
        o.retry_backoff_factor = 0.0;
        assert!(o.validate().is_err());

        let mut o = base.clone();
        o.jittered_delay_range = (3.0, 1.0);
        assert!(o.validate().is_err());

        let mut o = base.clone();
        o.jittered_delay_range = (-1.0, 1.0);
        assert!(o.validate().is_err());

        let mut o = base.clone();
        o.jittered_delay_range = (0.0, 1e20);
        assert!(o.validate().is_err());

        let mut o = base.clone();
        o.jittered_delay_range = (0.0, MAX_BACKOFF.as_secs_f64());
        assert!(o.validate().is_ok());

        let mut o = base.clone();
        o.retryable_status_codes.insert(42);
        assert!(o.validate().is_err());

        let mut o = base;
        o.proxy = Some("  ".into());
        assert!(o.validate().is_err());
    }

    #[test]
    fn session_builds_with_bare_proxy() {
        let options = NetworkOptions {
            proxy: Some("127.0.0.1:9".into()),
            ..NetworkOptions::default()
        };
        assert!(HttpSession::new(&options).is_ok());
    }
}
