/* Copyright 2023- The Binedge, Lda team. All rights reserved.
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *     http://www.apache.org/licenses/LICENSE-2.0
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! The outbound leg of the proxy: one pooled HTTP client shared by all
//! requests, dispatching rewritten bodies to whichever vendor the selector
//! picked.
//!
//! Connection-level failures are retried with jittered exponential backoff;
//! an HTTP response of any status ends the retry loop immediately, because
//! upstream semantics (including 5xx bodies) are surfaced to the client,
//! not masked.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::Stream;
use rand::Rng;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::{debug, warn};

use modelgate_core::config::{CredentialKind, Timeouts};
use modelgate_core::Credential;

/// SSE events as read off the upstream response body.
pub type UpstreamEventStream =
    Pin<Box<dyn Stream<Item = Result<Event, EventStreamError<reqwest::Error>>> + Send>>;

/// What came back from the vendor.
pub enum UpstreamReply {
    /// A buffered response body, of any status. Non-2xx responses land here
    /// too so the handler can pass them through.
    Unary {
        /// The upstream HTTP status.
        status: StatusCode,
        /// The upstream `Content-Type`, when present.
        content_type: Option<HeaderValue>,
        /// The complete response body.
        body: Bytes,
    },

    /// A live SSE stream. Only produced for 2xx responses that declare
    /// `text/event-stream`.
    Stream(UpstreamEventStream),
}

/// A dispatch failure that produced no upstream response at all.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The shared HTTP client could not be constructed.
    #[error("failed to build the upstream HTTP client: {0}")]
    Build(String),

    /// The vendor could not be reached, even after retries.
    #[error("{0}")]
    Unreachable(String),
}

/// Retry behaviour for connection-level failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles each retry.
    pub base_delay: Duration,

    /// Upper bound on the backoff.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// The delay before retrying `attempt` (1-based), with up to 50%
    /// random jitter added so simultaneous retries spread out.
    fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let capped = exponential.min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 2);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// The shared upstream HTTP client.
///
/// Connections are pooled per host with a bounded idle set; the pool and
/// its internal synchronisation are reqwest's.
pub struct UpstreamClient {
    http: reqwest::Client,
    timeouts: Timeouts,
    retry: RetryPolicy,
}

impl UpstreamClient {
    /// Builds the client from the configured timeouts and the default
    /// retry policy.
    pub fn new(timeouts: Timeouts) -> Result<Self, UpstreamError> {
        Self::with_retry(timeouts, RetryPolicy::default())
    }

    /// Builds the client with an explicit retry policy.
    pub fn with_retry(timeouts: Timeouts, retry: RetryPolicy) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(timeouts.idle())
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| UpstreamError::Build(e.to_string()))?;

        Ok(UpstreamClient {
            http,
            timeouts,
            retry,
        })
    }

    /// Sends `body` to `base_url`'s chat completions endpoint using
    /// `credential`.
    ///
    /// With `streaming` set, a 2xx `text/event-stream` response is returned
    /// as a live event stream; anything else is buffered so the handler can
    /// decide what to do with it.
    pub async fn dispatch(
        &self,
        base_url: &str,
        credential: &Credential,
        body: Vec<u8>,
        streaming: bool,
    ) -> Result<UpstreamReply, UpstreamError> {
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

        // Streams stay open for the whole generation; unary calls get the
        // tighter acquisition deadline.
        let deadline = if streaming {
            self.timeouts.read()
        } else {
            self.timeouts.request()
        };

        let response = self.send_with_retry(&url, credential, &body, deadline).await?;
        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();

        if streaming && status.is_success() && is_event_stream(content_type.as_ref()) {
            debug!(%url, %status, "upstream opened an event stream");
            let events = response.bytes_stream().eventsource();
            return Ok(UpstreamReply::Stream(Box::pin(events)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Unreachable(format!("reading upstream body: {e}")))?;

        debug!(%url, %status, bytes = body.len(), "upstream replied");

        Ok(UpstreamReply::Unary {
            status,
            content_type,
            body,
        })
    }

    async fn send_with_retry(
        &self,
        url: &str,
        credential: &Credential,
        body: &[u8],
        deadline: Duration,
    ) -> Result<reqwest::Response, UpstreamError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let request = self
                .http
                .post(url)
                .timeout(deadline)
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_vec());

            let request = match credential.kind {
                CredentialKind::ApiKey => {
                    request.bearer_auth(credential.secret.expose_secret())
                }
                _ => request.bearer_auth(credential.secret.expose_secret()),
            };

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(error) if error.is_connect() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        %url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "upstream connection failed, retrying: {error}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return Err(UpstreamError::Unreachable(error.to_string()));
                }
            }
        }
    }
}

fn is_event_stream(content_type: Option<&HeaderValue>) -> bool {
    content_type
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("text/event-stream"))
        .unwrap_or(false)
}
