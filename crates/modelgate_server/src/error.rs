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

//! The closed error taxonomy of the proxy and its HTTP mapping.
//!
//! Validator and selector failures surface immediately as 4xx/5xx plain
//! text; upstream *transport* failures become 502. Upstream HTTP responses
//! are never represented here: whatever status a vendor returns is passed
//! through to the client by the handler, identity-rewritten when the body
//! parses. Every error response carries the `X-Request-ID` header, added by
//! the correlation middleware.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use modelgate_core::SelectorError;

use crate::payload::PayloadError;
use crate::upstream::UpstreamError;

/// Anything that stops a request before an upstream response reaches the
/// client.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The request body is not valid JSON.
    #[error("invalid JSON body: {0}")]
    Malformed(String),

    /// A structural schema rule is broken.
    #[error("{0}")]
    SchemaViolation(String),

    /// The schema is recognised but a value is disallowed.
    #[error("{0}")]
    SemanticReject(String),

    /// The vendor filter (or the configuration) left no credentials.
    #[error("{0}")]
    NoCredentials(String),

    /// The vendor filter (or the configuration) left no models.
    #[error("{0}")]
    NoModels(String),

    /// Credentials and models exist but no platform matches.
    #[error("no viable vendor/model/credential combination")]
    NoViableCombination,

    /// The upstream could not be reached after retries.
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Any other unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Malformed(_)
            | ProxyError::SchemaViolation(_)
            | ProxyError::SemanticReject(_)
            | ProxyError::NoCredentials(_)
            | ProxyError::NoModels(_) => StatusCode::BAD_REQUEST,
            ProxyError::NoViableCombination | ProxyError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<PayloadError> for ProxyError {
    fn from(error: PayloadError) -> Self {
        match error {
            PayloadError::Malformed(message) => ProxyError::Malformed(message),
            PayloadError::SchemaViolation(message) => ProxyError::SchemaViolation(message),
            PayloadError::SemanticReject(message) => ProxyError::SemanticReject(message),
        }
    }
}

impl From<SelectorError> for ProxyError {
    fn from(error: SelectorError) -> Self {
        match &error {
            SelectorError::NoCredentials { .. } => ProxyError::NoCredentials(error.to_string()),
            SelectorError::NoModels { .. } => ProxyError::NoModels(error.to_string()),
            SelectorError::NoViableCombination => ProxyError::NoViableCombination,
        }
    }
}

impl From<UpstreamError> for ProxyError {
    fn from(error: UpstreamError) -> Self {
        match error {
            UpstreamError::Unreachable(message) => ProxyError::UpstreamUnreachable(message),
            UpstreamError::Build(message) => ProxyError::Internal(message),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(%status, "{self}");
        } else {
            warn!(%status, "{self}");
        }

        (status, self.to_string()).into_response()
    }
}
