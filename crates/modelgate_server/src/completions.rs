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

//! POST `/v1/chat/completions`: the main proxy entry point.
//!
//! The body is read once, validated, and rewritten to carry the selected
//! backend model; the response is rewritten to carry the client's original
//! one. Unary responses pass through with the upstream's own status. The
//! proxy does not dress vendor errors up in an envelope of its own, since
//! clients built for the vendor's API already cope with vendor errors.

use axum::body::{Body, Bytes};
use axum::extract::{Extension, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::Response;
use serde_derive::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use utoipa::IntoParams;

use modelgate_core::RequestId;

use crate::error::ProxyError;
use crate::openai::{ChatCompletion, CreateChatCompletionRequest};
use crate::payload;
use crate::stream::ChunkRelay;
use crate::upstream::UpstreamReply;
use crate::SharedState;

/// The optional vendor restriction accepted by the completions and models
/// endpoints.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VendorQuery {
    /// Restrict selection to this platform.
    pub vendor: Option<String>,
}

/// POST `/v1/chat/completions`: forwards the request to one uniformly
/// selected (vendor, model, credential) combination.
///
/// See [the OpenAI API specification][openai], which this endpoint is
/// compatible with. The `model` in the response always equals the `model`
/// the client sent, regardless of which backend served the call.
///
/// [openai]: https://platform.openai.com/docs/api-reference/chat/create
#[utoipa::path(
    post,
    path = "/v1/chat/completions",
    params(VendorQuery),
    request_body = CreateChatCompletionRequest,
    responses(
        (status = 200, description = "a completion (JSON) or completion chunks (SSE)", body = ChatCompletion),
        (status = 400, description = "invalid request body or vendor filter"),
        (status = 502, description = "upstream unreachable"),
    ),
)]
pub async fn chat_completions(
    State(state): State<SharedState>,
    Query(query): Query<VendorQuery>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let mut doc = payload::parse_and_validate(&body)?;
    let streaming = payload::wants_stream(&doc);

    let selection = state.selector.select(
        &state.config.credentials,
        &state.config.models,
        query.vendor.as_deref(),
    )?;

    let original_model = payload::rewrite_model(&mut doc, &selection.model);

    debug!(
        vendor = %selection.vendor,
        model = %selection.model,
        streaming,
        "combination selected"
    );

    let base_url = state.config.base_url(&selection.vendor).ok_or_else(|| {
        ProxyError::Internal(format!("no base URL configured for vendor {}", selection.vendor))
    })?;

    let outbound = serde_json::to_vec(&doc)
        .map_err(|e| ProxyError::Internal(format!("re-serialising request body: {e}")))?;

    let reply = state
        .upstream
        .dispatch(base_url, &selection.credential, outbound, streaming)
        .await?;

    match reply {
        UpstreamReply::Unary {
            status,
            content_type,
            body,
        } => {
            if !status.is_success() {
                info!(%status, "passing through upstream error response");
            }

            let rewritten = rewrite_unary(&body, &original_model);

            Response::builder()
                .status(status)
                .header(
                    CONTENT_TYPE,
                    content_type
                        .unwrap_or_else(|| HeaderValue::from_static("application/json")),
                )
                .body(Body::from(rewritten))
                .map_err(|e| ProxyError::Internal(e.to_string()))
        }
        UpstreamReply::Stream(events) => {
            let relay = ChunkRelay::new(events, original_model, request_id);

            Response::builder()
                .header(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"))
                .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
                .body(Body::from_stream(relay))
                .map_err(|e| ProxyError::Internal(e.to_string()))
        }
    }
}

/// Restores the client's model label on a buffered upstream body.
///
/// A body that does not parse as a JSON object is passed through unchanged:
/// the client is better served by the upstream's own bytes than by a
/// proxy-synthesised parse error.
pub fn rewrite_unary(body: &Bytes, original_model: &str) -> Bytes {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(mut doc)) => {
            doc.insert(
                "model".to_string(),
                Value::String(original_model.to_string()),
            );
            match serde_json::to_vec(&Value::Object(doc)) {
                Ok(rewritten) => Bytes::from(rewritten),
                Err(e) => {
                    warn!("failed to re-serialise upstream body, passing through: {e}");
                    body.clone()
                }
            }
        }
        _ => {
            warn!("upstream body is not a JSON object, passing through unchanged");
            body.clone()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unary_rewrite_restores_the_client_model() {
        let body = Bytes::from_static(
            br#"{"id":"chatcmpl-1","object":"chat.completion","created":1,"model":"gpt-4o","choices":[]}"#,
        );

        let rewritten = rewrite_unary(&body, "my-model");
        let doc: Value = serde_json::from_slice(&rewritten).unwrap();
        assert_eq!(doc["model"], "my-model");
        assert_eq!(doc["id"], "chatcmpl-1");
    }

    #[test]
    fn unary_rewrite_passes_unparseable_bodies_through() {
        let body = Bytes::from_static(b"upstream exploded in a decidedly non-JSON way");
        let rewritten = rewrite_unary(&body, "my-model");
        assert_eq!(rewritten, body);
    }

    #[test]
    fn unary_rewrite_adds_the_field_to_error_envelopes() {
        // Vendor error bodies are objects too; identity rewriting applies
        // to them on a best-effort basis.
        let body = Bytes::from_static(br#"{"error":{"message":"rate limited","code":429}}"#);
        let rewritten = rewrite_unary(&body, "my-model");
        let doc: Value = serde_json::from_slice(&rewritten).unwrap();
        assert_eq!(doc["model"], "my-model");
        assert_eq!(doc["error"]["code"], 429);
    }
}
