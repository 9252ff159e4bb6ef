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

//! Correlation middleware: one identifier per request, everywhere.
//!
//! The identifier is taken from the edge (`CF-Ray`) when present, then from
//! a client-set `X-Request-ID`, and minted fresh otherwise. An inbound
//! value is never overwritten. Handlers read the identifier from the
//! request extensions, and the request's tracing span carries it on every
//! log line. The response echoes it back as `X-Request-ID`.
//!
//! Deployments behind a different edge can reorder or replace the inbound
//! header list with the `REQUEST_ID_HEADERS` environment variable, a
//! comma-separated list in precedence order.

use std::env;

use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use once_cell::sync::Lazy;
use tracing::{info_span, warn, Instrument};

use modelgate_core::RequestId;

/// Cloudflare's edge identifier. By default it takes precedence over
/// `X-Request-ID` in every code path.
pub const CF_RAY: &str = "cf-ray";

/// The client- and response-side correlation header.
pub const X_REQUEST_ID: &str = "x-request-id";

static ID_HEADER_PRECEDENCE: Lazy<Vec<HeaderName>> = Lazy::new(|| {
    env::var("REQUEST_ID_HEADERS")
        .ok()
        .and_then(|raw| parse_precedence(&raw))
        .unwrap_or_else(default_precedence)
});

fn default_precedence() -> Vec<HeaderName> {
    vec![
        HeaderName::from_static(CF_RAY),
        HeaderName::from_static(X_REQUEST_ID),
    ]
}

fn parse_precedence(raw: &str) -> Option<Vec<HeaderName>> {
    let parsed: Vec<HeaderName> = raw
        .split(',')
        .filter_map(|name| {
            let name = name.trim();
            match name.parse::<HeaderName>() {
                Ok(header) => Some(header),
                Err(_) => {
                    warn!("ignoring invalid header name in REQUEST_ID_HEADERS: {name:?}");
                    None
                }
            }
        })
        .collect();

    if parsed.is_empty() {
        None
    } else {
        Some(parsed)
    }
}

/// Derives the request identifier, threads it through the handler's span,
/// and echoes it on the response.
pub async fn propagate_request_id(mut request: Request, next: Next) -> Response {
    let request_id = id_from_headers(request.headers(), &ID_HEADER_PRECEDENCE)
        .unwrap_or_else(RequestId::generate);

    request.extensions_mut().insert(request_id.clone());

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }

    response
}

fn id_from_headers(headers: &HeaderMap, precedence: &[HeaderName]) -> Option<RequestId> {
    precedence.iter().find_map(|name| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(RequestId::from_header_value)
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                name.parse::<HeaderName>().unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn cf_ray_takes_precedence() {
        let map = headers(&[("cf-ray", "ray-123-SYD"), ("x-request-id", "client-9")]);
        let id = id_from_headers(&map, &default_precedence()).unwrap();
        assert_eq!(id.as_str(), "ray-123-SYD");
    }

    #[test]
    fn x_request_id_is_used_without_cf_ray() {
        let map = headers(&[("x-request-id", "client-9")]);
        let id = id_from_headers(&map, &default_precedence()).unwrap();
        assert_eq!(id.as_str(), "client-9");
    }

    #[test]
    fn no_inbound_header_means_no_adopted_id() {
        assert!(id_from_headers(&HeaderMap::new(), &default_precedence()).is_none());
    }

    #[test]
    fn blank_inbound_header_is_ignored() {
        let map = headers(&[("x-request-id", "   ")]);
        assert!(id_from_headers(&map, &default_precedence()).is_none());
    }

    #[test]
    fn precedence_can_be_reordered() {
        let precedence = parse_precedence("x-request-id, cf-ray").unwrap();
        let map = headers(&[("cf-ray", "ray-1"), ("x-request-id", "client-1")]);
        let id = id_from_headers(&map, &precedence).unwrap();
        assert_eq!(id.as_str(), "client-1");
    }

    #[test]
    fn invalid_precedence_entries_are_dropped() {
        let precedence = parse_precedence("not a header!!, cf-ray").unwrap();
        assert_eq!(precedence.len(), 1);
        assert!(parse_precedence("not a header!!").is_none());
    }
}
