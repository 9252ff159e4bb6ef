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

//! End-to-end tests of the proxy against scripted upstream vendors.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use secrecy::SecretString;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use modelgate_core::config::{BackendModel, Credential, CredentialKind, RouterConfig, Timeouts};
use modelgate_server::{routes::routes, AppState};

fn credential(platform: &str, secret: &str) -> Credential {
    Credential {
        platform: platform.to_string(),
        kind: CredentialKind::ApiKey,
        secret: SecretString::from(secret.to_string()),
    }
}

fn backend_model(vendor: &str, name: &str) -> BackendModel {
    BackendModel {
        vendor: vendor.to_string(),
        name: name.to_string(),
    }
}

fn config(
    credentials: Vec<Credential>,
    models: Vec<BackendModel>,
    vendors: &[(&str, &str)],
) -> RouterConfig {
    RouterConfig {
        credentials,
        models,
        vendors: vendors
            .iter()
            .map(|(vendor, url)| (vendor.to_string(), url.to_string()))
            .collect::<BTreeMap<_, _>>(),
        timeouts: Timeouts::default(),
    }
}

fn proxy(config: RouterConfig) -> TestServer {
    let state = Arc::new(AppState::new(config).expect("cannot build app state"));
    TestServer::new(routes(state)).expect("cannot instantiate TestServer")
}

fn completion_body(model: &str) -> Value {
    json!({
        "model": model,
        "messages": [{"role": "user", "content": "Hi"}]
    })
}

fn upstream_completion(model: &str) -> Value {
    json!({
        "id": "chatcmpl-upstream",
        "object": "chat.completion",
        "created": 1700000000,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello!"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
    })
}

// Scenario: happy unary path. One vendor, one credential, one backend
// model; the outbound call carries the backend model and the client gets
// its own model string back.
#[tokio::test]
async fn unary_path_preserves_the_client_model() {
    let vendor = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-v1"))
        .and(body_partial_json(json!({"model": "B1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_completion("B1")))
        .expect(1)
        .mount(&vendor)
        .await;

    let server = proxy(config(
        vec![credential("v1", "sk-v1")],
        vec![backend_model("v1", "B1")],
        &[("v1", &vendor.uri())],
    ));

    let response = server
        .post("/v1/chat/completions")
        .json(&completion_body("my-model"))
        .await;

    response.assert_status_ok();
    assert!(response.headers().get("x-request-id").is_some());

    let body: Value = response.json();
    assert_eq!(body["model"], "my-model");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello!");
}

// Scenario: the vendor filter removes every credential; the client learns
// which side was missing for which vendor.
#[tokio::test]
async fn vendor_filter_miss_names_the_vendor_and_side() {
    let server = proxy(config(
        vec![credential("openai", "sk-oa")],
        vec![backend_model("openai", "gpt-4o")],
        &[("openai", "http://127.0.0.1:1")],
    ));

    let response = server
        .post("/v1/chat/completions")
        .add_query_param("vendor", "gemini")
        .json(&completion_body("my-model"))
        .await;

    response.assert_status_bad_request();

    let text = response.text();
    assert!(text.contains("gemini"), "{text}");
    assert!(text.contains("credentials"), "{text}");
}

fn sse_body(chunks: &[String]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str("data: ");
        body.push_str(chunk);
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body
}

// Scenario: streaming identity stability. The upstream varies
// system_fingerprint across ten chunks; the client must see a single
// stable identity and its own model string on every chunk.
#[tokio::test]
async fn streaming_identity_is_stable_for_the_client() {
    let vendor = MockServer::start().await;

    let chunks: Vec<String> = (0..10)
        .map(|i| {
            json!({
                "id": format!("chatcmpl-{i}"),
                "object": "chat.completion.chunk",
                "created": 1700000000 + i,
                "model": "B1",
                "system_fingerprint": format!("fp_{i}"),
                "choices": [{"index": 0, "delta": {"content": format!("t{i}")}, "finish_reason": null}]
            })
            .to_string()
        })
        .collect();

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body(&chunks), "text/event-stream"),
        )
        .mount(&vendor)
        .await;

    let server = proxy(config(
        vec![credential("v1", "sk-v1")],
        vec![backend_model("v1", "B1")],
        &[("v1", &vendor.uri())],
    ));

    let mut body = completion_body("client-model");
    body["stream"] = json!(true);

    let response = server.post("/v1/chat/completions").json(&body).await;

    response.assert_status_ok();
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    let text = response.text();
    let lines: Vec<&str> = text
        .lines()
        .filter(|line| line.starts_with("data: "))
        .collect();

    assert_eq!(lines.len(), 11);
    assert_eq!(*lines.last().unwrap(), "data: [DONE]");

    let mut ids = Vec::new();
    let mut createds = Vec::new();
    let mut fingerprints = Vec::new();

    for line in &lines[..10] {
        let chunk: Value = serde_json::from_str(&line["data: ".len()..]).unwrap();
        assert_eq!(chunk["model"], "client-model");
        ids.push(chunk["id"].clone());
        createds.push(chunk["created"].clone());
        fingerprints.push(chunk["system_fingerprint"].clone());
    }

    ids.dedup();
    createds.dedup();
    fingerprints.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(createds.len(), 1);
    assert_eq!(fingerprints.len(), 1);
}

// Scenario: malformed JSON is rejected up front, and the inbound request
// id still comes back on the error.
#[tokio::test]
async fn malformed_body_is_a_bad_request_with_the_inbound_id() {
    let server = proxy(config(
        vec![credential("v1", "sk-v1")],
        vec![backend_model("v1", "B1")],
        &[("v1", "http://127.0.0.1:1")],
    ));

    let response = server
        .post("/v1/chat/completions")
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("client-chose-this"),
        )
        .content_type("application/json")
        .text(r#"{"model":"x","messages":"#)
        .await;

    response.assert_status_bad_request();
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("client-chose-this")
    );
}

// CF-Ray wins over X-Request-ID; with neither, a fresh 16-hex id appears.
#[tokio::test]
async fn request_id_precedence_and_freshness() {
    let server = proxy(config(
        vec![credential("v1", "sk-v1")],
        vec![backend_model("v1", "B1")],
        &[("v1", "http://127.0.0.1:1")],
    ));

    let response = server
        .get("/health")
        .add_header(
            HeaderName::from_static("cf-ray"),
            HeaderValue::from_static("ray-7f2c6a9d-SYD"),
        )
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("client-id"),
        )
        .await;
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("ray-7f2c6a9d-SYD")
    );

    let response = server
        .get("/health")
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("client-id"),
        )
        .await;
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("client-id")
    );

    let response = server.get("/health").await;
    let fresh = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert_eq!(fresh.len(), 16);
    assert!(fresh.chars().all(|c| c.is_ascii_hexdigit()));
}

// Scenario: uniform distribution smoke. Vendor a has 1 model and 2
// credentials, vendor b has 3 models and 1 credential: 5 combinations,
// each expected 1000 +/- 100 times over 5000 calls, and every response
// carries its own request's model string.
#[tokio::test]
async fn selection_is_uniform_across_the_join() {
    let vendor_a = MockServer::start().await;
    let vendor_b = MockServer::start().await;

    for vendor in [&vendor_a, &vendor_b] {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(upstream_completion("served")))
            .mount(vendor)
            .await;
    }

    let server = proxy(config(
        vec![
            credential("a", "sk-a-1"),
            credential("a", "sk-a-2"),
            credential("b", "sk-b-1"),
        ],
        vec![
            backend_model("a", "m-a"),
            backend_model("b", "m-b1"),
            backend_model("b", "m-b2"),
            backend_model("b", "m-b3"),
        ],
        &[("a", &vendor_a.uri()), ("b", &vendor_b.uri())],
    ));

    const CALLS: usize = 5000;

    for i in 0..CALLS {
        let client_model = format!("client-model-{i}");
        let response = server
            .post("/v1/chat/completions")
            .json(&completion_body(&client_model))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["model"], client_model.as_str());
    }

    let mut counts: HashMap<(String, String), usize> = HashMap::new();
    for vendor in [&vendor_a, &vendor_b] {
        for request in vendor.received_requests().await.unwrap() {
            let auth = request
                .headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap()
                .to_string();
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            let model = body["model"].as_str().unwrap().to_string();
            *counts.entry((auth, model)).or_insert(0) += 1;
        }
    }

    assert_eq!(counts.len(), 5, "expected exactly 5 combinations: {counts:?}");
    let total: usize = counts.values().sum();
    assert_eq!(total, CALLS);
    for (combination, count) in counts {
        assert!(
            (900..=1100).contains(&count),
            "combination {combination:?} was dispatched {count} times out of {CALLS}"
        );
    }
}

// Upstream errors pass through: same status, the vendor's own body, with
// the identity rewritten when it parses.
#[tokio::test]
async fn upstream_errors_pass_through_with_status_and_body() {
    let vendor = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached", "type": "tokens", "code": "rate_limit_exceeded"}
        })))
        .mount(&vendor)
        .await;

    let server = proxy(config(
        vec![credential("v1", "sk-v1")],
        vec![backend_model("v1", "B1")],
        &[("v1", &vendor.uri())],
    ));

    let response = server
        .post("/v1/chat/completions")
        .json(&completion_body("my-model"))
        .await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "rate_limit_exceeded");
}

// An unreachable vendor is a 502 after bounded retries.
#[tokio::test]
async fn unreachable_upstream_is_a_bad_gateway() {
    // Nothing listens on this port.
    let server = proxy(config(
        vec![credential("v1", "sk-v1")],
        vec![backend_model("v1", "B1")],
        &[("v1", "http://127.0.0.1:9")],
    ));

    let response = server
        .post("/v1/chat/completions")
        .json(&completion_body("my-model"))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    assert!(response.headers().get("x-request-id").is_some());
}

#[tokio::test]
async fn model_listing_uses_the_openai_envelope_and_vendor_filter() {
    let server = proxy(config(
        vec![credential("openai", "sk-oa"), credential("gemini", "sk-gm")],
        vec![
            backend_model("openai", "gpt-4o"),
            backend_model("gemini", "gemini-2.0-flash"),
        ],
        &[
            ("openai", "http://127.0.0.1:1"),
            ("gemini", "http://127.0.0.1:1"),
        ],
    ));

    let response = server.get("/v1/models").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"][0]["object"], "model");

    let response = server.get("/v1/models").add_query_param("vendor", "gemini").await;
    let body: Value = response.json();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["id"], "gemini-2.0-flash");
    assert_eq!(body["data"][0]["owned_by"], "gemini");
}

#[tokio::test]
async fn health_reflects_the_configuration() {
    // Fully covered configuration: healthy.
    let server = proxy(config(
        vec![credential("v1", "sk-v1")],
        vec![backend_model("v1", "B1")],
        &[("v1", "http://127.0.0.1:1")],
    ));
    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["services"]["selector"], "up");

    // No credential matches any model vendor: unhealthy, 503.
    let server = proxy(config(
        vec![credential("v1", "sk-v1")],
        vec![backend_model("v2", "B2")],
        &[("v2", "http://127.0.0.1:1")],
    ));
    let response = server.get("/health").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["status"], "unhealthy");

    // Vendor b's model has no credential, vendor a still works: degraded.
    let server = proxy(config(
        vec![credential("a", "sk-a")],
        vec![backend_model("a", "m-a"), backend_model("b", "m-b")],
        &[("a", "http://127.0.0.1:1"), ("b", "http://127.0.0.1:1")],
    ));
    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "degraded");
}

// A tool-forwarding request passes validation and the tool payload reaches
// the vendor untouched.
#[tokio::test]
async fn tool_definitions_are_forwarded_verbatim() {
    let vendor = MockServer::start().await;

    let tools = json!([{
        "type": "function",
        "function": {
            "name": "get_weather",
            "description": "Current weather for a city",
            "parameters": {
                "type": "object",
                "properties": {"city": {"type": "string"}},
                "required": ["city"]
            }
        }
    }]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"tools": tools, "tool_choice": "auto"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_completion("B1")))
        .expect(1)
        .mount(&vendor)
        .await;

    let server = proxy(config(
        vec![credential("v1", "sk-v1")],
        vec![backend_model("v1", "B1")],
        &[("v1", &vendor.uri())],
    ));

    let mut body = completion_body("my-model");
    body["tools"] = tools.clone();
    body["tool_choice"] = json!("auto");

    let response = server.post("/v1/chat/completions").json(&body).await;
    response.assert_status_ok();
}
