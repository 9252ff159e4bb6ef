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

//! The streaming relay between an upstream SSE response and the client.
//!
//! Upstreams occasionally vary `id`, `created`, or `system_fingerprint`
//! between chunks of one generation; clients built against OpenAI expect
//! them constant. The relay pins the identity observed on the first
//! parseable chunk and stamps it onto every subsequent one, alongside the
//! client's original model label.
//!
//! The relay is a small state machine:
//!
//! ```text
//! AwaitingFirstChunk -> Streaming -> Terminating -> Done
//! ```
//!
//! entered when the upstream response headers arrive and advanced per
//! chunk; `Done` is reached once the `[DONE]` sentinel has been forwarded
//! or the upstream ends. Dropping the relay mid-stream (the client went
//! away) drops the upstream body with it, which cancels the vendor call;
//! the `Drop` impl records the cancellation.

use std::convert::Infallible;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use eventsource_stream::{Event, EventStreamError};
use futures::Stream;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use modelgate_core::RequestId;

/// The SSE sentinel that terminates a completion stream.
const DONE_SENTINEL: &str = "[DONE]";

/// The identity fields every chunk of one stream must agree on.
struct StreamIdentity {
    id: Value,
    created: Option<Value>,
    system_fingerprint: Option<Value>,
}

impl StreamIdentity {
    /// Pins the identity from the first parseable chunk. A missing or
    /// empty upstream id is replaced with a generated one that then stays
    /// stable for the rest of the stream.
    fn pin_from(chunk: &Map<String, Value>) -> Self {
        let id = match chunk.get("id") {
            Some(Value::String(id)) if !id.is_empty() => Value::String(id.clone()),
            _ => Value::String(format!("chatcmpl-{}", Uuid::new_v4().simple())),
        };

        StreamIdentity {
            id,
            created: chunk.get("created").cloned().filter(|v| !v.is_null()),
            system_fingerprint: chunk
                .get("system_fingerprint")
                .cloned()
                .filter(|v| !v.is_null()),
        }
    }

    /// Overwrites a chunk's identity fields with the pinned values. Fields
    /// the first chunk did not carry are removed, so their set of observed
    /// values stays a singleton either way.
    fn apply(&self, chunk: &mut Map<String, Value>) {
        chunk.insert("id".to_string(), self.id.clone());

        match &self.created {
            Some(created) => {
                chunk.insert("created".to_string(), created.clone());
            }
            None => {
                chunk.remove("created");
            }
        }

        match &self.system_fingerprint {
            Some(fingerprint) => {
                chunk.insert("system_fingerprint".to_string(), fingerprint.clone());
            }
            None => {
                chunk.remove("system_fingerprint");
            }
        }
    }
}

enum RelayState {
    AwaitingFirstChunk,
    Streaming,
    Terminating,
    Done,
}

/// Relays upstream SSE events to the client as `data: <json>\n\n` frames,
/// rewriting identity fields on the way through.
///
/// Tool-call deltas and every other field below the top level pass through
/// untouched. Chunks that fail to parse are forwarded verbatim.
pub struct ChunkRelay<S> {
    upstream: S,
    state: RelayState,
    identity: Option<StreamIdentity>,
    original_model: String,
    request_id: RequestId,
}

impl<S, E> ChunkRelay<S>
where
    S: Stream<Item = Result<Event, EventStreamError<E>>> + Unpin,
    E: Display,
{
    /// Wraps an upstream event stream. `original_model` is the client's
    /// model string, restored on every chunk.
    pub fn new(upstream: S, original_model: String, request_id: RequestId) -> Self {
        ChunkRelay {
            upstream,
            state: RelayState::AwaitingFirstChunk,
            identity: None,
            original_model,
            request_id,
        }
    }

    fn rewrite(&mut self, event: &Event) -> Bytes {
        match serde_json::from_str::<Value>(&event.data) {
            Ok(Value::Object(mut chunk)) => {
                let identity = self
                    .identity
                    .get_or_insert_with(|| StreamIdentity::pin_from(&chunk));
                identity.apply(&mut chunk);
                chunk.insert(
                    "model".to_string(),
                    Value::String(self.original_model.clone()),
                );

                match serde_json::to_string(&Value::Object(chunk)) {
                    Ok(json) => Bytes::from(format!("data: {json}\n\n")),
                    Err(e) => {
                        warn!(
                            request_id = %self.request_id,
                            "failed to re-serialise stream chunk, forwarding verbatim: {e}"
                        );
                        verbatim_frame(&event.data)
                    }
                }
            }
            _ => {
                warn!(
                    request_id = %self.request_id,
                    "forwarding unparseable stream chunk verbatim"
                );
                verbatim_frame(&event.data)
            }
        }
    }
}

impl<S, E> Stream for ChunkRelay<S>
where
    S: Stream<Item = Result<Event, EventStreamError<E>>> + Unpin,
    E: Display,
{
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        match this.state {
            RelayState::Done => return Poll::Ready(None),
            RelayState::Terminating => {
                this.state = RelayState::Done;
                return Poll::Ready(None);
            }
            _ => {}
        }

        match Pin::new(&mut this.upstream).poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => {
                if event.data == DONE_SENTINEL {
                    this.state = RelayState::Terminating;
                    return Poll::Ready(Some(Ok(Bytes::from_static(b"data: [DONE]\n\n"))));
                }

                let frame = this.rewrite(&event);
                this.state = RelayState::Streaming;
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                // The response status is long gone; all that is left to do
                // is log and close the stream without a sentinel.
                error!(
                    request_id = %this.request_id,
                    "upstream stream failed mid-flight: {e}"
                );
                this.state = RelayState::Done;
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                debug!(
                    request_id = %this.request_id,
                    "upstream stream ended without a sentinel"
                );
                this.state = RelayState::Done;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for ChunkRelay<S> {
    fn drop(&mut self) {
        if matches!(
            self.state,
            RelayState::AwaitingFirstChunk | RelayState::Streaming
        ) {
            info!(
                request_id = %self.request_id,
                "stream cancelled before completion; upstream call dropped"
            );
        }
    }
}

/// Frames arbitrary event data as SSE without touching its content.
fn verbatim_frame(data: &str) -> Bytes {
    let mut framed = String::with_capacity(data.len() + 16);
    for line in data.split('\n') {
        framed.push_str("data: ");
        framed.push_str(line.strip_suffix('\r').unwrap_or(line));
        framed.push('\n');
    }
    framed.push('\n');
    Bytes::from(framed)
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use futures::StreamExt;

    use super::*;

    type TestItem = Result<Event, EventStreamError<Infallible>>;

    fn event(data: &str) -> TestItem {
        Ok(Event {
            data: data.to_string(),
            ..Default::default()
        })
    }

    fn relay_from(
        items: Vec<TestItem>,
        original_model: &str,
    ) -> ChunkRelay<futures::stream::Iter<std::vec::IntoIter<TestItem>>> {
        ChunkRelay::new(
            futures::stream::iter(items),
            original_model.to_string(),
            RequestId::generate(),
        )
    }

    async fn collect_frames<S>(mut relay: ChunkRelay<S>) -> Vec<String>
    where
        S: Stream<Item = TestItem> + Unpin,
    {
        let mut frames = Vec::new();
        while let Some(Ok(frame)) = relay.next().await {
            frames.push(String::from_utf8(frame.to_vec()).unwrap());
        }
        frames
    }

    fn chunk_json(frame: &str) -> Value {
        let line = frame
            .strip_prefix("data: ")
            .and_then(|f| f.strip_suffix("\n\n"))
            .unwrap();
        serde_json::from_str(line).unwrap()
    }

    fn upstream_chunk(id: &str, created: i64, fingerprint: &str, content: &str) -> TestItem {
        event(&format!(
            r#"{{"id":"{id}","object":"chat.completion.chunk","created":{created},"model":"backend-model","system_fingerprint":"{fingerprint}","choices":[{{"index":0,"delta":{{"content":"{content}"}},"finish_reason":null}}]}}"#
        ))
    }

    #[tokio::test]
    async fn identity_is_stable_across_chunks() {
        let items = vec![
            upstream_chunk("chatcmpl-1", 100, "fp_a", "Hel"),
            upstream_chunk("chatcmpl-2", 200, "fp_b", "lo"),
            upstream_chunk("chatcmpl-3", 300, "fp_c", "!"),
            event(DONE_SENTINEL),
        ];

        let frames = collect_frames(relay_from(items, "client-model")).await;
        assert_eq!(frames.len(), 4);
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");

        let chunks: Vec<Value> = frames[..3].iter().map(|f| chunk_json(f)).collect();
        for chunk in &chunks {
            assert_eq!(chunk["id"], "chatcmpl-1");
            assert_eq!(chunk["created"], 100);
            assert_eq!(chunk["system_fingerprint"], "fp_a");
            assert_eq!(chunk["model"], "client-model");
        }

        // Delta content is untouched.
        assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "lo");
    }

    #[tokio::test]
    async fn missing_upstream_id_is_replaced_with_a_stable_one() {
        let items = vec![
            event(r#"{"object":"chat.completion.chunk","choices":[]}"#),
            event(r#"{"object":"chat.completion.chunk","choices":[]}"#),
            event(DONE_SENTINEL),
        ];

        let frames = collect_frames(relay_from(items, "m")).await;
        let first = chunk_json(&frames[0]);
        let second = chunk_json(&frames[1]);

        let id = first["id"].as_str().unwrap();
        assert!(id.starts_with("chatcmpl-"));
        assert_eq!(first["id"], second["id"]);
    }

    #[tokio::test]
    async fn fingerprint_absent_on_first_chunk_stays_absent() {
        let items = vec![
            event(r#"{"id":"c-1","object":"chat.completion.chunk","choices":[]}"#),
            event(
                r#"{"id":"c-1","object":"chat.completion.chunk","system_fingerprint":"fp_late","choices":[]}"#,
            ),
            event(DONE_SENTINEL),
        ];

        let frames = collect_frames(relay_from(items, "m")).await;
        let second = chunk_json(&frames[1]);
        assert!(second.get("system_fingerprint").is_none());
    }

    #[tokio::test]
    async fn unparseable_chunk_is_forwarded_verbatim() {
        let items = vec![
            event("this is not json"),
            upstream_chunk("c-1", 1, "fp", "hi"),
            event(DONE_SENTINEL),
        ];

        let frames = collect_frames(relay_from(items, "m")).await;
        assert_eq!(frames[0], "data: this is not json\n\n");
        assert_eq!(chunk_json(&frames[1])["model"], "m");
    }

    #[tokio::test]
    async fn tool_call_deltas_pass_through_untouched() {
        let delta = r#"{"id":"c-1","object":"chat.completion.chunk","created":5,"model":"b","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_9","type":"function","function":{"name":"get_weather","arguments":"{\"city\":\"Syd"}}]},"finish_reason":null}]}"#;
        let items = vec![event(delta), event(DONE_SENTINEL)];

        let original: Value = serde_json::from_str(delta).unwrap();
        let frames = collect_frames(relay_from(items, "client-m")).await;
        let relayed = chunk_json(&frames[0]);

        assert_eq!(relayed["choices"], original["choices"]);
        assert_eq!(relayed["model"], "client-m");
    }

    #[tokio::test]
    async fn stream_ends_after_sentinel() {
        let items = vec![
            upstream_chunk("c-1", 1, "fp", "hi"),
            event(DONE_SENTINEL),
            // Anything after the sentinel must not reach the client.
            upstream_chunk("c-2", 2, "fp2", "late"),
        ];

        let frames = collect_frames(relay_from(items, "m")).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn upstream_error_closes_without_sentinel() {
        let items = vec![
            upstream_chunk("c-1", 1, "fp", "hi"),
            Err(EventStreamError::Utf8(
                String::from_utf8(vec![0, 159]).unwrap_err(),
            )),
        ];

        let frames = collect_frames(relay_from(items, "m")).await;
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].contains(DONE_SENTINEL));
    }

    struct FlagOnDrop<S> {
        inner: S,
        dropped: Arc<AtomicBool>,
    }

    impl<S: Stream + Unpin> Stream for FlagOnDrop<S> {
        type Item = S::Item;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Pin::new(&mut self.get_mut().inner).poll_next(cx)
        }
    }

    impl<S> Drop for FlagOnDrop<S> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dropping_the_relay_drops_the_upstream() {
        let dropped = Arc::new(AtomicBool::new(false));
        let upstream = FlagOnDrop {
            inner: futures::stream::iter(vec![
                upstream_chunk("c-1", 1, "fp", "first"),
                upstream_chunk("c-2", 2, "fp", "second"),
            ]),
            dropped: dropped.clone(),
        };

        let mut relay = ChunkRelay::new(upstream, "m".to_string(), RequestId::generate());

        let first = relay.next().await;
        assert!(first.is_some());
        assert!(!dropped.load(Ordering::SeqCst));

        // The client went away: dropping the relay must drop the upstream
        // body immediately, cancelling the vendor call.
        drop(relay);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
