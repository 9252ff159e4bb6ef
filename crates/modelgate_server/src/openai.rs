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

//! JSON structures for [OpenAI's Chat Completions API][openai], which both
//! sides of the proxy speak.
//!
//! Inbound request bodies are validated and rewritten as dynamic JSON (see
//! [`crate::payload`]) so vendor-specific fields survive the trip. The
//! typed structures here describe the parts of the wire format the proxy
//! reasons about; they back the OpenAPI document and give tests a precise
//! vocabulary for asserting on responses.
//!
//! [openai]: https://platform.openai.com/docs/api-reference/chat/create

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// A reference to external content by URL.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UrlRef {
    /// The URL of the referenced content.
    pub url: String,
}

/// Inline base64-encoded audio.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InputAudio {
    /// Base64-encoded audio payload.
    pub data: String,

    /// The audio container format, e.g. `wav` or `mp3`.
    pub format: String,
}

/// One element of a message's content array.
///
/// The tag set is closed: anything other than these five variants fails
/// validation before a request leaves the proxy.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type")]
pub enum ContentPart {
    /// Plain text.
    #[serde(rename = "text")]
    Text {
        /// The text itself.
        text: String,
    },
    /// An image by URL.
    #[serde(rename = "image_url")]
    ImageUrl {
        /// Where the image lives.
        image_url: UrlRef,
    },
    /// A file by URL.
    #[serde(rename = "file_url")]
    FileUrl {
        /// Where the file lives.
        file_url: UrlRef,
    },
    /// An audio clip by URL.
    #[serde(rename = "audio_url")]
    AudioUrl {
        /// Where the audio lives.
        audio_url: UrlRef,
    },
    /// Inline audio data.
    #[serde(rename = "input_audio")]
    InputAudio {
        /// The inline audio.
        input_audio: InputAudio,
    },
}

/// Message content: either one string or an ordered list of parts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum MessageContent {
    /// A single plain-text body.
    Text(String),
    /// A sequence of tagged content parts.
    Parts(Vec<ContentPart>),
}

/// A function invocation recorded on an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssistantToolCall {
    /// Unique identifier of this invocation.
    pub id: String,

    /// The tool type. OpenAI currently always uses `function`.
    #[serde(rename = "type")]
    pub kind: String,

    /// The function that was invoked.
    pub function: FunctionCall,
}

/// The name/arguments pair of a function invocation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FunctionCall {
    /// The function name.
    pub name: String,

    /// The arguments, as a JSON-encoded string.
    pub arguments: String,
}

/// A chat message in the dialogue being completed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "role")]
pub enum ChatMessage {
    /// Instructions from the operator of the calling application.
    #[serde(rename = "system")]
    System {
        /// The instruction text.
        content: MessageContent,
    },
    /// A message from the end user.
    #[serde(rename = "user")]
    User {
        /// Plain text or a sequence of content parts.
        content: MessageContent,
    },
    /// A message previously produced by a model.
    #[serde(rename = "assistant")]
    Assistant {
        /// The reply text. May be omitted when `tool_calls` is present.
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<MessageContent>,

        /// Tool invocations the model requested.
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<AssistantToolCall>>,
    },
    /// The result of a tool invocation.
    #[serde(rename = "tool")]
    Tool {
        /// The tool output.
        content: MessageContent,

        /// Which invocation this result answers.
        tool_call_id: String,
    },
}

/// A function made available to the model.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FunctionStub {
    /// The function name.
    pub name: String,

    /// What the function does, for the model's benefit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// A JSON schema describing the accepted parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// A tool declaration within a request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type")]
#[non_exhaustive]
pub enum ToolStub {
    /// A callable function.
    #[serde(rename = "function")]
    Function {
        /// The declared function.
        function: FunctionStub,
    },
}

/// The subset of a Chat Completions request the proxy reasons about.
///
/// Everything else a client sends rides along untouched; this type exists
/// for the OpenAPI document and for tests, not for request handling, which
/// operates on the dynamic JSON tree.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateChatCompletionRequest {
    /// The model the client believes it is talking to. Preserved as an
    /// identity label; never used to pick the backend.
    pub model: String,

    /// The dialogue so far.
    pub messages: Vec<ChatMessage>,

    /// Tools offered to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolStub>>,

    /// Either one of the literals `auto`, `none`, `required`, or a
    /// `{ "type": "function", "function": {...} }` object.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub tool_choice: Option<Value>,

    /// Request an SSE stream instead of a single JSON response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Vendor-specific fields the proxy forwards verbatim.
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: Map<String, Value>,
}

/// Token accounting for a finished completion.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,

    /// Tokens generated.
    pub completion_tokens: u32,

    /// Prompt plus completion.
    pub total_tokens: u32,
}

/// One generated alternative within a completion.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionChoice {
    /// Position of this choice in the response.
    pub index: u32,

    /// The generated message.
    #[schema(value_type = Object)]
    pub message: Value,

    /// Why generation stopped, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// A complete (unary) chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletion {
    /// Unique identifier of the completion.
    pub id: String,

    /// Always `chat.completion`.
    pub object: String,

    /// UNIX timestamp of generation.
    pub created: i64,

    /// The model label. On anything the proxy emits this equals the model
    /// string from the client's request.
    pub model: String,

    /// Backend configuration fingerprint, when the vendor provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,

    /// The generated choices.
    pub choices: Vec<ChatCompletionChoice>,

    /// Token usage, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChatCompletionUsage>,
}

/// An incremental update to a streamed tool call.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolCallDelta {
    /// Which tool call this fragment extends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,

    /// The invocation id, present on the first fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The tool type, present on the first fragment.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name and argument fragments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallDelta>,
}

/// Name/argument fragments within a [`ToolCallDelta`].
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FunctionCallDelta {
    /// The function name, present on the first fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// A fragment of the JSON-encoded arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// The delta carried by one streamed chunk choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ChunkDelta {
    /// New role, on the first chunk of a message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// New content appended to the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool-call fragments. Forwarded by the proxy without reordering or
    /// merging.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// One choice within a streamed chunk.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionChunkChoice {
    /// Position of this choice.
    pub index: u32,

    /// The incremental update.
    pub delta: ChunkDelta,

    /// Why generation stopped, on the final content chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// One SSE chunk of a streamed completion.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionChunk {
    /// Identifier shared by every chunk of one stream.
    pub id: String,

    /// Always `chat.completion.chunk`.
    pub object: String,

    /// UNIX timestamp, identical across the stream.
    pub created: i64,

    /// The model label, rewritten by the proxy to the client's original.
    pub model: String,

    /// Backend fingerprint, identical across the stream when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,

    /// The incremental choices.
    pub choices: Vec<ChatCompletionChunkChoice>,
}

/// One entry in the `/v1/models` listing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelEntry {
    /// The model identifier clients may send.
    pub id: String,

    /// Always `model`.
    pub object: String,

    /// UNIX timestamp the listing was produced at.
    pub created: i64,

    /// The vendor owning the model.
    pub owned_by: String,
}

/// The OpenAI list envelope around [`ModelEntry`] values.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelList {
    /// Always `list`.
    pub object: String,

    /// The models available through the proxy.
    pub data: Vec<ModelEntry>,
}
