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

//! Validation and rewriting of inbound Chat Completions bodies.
//!
//! The body is handled as a dynamic JSON tree rather than a typed struct:
//! clients send vendor-specific fields unknown at build time, and every one
//! of them must reach the upstream unchanged. Validation walks the tree and
//! checks only the structures the proxy depends on; rewriting replaces the
//! top-level `model` and captures the original value so the response path
//! can restore it.

use serde_json::{Map, Value};
use thiserror::Error;

/// The identity label used when a client sends no usable `model` value.
pub const FALLBACK_MODEL: &str = "any-model";

/// Roles a message may carry.
const KNOWN_ROLES: [&str; 4] = ["system", "user", "assistant", "tool"];

/// The `tool_choice` string literals OpenAI defines.
const TOOL_CHOICE_LITERALS: [&str; 3] = ["auto", "none", "required"];

/// A request body the proxy refuses to forward.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// The body is not valid JSON.
    #[error("invalid JSON body: {0}")]
    Malformed(String),

    /// A structural schema rule is broken. The message names the field.
    #[error("{0}")]
    SchemaViolation(String),

    /// The structure is recognised but carries a disallowed value.
    #[error("{0}")]
    SemanticReject(String),
}

/// Parses and validates a raw request body, returning the JSON object tree.
///
/// The rules checked are exactly the ones the proxy relies on downstream;
/// any field not mentioned here is passed through untouched.
pub fn parse_and_validate(raw: &[u8]) -> Result<Map<String, Value>, PayloadError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| PayloadError::Malformed(e.to_string()))?;

    let Value::Object(doc) = value else {
        return Err(PayloadError::SchemaViolation(
            "request body must be a JSON object".to_string(),
        ));
    };

    validate_messages(&doc)?;
    validate_tools(&doc)?;
    validate_tool_choice(&doc)?;
    validate_stream(&doc)?;

    Ok(doc)
}

/// Replaces the top-level `model` with the chosen backend model and returns
/// the value that was there.
///
/// An absent, empty, or non-string `model` yields [`FALLBACK_MODEL`] as the
/// captured identity.
pub fn rewrite_model(doc: &mut Map<String, Value>, backend_model: &str) -> String {
    let original = match doc.get("model") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => FALLBACK_MODEL.to_string(),
    };

    doc.insert(
        "model".to_string(),
        Value::String(backend_model.to_string()),
    );

    original
}

/// Validates `raw` and substitutes `backend_model`, returning the
/// re-serialised body and the client's original model string.
pub fn validate_and_rewrite(
    raw: &[u8],
    backend_model: &str,
) -> Result<(Vec<u8>, String), PayloadError> {
    let mut doc = parse_and_validate(raw)?;
    let original = rewrite_model(&mut doc, backend_model);
    let body = serde_json::to_vec(&doc)
        .map_err(|e| PayloadError::Malformed(format!("re-serialisation failed: {e}")))?;
    Ok((body, original))
}

/// Whether the validated request asks for a streamed response.
pub fn wants_stream(doc: &Map<String, Value>) -> bool {
    matches!(doc.get("stream"), Some(Value::Bool(true)))
}

fn validate_messages(doc: &Map<String, Value>) -> Result<(), PayloadError> {
    let Some(messages) = doc.get("messages") else {
        return Err(PayloadError::SchemaViolation(
            "messages is required".to_string(),
        ));
    };

    let Value::Array(messages) = messages else {
        return Err(PayloadError::SchemaViolation(
            "messages must be an array".to_string(),
        ));
    };

    if messages.is_empty() {
        return Err(PayloadError::SchemaViolation(
            "messages must not be empty".to_string(),
        ));
    }

    for (index, message) in messages.iter().enumerate() {
        validate_message(index, message)?;
    }

    Ok(())
}

fn validate_message(index: usize, message: &Value) -> Result<(), PayloadError> {
    let Value::Object(message) = message else {
        return Err(PayloadError::SchemaViolation(format!(
            "messages[{index}] must be an object"
        )));
    };

    let role = match message.get("role") {
        Some(Value::String(role)) => role.as_str(),
        Some(_) => {
            return Err(PayloadError::SchemaViolation(format!(
                "messages[{index}].role must be a string"
            )))
        }
        None => {
            return Err(PayloadError::SchemaViolation(format!(
                "messages[{index}].role is required"
            )))
        }
    };

    if !KNOWN_ROLES.contains(&role) {
        return Err(PayloadError::SemanticReject(format!(
            "messages[{index}].role: unknown role {role:?}"
        )));
    }

    match message.get("content") {
        Some(Value::String(_)) => {}
        Some(Value::Array(parts)) => {
            for (part_index, part) in parts.iter().enumerate() {
                validate_content_part(index, part_index, part)?;
            }
        }
        Some(Value::Null) | None => {
            // Only an assistant message relaying tool invocations may omit
            // its content.
            let has_tool_calls =
                matches!(message.get("tool_calls"), Some(Value::Array(calls)) if !calls.is_empty());
            if role != "assistant" || !has_tool_calls {
                return Err(PayloadError::SchemaViolation(format!(
                    "messages[{index}].content is required"
                )));
            }
        }
        Some(_) => {
            return Err(PayloadError::SchemaViolation(format!(
                "messages[{index}].content must be a string or an array of content parts"
            )))
        }
    }

    Ok(())
}

fn validate_content_part(
    message_index: usize,
    part_index: usize,
    part: &Value,
) -> Result<(), PayloadError> {
    let location = format!("messages[{message_index}].content[{part_index}]");

    let Value::Object(part) = part else {
        return Err(PayloadError::SchemaViolation(format!(
            "{location} must be an object"
        )));
    };

    let tag = match part.get("type") {
        Some(Value::String(tag)) => tag.as_str(),
        Some(_) => {
            return Err(PayloadError::SchemaViolation(format!(
                "{location}.type must be a string"
            )))
        }
        None => {
            return Err(PayloadError::SchemaViolation(format!(
                "{location}.type is required"
            )))
        }
    };

    match tag {
        "text" => {
            if !matches!(part.get("text"), Some(Value::String(_))) {
                return Err(PayloadError::SchemaViolation(format!(
                    "{location}.text must be a string"
                )));
            }
        }
        "image_url" | "file_url" | "audio_url" => {
            let Some(Value::Object(reference)) = part.get(tag) else {
                return Err(PayloadError::SchemaViolation(format!(
                    "{location}.{tag} must be an object"
                )));
            };
            if !matches!(reference.get("url"), Some(Value::String(_))) {
                return Err(PayloadError::SchemaViolation(format!(
                    "{location}.{tag}.url must be a string"
                )));
            }
        }
        "input_audio" => {
            let Some(Value::Object(audio)) = part.get("input_audio") else {
                return Err(PayloadError::SchemaViolation(format!(
                    "{location}.input_audio must be an object"
                )));
            };
            if !matches!(audio.get("data"), Some(Value::String(_))) {
                return Err(PayloadError::SchemaViolation(format!(
                    "{location}.input_audio.data must be a string"
                )));
            }
            if !matches!(audio.get("format"), Some(Value::String(_))) {
                return Err(PayloadError::SchemaViolation(format!(
                    "{location}.input_audio.format must be a string"
                )));
            }
        }
        unknown => {
            return Err(PayloadError::SemanticReject(format!(
                "{location}: unknown content type {unknown:?}"
            )))
        }
    }

    Ok(())
}

fn validate_tools(doc: &Map<String, Value>) -> Result<(), PayloadError> {
    let Some(tools) = doc.get("tools") else {
        return Ok(());
    };

    let Value::Array(tools) = tools else {
        return Err(PayloadError::SchemaViolation(
            "tools must be an array".to_string(),
        ));
    };

    for (index, tool) in tools.iter().enumerate() {
        let Value::Object(tool) = tool else {
            return Err(PayloadError::SchemaViolation(format!(
                "tools[{index}] must be an object"
            )));
        };

        if !matches!(tool.get("type"), Some(Value::String(kind)) if kind == "function") {
            return Err(PayloadError::SchemaViolation(format!(
                "tools[{index}].type must be \"function\""
            )));
        }

        if !matches!(tool.get("function"), Some(Value::Object(_))) {
            return Err(PayloadError::SchemaViolation(format!(
                "tools[{index}].function must be an object"
            )));
        }
    }

    Ok(())
}

fn validate_tool_choice(doc: &Map<String, Value>) -> Result<(), PayloadError> {
    let Some(tool_choice) = doc.get("tool_choice") else {
        return Ok(());
    };

    match tool_choice {
        Value::String(literal) => {
            if !TOOL_CHOICE_LITERALS.contains(&literal.as_str()) {
                return Err(PayloadError::SemanticReject(format!(
                    "tool_choice: unknown literal {literal:?}, expected one of auto, none, required"
                )));
            }
        }
        Value::Object(choice) => {
            if !matches!(choice.get("type"), Some(Value::String(kind)) if kind == "function") {
                return Err(PayloadError::SchemaViolation(
                    "tool_choice.type must be \"function\"".to_string(),
                ));
            }
            if !matches!(choice.get("function"), Some(Value::Object(_))) {
                return Err(PayloadError::SchemaViolation(
                    "tool_choice.function must be an object".to_string(),
                ));
            }
        }
        _ => {
            return Err(PayloadError::SchemaViolation(
                "tool_choice must be a string or an object".to_string(),
            ))
        }
    }

    Ok(())
}

fn validate_stream(doc: &Map<String, Value>) -> Result<(), PayloadError> {
    match doc.get("stream") {
        None | Some(Value::Bool(_)) => Ok(()),
        Some(_) => Err(PayloadError::SchemaViolation(
            "stream must be a boolean".to_string(),
        )),
    }
}
