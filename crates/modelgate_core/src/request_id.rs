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

//! Per-request correlation identifiers.
//!
//! An identifier either arrives with the request (edge headers such as
//! `CF-Ray`, or a client-set `X-Request-ID`) and is preserved verbatim, or
//! is minted here as 16 hex characters. The same value flows through the
//! request's tracing span, every log line, and the response header.

use std::fmt;

use uuid::Uuid;

/// Length of a freshly generated identifier.
const GENERATED_LEN: usize = 16;

/// An opaque correlation token for one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Mints a fresh 16-hex-character identifier.
    pub fn generate() -> Self {
        let mut hex = Uuid::new_v4().simple().to_string();
        hex.truncate(GENERATED_LEN);
        RequestId(hex)
    }

    /// Adopts an inbound header value. Returns `None` for empty or
    /// whitespace-only values; anything else is preserved verbatim.
    pub fn from_header_value(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(RequestId(trimmed.to_string()))
        }
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generated_ids_are_16_hex_chars() {
        for _ in 0..100 {
            let id = RequestId::generate();
            assert_eq!(id.as_str().len(), 16);
            assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn inbound_values_are_preserved_verbatim() {
        let id = RequestId::from_header_value("7f2c6a9d4e-SYD").unwrap();
        assert_eq!(id.as_str(), "7f2c6a9d4e-SYD");
    }

    #[test]
    fn blank_values_are_rejected() {
        assert!(RequestId::from_header_value("").is_none());
        assert!(RequestId::from_header_value("   ").is_none());
    }
}
