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

//! Core types for the Modelgate proxy: vendor configuration, the
//! credential/model selection engine, and request correlation identifiers.
//!
//! This crate is transport-agnostic. Everything HTTP lives in
//! `modelgate_server`; this crate only knows about credentials, backend
//! models, and how to pick one valid combination of the two.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod request_id;
pub mod selector;

pub use config::{BackendModel, Credential, CredentialKind, RouterConfig};
pub use request_id::RequestId;
pub use selector::{Selection, Selector, SelectorError};
