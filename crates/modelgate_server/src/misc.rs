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

//! Minor services: the build version.

use axum::response::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Reads the version defined in Cargo.toml at compile time.
#[macro_export]
macro_rules! cargo_crate_version {
    () => {
        env!("CARGO_PKG_VERSION")
    };
}

/// The running proxy version.
#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Version {
    /// The crate version, e.g. `0.1.0`.
    pub version: String,
}

/// GET `/v1/version`: returns the running proxy version.
#[utoipa::path(
    get,
    path = "/v1/version",
    responses(
        (status = 200, description = "OK", body = Version),
    ),
)]
pub async fn version() -> Json<Version> {
    Json(Version {
        version: cargo_crate_version!().to_string(),
    })
}
