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

//! GET `/v1/models`: the static backend model listing.

use axum::extract::{Query, State};
use axum::Json;
use time::OffsetDateTime;

use crate::completions::VendorQuery;
use crate::openai::{ModelEntry, ModelList};
use crate::SharedState;

/// GET `/v1/models`: lists the models the proxy can route to, in the
/// OpenAI list envelope, optionally filtered by vendor.
///
/// An unknown vendor filter simply yields an empty list; it is not an
/// error to ask about a vendor the proxy does not carry.
#[utoipa::path(
    get,
    path = "/v1/models",
    params(VendorQuery),
    responses(
        (status = 200, description = "OK", body = ModelList),
    ),
)]
pub async fn list_models(
    State(state): State<SharedState>,
    Query(query): Query<VendorQuery>,
) -> Json<ModelList> {
    let created = OffsetDateTime::now_utc().unix_timestamp();

    let data = state
        .config
        .models
        .iter()
        .filter(|model| {
            query
                .vendor
                .as_deref()
                .map_or(true, |vendor| model.vendor == vendor)
        })
        .map(|model| ModelEntry {
            id: model.name.clone(),
            object: "model".to_string(),
            created,
            owned_by: model.vendor.clone(),
        })
        .collect();

    Json(ModelList {
        object: "list".to_string(),
        data,
    })
}
