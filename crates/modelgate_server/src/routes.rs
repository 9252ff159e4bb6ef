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

//! Contains all routes served by the proxy.

use axum::middleware;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

use crate::completions;
use crate::correlation;
use crate::health;
use crate::misc;
use crate::models;
use crate::SharedState;

/// Assembles the full router: the three proxy endpoints plus the version
/// service, wrapped in the request deadline, CORS, and correlation layers.
pub fn routes(state: SharedState) -> Router {
    let request_deadline = state.config.timeouts.write();

    Router::new()
        // -- Proxy endpoints --------------------------------------------------
        .route(
            "/v1/chat/completions",
            axum::routing::post(completions::chat_completions),
        )
        .route("/v1/models", axum::routing::get(models::list_models))
        // -- Operational endpoints --------------------------------------------
        .route("/health", axum::routing::get(health::health))
        .route("/v1/version", axum::routing::get(misc::version))
        .with_state(state)
        .layer(TimeoutLayer::new(request_deadline))
        .layer(CorsLayer::permissive())
        // Outermost, so every response carries the request id.
        .layer(middleware::from_fn(correlation::propagate_request_id))
}
