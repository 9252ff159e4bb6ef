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

//! GET `/health`: aggregated proxy health.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::SharedState;

/// The aggregate states the proxy reports.
#[derive(ToSchema, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Every subsystem can serve every configured model.
    Healthy,
    /// Requests can be served, but part of the configuration is unusable.
    Degraded,
    /// No request can be served.
    Unhealthy,
}

/// The `/health` response body.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug)]
pub struct HealthReport {
    /// The aggregate state.
    pub status: HealthState,

    /// UNIX timestamp the report was produced at.
    pub timestamp: i64,

    /// Per-subsystem up/down flags.
    pub services: BTreeMap<String, String>,

    /// Supporting figures: counts of credentials, models, and viable
    /// combinations.
    pub details: BTreeMap<String, String>,
}

/// GET `/health`: one of `healthy`, `degraded`, or `unhealthy`.
///
/// Healthy and degraded report `200 OK`; an unhealthy proxy, one that
/// cannot serve any request at all, reports `503 Service Unavailable` so
/// load balancers take it out of rotation.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "the proxy can serve requests", body = HealthReport),
        (status = 503, description = "the proxy cannot serve any request", body = HealthReport),
    ),
)]
pub async fn health(State(state): State<SharedState>) -> Response {
    let config = &state.config;

    let credentials_up = !config.credentials.is_empty();
    let models_up = !config.models.is_empty();

    let covered_models = config
        .models
        .iter()
        .filter(|model| {
            config
                .credentials
                .iter()
                .any(|credential| credential.platform == model.vendor)
        })
        .count();

    let combinations = config
        .models
        .iter()
        .map(|model| {
            config
                .credentials
                .iter()
                .filter(|credential| credential.platform == model.vendor)
                .count()
        })
        .sum::<usize>();

    let selector_up = combinations > 0;

    let status = if credentials_up && models_up && covered_models == config.models.len() {
        HealthState::Healthy
    } else if selector_up {
        HealthState::Degraded
    } else {
        HealthState::Unhealthy
    };

    let up_down = |up: bool| (if up { "up" } else { "down" }).to_string();

    let services = BTreeMap::from([
        ("credentials".to_string(), up_down(credentials_up)),
        ("models".to_string(), up_down(models_up)),
        ("selector".to_string(), up_down(selector_up)),
    ]);

    let details = BTreeMap::from([
        (
            "credentials".to_string(),
            config.credentials.len().to_string(),
        ),
        ("models".to_string(), config.models.len().to_string()),
        ("combinations".to_string(), combinations.to_string()),
    ]);

    let report = HealthReport {
        status,
        timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        services,
        details,
    };

    let code = match status {
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (code, Json(report)).into_response()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn health_states_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&HealthState::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthState::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthState::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }
}
