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

//! Uniform selection of a (vendor, model, credential) combination.
//!
//! The universe sampled is the join of credentials and models on
//! `credential.platform == model.vendor`, never the two lists drawn
//! independently: a two-stage draw (credential first, then one of its
//! vendor's models) over-weights vendors with few models per credential.
//! Materialising the joined set and drawing one element uniformly is the
//! only strategy that is fair across combinations.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::config::{BackendModel, Credential};

/// One valid routing decision: a backend model together with a credential
/// whose platform matches the model's vendor.
#[derive(Debug, Clone)]
pub struct Selection {
    /// The vendor that will serve the call.
    pub vendor: String,

    /// The backend model name sent upstream.
    pub model: String,

    /// The credential used to authenticate the call. Its platform always
    /// equals [`Selection::vendor`].
    pub credential: Credential,
}

/// Why no combination could be produced.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    /// The (optionally vendor-filtered) credential list is empty.
    #[error("no credentials available{}", .vendor.as_ref().map(|v| format!(" for vendor {v}")).unwrap_or_default())]
    NoCredentials {
        /// The vendor filter in effect, if any.
        vendor: Option<String>,
    },

    /// The (optionally vendor-filtered) model list is empty.
    #[error("no models available{}", .vendor.as_ref().map(|v| format!(" for vendor {v}")).unwrap_or_default())]
    NoModels {
        /// The vendor filter in effect, if any.
        vendor: Option<String>,
    },

    /// Both lists are non-empty but no credential platform matches any
    /// model vendor. This is a configuration inconsistency, not a caller
    /// mistake.
    #[error("no credential matches any model vendor")]
    NoViableCombination,
}

/// Draws combinations with a private random source.
///
/// One selector is shared by all requests; the RNG lives behind a mutex
/// that is held only for the duration of a single draw. Selection on one
/// request never affects another.
pub struct Selector {
    rng: Mutex<StdRng>,
}

impl Selector {
    /// Creates a selector seeded from system entropy.
    pub fn new() -> Self {
        Selector {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Creates a deterministic selector. Only useful in tests that assert
    /// on the draw sequence or distribution.
    pub fn from_seed(seed: u64) -> Self {
        Selector {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Selects one (vendor, model, credential) combination uniformly at
    /// random from the join of `credentials` and `models` on platform,
    /// optionally restricted to a single `vendor` first.
    ///
    /// When the filter empties one side, the error names that side so the
    /// caller can tell the client whether credentials or models were
    /// missing for the requested vendor.
    pub fn select(
        &self,
        credentials: &[Credential],
        models: &[BackendModel],
        vendor: Option<&str>,
    ) -> Result<Selection, SelectorError> {
        let credentials: Vec<&Credential> = credentials
            .iter()
            .filter(|c| vendor.map_or(true, |v| c.platform == v))
            .collect();
        if credentials.is_empty() {
            return Err(SelectorError::NoCredentials {
                vendor: vendor.map(str::to_string),
            });
        }

        let models: Vec<&BackendModel> = models
            .iter()
            .filter(|m| vendor.map_or(true, |v| m.vendor == v))
            .collect();
        if models.is_empty() {
            return Err(SelectorError::NoModels {
                vendor: vendor.map(str::to_string),
            });
        }

        let mut by_platform: HashMap<&str, Vec<&Credential>> = HashMap::new();
        for credential in &credentials {
            by_platform
                .entry(credential.platform.as_str())
                .or_default()
                .push(credential);
        }

        let combinations: Vec<(&BackendModel, &Credential)> = models
            .iter()
            .flat_map(|model| {
                by_platform
                    .get(model.vendor.as_str())
                    .into_iter()
                    .flatten()
                    .map(move |credential| (*model, *credential))
            })
            .collect();

        if combinations.is_empty() {
            return Err(SelectorError::NoViableCombination);
        }

        let index = {
            let mut rng = match self.rng.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            rng.gen_range(0..combinations.len())
        };

        let (model, credential) = combinations[index];

        Ok(Selection {
            vendor: model.vendor.clone(),
            model: model.name.clone(),
            credential: credential.clone(),
        })
    }
}

impl Default for Selector {
    fn default() -> Self {
        Selector::new()
    }
}
