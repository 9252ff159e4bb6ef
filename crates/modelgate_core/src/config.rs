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

//! Runtime configuration for the proxy: vendor credentials, the backend
//! model list, vendor base URLs, and timeout/observability knobs.
//!
//! The configuration is built once at startup and is read-only afterwards.
//! Validation happens up front; a config that fails [`RouterConfig::validate`]
//! must abort the process with a non-zero exit code.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The authentication scheme a [`Credential`] uses against its vendor.
///
/// Only bearer API keys exist today; the enum is open for vendor-specific
/// schemes (OAuth tokens, signed requests) that may be added later.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialKind {
    /// A static secret sent as `Authorization: Bearer <secret>`.
    ApiKey,
}

/// A single upstream credential.
///
/// The secret is held in a [`SecretString`] so that `Debug` output and log
/// fields can never leak it; callers that build the outbound request must
/// expose it explicitly.
#[derive(Debug, Deserialize)]
pub struct Credential {
    /// The vendor this credential authenticates against, e.g. `openai`.
    pub platform: String,

    /// The authentication scheme.
    pub kind: CredentialKind,

    /// The opaque secret value.
    pub secret: SecretString,
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        Credential {
            platform: self.platform.clone(),
            kind: self.kind,
            secret: SecretString::from(self.secret.expose_secret().to_owned()),
        }
    }
}

/// A backend model that the proxy may route a request to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendModel {
    /// The vendor serving this model. Must match a [`Credential::platform`]
    /// and have a base URL in [`RouterConfig::vendors`].
    pub vendor: String,

    /// The vendor-side model identifier sent upstream.
    #[serde(rename = "model")]
    pub name: String,
}

/// Upstream HTTP timeouts.
///
/// These are deliberately generous: LLM vendors routinely take minutes to
/// produce a response, and streaming calls stay open for the whole
/// generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    /// Total time allowed for acquiring a complete unary response.
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,

    /// Server read timeout.
    #[serde(default = "default_read_secs")]
    pub read_secs: u64,

    /// Server write timeout.
    #[serde(default = "default_write_secs")]
    pub write_secs: u64,

    /// Idle keep-alive timeout for pooled upstream connections.
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
}

fn default_request_secs() -> u64 {
    20 * 60
}

fn default_read_secs() -> u64 {
    25 * 60
}

fn default_write_secs() -> u64 {
    25 * 60
}

fn default_idle_secs() -> u64 {
    30 * 60
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            request_secs: default_request_secs(),
            read_secs: default_read_secs(),
            write_secs: default_write_secs(),
            idle_secs: default_idle_secs(),
        }
    }
}

impl Timeouts {
    /// Applies `*_TIMEOUT_SECS` environment overrides on top of the
    /// configured values. Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(secs) = env_secs("REQUEST_TIMEOUT_SECS") {
            self.request_secs = secs;
        }
        if let Some(secs) = env_secs("READ_TIMEOUT_SECS") {
            self.read_secs = secs;
        }
        if let Some(secs) = env_secs("WRITE_TIMEOUT_SECS") {
            self.write_secs = secs;
        }
        if let Some(secs) = env_secs("IDLE_TIMEOUT_SECS") {
            self.idle_secs = secs;
        }
        self
    }

    /// Total unary request acquisition timeout.
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    /// Server read timeout.
    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    /// Server write timeout.
    pub fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }

    /// Pool idle keep-alive timeout.
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }
}

fn env_secs(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// The complete routing configuration.
///
/// Deserialised from YAML by the server binary, or assembled in memory by
/// tests and embedders. Read-only once the server is running.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// All upstream credentials, grouped implicitly by platform.
    pub credentials: Vec<Credential>,

    /// The backend models requests may be routed to.
    pub models: Vec<BackendModel>,

    /// Platform name to HTTPS base URL, e.g.
    /// `openai -> https://api.openai.com/v1`.
    pub vendors: BTreeMap<String, String>,

    /// Upstream timeouts.
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// A configuration the proxy cannot start with.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The credential list is empty.
    #[error("no credentials configured")]
    NoCredentials,

    /// The model list is empty.
    #[error("no models configured")]
    NoModels,

    /// A model references a vendor with no base URL entry.
    #[error("model {model} references vendor {vendor}, which has no base URL")]
    MissingBaseUrl {
        /// The offending model name.
        model: String,
        /// The vendor without a base URL.
        vendor: String,
    },

    /// A vendor appears in the model list but has no credential.
    #[error("vendor {vendor} has models but no credentials")]
    MissingCredentials {
        /// The vendor without credentials.
        vendor: String,
    },
}

impl RouterConfig {
    /// Checks the invariants the selector and dispatcher rely on:
    /// non-empty credential and model lists, a base URL for every vendor in
    /// the model list, and at least one credential per such vendor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credentials.is_empty() {
            return Err(ConfigError::NoCredentials);
        }
        if self.models.is_empty() {
            return Err(ConfigError::NoModels);
        }

        let platforms: BTreeSet<&str> = self
            .credentials
            .iter()
            .map(|c| c.platform.as_str())
            .collect();

        for model in &self.models {
            if !self.vendors.contains_key(&model.vendor) {
                return Err(ConfigError::MissingBaseUrl {
                    model: model.name.clone(),
                    vendor: model.vendor.clone(),
                });
            }
            if !platforms.contains(model.vendor.as_str()) {
                return Err(ConfigError::MissingCredentials {
                    vendor: model.vendor.clone(),
                });
            }
        }

        Ok(())
    }

    /// The base URL for `vendor`, if configured.
    pub fn base_url(&self, vendor: &str) -> Option<&str> {
        self.vendors.get(vendor).map(String::as_str)
    }
}

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output.
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "plain" => Ok(LogFormat::Text),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Observability settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct Observability {
    /// Log filter directive, `LOG_LEVEL` (defaults to `info`).
    pub log_level: String,

    /// Log rendering, `LOG_FORMAT` (`json` or `text`, defaults to text).
    pub log_format: LogFormat,

    /// Service name attached to every log line, `SERVICE_NAME`.
    pub service_name: String,

    /// Deployment environment label, `ENVIRONMENT`.
    pub environment: String,
}

impl Observability {
    /// Reads the observability settings from the environment, falling back
    /// to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        Observability {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: env::var("LOG_FORMAT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(LogFormat::Text),
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "modelgate".to_string()),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        }
    }
}
