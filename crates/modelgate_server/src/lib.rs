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

//! A transparent proxy in front of OpenAI-compatible LLM vendors.
//!
//! Clients speak the OpenAI Chat Completions wire format to the proxy,
//! which picks a (vendor, model, credential) combination uniformly at
//! random for every call. The request goes out carrying the selected
//! backend model; the response comes back carrying the model name the
//! client asked for, on unary JSON and SSE streams alike.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;

use modelgate_core::config::{LogFormat, Observability, RouterConfig};
use modelgate_core::Selector;

#[macro_use]
pub mod misc;

pub mod cli;
pub mod completions;
pub mod correlation;
pub mod error;
pub mod graceful_shutdown;
pub mod health;
pub mod models;
pub mod openai;
pub mod payload;
pub mod routes;
pub mod stream;
pub mod upstream;

use upstream::{UpstreamClient, UpstreamError};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Modelgate API",
        description = "OpenAI-compatible proxy routing chat completions across LLM vendors.",
    ),
    paths(
        completions::chat_completions,
        models::list_models,
        health::health,
        misc::version,
    ),
    components(schemas(
        openai::CreateChatCompletionRequest,
        openai::ChatMessage,
        openai::MessageContent,
        openai::ContentPart,
        openai::UrlRef,
        openai::InputAudio,
        openai::AssistantToolCall,
        openai::FunctionCall,
        openai::FunctionStub,
        openai::ToolStub,
        openai::ChatCompletion,
        openai::ChatCompletionChoice,
        openai::ChatCompletionUsage,
        openai::ChatCompletionChunk,
        openai::ChatCompletionChunkChoice,
        openai::ChunkDelta,
        openai::ToolCallDelta,
        openai::FunctionCallDelta,
        openai::ModelList,
        openai::ModelEntry,
        health::HealthReport,
        health::HealthState,
        misc::Version,
    ))
)]
struct ApiDoc;

/// Everything a request handler needs, shared read-only across requests.
pub struct AppState {
    /// The immutable routing configuration.
    pub config: RouterConfig,

    /// The combination selector, with its private random source.
    pub selector: Selector,

    /// The pooled upstream HTTP client.
    pub upstream: UpstreamClient,
}

impl AppState {
    /// Builds the shared state from a validated configuration.
    pub fn new(config: RouterConfig) -> Result<Self, UpstreamError> {
        let upstream = UpstreamClient::new(config.timeouts.clone())?;

        Ok(AppState {
            config,
            selector: Selector::new(),
            upstream,
        })
    }
}

/// The shared state as handlers receive it.
pub type SharedState = Arc<AppState>;

/// Result for main functions.
pub type ServerResult = Result<(), String>;

/// Main entry point for the proxy process.
pub fn start(command: &cli::TopLevel) -> ServerResult {
    match &command.subcommand {
        None => serve(&cli::Serve::default()),
        Some(cli::Command::Serve(serve_args)) => serve(serve_args),
        Some(cli::Command::Version(_)) => version(),
        Some(cli::Command::Oasgen(oasgen_args)) => oasgen(oasgen_args),
    }
}

/// Prints the modelgate version to stdout.
pub fn version() -> ServerResult {
    println!(cargo_crate_version!());

    Ok(())
}

/// Generates the OpenAPI spec.
pub fn oasgen(args: &cli::Oasgen) -> ServerResult {
    let document = ApiDoc::openapi();

    let rendered = if args.json {
        document.to_pretty_json().map_err(|e| e.to_string())?
    } else {
        document.to_yaml().map_err(|e| e.to_string())?
    };

    println!("{rendered}");

    Ok(())
}

fn serve(args: &cli::Serve) -> ServerResult {
    start_server(args)
}

#[tokio::main]
async fn start_server(args: &cli::Serve) -> ServerResult {
    let observability = Observability::from_env();
    init_tracing(&observability);

    info!(
        service = %observability.service_name,
        environment = %observability.environment,
        "starting modelgate {}",
        cargo_crate_version!()
    );

    let mut config = load_config(&args.config)?;
    config.timeouts = config.timeouts.with_env_overrides();
    config
        .validate()
        .map_err(|e| format!("invalid configuration: {e}"))?;

    info!(
        credentials = config.credentials.len(),
        models = config.models.len(),
        vendors = config.vendors.len(),
        "configuration loaded"
    );

    let state = Arc::new(AppState::new(config).map_err(|e| e.to_string())?);
    let app = routes::routes(state);

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .map_err(|e| format!("could not bind to {}: {e}", args.bind))?;

    info!("listening on {}", args.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(graceful_shutdown::shutdown_signal())
        .await
        .map_err(|e| format!("server error: {e}"))
}

fn load_config(path: &str) -> Result<RouterConfig, String> {
    let raw = std::fs::read(path)
        .map_err(|e| format!("could not read configuration file {path}: {e}"))?;

    serde_yaml::from_slice(&raw)
        .map_err(|e| format!("could not parse configuration file {path}: {e}"))
}

fn init_tracing(observability: &Observability) {
    let filter = EnvFilter::try_new(&observability.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match observability.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
