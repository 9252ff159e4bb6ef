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

//! Command Line Interface
use once_cell::sync::Lazy;

/// The parsed command-line arguments provided to this program. Lazily initialized.
///
/// # Exits
///
/// Exits if [`argh::from_env`] would exit--for example, if the `--help` flag was provided or the
/// program arguments could not be parsed.
pub static PARSED_COMMANDS: Lazy<TopLevel> = Lazy::new(argh::from_env);

/// Toplevel CLI commands and options.
/// Subcommands are optional.
/// If no command is provided "serve" will be invoked with default options.
#[derive(argh::FromArgs, PartialEq, Debug)]
pub struct TopLevel {
    /// subcommands
    #[argh(subcommand)]
    pub subcommand: Option<Command>,
}

/// Subcommands
#[derive(argh::FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub enum Command {
    /// starts the proxy.
    Serve(Serve),

    /// prints the modelgate version to stdout.
    Version(Version),

    /// generates the openapi spec and exits.
    Oasgen(Oasgen),
}

/// Starts the proxy. This is the default command when no command is provided.
#[derive(argh::FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "serve")]
pub struct Serve {
    /// the host:port to bind the server to, e.g.
    /// `modelgate serve -b 0.0.0.0:8082`.
    #[argh(option, short = 'b', default = "String::from(\"127.0.0.1:8082\")")]
    pub bind: String,

    /// path to the YAML configuration file holding credentials, models,
    /// and vendor base URLs.
    #[argh(option, short = 'c', default = "String::from(\"config.yaml\")")]
    pub config: String,
}

impl Default for Serve {
    fn default() -> Serve {
        Serve {
            bind: "127.0.0.1:8082".to_string(),
            config: "config.yaml".to_string(),
        }
    }
}

/// Prints the modelgate version to stdout.
#[derive(argh::FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "version")]
pub struct Version {}

/// Generates the Modelgate OpenAPI specification.
#[derive(argh::FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "oasgen")]
pub struct Oasgen {
    /// if present, modelgate will generate the OpenAPI spec in JSON format;
    /// the default behavior is to generate yaml output.
    #[argh(switch, short = 'j')]
    pub json: bool,
}
