//! Command-line interface handling for the Floe game server.
//!
//! This module provides command-line argument parsing using the `clap`
//! builder API. Every option overrides the matching configuration file
//! setting for this run only.

use clap::{Arg, ArgMatches, Command};
use handler_system::ModuleSafetyConfig;
use std::ffi::OsString;
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "floe.toml";
pub const DEFAULT_SERVER_NAME: &str = "Login";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Which `[servers.<name>]` entry to run
    pub server_name: String,
    /// Optional override for the handler directory
    pub handlers_dir: Option<PathBuf>,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Whether to disable watching the handler directory
    pub no_hot_reload: bool,
    /// Whether to allow modules built with a different Rust compiler (DANGEROUS)
    pub danger_allow_unsafe_modules: bool,
    /// Whether to allow modules with a different ABI version (DANGEROUS)
    pub danger_allow_abi_mismatch: bool,
    /// Whether to require exact version matching including patch digits
    pub strict_versioning: bool,
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_CONFIG_PATH),
            ),
            server_name: matches
                .get_one::<String>("server")
                .cloned()
                .unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string()),
            handlers_dir: matches.get_one::<String>("handlers").map(PathBuf::from),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            no_hot_reload: matches.get_flag("no-hot-reload"),
            danger_allow_unsafe_modules: matches.get_flag("danger-allow-unsafe-modules"),
            danger_allow_abi_mismatch: matches.get_flag("danger-allow-abi-mismatch"),
            strict_versioning: matches.get_flag("strict-versioning"),
        }
    }

    /// Converts CLI arguments to module safety configuration.
    pub fn to_module_safety_config(&self) -> ModuleSafetyConfig {
        ModuleSafetyConfig {
            allow_unsafe_modules: self.danger_allow_unsafe_modules,
            allow_abi_mismatch: self.danger_allow_abi_mismatch,
            strict_versioning: self.strict_versioning,
        }
    }
}

fn command() -> Command {
    Command::new("Floe Game Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Multiplayer game server with hot-reloadable handler modules")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("server")
                .short('s')
                .long("server")
                .value_name("NAME")
                .help("Server entry from the configuration file to run")
                .default_value(DEFAULT_SERVER_NAME),
        )
        .arg(
            Arg::new("handlers")
                .short('d')
                .long("handlers")
                .value_name("DIR")
                .help("Handler directory path"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 127.0.0.1:6112)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-hot-reload")
                .long("no-hot-reload")
                .help("Do not watch the handler directory for changes")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("danger-allow-unsafe-modules")
                .long("danger-allow-unsafe-modules")
                .help("Allow loading handler modules compiled with different Rust compiler versions (MAY CAUSE CRASHES)")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("danger-allow-abi-mismatch")
                .long("danger-allow-abi-mismatch")
                .help("Allow loading handler modules with different ABI versions (MAY CAUSE CRASHES OR UNDEFINED BEHAVIOR)")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("strict-versioning")
                .long("strict-versioning")
                .help("Require exact version matching including patch digits (default: only major.minor must match)")
                .action(clap::ArgAction::SetTrue),
        )
}
