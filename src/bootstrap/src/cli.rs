// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Command-line parsing.

use std::path::PathBuf;

use clap::Parser;
use influx_seed_discovery::DiscoveryArgs;
use influx_seed_discovery::config::parse_bool;

/// The command that starts the daemon when none is configured.
pub const DEFAULT_COMMAND: &str = "exec /opt/influxdb/influxd -config /opt/influxdb/influxdb.conf";

const HELP_TEMPLATE: &str = "{about}

USAGE:
    {usage}

{all-args}";

/// Discovers cluster seeds, renders the InfluxDB configuration, and starts
/// influxd.
#[derive(Parser, Debug, Clone)]
#[clap(name = "influxdb-bootstrap")]
pub struct Args {
    /// The configuration template to render.
    #[clap(
        long,
        env = "INFLUXDB_CONFIG_TEMPLATE",
        value_name = "PATH",
        default_value = "/opt/influxdb/influxdb.conf.tmpl"
    )]
    pub config_template: PathBuf,
    /// Where to write the rendered configuration.
    #[clap(
        long,
        env = "INFLUXDB_CONFIG_PATH",
        value_name = "PATH",
        default_value = "/opt/influxdb/influxdb.conf"
    )]
    pub config_path: PathBuf,
    /// The shell command that starts the daemon. Environment variables are
    /// expanded before it is run.
    #[clap(long, env = "INFLUXDB_COMMAND", value_name = "COMMAND", default_value = DEFAULT_COMMAND)]
    pub command: String,
    /// Fail instead of starting a fresh cluster when no seeds are found.
    #[clap(
        long,
        env = "INFLUXDB_REQUIRE_SEEDS",
        value_name = "BOOL",
        action = clap::ArgAction::Set,
        default_value = "false",
        value_parser = parse_flag
    )]
    pub require_seeds: bool,
    /// Run the daemon as a child process instead of replacing this one.
    #[clap(
        long,
        env = "INFLUXDB_BOOTSTRAP_SUPERVISE",
        value_name = "BOOL",
        action = clap::ArgAction::Set,
        default_value = "false",
        value_parser = parse_flag
    )]
    pub supervise: bool,
    /// Which log messages to emit, as a tracing filter directive.
    #[clap(
        long,
        env = "INFLUXDB_BOOTSTRAP_LOG_FILTER",
        value_name = "FILTER",
        default_value = "info"
    )]
    pub log_filter: String,
    #[clap(flatten)]
    pub discovery: DiscoveryArgs,
}

fn parse_flag(s: &str) -> Result<bool, String> {
    if s.is_empty() {
        return Ok(false);
    }
    parse_bool(s).ok_or_else(|| format!("invalid boolean {s:?}"))
}

/// Parses command-line arguments, exiting with a usage message on error.
pub fn parse_args<O>() -> O
where
    O: Parser,
{
    let command = O::command()
        .disable_version_flag(true)
        .args_override_self(true)
        .help_template(HELP_TEMPLATE);
    O::from_arg_matches(&command.get_matches()).unwrap_or_else(|e| e.exit())
}
