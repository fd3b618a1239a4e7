// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Bootstraps an InfluxDB node.
//!
//! [`prepare`] runs the whole bootstrap up to the daemon launch: it resolves
//! this node's address, discovers seeds, and renders the configuration file.
//! The returned [`Launcher`] then starts the daemon.

use anyhow::{Context, bail};
use influx_seed_discovery::env::IP_ADDRESS_VAR;
use influx_seed_discovery::{DiscoveryBackends, Environment, SeedSource, resolve_local_ipv4};

use crate::cli::Args;
use crate::launch::{LaunchMode, Launcher};
use crate::render::RenderContext;

pub mod cli;
pub mod launch;
pub mod render;
pub mod tracing;

/// Prepares the node's configuration and returns the launcher for its
/// daemon.
///
/// `env` is the environment snapshot the template is rendered with. This
/// node's address is added to it as `IP_ADDRESS`; the process environment is
/// left untouched.
pub async fn prepare(
    args: &Args,
    mut env: Environment,
    backends: &dyn DiscoveryBackends,
) -> Result<Launcher, anyhow::Error> {
    let identity = backends.identity();
    let local_ip =
        resolve_local_ipv4(identity.as_ref()).context("resolving this node's address")?;
    match local_ip {
        Some(ip) => {
            ::tracing::info!(%ip, "resolved this node's address");
            env.set(IP_ADDRESS_VAR, ip.to_string());
        }
        None => ::tracing::warn!("no non-loopback IPv4 address found; leaving IP_ADDRESS unset"),
    }

    let config = args.discovery.resolve(&env);
    let report = SeedSource::select(&config, backends)
        .discover(config.broker_port)
        .await;
    if args.require_seeds && report.seeds.is_empty() {
        match &report.degraded {
            Some(reason) => bail!(
                "no seeds found using {} discovery ({reason}) and seeds are required",
                report.source
            ),
            None => bail!(
                "no seeds found using {} discovery and seeds are required",
                report.source
            ),
        }
    }

    let context = RenderContext {
        seeds: report.seeds.as_slice(),
        env: env.vars(),
    };
    let rendered = render::render(&args.config_template, &context)?;
    render::materialize(&args.config_path, &rendered)?;
    ::tracing::info!(
        template = %args.config_template.display(),
        path = %args.config_path.display(),
        "wrote configuration"
    );

    let mode = if args.supervise {
        LaunchMode::Supervise
    } else {
        LaunchMode::Exec
    };
    let mut launcher = Launcher::new(env.expand(&args.command)).mode(mode);
    if let Some(ip) = local_ip {
        launcher = launcher.env(IP_ADDRESS_VAR, ip.to_string());
    }
    Ok(launcher)
}
