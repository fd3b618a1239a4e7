// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Discovers cluster seeds, renders the InfluxDB configuration, and starts
//! influxd.

use std::process;

use influx_bootstrap::cli::{self, Args};
use influx_seed_discovery::{Environment, SystemBackends};
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args: Args = cli::parse_args();
    if let Err(err) = influx_bootstrap::tracing::init(&args.log_filter) {
        eprintln!("influxdb-bootstrap: fatal: {err:#}");
        process::exit(1);
    }

    let prepare_then_launch = async {
        let launcher =
            influx_bootstrap::prepare(&args, Environment::from_process(), &SystemBackends).await?;
        launcher.launch().await
    };

    match prepare_then_launch.await {
        Ok(code) => process::exit(code),
        Err(err) => {
            error!("influxdb-bootstrap: fatal: {err:#}");
            process::exit(1);
        }
    }
}
