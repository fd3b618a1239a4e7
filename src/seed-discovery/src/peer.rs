// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Peer records reported by the orchestrator.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use tracing::warn;

/// The lifecycle state of an orchestrator-managed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl FromStr for PodPhase {
    type Err = std::convert::Infallible;

    /// Parses a phase as reported by the orchestrator. Anything unrecognized
    /// is [`PodPhase::Unknown`].
    fn from_str(s: &str) -> Result<PodPhase, Self::Err> {
        Ok(match s {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        })
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PodPhase::Pending => f.write_str("Pending"),
            PodPhase::Running => f.write_str("Running"),
            PodPhase::Succeeded => f.write_str("Succeeded"),
            PodPhase::Failed => f.write_str("Failed"),
            PodPhase::Unknown => f.write_str("Unknown"),
        }
    }
}

/// One instance returned by an orchestrator listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub name: String,
    pub phase: PodPhase,
    /// The instance's IP, empty if it has not been assigned one.
    pub ip: String,
}

impl PeerRecord {
    pub fn new(name: impl Into<String>, phase: PodPhase, ip: impl Into<String>) -> PeerRecord {
        PeerRecord {
            name: name.into(),
            phase,
            ip: ip.into(),
        }
    }
}

/// Selects candidate seed addresses from an orchestrator listing.
///
/// A record is kept when, checked in this order, it is running, it reports an
/// IP, and its name differs from `hostname`. When the hostname is unknown no
/// record is excluded as self. Records whose IP does not parse are dropped.
///
/// Self exclusion is by name only. If a kept record reports `local_ip`, the
/// orchestrator's view of this node disagrees with the local one, and a
/// warning is logged; the record is still kept.
pub fn running_peer_ips(
    records: &[PeerRecord],
    hostname: Option<&str>,
    local_ip: Option<Ipv4Addr>,
) -> Vec<IpAddr> {
    let mut ips = vec![];
    for record in records {
        if record.phase != PodPhase::Running
            || record.ip.is_empty()
            || Some(record.name.as_str()) == hostname
        {
            continue;
        }
        let ip = match record.ip.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(e) => {
                warn!(peer = %record.name, ip = %record.ip, "ignoring peer with unparseable IP: {e}");
                continue;
            }
        };
        if local_ip.is_some_and(|local| ip == IpAddr::V4(local)) {
            warn!(
                peer = %record.name,
                %ip,
                hostname = hostname.unwrap_or("<unknown>"),
                "peer reports this node's IP under a different name; keeping it as a seed"
            );
        }
        ips.push(ip);
    }
    ips
}
