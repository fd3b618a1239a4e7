// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Seed source selection.
//!
//! A bootstrap run obtains its seeds from exactly one [`SeedSource`], chosen
//! once from the [`DiscoveryConfig`]: an explicit list wins over a cluster
//! DNS name, which wins over an orchestrator query. If none is configured the
//! node has no seeds and starts a fresh cluster.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::dns::{DnsDiscovery, Resolver, SystemResolver};
use crate::identity::{NodeIdentity, SystemIdentity};
use crate::kubernetes::{
    KubernetesDiscovery, KubernetesPeerLister, OrchestratorEndpoint, PeerLister,
};

/// The scheme of every discovered seed URI.
pub const SEED_SCHEME: &str = "http";

/// The peers found by one discovery variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub ips: Vec<IpAddr>,
    /// Why the result may be incomplete, if it may be.
    pub degraded: Option<String>,
}

impl Discovered {
    pub fn found(ips: Vec<IpAddr>) -> Discovered {
        Discovered {
            ips,
            degraded: None,
        }
    }

    pub fn degraded(ips: Vec<IpAddr>, reason: String) -> Discovered {
        Discovered {
            ips,
            degraded: Some(reason),
        }
    }
}

/// An ordered list of seed URIs.
///
/// Order is discovery order. Duplicates are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedList(Vec<String>);

impl SeedList {
    /// Splits an operator-provided list on commas. Entries are neither
    /// trimmed nor validated, so the empty string yields one empty seed.
    pub fn from_csv(csv: &str) -> SeedList {
        SeedList(csv.split(',').map(str::to_string).collect())
    }

    /// Formats discovered peers as `http://<ip>:<port>` URIs.
    pub fn from_peers(ips: &[IpAddr], broker_port: u16) -> SeedList {
        SeedList(
            ips.iter()
                .map(|ip| format!("{SEED_SCHEME}://{}", SocketAddr::new(*ip, broker_port)))
                .collect(),
        )
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for SeedList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

/// Names a [`SeedSource`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedSourceKind {
    Explicit,
    Dns,
    Kubernetes,
    None,
}

impl fmt::Display for SeedSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SeedSourceKind::Explicit => f.write_str("explicit"),
            SeedSourceKind::Dns => f.write_str("dns"),
            SeedSourceKind::Kubernetes => f.write_str("kubernetes"),
            SeedSourceKind::None => f.write_str("none"),
        }
    }
}

/// The external collaborators that discovery variants are built from.
pub trait DiscoveryBackends {
    fn resolver(&self) -> Arc<dyn Resolver>;
    fn peer_lister(&self, endpoint: OrchestratorEndpoint) -> Arc<dyn PeerLister>;
    fn identity(&self) -> Arc<dyn NodeIdentity>;
}

/// The collaborators of a real bootstrap: the system resolver, the
/// Kubernetes API, and this host's interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackends;

impl DiscoveryBackends for SystemBackends {
    fn resolver(&self) -> Arc<dyn Resolver> {
        Arc::new(SystemResolver)
    }

    fn peer_lister(&self, endpoint: OrchestratorEndpoint) -> Arc<dyn PeerLister> {
        Arc::new(KubernetesPeerLister::new(endpoint))
    }

    fn identity(&self) -> Arc<dyn NodeIdentity> {
        Arc::new(SystemIdentity)
    }
}

/// Where a bootstrap run gets its seeds from.
#[derive(Debug, Clone)]
pub enum SeedSource {
    /// An operator-provided comma-separated list, used verbatim.
    ///
    /// An empty string yields a single empty seed. [`DiscoveryArgs::resolve`]
    /// treats an empty `INFLUXDB_SEEDS` as unset, so the bootstrap binary only
    /// reaches this variant with a non-empty list.
    ///
    /// [`DiscoveryArgs::resolve`]: crate::config::DiscoveryArgs::resolve
    Explicit(String),
    Dns(DnsDiscovery),
    Kubernetes(KubernetesDiscovery),
    /// Nothing is configured.
    None,
}

impl SeedSource {
    /// Chooses the seed source for `config`.
    ///
    /// Backends are only consulted for the variant that is chosen.
    pub fn select(config: &DiscoveryConfig, backends: &dyn DiscoveryBackends) -> SeedSource {
        if let Some(seeds) = &config.seeds {
            return SeedSource::Explicit(seeds.clone());
        }
        if let Some(name) = &config.cluster_dns {
            return SeedSource::Dns(DnsDiscovery::new(
                name.clone(),
                backends.resolver(),
                config.retry.clone(),
            ));
        }
        match (&config.label_selector, &config.orchestrator_endpoint) {
            (Some(selector), Some(url)) => {
                let endpoint = OrchestratorEndpoint {
                    url: url.clone(),
                    insecure: config.orchestrator_insecure,
                    in_cluster: config.orchestrator_in_cluster,
                };
                SeedSource::Kubernetes(KubernetesDiscovery::new(
                    selector.clone(),
                    config.namespace.clone(),
                    backends.peer_lister(endpoint),
                    backends.identity(),
                    config.local_ip,
                    config.retry.clone(),
                ))
            }
            (Some(_), None) => {
                debug!("label selector set but no orchestrator endpoint; skipping discovery");
                SeedSource::None
            }
            (None, _) => SeedSource::None,
        }
    }

    pub fn kind(&self) -> SeedSourceKind {
        match self {
            SeedSource::Explicit(_) => SeedSourceKind::Explicit,
            SeedSource::Dns(_) => SeedSourceKind::Dns,
            SeedSource::Kubernetes(_) => SeedSourceKind::Kubernetes,
            SeedSource::None => SeedSourceKind::None,
        }
    }

    /// Produces the seed list, formatting discovered peers with
    /// `broker_port`.
    ///
    /// Never fails. Discovery errors yield fewer seeds and are recorded in
    /// the report's `degraded` field.
    pub async fn discover(&self, broker_port: u16) -> DiscoveryReport {
        let (seeds, degraded) = match self {
            SeedSource::Explicit(csv) => {
                if csv.is_empty() {
                    warn!("explicit seed list is empty; using a single empty seed");
                }
                (SeedList::from_csv(csv), None)
            }
            SeedSource::Dns(dns) => {
                let found = dns.discover().await;
                (SeedList::from_peers(&found.ips, broker_port), found.degraded)
            }
            SeedSource::Kubernetes(kubernetes) => {
                let found = kubernetes.discover().await;
                (SeedList::from_peers(&found.ips, broker_port), found.degraded)
            }
            SeedSource::None => (SeedList::default(), None),
        };
        let report = DiscoveryReport {
            source: self.kind(),
            seeds,
            degraded,
        };
        info!(
            source = %report.source,
            seeds = %report.seeds,
            count = report.seeds.len(),
            degraded = report.degraded.as_deref().unwrap_or(""),
            "seed discovery finished"
        );
        report
    }
}

/// The outcome of seed discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub source: SeedSourceKind,
    pub seeds: SeedList,
    /// Set when discovery hit an error and the seeds may be incomplete.
    pub degraded: Option<String>,
}
