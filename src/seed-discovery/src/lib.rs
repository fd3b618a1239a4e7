// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Seed discovery for nodes joining an InfluxDB cluster.
//!
//! On startup a node needs the addresses of existing peers, its seeds, to
//! join the cluster. They come from one of three places, in order of
//! precedence:
//!
//!   * an operator-provided list (`INFLUXDB_SEEDS`),
//!   * a DNS name that resolves to the peers (`CLUSTER_DNS`),
//!   * the running pods that match a Kubernetes label selector
//!     (`KUBERNETES_SELECTOR`), excluding this node.
//!
//! Discovery never fails. An unavailable DNS server or API server yields
//! fewer seeds, and the [`DiscoveryReport`] says why.
//!
//! The external collaborators (the resolver, the orchestrator and the local
//! network interfaces) sit behind the [`Resolver`], [`PeerLister`] and
//! [`NodeIdentity`] traits, supplied through [`DiscoveryBackends`].

pub mod config;
pub mod dns;
pub mod env;
pub mod identity;
pub mod kubernetes;
pub mod peer;
pub mod retry;
pub mod selector;
pub mod source;

pub use config::{DiscoveryArgs, DiscoveryConfig};
pub use dns::Resolver;
pub use env::Environment;
pub use identity::{NodeIdentity, resolve_local_ipv4};
pub use kubernetes::PeerLister;
pub use source::{DiscoveryBackends, DiscoveryReport, SeedList, SeedSource, SystemBackends};
