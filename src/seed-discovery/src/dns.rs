// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! DNS-based peer discovery.

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::retry::Retry;
use crate::source::Discovered;

/// An error resolving a cluster DNS name.
#[derive(Debug, thiserror::Error)]
#[error("resolving {name}: {source}")]
pub struct ResolutionError {
    pub name: String,
    #[source]
    pub source: io::Error,
}

/// Resolves host names to addresses.
#[async_trait]
pub trait Resolver: fmt::Debug + Send + Sync {
    /// Returns every address `name` resolves to, in resolver order.
    async fn lookup(&self, name: &str) -> Result<Vec<IpAddr>, ResolutionError>;
}

/// A [`Resolver`] backed by the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup(&self, name: &str) -> Result<Vec<IpAddr>, ResolutionError> {
        let addrs = tokio::net::lookup_host((name, 0))
            .await
            .map_err(|source| ResolutionError {
                name: name.to_string(),
                source,
            })?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Discovers peers by resolving a cluster DNS name.
#[derive(Debug, Clone)]
pub struct DnsDiscovery {
    name: String,
    resolver: Arc<dyn Resolver>,
    retry: Retry,
}

impl DnsDiscovery {
    pub fn new(name: String, resolver: Arc<dyn Resolver>, retry: Retry) -> DnsDiscovery {
        DnsDiscovery {
            name,
            resolver,
            retry,
        }
    }

    /// Resolves the cluster name.
    ///
    /// Addresses are returned as the resolver reports them, duplicates
    /// included. A failed lookup is logged and yields no peers.
    pub async fn discover(&self) -> Discovered {
        let result = self
            .retry
            .retry_async(|_| self.resolver.lookup(&self.name))
            .await;
        match result {
            Ok(ips) => {
                debug!(name = %self.name, ?ips, "resolved cluster DNS name");
                Discovered::found(ips)
            }
            Err(e) => {
                warn!(source = "dns", name = %self.name, error = %e, "seed discovery failed");
                Discovered::degraded(vec![], e.to_string())
            }
        }
    }
}
