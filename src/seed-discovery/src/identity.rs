// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The local node's own identity.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr};

use tracing::debug;

/// An error enumerating the local network interfaces.
#[derive(Debug, thiserror::Error)]
#[error("enumerating local network interfaces")]
pub struct IdentityError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

/// Answers questions about the machine the bootstrap runs on.
pub trait NodeIdentity: fmt::Debug + Send + Sync {
    /// Lists `(interface name, address)` pairs in enumeration order.
    fn interface_addrs(&self) -> Result<Vec<(String, IpAddr)>, IdentityError>;

    /// Returns this host's name.
    fn hostname(&self) -> io::Result<String>;
}

/// The operating system's view of this node.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl NodeIdentity for SystemIdentity {
    fn interface_addrs(&self) -> Result<Vec<(String, IpAddr)>, IdentityError> {
        local_ip_address::list_afinet_netifas().map_err(|e| IdentityError(Box::new(e)))
    }

    fn hostname(&self) -> io::Result<String> {
        hostname::get()?.into_string().map_err(|name| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("hostname {name:?} is not valid unicode"),
            )
        })
    }
}

/// Picks this node's address: the first interface address, in enumeration
/// order, that is not a loopback address and is representable as IPv4.
///
/// Returns `Ok(None)` when no address qualifies. Only a failure to enumerate
/// interfaces at all is an error.
pub fn resolve_local_ipv4(identity: &dyn NodeIdentity) -> Result<Option<Ipv4Addr>, IdentityError> {
    for (interface, addr) in identity.interface_addrs()? {
        let v4 = match addr {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(v6) => v6.to_ipv4_mapped(),
        };
        match v4 {
            Some(v4) if !v4.is_loopback() => {
                debug!(%interface, %v4, "resolved local address");
                return Ok(Some(v4));
            }
            _ => continue,
        }
    }
    Ok(None)
}
