// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Discovery configuration.
//!
//! [`DiscoveryArgs`] is the raw, environment-derived input, declared with
//! clap so that it can be flattened into the bootstrap binary's arguments.
//! [`DiscoveryArgs::resolve`] turns it into a [`DiscoveryConfig`], applying
//! defaults and presence rules once, after which the configuration is never
//! modified.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use tracing::warn;

use crate::env::{Environment, IP_ADDRESS_VAR};
use crate::retry::Retry;

/// The broker port used when none is configured.
pub const DEFAULT_BROKER_PORT: u16 = 8086;
/// The namespace queried when none is configured.
pub const DEFAULT_NAMESPACE: &str = "default";

const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_DISCOVERY_MAX_TRIES: usize = 3;

/// Command-line and environment options that drive seed discovery.
///
/// Options are kept as raw strings where a malformed value must not abort
/// startup. An empty value is treated the same as an unset one.
#[derive(clap::Args, Debug, Clone)]
pub struct DiscoveryArgs {
    /// The port on which peers' brokers listen.
    #[clap(long, env = "INFLUXDB_BROKER_PORT", value_name = "PORT")]
    pub broker_port: Option<String>,
    /// A comma-separated list of seed URIs. When set, discovery is skipped.
    #[clap(long, env = "INFLUXDB_SEEDS", value_name = "URI,...")]
    pub seeds: Option<String>,
    /// A DNS name that resolves to the cluster's peers.
    #[clap(long, env = "CLUSTER_DNS", value_name = "NAME")]
    pub cluster_dns: Option<String>,
    /// The Kubernetes API endpoint. May reference environment variables.
    #[clap(long, env = "KUBERNETES_MASTER", value_name = "URL")]
    pub kubernetes_master: Option<String>,
    /// The Kubernetes API host, as injected into pods.
    #[clap(long, env = "KUBERNETES_SERVICE_HOST", value_name = "HOST", hide = true)]
    pub kubernetes_service_host: Option<String>,
    /// The Kubernetes API port, as injected into pods.
    #[clap(long, env = "KUBERNETES_SERVICE_PORT", value_name = "PORT", hide = true)]
    pub kubernetes_service_port: Option<String>,
    /// Whether to skip TLS verification when talking to the Kubernetes API.
    #[clap(long, env = "KUBERNETES_INSECURE", value_name = "BOOL")]
    pub kubernetes_insecure: Option<String>,
    /// The label selector that identifies peer pods.
    #[clap(long, env = "KUBERNETES_SELECTOR", value_name = "SELECTOR")]
    pub kubernetes_selector: Option<String>,
    /// The namespace in which to look for peer pods.
    #[clap(long, env = "KUBERNETES_NAMESPACE", value_name = "NAMESPACE")]
    pub kubernetes_namespace: Option<String>,
    /// How long a single DNS lookup or pod listing may take.
    #[clap(
        long,
        env = "INFLUXDB_DISCOVERY_TIMEOUT",
        value_name = "DURATION",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub discovery_timeout: Duration,
    /// How many times to try a DNS lookup or pod listing.
    #[clap(
        long,
        env = "INFLUXDB_DISCOVERY_MAX_TRIES",
        value_name = "N",
        default_value = "3"
    )]
    pub discovery_max_tries: usize,
}

impl Default for DiscoveryArgs {
    fn default() -> DiscoveryArgs {
        DiscoveryArgs {
            broker_port: None,
            seeds: None,
            cluster_dns: None,
            kubernetes_master: None,
            kubernetes_service_host: None,
            kubernetes_service_port: None,
            kubernetes_insecure: None,
            kubernetes_selector: None,
            kubernetes_namespace: None,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            discovery_max_tries: DEFAULT_DISCOVERY_MAX_TRIES,
        }
    }
}

/// The resolved settings for one bootstrap run.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub broker_port: u16,
    /// The explicit seed list, verbatim.
    pub seeds: Option<String>,
    pub cluster_dns: Option<String>,
    /// The Kubernetes API URL, always carrying a scheme.
    pub orchestrator_endpoint: Option<String>,
    /// Set only when the insecure flag is both present and true.
    pub orchestrator_insecure: bool,
    /// The endpoint was derived from the platform-injected service host
    /// rather than overridden, so it is this pod's own cluster.
    pub orchestrator_in_cluster: bool,
    pub label_selector: Option<String>,
    pub namespace: String,
    /// This node's address, as published by the local identity resolver.
    pub local_ip: Option<Ipv4Addr>,
    pub retry: Retry,
}

impl Default for DiscoveryConfig {
    fn default() -> DiscoveryConfig {
        DiscoveryArgs::default().resolve(&Environment::default())
    }
}

fn nonempty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl DiscoveryArgs {
    /// Resolves these options against an environment snapshot.
    ///
    /// The snapshot supplies variable expansion for the endpoint override and
    /// this node's `IP_ADDRESS`, so it should be taken after the local
    /// identity has been published.
    pub fn resolve(&self, env: &Environment) -> DiscoveryConfig {
        let broker_port = match nonempty(&self.broker_port) {
            None => DEFAULT_BROKER_PORT,
            Some(raw) => match raw.parse() {
                Ok(port) => port,
                Err(e) => {
                    warn!(
                        value = raw,
                        default = DEFAULT_BROKER_PORT,
                        "ignoring invalid INFLUXDB_BROKER_PORT: {e}"
                    );
                    DEFAULT_BROKER_PORT
                }
            },
        };

        let orchestrator_insecure = match nonempty(&self.kubernetes_insecure) {
            None => false,
            Some(raw) => parse_bool(raw).unwrap_or_else(|| {
                warn!(value = raw, "ignoring invalid KUBERNETES_INSECURE");
                false
            }),
        };

        let local_ip = env
            .get_nonempty(IP_ADDRESS_VAR)
            .and_then(|ip| ip.parse().ok());

        let (orchestrator_endpoint, orchestrator_in_cluster) = self
            .orchestrator_endpoint(env)
            .map_or((None, false), |(url, in_cluster)| (Some(url), in_cluster));

        DiscoveryConfig {
            broker_port,
            seeds: self.seeds.clone().filter(|s| !s.is_empty()),
            cluster_dns: nonempty(&self.cluster_dns).map(str::to_string),
            orchestrator_endpoint,
            orchestrator_insecure,
            orchestrator_in_cluster,
            label_selector: nonempty(&self.kubernetes_selector).map(str::to_string),
            namespace: nonempty(&self.kubernetes_namespace)
                .unwrap_or(DEFAULT_NAMESPACE)
                .to_string(),
            local_ip,
            retry: Retry::default()
                .max_tries(self.discovery_max_tries)
                .attempt_timeout(self.discovery_timeout),
        }
    }

    /// Prefers the explicit override, else derives the endpoint from the
    /// platform-injected host and port. Defaults to `https` when the result
    /// names no scheme. The flag is true for a derived endpoint.
    fn orchestrator_endpoint(&self, env: &Environment) -> Option<(String, bool)> {
        let (endpoint, in_cluster) = match nonempty(&self.kubernetes_master) {
            Some(master) => (env.expand(master), false),
            None => {
                let host = nonempty(&self.kubernetes_service_host)?;
                let host = match host.parse::<Ipv6Addr>() {
                    Ok(_) => format!("[{host}]"),
                    Err(_) => host.to_string(),
                };
                let endpoint = match nonempty(&self.kubernetes_service_port) {
                    Some(port) => format!("{host}:{port}"),
                    None => host,
                };
                (endpoint, true)
            }
        };
        if endpoint.is_empty() {
            None
        } else if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            Some((endpoint, in_cluster))
        } else {
            Some((format!("https://{endpoint}"), in_cluster))
        }
    }
}

/// Parses `1`, `t`, `T`, `TRUE`, `true` and `True` as true, and the matching
/// spellings of false as false.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> DiscoveryArgs {
        DiscoveryArgs::default()
    }

    #[test]
    fn defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.broker_port, 8086);
        assert_eq!(config.seeds, None);
        assert_eq!(config.cluster_dns, None);
        assert_eq!(config.orchestrator_endpoint, None);
        assert!(!config.orchestrator_insecure);
        assert!(!config.orchestrator_in_cluster);
        assert_eq!(config.label_selector, None);
        assert_eq!(config.namespace, "default");
        assert_eq!(config.local_ip, None);
    }

    #[test]
    fn broker_port() {
        let resolve = |port: &str| {
            DiscoveryArgs {
                broker_port: Some(port.into()),
                ..args()
            }
            .resolve(&Environment::default())
            .broker_port
        };
        assert_eq!(resolve("8091"), 8091);
        assert_eq!(resolve(""), 8086);
        assert_eq!(resolve("eighty"), 8086);
        assert_eq!(resolve("-1"), 8086);
        assert_eq!(resolve("70000"), 8086);
    }

    #[test]
    fn empty_values_are_unset() {
        let config = DiscoveryArgs {
            seeds: Some("".into()),
            cluster_dns: Some("".into()),
            kubernetes_selector: Some("".into()),
            kubernetes_namespace: Some("".into()),
            ..args()
        }
        .resolve(&Environment::default());
        assert_eq!(config.seeds, None);
        assert_eq!(config.cluster_dns, None);
        assert_eq!(config.label_selector, None);
        assert_eq!(config.namespace, "default");
    }

    #[test]
    fn seeds_are_kept_verbatim() {
        let config = DiscoveryArgs {
            seeds: Some(" http://a:8086, ,b".into()),
            ..args()
        }
        .resolve(&Environment::default());
        assert_eq!(config.seeds.as_deref(), Some(" http://a:8086, ,b"));
    }

    #[test]
    fn endpoint_override_wins_and_expands() {
        let env: Environment = [("API_HOST", "k8s.internal")].into_iter().collect();
        let config = DiscoveryArgs {
            kubernetes_master: Some("${API_HOST}:6443".into()),
            kubernetes_service_host: Some("10.96.0.1".into()),
            kubernetes_service_port: Some("443".into()),
            ..args()
        }
        .resolve(&env);
        assert_eq!(
            config.orchestrator_endpoint.as_deref(),
            Some("https://k8s.internal:6443")
        );
        assert!(!config.orchestrator_in_cluster);

        let config = DiscoveryArgs {
            kubernetes_master: Some("http://localhost:8080".into()),
            ..args()
        }
        .resolve(&env);
        assert_eq!(
            config.orchestrator_endpoint.as_deref(),
            Some("http://localhost:8080")
        );

        // An override that expands to nothing leaves no endpoint.
        let config = DiscoveryArgs {
            kubernetes_master: Some("$UNSET".into()),
            ..args()
        }
        .resolve(&env);
        assert_eq!(config.orchestrator_endpoint, None);
    }

    #[test]
    fn endpoint_derived_from_service_env() {
        let resolve = |host: Option<&str>, port: Option<&str>| {
            DiscoveryArgs {
                kubernetes_service_host: host.map(Into::into),
                kubernetes_service_port: port.map(Into::into),
                ..args()
            }
            .resolve(&Environment::default())
            .orchestrator_endpoint
        };
        assert_eq!(
            resolve(Some("10.96.0.1"), Some("443")).as_deref(),
            Some("https://10.96.0.1:443")
        );
        assert_eq!(
            resolve(Some("fd00::1"), Some("443")).as_deref(),
            Some("https://[fd00::1]:443")
        );
        assert_eq!(
            resolve(Some("10.96.0.1"), None).as_deref(),
            Some("https://10.96.0.1")
        );
        assert_eq!(resolve(None, Some("443")), None);
        assert_eq!(resolve(None, None), None);

        let config = DiscoveryArgs {
            kubernetes_service_host: Some("10.96.0.1".into()),
            kubernetes_service_port: Some("443".into()),
            ..args()
        }
        .resolve(&Environment::default());
        assert!(config.orchestrator_in_cluster);
    }

    #[test]
    fn insecure_needs_presence_and_truth() {
        let resolve = |flag: Option<&str>| {
            DiscoveryArgs {
                kubernetes_insecure: flag.map(Into::into),
                ..args()
            }
            .resolve(&Environment::default())
            .orchestrator_insecure
        };
        assert!(!resolve(None));
        assert!(!resolve(Some("")));
        assert!(!resolve(Some("false")));
        assert!(!resolve(Some("yes")));
        assert!(resolve(Some("true")));
        assert!(resolve(Some("1")));
        assert!(resolve(Some("T")));
    }

    #[test]
    fn local_ip_comes_from_environment() {
        let env: Environment = [(IP_ADDRESS_VAR, "10.0.0.7")].into_iter().collect();
        assert_eq!(
            args().resolve(&env).local_ip,
            Some(Ipv4Addr::new(10, 0, 0, 7))
        );
        let env: Environment = [(IP_ADDRESS_VAR, "garbage")].into_iter().collect();
        assert_eq!(args().resolve(&env).local_ip, None);
    }
}
