// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Orchestrator-based peer discovery.
//!
//! Peers are the pods in a namespace that match a label selector. The
//! listing itself sits behind [`PeerLister`]; [`KubernetesPeerLister`] is the
//! implementation that talks to a real API server.

use std::error::Error;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::{Client, Config};
use tracing::{debug, warn};

use crate::identity::NodeIdentity;
use crate::peer::{PeerRecord, PodPhase, running_peer_ips};
use crate::retry::Retry;
use crate::selector::LabelSelector;
use crate::source::Discovered;

/// An error querying the orchestrator for peers.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid orchestrator endpoint {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("connecting to orchestrator: {0}")]
    Connect(#[source] kube::Error),
    #[error("listing pods in namespace {namespace}: {source}")]
    List {
        namespace: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl QueryError {
    /// Whether trying the same query again could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, QueryError::InvalidEndpoint { .. })
    }
}

/// Where and how to reach the orchestrator's API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorEndpoint {
    pub url: String,
    /// Skip TLS certificate verification.
    pub insecure: bool,
    /// The endpoint is the cluster's own API server, as injected into the
    /// pod, so the pod's service account may authenticate to it.
    pub in_cluster: bool,
}

/// Lists the instances an orchestrator is running.
#[async_trait]
pub trait PeerLister: fmt::Debug + Send + Sync {
    /// Lists the instances in `namespace` matching `selector`.
    async fn list_peers(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<PeerRecord>, QueryError>;
}

/// A [`PeerLister`] backed by the Kubernetes API.
///
/// A client is built for each listing. Requests to the pod's own cluster
/// over `https` carry the pod's service account credentials when they are
/// mounted. Every other request is anonymous and verified against the
/// system's trust roots.
#[derive(Debug, Clone)]
pub struct KubernetesPeerLister {
    endpoint: OrchestratorEndpoint,
}

impl KubernetesPeerLister {
    pub fn new(endpoint: OrchestratorEndpoint) -> KubernetesPeerLister {
        KubernetesPeerLister { endpoint }
    }

    fn client(&self) -> Result<Client, QueryError> {
        let config = self.client_config(|| match Config::incluster() {
            Ok(config) => Some(config),
            Err(e) => {
                debug!("no in-cluster credentials, querying anonymously: {e}");
                None
            }
        })?;
        Client::try_from(config).map_err(QueryError::Connect)
    }

    /// Builds the client configuration. `in_cluster` supplies the pod's
    /// service account configuration and is only consulted when this
    /// endpoint may receive it.
    fn client_config(
        &self,
        in_cluster: impl FnOnce() -> Option<Config>,
    ) -> Result<Config, QueryError> {
        let url: http::Uri = self
            .endpoint
            .url
            .parse()
            .map_err(|e: http::uri::InvalidUri| QueryError::InvalidEndpoint {
                url: self.endpoint.url.clone(),
                reason: e.to_string(),
            })?;
        let credentialed = self.endpoint.in_cluster && url.scheme_str() == Some("https");
        let mut config = if credentialed {
            in_cluster().unwrap_or_else(|| Config::new(url.clone()))
        } else {
            Config::new(url.clone())
        };
        config.cluster_url = url;
        config.accept_invalid_certs = self.endpoint.insecure;
        Ok(config)
    }
}

#[async_trait]
impl PeerLister for KubernetesPeerLister {
    async fn list_peers(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<PeerRecord>, QueryError> {
        let pods: Api<Pod> = Api::namespaced(self.client()?, namespace);
        let params = ListParams::default().labels(&selector.to_string());
        let list = pods.list(&params).await.map_err(|e| QueryError::List {
            namespace: namespace.to_string(),
            source: Box::new(e),
        })?;
        Ok(list.items.iter().map(pod_to_record).collect())
    }
}

fn pod_to_record(pod: &Pod) -> PeerRecord {
    let status = pod.status.as_ref();
    let phase = status
        .and_then(|s| s.phase.as_deref())
        .and_then(|p| p.parse().ok())
        .unwrap_or(PodPhase::Unknown);
    let ip = status.and_then(|s| s.pod_ip.clone()).unwrap_or_default();
    PeerRecord {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase,
        ip,
    }
}

/// Discovers peers by listing the orchestrator's running instances.
#[derive(Debug, Clone)]
pub struct KubernetesDiscovery {
    selector: String,
    namespace: String,
    lister: Arc<dyn PeerLister>,
    identity: Arc<dyn NodeIdentity>,
    local_ip: Option<Ipv4Addr>,
    retry: Retry,
}

impl KubernetesDiscovery {
    pub fn new(
        selector: String,
        namespace: String,
        lister: Arc<dyn PeerLister>,
        identity: Arc<dyn NodeIdentity>,
        local_ip: Option<Ipv4Addr>,
        retry: Retry,
    ) -> KubernetesDiscovery {
        KubernetesDiscovery {
            selector,
            namespace,
            lister,
            identity,
            local_ip,
            retry,
        }
    }

    /// Lists running peers other than this node.
    ///
    /// A malformed selector or failed listing is logged and yields no peers.
    /// If this node's hostname is unavailable, no peer is excluded as self.
    pub async fn discover(&self) -> Discovered {
        let selector: LabelSelector = match self.selector.parse() {
            Ok(selector) => selector,
            Err(e) => {
                warn!(
                    source = "kubernetes",
                    selector = %self.selector,
                    error = %e,
                    "seed discovery failed"
                );
                return Discovered::degraded(vec![], format!("invalid label selector: {e}"));
            }
        };

        let result = self
            .retry
            .retry_async_if(
                |_| self.lister.list_peers(&self.namespace, &selector),
                QueryError::is_retryable,
            )
            .await;
        let records = match result {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    source = "kubernetes",
                    namespace = %self.namespace,
                    %selector,
                    error = %e,
                    "seed discovery failed"
                );
                return Discovered::degraded(vec![], e.to_string());
            }
        };
        debug!(namespace = %self.namespace, %selector, count = records.len(), "listed pods");

        match self.identity.hostname() {
            Ok(hostname) => {
                Discovered::found(running_peer_ips(&records, Some(&hostname), self.local_ip))
            }
            Err(e) => {
                warn!(error = %e, "hostname unavailable; not excluding this node from seeds");
                let ips = running_peer_ips(&records, None, self.local_ip);
                Discovered::degraded(ips, format!("reading hostname: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::net::{IpAddr, Ipv6Addr};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use crate::identity::IdentityError;

    use super::*;

    #[derive(Debug)]
    struct Host(Option<&'static str>);

    impl NodeIdentity for Host {
        fn interface_addrs(&self) -> Result<Vec<(String, std::net::IpAddr)>, IdentityError> {
            Ok(vec![])
        }

        fn hostname(&self) -> io::Result<String> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| io::Error::other("no hostname"))
        }
    }

    /// Fails `failures` times, then returns `records`. An unparseable
    /// `endpoint` fails every call.
    #[derive(Debug, Default)]
    struct Lister {
        records: Vec<PeerRecord>,
        failures: usize,
        endpoint: Option<&'static str>,
        calls: AtomicUsize,
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl PeerLister for Lister {
        async fn list_peers(
            &self,
            namespace: &str,
            selector: &LabelSelector,
        ) -> Result<Vec<PeerRecord>, QueryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((namespace.to_string(), selector.to_string()));
            if let Some(url) = self.endpoint {
                return Err(QueryError::InvalidEndpoint {
                    url: url.to_string(),
                    reason: "invalid uri character".into(),
                });
            }
            if call < self.failures {
                return Err(QueryError::List {
                    namespace: namespace.to_string(),
                    source: "connection refused".into(),
                });
            }
            Ok(self.records.clone())
        }
    }

    fn three_peers() -> Vec<PeerRecord> {
        vec![
            PeerRecord::new("node-a", PodPhase::Running, "10.0.0.4"),
            PeerRecord::new("node-b", PodPhase::Running, "10.0.0.5"),
            PeerRecord::new("node-c", PodPhase::Pending, "10.0.0.6"),
        ]
    }

    fn discovery(lister: Arc<Lister>, host: Option<&'static str>) -> KubernetesDiscovery {
        KubernetesDiscovery::new(
            "app=influxdb".into(),
            "db".into(),
            lister,
            Arc::new(Host(host)),
            Some(Ipv4Addr::new(10, 0, 0, 4)),
            Retry::default(),
        )
    }

    #[tokio::test]
    async fn lists_running_peers_except_self() {
        let lister = Arc::new(Lister {
            records: three_peers(),
            ..Default::default()
        });
        let found = discovery(Arc::clone(&lister), Some("node-a")).discover().await;
        assert_eq!(found.ips, vec![IpAddr::from([10, 0, 0, 5])]);
        assert_eq!(found.degraded, None);
        assert_eq!(
            *lister.seen.lock().unwrap(),
            vec![("db".to_string(), "app=influxdb".to_string())]
        );
    }

    #[tokio::test]
    async fn missing_hostname_excludes_nothing() {
        let lister = Arc::new(Lister {
            records: three_peers(),
            ..Default::default()
        });
        let found = discovery(lister, None).discover().await;
        assert_eq!(
            found.ips,
            vec![IpAddr::from([10, 0, 0, 4]), IpAddr::from([10, 0, 0, 5])]
        );
        assert!(found.degraded.is_some());
    }

    #[tokio::test]
    async fn invalid_selector_skips_listing() {
        let lister = Arc::new(Lister::default());
        let shared: Arc<Lister> = Arc::clone(&lister);
        let discovery = KubernetesDiscovery::new(
            "app in ()".into(),
            "db".into(),
            shared,
            Arc::new(Host(Some("node-a"))),
            None,
            Retry::default(),
        );
        let found = discovery.discover().await;
        assert!(found.ips.is_empty());
        assert!(found.degraded.is_some());
        assert_eq!(lister.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let lister = Arc::new(Lister {
            records: three_peers(),
            failures: 2,
            ..Default::default()
        });
        let found = discovery(Arc::clone(&lister), Some("node-a")).discover().await;
        assert_eq!(found.ips, vec![IpAddr::from([10, 0, 0, 5])]);
        assert_eq!(lister.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_yields_no_peers() {
        let lister = Arc::new(Lister {
            records: three_peers(),
            failures: usize::MAX,
            ..Default::default()
        });
        let found = discovery(Arc::clone(&lister), Some("node-a")).discover().await;
        assert!(found.ips.is_empty());
        assert!(
            found
                .degraded
                .as_deref()
                .is_some_and(|r| r.contains("connection refused"))
        );
        assert_eq!(lister.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn pods_map_to_records() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("node-b".into()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".into()),
                pod_ip: Some("10.0.0.5".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            pod_to_record(&pod),
            PeerRecord::new("node-b", PodPhase::Running, "10.0.0.5")
        );

        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Evicted".into()),
                pod_ip: Some(Ipv6Addr::LOCALHOST.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(pod_to_record(&pod), PeerRecord::new("", PodPhase::Unknown, "::1"));

        assert_eq!(
            pod_to_record(&Pod::default()),
            PeerRecord::new("", PodPhase::Unknown, "")
        );
    }

    #[tokio::test]
    async fn invalid_endpoint_is_reported() {
        let lister = KubernetesPeerLister::new(OrchestratorEndpoint {
            url: "https://bad host".into(),
            insecure: false,
            in_cluster: false,
        });
        let selector: LabelSelector = "app=influxdb".parse().unwrap();
        let err = lister.list_peers("default", &selector).await.unwrap_err();
        assert!(matches!(err, QueryError::InvalidEndpoint { .. }), "{err}");
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_endpoint_is_not_retried() {
        let lister = Arc::new(Lister {
            records: three_peers(),
            endpoint: Some("https://bad host"),
            ..Default::default()
        });
        let found = discovery(Arc::clone(&lister), Some("node-a")).discover().await;
        assert!(found.ips.is_empty());
        assert!(found.degraded.is_some());
        assert_eq!(lister.calls.load(Ordering::SeqCst), 1);
    }

    fn endpoint(url: &str, insecure: bool, in_cluster: bool) -> KubernetesPeerLister {
        KubernetesPeerLister::new(OrchestratorEndpoint {
            url: url.into(),
            insecure,
            in_cluster,
        })
    }

    /// What `Config::incluster` produces inside a pod.
    fn service_account() -> Option<Config> {
        let mut config = Config::new("https://kubernetes.default.svc".parse().unwrap());
        config.root_cert = Some(vec![b"cluster ca".to_vec()]);
        config.auth_info.token_file =
            Some("/var/run/secrets/kubernetes.io/serviceaccount/token".into());
        Some(config)
    }

    fn assert_anonymous(config: &Config) {
        assert!(config.root_cert.is_none());
        assert!(config.auth_info.token.is_none());
        assert!(config.auth_info.token_file.is_none());
    }

    #[test]
    fn cluster_endpoint_uses_service_account() {
        let config = endpoint("https://10.96.0.1:443", false, true)
            .client_config(service_account)
            .unwrap();
        assert_eq!(
            config.cluster_url,
            "https://10.96.0.1:443".parse::<http::Uri>().unwrap()
        );
        assert!(config.root_cert.is_some());
        assert!(config.auth_info.token_file.is_some());
        assert!(!config.accept_invalid_certs);

        // Without mounted credentials the query is anonymous.
        let config = endpoint("https://10.96.0.1:443", false, true)
            .client_config(|| None)
            .unwrap();
        assert_anonymous(&config);
    }

    #[test]
    fn override_endpoint_is_anonymous() {
        let config = endpoint("https://k8s.example.com:6443", true, false)
            .client_config(|| panic!("service account consulted for an override"))
            .unwrap();
        assert_eq!(
            config.cluster_url,
            "https://k8s.example.com:6443".parse::<http::Uri>().unwrap()
        );
        assert!(config.accept_invalid_certs);
        assert_anonymous(&config);
    }

    #[test]
    fn plain_http_is_anonymous() {
        let config = endpoint("http://10.96.0.1:8080", false, true)
            .client_config(|| panic!("service account consulted for plain http"))
            .unwrap();
        assert_anonymous(&config);
    }
}
