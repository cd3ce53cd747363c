//! Cross-resource reference checks over a complete [`ResourceGraph`].

use std::collections::BTreeSet;

use envoy_types::pb::envoy::config::accesslog::v3::AccessLog;
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::core::v3::transport_socket::ConfigType as TransportSocketConfigType;
use envoy_types::pb::envoy::config::listener::v3::{filter::ConfigType, FilterChain};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::RouteSpecifier, HttpConnectionManager,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{
    tcp_proxy::ClusterSpecifier, TcpProxy,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    common_tls_context::ValidationContextType, secret, DownstreamTlsContext, UpstreamTlsContext,
};

use super::envoy_validation::helpers::typed_config_check;
use crate::xds::access_log::grpc_log_cluster;
use crate::xds::resources::{
    is_default_chain, ResourceGraph, DOWNSTREAM_TLS_CONTEXT_TYPE_URL,
    HTTP_CONNECTION_MANAGER_TYPE_URL, TCP_PROXY_TYPE_URL, UPSTREAM_TLS_CONTEXT_TYPE_URL,
};
use crate::xds::route::route_clusters;

/// Dangling or duplicated references found in a synthesized graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("resource graph failed integrity check: {}", .violations.join("; "))]
pub struct IntegrityError {
    pub violations: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SecretKind {
    TlsCertificate,
    ValidationContext,
}

struct Checker<'a> {
    graph: &'a ResourceGraph,
    cluster_names: BTreeSet<&'a str>,
    violations: Vec<String>,
}

/// Verify every reference in `graph` resolves within the graph.
pub fn check_integrity(graph: &ResourceGraph) -> Result<(), IntegrityError> {
    let mut checker =
        Checker { graph, cluster_names: BTreeSet::new(), violations: Vec::new() };
    checker.run();

    if checker.violations.is_empty() {
        Ok(())
    } else {
        Err(IntegrityError { violations: checker.violations })
    }
}

impl<'a> Checker<'a> {
    fn run(&mut self) {
        let graph = self.graph;

        for cluster in &graph.clusters {
            if !self.cluster_names.insert(cluster.name.as_str()) {
                self.violations.push(format!("duplicate cluster '{}'", cluster.name));
            }
        }

        let mut secret_names = BTreeSet::new();
        for secret in &graph.secrets {
            if !secret_names.insert(secret.name.as_str()) {
                self.violations.push(format!("duplicate secret '{}'", secret.name));
            }
        }

        let defaults = graph.filter_chains().iter().filter(|c| is_default_chain(c)).count();
        if defaults != 1 {
            self.violations.push(format!("expected exactly one default chain, found {}", defaults));
        }

        let mut server_names = BTreeSet::new();
        for (index, chain) in graph.filter_chains().iter().enumerate() {
            if let Some(chain_match) = &chain.filter_chain_match {
                for name in &chain_match.server_names {
                    if !server_names.insert(name.as_str()) {
                        self.violations.push(format!("server name '{}' matched twice", name));
                    }
                }
            }
            self.check_chain(index, chain);
        }

        for cluster in &graph.clusters {
            self.check_cluster(cluster);
        }
    }

    fn check_chain(&mut self, index: usize, chain: &FilterChain) {
        if let Some(socket) = &chain.transport_socket {
            match &socket.config_type {
                Some(TransportSocketConfigType::TypedConfig(any)) => {
                    match typed_config_check::<DownstreamTlsContext>(any, DOWNSTREAM_TLS_CONTEXT_TYPE_URL)
                    {
                        Ok(context) => {
                            let refs = context
                                .common_tls_context
                                .map(|common| common.tls_certificate_sds_secret_configs)
                                .unwrap_or_default();
                            if refs.is_empty() {
                                self.violations
                                    .push(format!("chain {} terminates TLS without a certificate", index));
                            }
                            for sds in refs {
                                self.expect_secret(&sds.name, SecretKind::TlsCertificate, index);
                            }
                        }
                        Err(e) => self.violations.push(format!("chain {}: {}", index, e)),
                    }
                }
                _ => self.violations.push(format!("chain {} transport socket has no config", index)),
            }
        }

        for filter in &chain.filters {
            let Some(ConfigType::TypedConfig(any)) = &filter.config_type else {
                continue;
            };

            match any.type_url.as_str() {
                TCP_PROXY_TYPE_URL => match typed_config_check::<TcpProxy>(any, TCP_PROXY_TYPE_URL) {
                    Ok(proxy) => {
                        match &proxy.cluster_specifier {
                            Some(ClusterSpecifier::Cluster(name)) => {
                                self.expect_cluster(name, &format!("chain {} tcp proxy", index))
                            }
                            _ => self
                                .violations
                                .push(format!("chain {} tcp proxy names no cluster", index)),
                        }
                        self.check_access_logs(&proxy.access_log, index);
                    }
                    Err(e) => self.violations.push(format!("chain {}: {}", index, e)),
                },
                HTTP_CONNECTION_MANAGER_TYPE_URL => {
                    match typed_config_check::<HttpConnectionManager>(
                        any,
                        HTTP_CONNECTION_MANAGER_TYPE_URL,
                    ) {
                        Ok(hcm) => {
                            match &hcm.route_specifier {
                                Some(RouteSpecifier::RouteConfig(config)) => {
                                    for cluster in route_clusters(config) {
                                        self.expect_cluster(
                                            cluster,
                                            &format!("route '{}'", config.name),
                                        );
                                    }
                                }
                                _ => self.violations.push(format!(
                                    "chain {} connection manager has no inline routes",
                                    index
                                )),
                            }
                            self.check_access_logs(&hcm.access_log, index);
                        }
                        Err(e) => self.violations.push(format!("chain {}: {}", index, e)),
                    }
                }
                _ => {}
            }
        }
    }

    fn check_access_logs(&mut self, logs: &[AccessLog], index: usize) {
        for log in logs {
            if let Some(cluster) = grpc_log_cluster(log) {
                self.expect_cluster(&cluster, &format!("chain {} access log", index));
            }
        }
    }

    fn check_cluster(&mut self, cluster: &Cluster) {
        let Some(socket) = &cluster.transport_socket else {
            return;
        };
        let Some(TransportSocketConfigType::TypedConfig(any)) = &socket.config_type else {
            self.violations.push(format!("cluster '{}' transport socket has no config", cluster.name));
            return;
        };

        match typed_config_check::<UpstreamTlsContext>(any, UPSTREAM_TLS_CONTEXT_TYPE_URL) {
            Ok(context) => {
                if let Some(ValidationContextType::ValidationContextSdsSecretConfig(sds)) =
                    context.common_tls_context.and_then(|c| c.validation_context_type)
                {
                    let known = self.secret_kind(&sds.name);
                    if known != Some(SecretKind::ValidationContext) {
                        self.violations.push(format!(
                            "cluster '{}' references missing validation secret '{}'",
                            cluster.name, sds.name
                        ));
                    }
                }
            }
            Err(e) => self.violations.push(format!("cluster '{}': {}", cluster.name, e)),
        }
    }

    fn expect_cluster(&mut self, name: &str, referrer: &str) {
        if !self.cluster_names.contains(name) {
            self.violations.push(format!("{} references missing cluster '{}'", referrer, name));
        }
    }

    fn expect_secret(&mut self, name: &str, kind: SecretKind, index: usize) {
        if self.secret_kind(name) != Some(kind) {
            self.violations
                .push(format!("chain {} references missing certificate secret '{}'", index, name));
        }
    }

    fn secret_kind(&self, name: &str) -> Option<SecretKind> {
        self.graph.secret(name).and_then(|secret| match secret.r#type {
            Some(secret::Type::TlsCertificate(_)) => Some(SecretKind::TlsCertificate),
            Some(secret::Type::ValidationContext(_)) => Some(SecretKind::ValidationContext),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::domain::{CertificateRecord, SecretBytes};
    use crate::xds::{cluster, listener, secret as secrets};

    fn record(sni: &str) -> CertificateRecord {
        CertificateRecord::new(sni, b"CERT".to_vec(), SecretBytes::new(b"KEY".to_vec()), "ca", Vec::new())
            .unwrap()
    }

    fn graph(hosts: &[&str]) -> ResourceGraph {
        let config = ProxyConfig::default();
        let mut chains = vec![listener::default_filter_chain(&config)];
        let mut clusters = vec![
            cluster::log_sink_cluster(&config.log_sink_cluster, "als_service", 50051),
            cluster::dynamic_forward_proxy_cluster(),
        ];
        let mut secret_list = Vec::new();

        for host in hosts {
            chains.push(listener::host_filter_chain(host, &config.access_log_path));
            clusters.push(cluster::manual_upstream_cluster(host));
            secret_list.push(secrets::tls_certificate_secret(&record(host), false));
            secret_list.push(secrets::validation_context_secret(host, "/ca.pem"));
        }

        ResourceGraph {
            listener: listener::listener(&config, chains),
            clusters,
            secrets: secret_list,
        }
    }

    #[test]
    fn consistent_graph_passes() {
        assert_eq!(check_integrity(&graph(&[])), Ok(()));
        assert_eq!(check_integrity(&graph(&["a.example", "b.example"])), Ok(()));
    }

    #[test]
    fn missing_certificate_secret_is_reported() {
        let mut graph = graph(&["a.example"]);
        graph.secrets.retain(|s| s.name != "a.example");

        let err = check_integrity(&graph).unwrap_err();
        assert!(err.violations.iter().any(|v| v.contains("certificate secret 'a.example'")));
    }

    #[test]
    fn missing_route_cluster_is_reported() {
        let mut graph = graph(&["a.example"]);
        graph.clusters.retain(|c| c.name != "a.example");

        let err = check_integrity(&graph).unwrap_err();
        assert!(err.violations.iter().any(|v| v.contains("route 'a.example'")));
    }

    #[test]
    fn missing_log_sink_and_proxy_clusters_are_reported() {
        let mut graph = graph(&[]);
        graph.clusters.clear();

        let err = check_integrity(&graph).unwrap_err();
        assert_eq!(err.violations.len(), 2);
    }

    #[test]
    fn missing_validation_secret_is_reported() {
        let mut graph = graph(&["a.example"]);
        graph.secrets.retain(|s| s.name != "upstream-validation:a.example");

        let err = check_integrity(&graph).unwrap_err();
        assert!(err.violations.iter().any(|v| v.contains("validation secret")));
    }

    #[test]
    fn second_default_chain_is_reported() {
        let mut graph = graph(&[]);
        let extra = graph.listener.filter_chains[0].clone();
        graph.listener.filter_chains.push(extra);

        let err = check_integrity(&graph).unwrap_err();
        assert!(err.to_string().contains("exactly one default chain"));
    }

    #[test]
    fn duplicate_names_are_reported() {
        let mut graph = graph(&["a.example"]);
        let chain = graph.listener.filter_chains[1].clone();
        graph.listener.filter_chains.push(chain);
        let cluster = graph.clusters[2].clone();
        graph.clusters.push(cluster);

        let err = check_integrity(&graph).unwrap_err();
        assert!(err.violations.iter().any(|v| v.contains("duplicate cluster")));
        assert!(err.violations.iter().any(|v| v.contains("matched twice")));
    }
}
