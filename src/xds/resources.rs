use std::collections::BTreeMap;

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::listener::v3::{FilterChain, Listener};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::Secret;
use envoy_types::pb::google::protobuf::Any;
use prost::Message;

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

pub const TLS_INSPECTOR_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector";
pub const SNI_DYNAMIC_FORWARD_PROXY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.sni_dynamic_forward_proxy.v3.FilterConfig";
pub const TCP_PROXY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";
pub const HTTP_CONNECTION_MANAGER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
pub const ROUTER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
pub const FILE_ACCESS_LOG_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.access_loggers.file.v3.FileAccessLog";
pub const TCP_GRPC_ACCESS_LOG_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.access_loggers.grpc.v3.TcpGrpcAccessLogConfig";
pub const DOWNSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";
pub const UPSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";
pub const HTTP_PROTOCOL_OPTIONS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions";
pub const DYNAMIC_FORWARD_PROXY_CLUSTER_CONFIG_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.clusters.dynamic_forward_proxy.v3.ClusterConfig";

/// Key of the upstream HTTP options in `typed_extension_protocol_options`.
pub const HTTP_PROTOCOL_OPTIONS_KEY: &str = "envoy.extensions.upstreams.http.v3.HttpProtocolOptions";
pub const TLS_TRANSPORT_SOCKET: &str = "envoy.transport_sockets.tls";

/// Pack a message into an `Any` with the given type URL.
pub fn pack<M: Message>(type_url: &str, message: &M) -> Any {
    Any { type_url: type_url.to_string(), value: message.encode_to_vec() }
}

/// Wrapper for a built Envoy resource along with its name.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltResource {
    pub name: String,
    pub resource: Any,
}

impl BuiltResource {
    pub fn new<M: Message>(name: impl Into<String>, type_url: &str, message: &M) -> Self {
        Self { name: name.into(), resource: pack(type_url, message) }
    }

    pub fn type_url(&self) -> &str {
        &self.resource.type_url
    }
}

/// Resources handed to the discovery publisher, keyed by type URL.
pub type ResourcesByType = BTreeMap<String, Vec<BuiltResource>>;

/// One complete, internally consistent proxy configuration.
///
/// `listener.filter_chains[0]` is the default passthrough chain; every
/// following chain terminates TLS for one hostname.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceGraph {
    pub listener: Listener,
    pub clusters: Vec<Cluster>,
    pub secrets: Vec<Secret>,
}

impl ResourceGraph {
    pub fn filter_chains(&self) -> &[FilterChain] {
        &self.listener.filter_chains
    }

    /// The chain without a server-name match.
    pub fn default_chain(&self) -> Option<&FilterChain> {
        self.filter_chains().iter().find(|chain| is_default_chain(chain))
    }

    /// Chains matched by exact server name.
    pub fn host_chains(&self) -> impl Iterator<Item = &FilterChain> {
        self.filter_chains().iter().filter(|chain| !is_default_chain(chain))
    }

    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|cluster| cluster.name == name)
    }

    pub fn secret(&self, name: &str) -> Option<&Secret> {
        self.secrets.iter().find(|secret| secret.name == name)
    }

    /// Hostnames with a terminating chain, in chain order.
    pub fn intercepted_hosts(&self) -> Vec<&str> {
        self.host_chains()
            .filter_map(|chain| chain.filter_chain_match.as_ref())
            .flat_map(|m| m.server_names.iter().map(String::as_str))
            .collect()
    }

    pub fn resource_count(&self) -> usize {
        1 + self.clusters.len() + self.secrets.len()
    }

    /// Encode every resource, keyed by type URL. Each type is always present,
    /// so an empty secret list replaces previously published secrets.
    pub fn into_resources(self) -> ResourcesByType {
        let mut resources = ResourcesByType::new();

        resources.insert(
            LISTENER_TYPE_URL.to_string(),
            vec![BuiltResource::new(self.listener.name.clone(), LISTENER_TYPE_URL, &self.listener)],
        );
        resources.insert(
            CLUSTER_TYPE_URL.to_string(),
            self.clusters
                .iter()
                .map(|cluster| BuiltResource::new(cluster.name.clone(), CLUSTER_TYPE_URL, cluster))
                .collect(),
        );
        resources.insert(
            SECRET_TYPE_URL.to_string(),
            self.secrets
                .iter()
                .map(|secret| BuiltResource::new(secret.name.clone(), SECRET_TYPE_URL, secret))
                .collect(),
        );

        resources
    }
}

pub(crate) fn is_default_chain(chain: &FilterChain) -> bool {
    chain.filter_chain_match.as_ref().is_none_or(|m| m.server_names.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::listener::v3::FilterChainMatch;

    fn chain(server_names: &[&str]) -> FilterChain {
        FilterChain {
            filter_chain_match: Some(FilterChainMatch {
                server_names: server_names.iter().map(|s| s.to_string()).collect(),
                transport_protocol: "tls".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_and_host_chains() {
        let graph = ResourceGraph {
            listener: Listener {
                name: "listener_0".to_string(),
                filter_chains: vec![chain(&[]), chain(&["a.example"]), chain(&["b.example"])],
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(graph.default_chain().is_some());
        assert_eq!(graph.host_chains().count(), 2);
        assert_eq!(graph.intercepted_hosts(), vec!["a.example", "b.example"]);
    }

    #[test]
    fn test_into_resources_always_lists_every_type() {
        let graph = ResourceGraph {
            listener: Listener { name: "listener_0".to_string(), ..Default::default() },
            clusters: vec![Cluster { name: "c".to_string(), ..Default::default() }],
            secrets: Vec::new(),
        };
        assert_eq!(graph.resource_count(), 2);

        let resources = graph.into_resources();
        assert_eq!(resources.len(), 3);
        assert_eq!(resources[LISTENER_TYPE_URL][0].name, "listener_0");
        assert_eq!(resources[CLUSTER_TYPE_URL][0].type_url(), CLUSTER_TYPE_URL);
        assert!(resources[SECRET_TYPE_URL].is_empty());
    }

    #[test]
    fn test_pack_round_trips() {
        let cluster = Cluster { name: "c".to_string(), ..Default::default() };
        let any = pack(CLUSTER_TYPE_URL, &cluster);
        assert_eq!(Cluster::decode(any.value.as_slice()).unwrap(), cluster);
    }
}
