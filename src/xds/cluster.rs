//! Cluster builders
//!
//! Two clusters are always present: the log sink the proxy streams access
//! logs to, and the dynamic forward proxy cluster behind the passthrough
//! chain. Every intercepted hostname adds a manual upstream cluster of the
//! same name.

use std::collections::HashMap;

use envoy_types::pb::envoy::config::cluster::v3::cluster::{
    ClusterDiscoveryType, CustomClusterType, DiscoveryType, DnsLookupFamily, LbPolicy,
};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::core::v3::transport_socket::ConfigType as TransportSocketConfigType;
use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, socket_address, Address, Http1ProtocolOptions,
    Http2ProtocolOptions, SocketAddress, TransportSocket,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::envoy::extensions::clusters::dynamic_forward_proxy::v3::{
    cluster_config::ClusterImplementationSpecifier, ClusterConfig,
};
use envoy_types::pb::envoy::extensions::common::dynamic_forward_proxy::v3::DnsCacheConfig;
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    common_tls_context::ValidationContextType, CommonTlsContext, UpstreamTlsContext,
};
use envoy_types::pb::envoy::extensions::upstreams::http::v3::http_protocol_options::explicit_http_config::ProtocolConfig;
use envoy_types::pb::envoy::extensions::upstreams::http::v3::{
    http_protocol_options::{AutoHttpConfig, ExplicitHttpConfig, UpstreamProtocolOptions},
    HttpProtocolOptions,
};
use envoy_types::pb::google::protobuf::Any;

use super::resources::{
    pack, DYNAMIC_FORWARD_PROXY_CLUSTER_CONFIG_TYPE_URL, HTTP_PROTOCOL_OPTIONS_KEY,
    HTTP_PROTOCOL_OPTIONS_TYPE_URL, TLS_TRANSPORT_SOCKET, UPSTREAM_TLS_CONTEXT_TYPE_URL,
};
use super::secret::{sds_secret_config, validation_secret_name};
use super::{DNS_CACHE_NAME, DYNAMIC_FORWARD_PROXY_CLUSTER};

pub const DYNAMIC_FORWARD_PROXY_CLUSTER_TYPE: &str = "envoy.clusters.dynamic_forward_proxy";

/// Port every intercepted origin is dialled on.
pub const UPSTREAM_TLS_PORT: u32 = 443;

/// DNS cache shared by the SNI filter and the forward proxy cluster.
pub fn dns_cache_config() -> DnsCacheConfig {
    DnsCacheConfig {
        name: DNS_CACHE_NAME.to_string(),
        dns_lookup_family: DnsLookupFamily::V4Only as i32,
        ..Default::default()
    }
}

/// gRPC cluster for the access log service, HTTP/2 only.
pub fn log_sink_cluster(name: &str, address: &str, port: u16) -> Cluster {
    let options = HttpProtocolOptions {
        upstream_protocol_options: Some(UpstreamProtocolOptions::ExplicitHttpConfig(
            ExplicitHttpConfig {
                protocol_config: Some(ProtocolConfig::Http2ProtocolOptions(
                    Http2ProtocolOptions::default(),
                )),
            },
        )),
        ..Default::default()
    };

    Cluster {
        name: name.to_string(),
        lb_policy: LbPolicy::RoundRobin as i32,
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::LogicalDns as i32)),
        dns_lookup_family: DnsLookupFamily::V4Only as i32,
        load_assignment: Some(load_assignment(name, address, u32::from(port))),
        typed_extension_protocol_options: protocol_options(&options),
        ..Default::default()
    }
}

/// Cluster resolving arbitrary origins through the shared DNS cache.
pub fn dynamic_forward_proxy_cluster() -> Cluster {
    let config = ClusterConfig {
        cluster_implementation_specifier: Some(ClusterImplementationSpecifier::DnsCacheConfig(
            dns_cache_config(),
        )),
        allow_coalesced_connections: true,
        ..Default::default()
    };

    Cluster {
        name: DYNAMIC_FORWARD_PROXY_CLUSTER.to_string(),
        lb_policy: LbPolicy::ClusterProvided as i32,
        dns_lookup_family: DnsLookupFamily::V4Only as i32,
        cluster_discovery_type: Some(ClusterDiscoveryType::ClusterType(CustomClusterType {
            name: DYNAMIC_FORWARD_PROXY_CLUSTER_TYPE.to_string(),
            typed_config: Some(pack(DYNAMIC_FORWARD_PROXY_CLUSTER_CONFIG_TYPE_URL, &config)),
        })),
        ..Default::default()
    }
}

/// Cluster named after `sni` that re-originates TLS to `sni:443` and checks
/// the origin against the hostname's validation secret.
pub fn manual_upstream_cluster(sni: &str) -> Cluster {
    let options = HttpProtocolOptions {
        upstream_protocol_options: Some(UpstreamProtocolOptions::AutoConfig(AutoHttpConfig {
            http_protocol_options: Some(Http1ProtocolOptions::default()),
            http2_protocol_options: Some(Http2ProtocolOptions::default()),
            ..Default::default()
        })),
        ..Default::default()
    };

    let tls_context = UpstreamTlsContext {
        common_tls_context: Some(CommonTlsContext {
            validation_context_type: Some(ValidationContextType::ValidationContextSdsSecretConfig(
                sds_secret_config(&validation_secret_name(sni)),
            )),
            ..Default::default()
        }),
        sni: sni.to_string(),
        ..Default::default()
    };

    Cluster {
        name: sni.to_string(),
        lb_policy: LbPolicy::RoundRobin as i32,
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::LogicalDns as i32)),
        dns_lookup_family: DnsLookupFamily::V4Only as i32,
        load_assignment: Some(load_assignment(sni, sni, UPSTREAM_TLS_PORT)),
        typed_extension_protocol_options: protocol_options(&options),
        transport_socket: Some(TransportSocket {
            name: TLS_TRANSPORT_SOCKET.to_string(),
            config_type: Some(TransportSocketConfigType::TypedConfig(pack(
                UPSTREAM_TLS_CONTEXT_TYPE_URL,
                &tls_context,
            ))),
        }),
        ..Default::default()
    }
}

fn protocol_options(options: &HttpProtocolOptions) -> HashMap<String, Any> {
    let mut map = HashMap::new();
    map.insert(HTTP_PROTOCOL_OPTIONS_KEY.to_string(), pack(HTTP_PROTOCOL_OPTIONS_TYPE_URL, options));
    map
}

pub(crate) fn socket_address(address: &str, port: u32) -> Address {
    Address {
        address: Some(AddressType::SocketAddress(SocketAddress {
            protocol: socket_address::Protocol::Tcp as i32,
            address: address.to_string(),
            port_specifier: Some(socket_address::PortSpecifier::PortValue(port)),
            ..Default::default()
        })),
    }
}

fn load_assignment(cluster_name: &str, address: &str, port: u32) -> ClusterLoadAssignment {
    ClusterLoadAssignment {
        cluster_name: cluster_name.to_string(),
        endpoints: vec![LocalityLbEndpoints {
            lb_endpoints: vec![LbEndpoint {
                host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(Endpoint {
                    address: Some(socket_address(address, port)),
                    ..Default::default()
                })),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Host and port of a single-endpoint cluster.
#[cfg(test)]
pub(crate) fn endpoint_target(cluster: &Cluster) -> Option<(&str, u32)> {
    let endpoint = cluster.load_assignment.as_ref()?.endpoints.first()?.lb_endpoints.first()?;
    let Some(lb_endpoint::HostIdentifier::Endpoint(endpoint)) = &endpoint.host_identifier else {
        return None;
    };
    match endpoint.address.as_ref()?.address.as_ref()? {
        AddressType::SocketAddress(socket) => match socket.port_specifier {
            Some(socket_address::PortSpecifier::PortValue(port)) => {
                Some((socket.address.as_str(), port))
            }
            _ => None,
        },
        _ => None,
    }
}
