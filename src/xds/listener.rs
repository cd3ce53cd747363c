//! Listener and filter chain builders
//!
//! The listener sniffs the TLS client hello and picks a chain by server
//! name. Chain 0 is the passthrough chain for hostnames without a
//! certificate; each later chain terminates TLS for one hostname and hands
//! the decrypted HTTP to an HTTP connection manager.

use envoy_types::pb::envoy::config::accesslog::v3::AccessLog;
use envoy_types::pb::envoy::config::core::v3::{
    transport_socket::ConfigType as TransportSocketConfigType, TransportSocket,
};
use envoy_types::pb::envoy::config::listener::v3::{
    filter::ConfigType as FilterConfigType, listener_filter::ConfigType as ListenerFilterConfigType,
    Filter, FilterChain, FilterChainMatch, Listener, ListenerFilter,
};
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router;
use envoy_types::pb::envoy::extensions::filters::listener::tls_inspector::v3::TlsInspector;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier, UpgradeConfig},
    http_filter::ConfigType as HttpFilterConfigType,
    HttpConnectionManager, HttpFilter,
};
use envoy_types::pb::envoy::extensions::filters::network::sni_dynamic_forward_proxy::v3::{
    filter_config::PortSpecifier, FilterConfig as SniDynamicForwardProxyConfig,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{
    tcp_proxy::ClusterSpecifier, TcpProxy,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    CommonTlsContext, DownstreamTlsContext,
};
use envoy_types::pb::google::protobuf::BoolValue;

use super::access_log::{file_access_log, tcp_grpc_access_log, TCP_INGRESS_LOG_NAME};
use super::cluster::{dns_cache_config, socket_address, UPSTREAM_TLS_PORT};
use super::resources::{
    pack, DOWNSTREAM_TLS_CONTEXT_TYPE_URL, HTTP_CONNECTION_MANAGER_TYPE_URL, ROUTER_TYPE_URL,
    SNI_DYNAMIC_FORWARD_PROXY_TYPE_URL, TCP_PROXY_TYPE_URL, TLS_INSPECTOR_TYPE_URL,
    TLS_TRANSPORT_SOCKET,
};
use super::route::host_route_configuration;
use super::secret::{certificate_secret_name, sds_secret_config};
use super::DYNAMIC_FORWARD_PROXY_CLUSTER;
use crate::config::ProxyConfig;

pub const TLS_INSPECTOR_FILTER: &str = "envoy.filters.listener.tls_inspector";
pub const SNI_DYNAMIC_FORWARD_PROXY_FILTER: &str = "envoy.filters.network.sni_dynamic_forward_proxy";
pub const TCP_PROXY_FILTER: &str = "envoy.filters.network.tcp_proxy";
pub const HTTP_CONNECTION_MANAGER_FILTER: &str = "envoy.filters.network.http_connection_manager";
pub const ROUTER_FILTER: &str = "envoy.filters.http.router";

pub const TLS_TRANSPORT_PROTOCOL: &str = "tls";
pub const TCP_INGRESS_STAT_PREFIX: &str = "tcp_ingress";
pub const ALPN_PROTOCOLS: &str = "h2,http/1.1";

/// Listener fronted by the TLS inspector, carrying `filter_chains` in order.
pub fn listener(config: &ProxyConfig, filter_chains: Vec<FilterChain>) -> Listener {
    Listener {
        name: config.listener_name.clone(),
        address: Some(socket_address(&config.listener_address, u32::from(config.listener_port))),
        listener_filters: vec![tls_inspector_filter()],
        filter_chains,
        ..Default::default()
    }
}

pub fn tls_inspector_filter() -> ListenerFilter {
    ListenerFilter {
        name: TLS_INSPECTOR_FILTER.to_string(),
        config_type: Some(ListenerFilterConfigType::TypedConfig(pack(
            TLS_INSPECTOR_TYPE_URL,
            &TlsInspector::default(),
        ))),
        ..Default::default()
    }
}

/// Passthrough chain: any TLS hello, forwarded at L4 to wherever SNI points.
pub fn default_filter_chain(config: &ProxyConfig) -> FilterChain {
    let access_logs = vec![
        file_access_log(&config.access_log_path),
        tcp_grpc_access_log(TCP_INGRESS_LOG_NAME, &config.log_sink_cluster),
    ];

    FilterChain {
        filter_chain_match: Some(FilterChainMatch {
            transport_protocol: TLS_TRANSPORT_PROTOCOL.to_string(),
            ..Default::default()
        }),
        filters: vec![
            sni_dynamic_forward_proxy_filter(),
            tcp_proxy_filter(DYNAMIC_FORWARD_PROXY_CLUSTER, access_logs),
        ],
        ..Default::default()
    }
}

pub fn sni_dynamic_forward_proxy_filter() -> Filter {
    let config = SniDynamicForwardProxyConfig {
        dns_cache_config: Some(dns_cache_config()),
        port_specifier: Some(PortSpecifier::PortValue(UPSTREAM_TLS_PORT)),
        ..Default::default()
    };
    typed_filter(SNI_DYNAMIC_FORWARD_PROXY_FILTER, pack(SNI_DYNAMIC_FORWARD_PROXY_TYPE_URL, &config))
}

pub fn tcp_proxy_filter(cluster: &str, access_log: Vec<AccessLog>) -> Filter {
    let config = TcpProxy {
        stat_prefix: TCP_INGRESS_STAT_PREFIX.to_string(),
        cluster_specifier: Some(ClusterSpecifier::Cluster(cluster.to_string())),
        access_log,
        ..Default::default()
    };
    typed_filter(TCP_PROXY_FILTER, pack(TCP_PROXY_TYPE_URL, &config))
}

/// Terminating chain for one hostname.
pub fn host_filter_chain(sni: &str, access_log_path: &str) -> FilterChain {
    FilterChain {
        filter_chain_match: Some(FilterChainMatch {
            server_names: vec![sni.to_string()],
            transport_protocol: TLS_TRANSPORT_PROTOCOL.to_string(),
            ..Default::default()
        }),
        transport_socket: Some(downstream_tls_transport_socket(sni)),
        filters: vec![typed_filter(
            HTTP_CONNECTION_MANAGER_FILTER,
            pack(HTTP_CONNECTION_MANAGER_TYPE_URL, &http_connection_manager(sni, access_log_path)),
        )],
        ..Default::default()
    }
}

/// Downstream TLS using the hostname's certificate secret.
pub fn downstream_tls_transport_socket(sni: &str) -> TransportSocket {
    let context = DownstreamTlsContext {
        common_tls_context: Some(CommonTlsContext {
            alpn_protocols: vec![ALPN_PROTOCOLS.to_string()],
            tls_certificate_sds_secret_configs: vec![sds_secret_config(&certificate_secret_name(
                sni,
            ))],
            ..Default::default()
        }),
        ..Default::default()
    };

    TransportSocket {
        name: TLS_TRANSPORT_SOCKET.to_string(),
        config_type: Some(TransportSocketConfigType::TypedConfig(pack(
            DOWNSTREAM_TLS_CONTEXT_TYPE_URL,
            &context,
        ))),
    }
}

pub fn http_connection_manager(sni: &str, access_log_path: &str) -> HttpConnectionManager {
    #[allow(deprecated)]
    let router_config = Router { start_child_span: true, ..Default::default() };
    let router = HttpFilter {
        name: ROUTER_FILTER.to_string(),
        config_type: Some(HttpFilterConfigType::TypedConfig(pack(ROUTER_TYPE_URL, &router_config))),
        ..Default::default()
    };

    HttpConnectionManager {
        stat_prefix: sni.to_string(),
        codec_type: CodecType::Auto as i32,
        upgrade_configs: vec![UpgradeConfig {
            upgrade_type: "websocket".to_string(),
            enabled: Some(BoolValue { value: true }),
            ..Default::default()
        }],
        access_log: vec![file_access_log(access_log_path)],
        http_filters: vec![router],
        route_specifier: Some(RouteSpecifier::RouteConfig(host_route_configuration(sni))),
        ..Default::default()
    }
}

fn typed_filter(name: &str, config: envoy_types::pb::google::protobuf::Any) -> Filter {
    Filter { name: name.to_string(), config_type: Some(FilterConfigType::TypedConfig(config)) }
}
