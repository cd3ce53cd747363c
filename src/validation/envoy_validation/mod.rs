//! Envoy-types protocol validation helpers grouped by resource type.

mod cluster;
pub(crate) mod helpers;
mod listener;
mod route;
mod secret;

pub use cluster::validate_envoy_cluster;
pub use listener::{validate_envoy_filter_chain, validate_envoy_listener};
pub use route::validate_envoy_route_configuration;
pub use secret::validate_envoy_secret;

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::cluster::v3::Cluster;

    #[test]
    fn smoke_encode_check() {
        let cluster = Cluster { name: "test".to_string(), ..Default::default() };
        assert!(helpers::encode_check(&cluster, "cluster").is_ok());
        assert!(helpers::encode_check(&Cluster::default(), "cluster").is_err());
    }

    #[test]
    fn synthesized_resources_pass() {
        let config = crate::config::ProxyConfig::default();
        assert!(validate_envoy_cluster(&crate::xds::cluster::dynamic_forward_proxy_cluster()).is_ok());
        assert!(validate_envoy_cluster(&crate::xds::cluster::manual_upstream_cluster("a.example")).is_ok());
        assert!(validate_envoy_filter_chain(&crate::xds::listener::host_filter_chain(
            "a.example",
            "/dev/stdout"
        ))
        .is_ok());
        let listener = crate::xds::listener::listener(
            &config,
            vec![crate::xds::listener::default_filter_chain(&config)],
        );
        assert!(validate_envoy_listener(&listener).is_ok());
    }
}
