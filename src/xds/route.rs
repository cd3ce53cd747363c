//! Inline route configuration for intercepted hostnames

use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_action::ClusterSpecifier, route_match::PathSpecifier, RetryPolicy, Route,
    RouteAction, RouteConfiguration, RouteMatch, VirtualHost,
};

/// Retry condition applied to every intercepted route.
pub const RETRY_ON: &str = "reset";

/// Single virtual host sending every path for `sni` to the cluster of the
/// same name.
pub fn host_route_configuration(sni: &str) -> RouteConfiguration {
    let route = Route {
        r#match: Some(RouteMatch {
            path_specifier: Some(PathSpecifier::Prefix("/".to_string())),
            ..Default::default()
        }),
        action: Some(Action::Route(RouteAction {
            cluster_specifier: Some(ClusterSpecifier::Cluster(sni.to_string())),
            retry_policy: Some(RetryPolicy { retry_on: RETRY_ON.to_string(), ..Default::default() }),
            ..Default::default()
        })),
        ..Default::default()
    };

    RouteConfiguration {
        name: sni.to_string(),
        virtual_hosts: vec![VirtualHost {
            name: sni.to_string(),
            domains: vec![sni.to_string()],
            routes: vec![route],
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Clusters named by the route actions of `config`.
pub(crate) fn route_clusters(config: &RouteConfiguration) -> Vec<&str> {
    config
        .virtual_hosts
        .iter()
        .flat_map(|vhost| vhost.routes.iter())
        .filter_map(|route| match &route.action {
            Some(Action::Route(action)) => match &action.cluster_specifier {
                Some(ClusterSpecifier::Cluster(name)) => Some(name.as_str()),
                _ => None,
            },
            _ => None,
        })
        .collect()
}
