use crate::{Error, Result};
use envoy_types::pb::envoy::config::route::v3::{
    route::Action as RouteActionEnum, route_action::ClusterSpecifier, Route, RouteAction,
    RouteConfiguration, RouteMatch, VirtualHost,
};

use super::helpers::encode_check;

pub fn validate_envoy_route_configuration(route_config: &RouteConfiguration) -> Result<()> {
    encode_check(route_config, "Invalid route configuration")?;

    if route_config.name.is_empty() {
        return Err(Error::validation_field("Route configuration name cannot be empty", "name"));
    }

    if route_config.virtual_hosts.is_empty() {
        return Err(Error::validation_field(
            "At least one virtual host is required",
            "virtual_hosts",
        ));
    }

    for (index, vhost) in route_config.virtual_hosts.iter().enumerate() {
        validate_virtual_host(vhost).map_err(|e| {
            Error::validation_field(
                format!("Virtual host {} validation failed: {}", index, e),
                "virtual_hosts",
            )
        })?;
    }

    Ok(())
}

fn validate_virtual_host(vhost: &VirtualHost) -> Result<()> {
    if vhost.name.is_empty() {
        return Err(Error::validation("Virtual host name cannot be empty"));
    }

    if vhost.domains.is_empty() {
        return Err(Error::validation("At least one domain is required"));
    }

    if vhost.domains.iter().any(String::is_empty) {
        return Err(Error::validation("Domain cannot be empty"));
    }

    if vhost.routes.is_empty() {
        return Err(Error::validation("At least one route is required"));
    }

    for (index, route) in vhost.routes.iter().enumerate() {
        validate_route(route)
            .map_err(|e| Error::validation(format!("Route {} validation failed: {}", index, e)))?;
    }

    Ok(())
}

fn validate_route(route: &Route) -> Result<()> {
    match &route.r#match {
        Some(route_match) => validate_route_match(route_match)?,
        None => return Err(Error::validation("Route match is required")),
    }

    match &route.action {
        Some(RouteActionEnum::Route(route_action)) => validate_route_action(route_action),
        Some(_) => Ok(()),
        None => Err(Error::validation("Route action is required")),
    }
}

fn validate_route_match(route_match: &RouteMatch) -> Result<()> {
    if route_match.path_specifier.is_none() {
        return Err(Error::validation("Path specifier is required"));
    }

    Ok(())
}

fn validate_route_action(route_action: &RouteAction) -> Result<()> {
    match &route_action.cluster_specifier {
        Some(ClusterSpecifier::Cluster(name)) if name.is_empty() => {
            Err(Error::validation("Cluster name cannot be empty"))
        }
        Some(ClusterSpecifier::ClusterHeader(header)) if header.is_empty() => {
            Err(Error::validation("Cluster header cannot be empty"))
        }
        Some(ClusterSpecifier::WeightedClusters(weighted)) if weighted.clusters.is_empty() => {
            Err(Error::validation("At least one weighted cluster is required"))
        }
        Some(_) => Ok(()),
        None => Err(Error::validation("Cluster specifier is required")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::route::host_route_configuration;

    #[test]
    fn envoy_route_configuration_validation() {
        assert!(validate_envoy_route_configuration(&host_route_configuration("example.com")).is_ok());

        let invalid_route = RouteConfiguration {
            name: "".to_string(),
            virtual_hosts: vec![],
            ..Default::default()
        };
        assert!(validate_envoy_route_configuration(&invalid_route).is_err());
    }

    #[test]
    fn route_without_cluster_is_rejected() {
        let mut config = host_route_configuration("example.com");
        if let Some(RouteActionEnum::Route(action)) = &mut config.virtual_hosts[0].routes[0].action {
            action.cluster_specifier = None;
        }
        assert!(validate_envoy_route_configuration(&config).is_err());
    }
}
