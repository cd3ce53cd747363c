use crate::{Error, Result};
use envoy_types::pb::envoy::config::listener::v3::{
    filter::ConfigType, listener_filter::ConfigType as ListenerFilterConfigType, Filter,
    FilterChain, Listener,
};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::RouteSpecifier, HttpConnectionManager,
};

use super::{
    cluster::{validate_address, validate_transport_socket},
    helpers::{encode_check, typed_config_check},
    route::validate_envoy_route_configuration,
};
use crate::xds::resources::HTTP_CONNECTION_MANAGER_TYPE_URL;

pub fn validate_envoy_listener(listener: &Listener) -> Result<()> {
    encode_check(listener, "Invalid listener configuration")?;

    if listener.name.is_empty() {
        return Err(Error::validation_field("Listener name cannot be empty", "name"));
    }

    match &listener.address {
        Some(address) => validate_address(address)?,
        None => return Err(Error::validation_field("Listener address is required", "address")),
    }

    for filter in &listener.listener_filters {
        match &filter.config_type {
            Some(ListenerFilterConfigType::TypedConfig(_)) if !filter.name.is_empty() => {}
            _ => {
                return Err(Error::validation_field(
                    "Listener filters require a name and typed config",
                    "listener_filters",
                ))
            }
        }
    }

    if listener.filter_chains.is_empty() {
        return Err(Error::validation_field(
            "At least one filter chain is required",
            "filter_chains",
        ));
    }

    for (index, filter_chain) in listener.filter_chains.iter().enumerate() {
        validate_envoy_filter_chain(filter_chain).map_err(|e| {
            Error::validation_field(
                format!("Filter chain {} validation failed: {}", index, e),
                "filter_chains",
            )
        })?;
    }

    Ok(())
}

pub fn validate_envoy_filter_chain(filter_chain: &FilterChain) -> Result<()> {
    if let Some(chain_match) = &filter_chain.filter_chain_match {
        if chain_match.server_names.iter().any(String::is_empty) {
            return Err(Error::validation("Server names cannot be empty"));
        }
    }

    if let Some(socket) = &filter_chain.transport_socket {
        validate_transport_socket(socket)?;
    }

    if filter_chain.filters.is_empty() {
        return Err(Error::validation("At least one filter is required"));
    }

    for (index, filter) in filter_chain.filters.iter().enumerate() {
        validate_filter(filter).map_err(|e| {
            Error::validation(format!("Filter {} validation failed: {}", index, e))
        })?;
    }

    Ok(())
}

fn validate_filter(filter: &Filter) -> Result<()> {
    if filter.name.is_empty() {
        return Err(Error::validation("Filter name cannot be empty"));
    }

    match &filter.config_type {
        Some(ConfigType::TypedConfig(any)) if any.type_url == HTTP_CONNECTION_MANAGER_TYPE_URL => {
            let hcm: HttpConnectionManager = typed_config_check(any, HTTP_CONNECTION_MANAGER_TYPE_URL)?;
            match &hcm.route_specifier {
                Some(RouteSpecifier::RouteConfig(route_config)) => {
                    validate_envoy_route_configuration(route_config)
                }
                Some(_) => Ok(()),
                None => Err(Error::validation("HTTP connection manager requires a route")),
            }
        }
        Some(ConfigType::TypedConfig(any)) if !any.type_url.is_empty() => Ok(()),
        Some(ConfigType::ConfigDiscovery(_)) => Ok(()),
        _ => Err(Error::validation("Filter configuration is required")),
    }
}
