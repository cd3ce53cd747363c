use crate::{Error, Result};
use envoy_types::pb::envoy::config::{
    cluster::v3::{
        cluster::{ClusterDiscoveryType, DiscoveryType, LbPolicy},
        Cluster,
    },
    core::v3::{
        address::Address as AddressType, socket_address::PortSpecifier,
        transport_socket::ConfigType as TransportSocketConfigType, Address, SocketAddress,
        TransportSocket,
    },
    endpoint::v3::{lb_endpoint, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints},
};

use super::helpers::encode_check;

pub fn validate_envoy_cluster(cluster: &Cluster) -> Result<()> {
    encode_check(cluster, "Invalid cluster configuration")?;

    if cluster.name.is_empty() {
        return Err(Error::validation_field("Cluster name cannot be empty", "name"));
    }

    if !is_valid_lb_policy(cluster.lb_policy) {
        return Err(Error::validation_field("Invalid load balancing policy", "lb_policy"));
    }

    match &cluster.cluster_discovery_type {
        Some(ClusterDiscoveryType::Type(kind)) => {
            let Some(load_assignment) = &cluster.load_assignment else {
                return Err(Error::validation_field(
                    "Load assignment is required for built-in discovery types",
                    "load_assignment",
                ));
            };
            validate_cluster_load_assignment(load_assignment)?;

            // LOGICAL_DNS resolves exactly one host.
            if *kind == DiscoveryType::LogicalDns as i32 && endpoint_count(load_assignment) != 1 {
                return Err(Error::validation_field(
                    "LOGICAL_DNS clusters must have exactly one endpoint",
                    "load_assignment",
                ));
            }
        }
        Some(ClusterDiscoveryType::ClusterType(custom)) => {
            if custom.name.is_empty() || custom.typed_config.is_none() {
                return Err(Error::validation_field(
                    "Custom cluster type requires a name and typed config",
                    "cluster_type",
                ));
            }
        }
        None => {
            return Err(Error::validation_field(
                "Cluster discovery type is required",
                "cluster_discovery_type",
            ))
        }
    }

    if let Some(socket) = &cluster.transport_socket {
        validate_transport_socket(socket)?;
    }

    Ok(())
}

pub(crate) fn validate_transport_socket(socket: &TransportSocket) -> Result<()> {
    if socket.name.is_empty() {
        return Err(Error::validation_field("Transport socket name cannot be empty", "transport_socket"));
    }
    match &socket.config_type {
        Some(TransportSocketConfigType::TypedConfig(any)) if !any.type_url.is_empty() => Ok(()),
        _ => Err(Error::validation_field(
            "Transport socket requires a typed config",
            "transport_socket",
        )),
    }
}

fn endpoint_count(load_assignment: &ClusterLoadAssignment) -> usize {
    load_assignment.endpoints.iter().map(|locality| locality.lb_endpoints.len()).sum()
}

fn validate_cluster_load_assignment(load_assignment: &ClusterLoadAssignment) -> Result<()> {
    if load_assignment.cluster_name.is_empty() {
        return Err(Error::validation_field("Cluster name cannot be empty", "cluster_name"));
    }

    if load_assignment.endpoints.is_empty() {
        return Err(Error::validation_field("At least one endpoint is required", "endpoints"));
    }

    for (index, locality_endpoints) in load_assignment.endpoints.iter().enumerate() {
        validate_locality_lb_endpoints(locality_endpoints).map_err(|e| {
            Error::validation_field(
                format!("Locality endpoints {} validation failed: {}", index, e),
                "endpoints",
            )
        })?;
    }

    Ok(())
}

fn validate_locality_lb_endpoints(locality_endpoints: &LocalityLbEndpoints) -> Result<()> {
    if locality_endpoints.lb_endpoints.is_empty() {
        return Err(Error::validation("At least one load balancing endpoint is required"));
    }

    for (index, lb_endpoint) in locality_endpoints.lb_endpoints.iter().enumerate() {
        validate_lb_endpoint(lb_endpoint).map_err(|e| {
            Error::validation(format!("Load balancing endpoint {} validation failed: {}", index, e))
        })?;
    }

    Ok(())
}

fn validate_lb_endpoint(lb_endpoint: &LbEndpoint) -> Result<()> {
    match &lb_endpoint.host_identifier {
        Some(lb_endpoint::HostIdentifier::Endpoint(endpoint)) => validate_endpoint(endpoint),
        Some(lb_endpoint::HostIdentifier::EndpointName(name)) => {
            if name.is_empty() {
                Err(Error::validation("Endpoint name cannot be empty"))
            } else {
                Ok(())
            }
        }
        None => Err(Error::validation("Host identifier is required")),
    }
}

fn validate_endpoint(endpoint: &Endpoint) -> Result<()> {
    if let Some(address) = &endpoint.address {
        validate_address(address)
    } else {
        Err(Error::validation("Endpoint address is required"))
    }
}

pub(crate) fn validate_address(address: &Address) -> Result<()> {
    match &address.address {
        Some(AddressType::SocketAddress(socket_addr)) => validate_socket_address(socket_addr),
        Some(AddressType::Pipe(pipe)) => {
            if pipe.path.is_empty() {
                Err(Error::validation("Pipe path cannot be empty"))
            } else {
                Ok(())
            }
        }
        Some(AddressType::EnvoyInternalAddress(_)) => Ok(()),
        None => Err(Error::validation("Address type is required")),
    }
}

pub(crate) fn validate_socket_address(socket_addr: &SocketAddress) -> Result<()> {
    if socket_addr.address.is_empty() {
        return Err(Error::validation("Socket address cannot be empty"));
    }

    match &socket_addr.port_specifier {
        Some(PortSpecifier::PortValue(port)) => {
            if *port == 0 || *port > 65535 {
                return Err(Error::validation("Port must be between 1 and 65535"));
            }
        }
        Some(PortSpecifier::NamedPort(name)) => {
            if name.is_empty() {
                return Err(Error::validation("Named port cannot be empty"));
            }
        }
        None => return Err(Error::validation("Port specifier is required")),
    }

    Ok(())
}

fn is_valid_lb_policy(policy: i32) -> bool {
    LbPolicy::try_from(policy).is_ok()
}
