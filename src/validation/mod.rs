//! # Validation Module
//!
//! Two layers guard every synthesized configuration:
//! 1. Per-resource schema checks on the envoy-types messages, including an
//!    `.encode_to_vec()` round through prost
//! 2. Cross-resource integrity: every name a chain, route, cluster or access
//!    log refers to must resolve inside the same graph
//!
//! A schema failure only disqualifies the hostname that produced it. An
//! integrity failure means the synthesizer itself is wrong and the whole
//! graph is rejected.

pub mod envoy_validation;
pub mod integrity;

pub use envoy_validation::{
    validate_envoy_cluster, validate_envoy_filter_chain, validate_envoy_listener,
    validate_envoy_route_configuration, validate_envoy_secret,
};
pub use integrity::{check_integrity, IntegrityError};
