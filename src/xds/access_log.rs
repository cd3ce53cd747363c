//! Access log sinks attached to the listener's filter chains
//!
//! Every chain logs to a local file. The passthrough chain additionally
//! streams TCP logs to the log-sink cluster, which is how hostnames seen in
//! traffic reach the ingest service.

use envoy_types::pb::envoy::config::{
    accesslog::v3::{access_log::ConfigType as AccessLogConfigType, AccessLog},
    core::v3::{grpc_service, ApiVersion, GrpcService},
};
use envoy_types::pb::envoy::extensions::access_loggers::{
    file::v3::FileAccessLog,
    grpc::v3::{CommonGrpcAccessLogConfig, TcpGrpcAccessLogConfig},
};

use super::resources::{pack, FILE_ACCESS_LOG_TYPE_URL, TCP_GRPC_ACCESS_LOG_TYPE_URL};

pub const FILE_ACCESS_LOGGER: &str = "envoy.access_loggers.file";
pub const TCP_GRPC_ACCESS_LOGGER: &str = "envoy.access_loggers.tcp_grpc";

/// Log name used by the passthrough chain's gRPC sink.
pub const TCP_INGRESS_LOG_NAME: &str = "tcp_ingress";

/// Local file access log with Envoy's default format.
pub fn file_access_log(path: &str) -> AccessLog {
    let config = FileAccessLog { path: path.to_string(), ..Default::default() };

    AccessLog {
        name: FILE_ACCESS_LOGGER.to_string(),
        filter: None,
        config_type: Some(AccessLogConfigType::TypedConfig(pack(FILE_ACCESS_LOG_TYPE_URL, &config))),
    }
}

/// TCP access log streamed over gRPC to `cluster_name`.
pub fn tcp_grpc_access_log(log_name: &str, cluster_name: &str) -> AccessLog {
    let grpc_service = GrpcService {
        target_specifier: Some(grpc_service::TargetSpecifier::EnvoyGrpc(grpc_service::EnvoyGrpc {
            cluster_name: cluster_name.to_string(),
            ..Default::default()
        })),
        ..Default::default()
    };

    let config = TcpGrpcAccessLogConfig {
        common_config: Some(CommonGrpcAccessLogConfig {
            log_name: log_name.to_string(),
            grpc_service: Some(grpc_service),
            transport_api_version: ApiVersion::V3 as i32,
            ..Default::default()
        }),
    };

    AccessLog {
        name: TCP_GRPC_ACCESS_LOGGER.to_string(),
        filter: None,
        config_type: Some(AccessLogConfigType::TypedConfig(pack(
            TCP_GRPC_ACCESS_LOG_TYPE_URL,
            &config,
        ))),
    }
}

/// Cluster a gRPC access log streams to, if `log` is one.
pub(crate) fn grpc_log_cluster(log: &AccessLog) -> Option<String> {
    use prost::Message;

    match &log.config_type {
        Some(AccessLogConfigType::TypedConfig(any))
            if any.type_url == TCP_GRPC_ACCESS_LOG_TYPE_URL =>
        {
            let config = TcpGrpcAccessLogConfig::decode(any.value.as_slice()).ok()?;
            match config.common_config?.grpc_service?.target_specifier? {
                grpc_service::TargetSpecifier::EnvoyGrpc(envoy) => Some(envoy.cluster_name),
                _ => None,
            }
        }
        _ => None,
    }
}
