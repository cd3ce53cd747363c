mod access_log_service;

pub use access_log_service::SniIngestService;
